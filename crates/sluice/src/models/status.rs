/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Per-query mutable status: lifecycle state, counters, and failure record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::keys::QueryKey;

/// Lifecycle state of a query.
///
/// `Close`, `Cancel`, and `Fail` are request intents observed by running
/// tasks; `Closed` and `Canceled` are the terminal states reached once all
/// outstanding generation passes have drained.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryState {
    Defined,
    Created,
    Close,
    Cancel,
    Fail,
    Closed,
    Canceled,
}

impl QueryState {
    /// True for states under which no further results may be generated.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryState::Fail | QueryState::Closed | QueryState::Canceled
        )
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryState::Defined => "DEFINED",
            QueryState::Created => "CREATED",
            QueryState::Close => "CLOSE",
            QueryState::Cancel => "CANCEL",
            QueryState::Fail => "FAIL",
            QueryState::Closed => "CLOSED",
            QueryState::Canceled => "CANCELED",
        };
        write!(f, "{}", s)
    }
}

/// The client-supplied definition of a query.
///
/// The coordinator reads only the page size, the max-results override, and the
/// DN fields; everything else is passed through to the query logic untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDefinition {
    /// The name of the query logic that evaluates this query.
    pub query_logic: String,
    pub query: String,
    pub query_name: Option<String>,
    pub page_size: u64,
    pub max_results_override: Option<u64>,
    pub user_dn: Option<String>,
    pub dn_list: Vec<String>,
    pub begin_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub authorizations: Vec<String>,
}

impl QueryDefinition {
    pub fn new(
        query_logic: impl Into<String>,
        query: impl Into<String>,
        page_size: u64,
    ) -> Self {
        Self {
            query_logic: query_logic.into(),
            query: query.into(),
            query_name: None,
            page_size,
            max_results_override: None,
            user_dn: None,
            dn_list: Vec::new(),
            begin_date: None,
            end_date: None,
            authorizations: Vec::new(),
        }
    }

    pub fn with_max_results_override(mut self, max_results: u64) -> Self {
        self.max_results_override = Some(max_results);
        self
    }

    pub fn with_dn_list(mut self, dn_list: Vec<String>) -> Self {
        self.dn_list = dn_list;
        self
    }
}

/// The recorded triggering error on a failed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFailure {
    pub error_type: String,
    pub message: String,
}

impl QueryFailure {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
        }
    }
}

/// Mutable per-query status, one record per query.
///
/// Mutated by every task that generates results or changes query state, and
/// read by every task deciding whether to keep generating. Invariant:
/// `num_results_returned <= num_results_generated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryStatus {
    pub query_key: QueryKey,
    pub state: QueryState,
    pub query: QueryDefinition,
    pub plan: Option<String>,
    pub num_results_generated: u64,
    pub num_results_returned: u64,
    /// Number of concurrently-active NEXT generation passes for this query.
    pub active_next_calls: u64,
    pub next_count: u64,
    pub seek_count: u64,
    pub failure: Option<QueryFailure>,
    pub last_updated: DateTime<Utc>,
}

impl QueryStatus {
    pub fn new(query_key: QueryKey, query: QueryDefinition) -> Self {
        Self {
            query_key,
            state: QueryState::Defined,
            query,
            plan: None,
            num_results_generated: 0,
            num_results_returned: 0,
            active_next_calls: 0,
            next_count: 0,
            seek_count: 0,
            failure: None,
            last_updated: Utc::now(),
        }
    }

    pub fn query_id(&self) -> Uuid {
        self.query_key.query_id
    }

    pub fn increment_num_results_generated(&mut self, count: u64) {
        self.num_results_generated += count;
        self.touch();
    }

    /// Records `count` results as handed to the client. Capped at the number
    /// generated so the returned/generated invariant cannot be violated by a
    /// double-counting caller.
    pub fn increment_num_results_returned(&mut self, count: u64) {
        self.num_results_returned =
            (self.num_results_returned + count).min(self.num_results_generated);
        self.touch();
    }

    pub fn set_state(&mut self, state: QueryState) {
        self.state = state;
        self.touch();
    }

    /// Transitions to FAIL and records the triggering error.
    pub fn set_failure(&mut self, failure: QueryFailure) {
        self.state = QueryState::Fail;
        self.failure = Some(failure);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> QueryStatus {
        let key = QueryKey::new("default", Uuid::new_v4(), "EventQuery");
        QueryStatus::new(key, QueryDefinition::new("EventQuery", "FOO == 'bar'", 10))
    }

    #[test]
    fn test_new_status_starts_defined() {
        let status = status();
        assert_eq!(status.state, QueryState::Defined);
        assert_eq!(status.num_results_generated, 0);
        assert_eq!(status.num_results_returned, 0);
        assert!(status.failure.is_none());
    }

    #[test]
    fn test_returned_never_exceeds_generated() {
        let mut status = status();
        status.increment_num_results_generated(5);
        status.increment_num_results_returned(10);
        assert_eq!(status.num_results_returned, 5);
        assert!(status.num_results_returned <= status.num_results_generated);
    }

    #[test]
    fn test_set_failure_transitions_to_fail() {
        let mut status = status();
        status.set_failure(QueryFailure::new("ExecutorError", "boom"));
        assert_eq!(status.state, QueryState::Fail);
        assert_eq!(status.failure.as_ref().unwrap().message, "boom");
    }

    #[test]
    fn test_terminal_states() {
        assert!(QueryState::Fail.is_terminal());
        assert!(QueryState::Closed.is_terminal());
        assert!(QueryState::Canceled.is_terminal());
        assert!(!QueryState::Close.is_terminal());
        assert!(!QueryState::Cancel.is_terminal());
        assert!(!QueryState::Created.is_terminal());
    }
}
