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

//! Identity keys for queries and tasks.
//!
//! A [`QueryKey`] identifies one logical query instance within a named
//! execution pool. A [`TaskKey`] extends it with a task id and identifies one
//! unit of work belonging to that query. Both are immutable and are used as
//! map keys, storage keys, and notification routing keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifies one logical query instance within a named execution pool.
///
/// Equality and hashing are over all three fields.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct QueryKey {
    /// The execution pool this query is routed to.
    pub query_pool: String,
    /// The unique id of the query instance.
    pub query_id: Uuid,
    /// The name of the query logic evaluating this query.
    pub query_logic: String,
}

impl QueryKey {
    pub fn new(
        query_pool: impl Into<String>,
        query_id: Uuid,
        query_logic: impl Into<String>,
    ) -> Self {
        Self {
            query_pool: query_pool.into(),
            query_id,
            query_logic: query_logic.into(),
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "P:{} Q:{} L:{}",
            self.query_pool, self.query_id, self.query_logic
        )
    }
}

/// Identifies one unit of work belonging to a query.
///
/// The canonical string form, `T:<taskId> P:<pool> Q:<queryId> L:<logicName>`,
/// doubles as a storage key and as a notification routing-key suffix. It
/// round-trips through [`FromStr`].
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskKey {
    pub query_key: QueryKey,
    pub task_id: Uuid,
}

impl TaskKey {
    /// Creates a task key with a fresh random task id.
    pub fn new(query_key: QueryKey) -> Self {
        Self {
            query_key,
            task_id: Uuid::new_v4(),
        }
    }

    /// Creates a task key with a supplied task id, e.g. when re-deriving a
    /// key from its serialized form.
    pub fn with_task_id(query_key: QueryKey, task_id: Uuid) -> Self {
        Self { query_key, task_id }
    }

    pub fn query_id(&self) -> Uuid {
        self.query_key.query_id
    }

    pub fn query_pool(&self) -> &str {
        &self.query_key.query_pool
    }

    pub fn query_logic(&self) -> &str {
        &self.query_key.query_logic
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "T:{} P:{} Q:{} L:{}",
            self.task_id,
            self.query_key.query_pool,
            self.query_key.query_id,
            self.query_key.query_logic
        )
    }
}

/// Error returned when a canonical task-key string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid task key: {0}")]
pub struct TaskKeyParseError(pub String);

impl FromStr for TaskKey {
    type Err = TaskKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut task_id = None;
        let mut pool = None;
        let mut query_id = None;
        let mut logic = None;
        for part in s.split_whitespace() {
            if let Some(v) = part.strip_prefix("T:") {
                task_id = Some(
                    Uuid::parse_str(v).map_err(|_| TaskKeyParseError(s.to_string()))?,
                );
            } else if let Some(v) = part.strip_prefix("P:") {
                pool = Some(v.to_string());
            } else if let Some(v) = part.strip_prefix("Q:") {
                query_id = Some(
                    Uuid::parse_str(v).map_err(|_| TaskKeyParseError(s.to_string()))?,
                );
            } else if let Some(v) = part.strip_prefix("L:") {
                logic = Some(v.to_string());
            } else {
                return Err(TaskKeyParseError(s.to_string()));
            }
        }
        match (task_id, pool, query_id, logic) {
            (Some(task_id), Some(pool), Some(query_id), Some(logic)) => Ok(TaskKey {
                query_key: QueryKey::new(pool, query_id, logic),
                task_id,
            }),
            _ => Err(TaskKeyParseError(s.to_string())),
        }
    }
}
