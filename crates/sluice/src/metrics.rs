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

//! Query metric reporting.
//!
//! The executor produces one metric record per create/plan action and one per
//! batch of results. Submission is best-effort: failures are logged and never
//! fatal to the task. Process-level counters additionally flow through the
//! `metrics` facade.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::logic::SourceMetrics;

/// One metric record for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetricUpdate {
    pub query_id: Uuid,
    /// The execution plan, present on create/plan records.
    pub plan: Option<String>,
    /// Results published since the previous record.
    pub num_results: u64,
    pub source_metrics: Option<SourceMetrics>,
}

impl QueryMetricUpdate {
    pub fn plan_update(query_id: Uuid, plan: Option<String>) -> Self {
        Self {
            query_id,
            plan,
            num_results: 0,
            source_metrics: None,
        }
    }

    pub fn results_update(
        query_id: Uuid,
        num_results: u64,
        source_metrics: Option<SourceMetrics>,
    ) -> Self {
        Self {
            query_id,
            plan: None,
            num_results,
            source_metrics,
        }
    }
}

/// Destination for query metric records.
#[async_trait]
pub trait QueryMetricSink: Send + Sync {
    async fn submit(&self, update: QueryMetricUpdate) -> Result<(), String>;
}

/// Sink that emits records to the tracing log. The default when no external
/// metric service is wired in.
#[derive(Debug, Default)]
pub struct LoggingMetricSink;

#[async_trait]
impl QueryMetricSink for LoggingMetricSink {
    async fn submit(&self, update: QueryMetricUpdate) -> Result<(), String> {
        debug!(
            query_id = %update.query_id,
            num_results = update.num_results,
            plan = update.plan.as_deref().unwrap_or(""),
            "Query metric update"
        );
        Ok(())
    }
}
