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

//! Query-logic collaborator contract.
//!
//! The query logic is the external component that knows how to turn a query
//! definition into scans and evaluations over the backing store. The
//! coordinator never inspects query semantics; it drives these lifecycle
//! hooks and stores whatever checkpoints the logic produces.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExecutorError;
use crate::models::{QueryCheckpoint, QueryDefinition, QueryKey};

/// Source-level counters a transform iterator may expose after each result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetrics {
    pub source_count: u64,
    pub next_count: u64,
    pub seek_count: u64,
    pub yield_count: u64,
    pub doc_ranges: u64,
    pub fi_ranges: u64,
}

/// Iterator over transformed results, yielding one payload at a time.
#[async_trait]
pub trait TransformIterator: Send {
    async fn next(&mut self) -> Result<Option<Value>, ExecutorError>;

    /// Cumulative source counters since the iterator was created, when the
    /// logic tracks them.
    fn source_metrics(&self) -> Option<SourceMetrics>;
}

/// Lifecycle hooks of a query-logic implementation.
///
/// A checkpointable logic can split its work into resumable pieces via
/// [`checkpoint`](Self::checkpoint) and advance a piece's resumption point via
/// [`update_checkpoint`](Self::update_checkpoint). A non-checkpointable logic
/// must be exhausted by a single task.
#[async_trait]
pub trait QueryLogic: Send + Sync {
    /// Prepares the logic for a new query and returns the initial checkpoint
    /// shape. Called once, for the CREATE/DEFINE task.
    async fn initialize(
        &mut self,
        query_key: &QueryKey,
        definition: &QueryDefinition,
    ) -> Result<QueryCheckpoint, ExecutorError>;

    /// Resumes evaluation exactly where the checkpoint left off.
    async fn setup_query(&mut self, checkpoint: &QueryCheckpoint) -> Result<(), ExecutorError>;

    async fn transform_iterator(
        &mut self,
        definition: &QueryDefinition,
    ) -> Result<Box<dyn TransformIterator>, ExecutorError>;

    /// A human-readable execution plan, available after
    /// [`initialize`](Self::initialize).
    fn plan(&self) -> Option<String>;

    /// The logic's default maximum result count; `None` means unlimited.
    fn max_results(&self) -> Option<u64>;

    fn max_page_size(&self) -> Option<u64>;

    /// A per-DN result limit for the calling user, when one applies.
    fn result_limit(&self, dn_list: &[String]) -> Option<u64>;

    fn is_checkpointable(&self) -> bool;

    /// Splits the remaining work into one or more resumable checkpoints.
    async fn checkpoint(
        &mut self,
        query_key: &QueryKey,
    ) -> Result<Vec<QueryCheckpoint>, ExecutorError>;

    /// Advances a checkpoint to the current evaluation position.
    async fn update_checkpoint(
        &mut self,
        checkpoint: QueryCheckpoint,
    ) -> Result<QueryCheckpoint, ExecutorError>;

    async fn close(&mut self) -> Result<(), ExecutorError>;
}

/// Creates query-logic instances by logic name, one per task execution.
pub trait QueryLogicFactory: Send + Sync {
    fn create(&self, logic_name: &str) -> Result<Box<dyn QueryLogic>, ExecutorError>;
}
