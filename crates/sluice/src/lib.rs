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

//! # Sluice
//!
//! A coordination library for distributed query execution: task lifecycle,
//! resumable checkpoints, per-query locking, and backpressure-aware result
//! generation.
//!
//! A query is split into tasks (`CREATE`, `PLAN`, `NEXT`, `CLOSE`), each
//! carrying an opaque checkpoint produced by a pluggable [`QueryLogic`].
//! Workers claim tasks through a per-task lock layered over a per-query
//! counting semaphore, generate results until the consumer-facing buffer is
//! full, then checkpoint and requeue so any worker can resume the remainder.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sluice::executor::{ExecutorConfig, QueryExecutor};
//! use sluice::lock::LocalLockManager;
//! use sluice::messaging::LocalQueueManager;
//! use sluice::metrics::LoggingMetricSink;
//! use sluice::models::QueryDefinition;
//! use sluice::storage::{LocalQueryCache, QueryStorageCache};
//! use std::sync::Arc;
//!
//! let coordinator = Arc::new(QueryStorageCache::new(
//!     Arc::new(LocalQueryCache::new()),
//!     Arc::new(LocalLockManager::new()),
//!     Arc::new(LocalQueueManager::new()),
//! ));
//!
//! let executor = QueryExecutor::new(
//!     ExecutorConfig::default(),
//!     coordinator.clone(),
//!     my_logic_factory,
//!     Arc::new(LoggingMetricSink),
//! );
//!
//! // Submit a query; the executor picks up the CREATE task.
//! let task_key = coordinator
//!     .create_query("default", QueryDefinition::new("EventQuery", "FOO == 'bar'", 20), 2)
//!     .await?;
//! ```
//!
//! ## Architecture
//!
//! - [`models`]: keys, checkpoints, tasks, status, and task-state records
//! - [`storage`]: the coordinator facade, backing cache, and named locks
//! - [`lock`]: per-query semaphores and per-task mutual exclusion
//! - [`messaging`]: task notifications and result delivery channels
//! - [`logic`]: the pluggable query-evaluation contract
//! - [`executor`]: the worker loop, per-task state machine, and checkpoint
//!   updater
//! - [`metrics`]: query metric records and sinks
//!
//! The in-process `Local*` implementations back the traits for embedded use
//! and tests; distributed deployments bind the same traits to shared
//! infrastructure.

pub mod error;
pub mod executor;
pub mod lock;
pub mod logic;
pub mod messaging;
pub mod metrics;
pub mod models;
pub mod storage;
pub mod testing;

pub use error::{ExecutorError, LockError, StorageError};
pub use executor::{ExecutorConfig, QueryExecutor};
pub use logic::{QueryLogic, QueryLogicFactory, TransformIterator};
pub use models::{
    QueryCheckpoint, QueryDefinition, QueryKey, QueryState, QueryStatus, QueryTask, TaskAction,
    TaskKey, TaskState, TaskStates,
};
pub use storage::QueryStorageCache;
