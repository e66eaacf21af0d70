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

//! Per-query concurrency gating.
//!
//! A single global lock per task (mutual exclusion) composed with a per-query
//! counting semaphore (bounded fan-out) lets several tasks of the same query
//! run in parallel while guaranteeing no two workers ever execute the same
//! task simultaneously, which would corrupt its checkpoint.
//!
//! The [`QueryLockManager`] contract is backend-agnostic: distributed
//! deployments implement it over whatever coordination primitive the backing
//! store offers. [`LocalLockManager`] is the in-process implementation used
//! for embedding and tests.

mod local;

pub use local::LocalLockManager;

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::error::LockError;
use crate::models::TaskKey;

/// Gate deciding which worker may run which task concurrently.
#[async_trait]
pub trait QueryLockManager: Send + Sync {
    /// (Re)configures the maximum number of tasks of this query that may run
    /// concurrently. A count of 0 deletes the semaphore and force-releases
    /// all held locks for the query.
    async fn create_semaphore(&self, query_id: Uuid, count: usize) -> Result<(), LockError>;

    /// Blocks up to `wait` for a semaphore slot and the task lock.
    ///
    /// Returns `Ok(false)` on timeout. Fails with [`LockError::AlreadyLocked`]
    /// if the task is locked by someone else and [`LockError::NoSemaphore`] if
    /// the query has no semaphore configured.
    async fn acquire_lock(&self, task_key: &TaskKey, wait: Duration) -> Result<bool, LockError>;

    /// Releases both the task-specific lock and a semaphore slot. Fails with
    /// [`LockError::NotLocked`] if the task was not locked.
    async fn release_lock(&self, task_key: &TaskKey) -> Result<(), LockError>;

    async fn is_locked(&self, task_key: &TaskKey) -> bool;

    /// The tasks of a query currently holding locks.
    async fn locked_tasks(&self, query_id: Uuid) -> Vec<TaskKey>;

    /// The queries with a semaphore configured.
    async fn queries(&self) -> Vec<Uuid>;
}
