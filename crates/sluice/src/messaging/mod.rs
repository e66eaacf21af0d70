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

//! Notification and result transport.
//!
//! Two channel families: a publish/subscribe channel per executor pool for
//! task-action events, and a per-query channel for result delivery. Only the
//! publish/consume contract is defined here; [`LocalQueueManager`] is the
//! in-process implementation, and distributed deployments bind the same
//! traits to a real broker.

mod local;

pub use local::LocalQueueManager;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{TaskAction, TaskKey};

/// A task-action event waking idle workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNotification {
    pub task_key: TaskKey,
    pub action: TaskAction,
}

impl TaskNotification {
    pub fn new(task_key: TaskKey, action: TaskAction) -> Self {
        Self { task_key, action }
    }
}

/// One generated result published to a query's result channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub result_id: Uuid,
    pub query_id: Uuid,
    pub payload: Value,
}

impl QueryResult {
    /// Wraps a payload with a fresh unique result id.
    pub fn new(query_id: Uuid, payload: Value) -> Self {
        Self {
            result_id: Uuid::new_v4(),
            query_id,
            payload,
        }
    }
}

/// A bounded-wait consumer of one channel.
#[async_trait]
pub trait QueryQueueListener<T: Send>: Send {
    /// Waits up to `wait` for the next message; `None` on timeout or after
    /// [`stop`](Self::stop).
    async fn receive(&mut self, wait: Duration) -> Option<T>;

    fn stop(&mut self);
}

/// Queue lifecycle and publish/consume operations for both channel families.
#[async_trait]
pub trait QueryQueueManager: Send + Sync {
    /// Ensures the result channel for a query exists.
    async fn ensure_queue_created(&self, query_id: Uuid) -> Result<(), StorageError>;

    async fn delete_queue(&self, query_id: Uuid) -> Result<(), StorageError>;

    async fn empty_queue(&self, query_id: Uuid) -> Result<(), StorageError>;

    /// The number of published results not yet drained by a consumer. This is
    /// the queue depth the backpressure loop compares against its buffer
    /// target.
    async fn num_results_remaining(&self, query_id: Uuid) -> usize;

    async fn publish_result(&self, result: QueryResult) -> Result<(), StorageError>;

    fn create_result_listener(
        &self,
        listener_id: &str,
        query_id: Uuid,
    ) -> Box<dyn QueryQueueListener<QueryResult>>;

    /// Publishes a task-action event to an executor pool's channel.
    async fn publish_task_notification(
        &self,
        pool: &str,
        notification: TaskNotification,
    ) -> Result<(), StorageError>;

    fn create_task_listener(
        &self,
        listener_id: &str,
        pool: &str,
    ) -> Box<dyn QueryQueueListener<TaskNotification>>;
}
