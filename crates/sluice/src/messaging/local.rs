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

//! In-process queue manager.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::error::StorageError;

use super::{QueryQueueListener, QueryQueueManager, QueryResult, TaskNotification};

/// A process-local FIFO channel with bounded-wait receive.
struct LocalChannel<T> {
    messages: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> LocalChannel<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        })
    }

    fn push(&self, message: T) {
        self.messages.lock().push_back(message);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<T> {
        self.messages.lock().pop_front()
    }

    fn depth(&self) -> usize {
        self.messages.lock().len()
    }

    fn clear(&self) {
        self.messages.lock().clear();
    }
}

struct LocalListener<T> {
    listener_id: String,
    channel: Arc<LocalChannel<T>>,
    stopped: AtomicBool,
}

#[async_trait]
impl<T: Send> QueryQueueListener<T> for LocalListener<T> {
    async fn receive(&mut self, wait: Duration) -> Option<T> {
        let deadline = Instant::now() + wait;
        loop {
            if self.stopped.load(Ordering::Acquire) {
                return None;
            }
            if let Some(message) = self.channel.pop() {
                return Some(message);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let _ = tokio::time::timeout_at(deadline, self.channel.notify.notified()).await;
        }
    }

    fn stop(&mut self) {
        debug!(listener_id = %self.listener_id, "Stopping queue listener");
        self.stopped.store(true, Ordering::Release);
    }
}

/// Queue manager backed by process-local channels.
///
/// Result channels are created on demand and keyed by query id; task channels
/// are keyed by executor pool name.
#[derive(Default)]
pub struct LocalQueueManager {
    results: Mutex<HashMap<Uuid, Arc<LocalChannel<QueryResult>>>>,
    pools: Mutex<HashMap<String, Arc<LocalChannel<TaskNotification>>>>,
}

impl LocalQueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn result_channel(&self, query_id: Uuid) -> Arc<LocalChannel<QueryResult>> {
        self.results
            .lock()
            .entry(query_id)
            .or_insert_with(LocalChannel::new)
            .clone()
    }

    fn pool_channel(&self, pool: &str) -> Arc<LocalChannel<TaskNotification>> {
        self.pools
            .lock()
            .entry(pool.to_string())
            .or_insert_with(LocalChannel::new)
            .clone()
    }
}

#[async_trait]
impl QueryQueueManager for LocalQueueManager {
    async fn ensure_queue_created(&self, query_id: Uuid) -> Result<(), StorageError> {
        self.result_channel(query_id);
        Ok(())
    }

    async fn delete_queue(&self, query_id: Uuid) -> Result<(), StorageError> {
        if let Some(channel) = self.results.lock().remove(&query_id) {
            channel.clear();
            channel.notify.notify_waiters();
        }
        Ok(())
    }

    async fn empty_queue(&self, query_id: Uuid) -> Result<(), StorageError> {
        if let Some(channel) = self.results.lock().get(&query_id) {
            channel.clear();
        }
        Ok(())
    }

    async fn num_results_remaining(&self, query_id: Uuid) -> usize {
        self.results
            .lock()
            .get(&query_id)
            .map(|c| c.depth())
            .unwrap_or(0)
    }

    async fn publish_result(&self, result: QueryResult) -> Result<(), StorageError> {
        self.result_channel(result.query_id).push(result);
        Ok(())
    }

    fn create_result_listener(
        &self,
        listener_id: &str,
        query_id: Uuid,
    ) -> Box<dyn QueryQueueListener<QueryResult>> {
        Box::new(LocalListener {
            listener_id: listener_id.to_string(),
            channel: self.result_channel(query_id),
            stopped: AtomicBool::new(false),
        })
    }

    async fn publish_task_notification(
        &self,
        pool: &str,
        notification: TaskNotification,
    ) -> Result<(), StorageError> {
        debug!(
            pool = %pool,
            task_key = %notification.task_key,
            action = %notification.action,
            "Publishing task notification"
        );
        self.pool_channel(pool).push(notification);
        Ok(())
    }

    fn create_task_listener(
        &self,
        listener_id: &str,
        pool: &str,
    ) -> Box<dyn QueryQueueListener<TaskNotification>> {
        Box::new(LocalListener {
            listener_id: listener_id.to_string(),
            channel: self.pool_channel(pool),
            stopped: AtomicBool::new(false),
        })
    }
}
