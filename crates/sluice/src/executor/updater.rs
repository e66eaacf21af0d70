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

//! Background checkpoint flushing for one running task.
//!
//! Persisting checkpoint state on the hot result-publishing path would make
//! every result pay a storage round trip. The updater decouples flushing onto
//! a timer and a result-count threshold, bounding the progress lost on a
//! crash to one flush interval or one threshold's worth of results.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::StorageError;
use crate::logic::QueryLogic;
use crate::models::QueryTask;
use crate::storage::QueryStorageCache;

struct UpdaterShared {
    notify: Notify,
    closed: AtomicBool,
    results_published: AtomicU64,
    results_threshold: AtomicU64,
}

/// Timer- and threshold-driven checkpoint flusher, one per running task.
///
/// On start it immediately persists the task's current checkpoint as a
/// liveness heartbeat. [`close`](Self::close) signals the flush loop and
/// joins it deterministically before the owning task is torn down.
pub struct QueryTaskUpdater {
    shared: Arc<UpdaterShared>,
    handle: JoinHandle<()>,
}

impl QueryTaskUpdater {
    pub fn start(
        coordinator: Arc<QueryStorageCache>,
        logic: Arc<Mutex<Box<dyn QueryLogic>>>,
        task: QueryTask,
        flush_interval: Duration,
        flush_results: u64,
    ) -> Self {
        let shared = Arc::new(UpdaterShared {
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            results_published: AtomicU64::new(0),
            results_threshold: AtomicU64::new(flush_results.max(1)),
        });

        let handle = {
            let shared = shared.clone();
            tokio::spawn(async move {
                let mut task = task;
                // Heartbeat before the first wait so a fresh task is visibly
                // alive immediately.
                refresh(&coordinator, &logic, &mut task).await;
                loop {
                    tokio::select! {
                        _ = shared.notify.notified() => {}
                        _ = tokio::time::sleep(flush_interval) => {}
                    }
                    if shared.closed.load(Ordering::Acquire) {
                        break;
                    }
                    refresh(&coordinator, &logic, &mut task).await;
                }
                debug!(task_key = %task.task_key, "Checkpoint updater stopped");
            })
        };

        Self { shared, handle }
    }

    /// Records one published result, waking the flush loop early once the
    /// result threshold is crossed. The threshold then doubles so a fast
    /// producer does not signal on every result.
    pub fn result_published(&self) {
        let count = self.shared.results_published.fetch_add(1, Ordering::AcqRel) + 1;
        let threshold = self.shared.results_threshold.load(Ordering::Acquire);
        if count >= threshold {
            self.shared
                .results_threshold
                .store(count.saturating_mul(2), Ordering::Release);
            self.shared.notify.notify_one();
        }
    }

    /// Signals the flush loop closed and joins it.
    pub async fn close(self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
        if let Err(e) = self.handle.await {
            error!(error = %e, "Checkpoint updater task panicked");
        }
    }
}

async fn refresh(
    coordinator: &Arc<QueryStorageCache>,
    logic: &Arc<Mutex<Box<dyn QueryLogic>>>,
    task: &mut QueryTask,
) {
    let result = async {
        let mut logic = logic.lock().await;
        if logic.is_checkpointable() {
            let updated = logic
                .update_checkpoint(task.checkpoint.clone())
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            task.checkpoint = updated;
        }
        drop(logic);
        coordinator.refresh_task(task).await
    }
    .await;

    match result {
        Ok(()) => {
            debug!(task_key = %task.task_key, "Flushed task checkpoint");
        }
        Err(StorageError::TaskNotFound(task_key)) => {
            warn!(
                task_key = %task_key,
                "Task no longer exists, query was probably deleted"
            );
        }
        Err(e) => {
            warn!(task_key = %task.task_key, error = %e, "Failed to flush task checkpoint");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LocalLockManager;
    use crate::logic::QueryLogicFactory;
    use crate::messaging::LocalQueueManager;
    use crate::models::QueryDefinition;
    use crate::storage::LocalQueryCache;
    use crate::testing::{ScriptedLogicFactory, ScriptedQueryLogic};
    use serde_json::json;
    use tracing_test::traced_test;

    async fn stack_with_task() -> (Arc<QueryStorageCache>, QueryTask) {
        let coordinator = Arc::new(QueryStorageCache::new(
            Arc::new(LocalQueryCache::new()),
            Arc::new(LocalLockManager::new()),
            Arc::new(LocalQueueManager::new()),
        ));
        let task_key = coordinator
            .create_query(
                "default",
                QueryDefinition::new("EventQuery", "FOO == 'bar'", 10),
                1,
            )
            .await
            .unwrap();
        let task = coordinator
            .get_task(&task_key, Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        (coordinator, task)
    }

    fn logic() -> Arc<Mutex<Box<dyn QueryLogic>>> {
        let factory = ScriptedLogicFactory::new(
            ScriptedQueryLogic::checkpointable(vec![json!(1), json!(2)]),
        );
        Arc::new(Mutex::new(factory.create("EventQuery").unwrap()))
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_task_on_start() {
        let (coordinator, task) = stack_with_task().await;
        let before = task.last_updated;
        let updater = QueryTaskUpdater::start(
            coordinator.clone(),
            logic(),
            task.clone(),
            Duration::from_secs(60),
            100,
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        updater.close().await;

        let stored = coordinator.get_tasks(task.task_key.query_id()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].last_updated >= before);
    }

    #[tokio::test]
    async fn test_result_threshold_wakes_flush_early() {
        let (coordinator, task) = stack_with_task().await;
        let updater = QueryTaskUpdater::start(
            coordinator.clone(),
            logic(),
            task.clone(),
            Duration::from_secs(60),
            2,
        );
        // Crossing the threshold signals the loop well before the timer.
        updater.result_published();
        updater.result_published();
        tokio::time::sleep(Duration::from_millis(100)).await;
        updater.close().await;

        let stored = coordinator
            .get_tasks(task.task_key.query_id())
            .await
            .unwrap();
        // One flush from the start heartbeat plus at least one from the
        // threshold signal; the timer alone could not have fired yet.
        let updates = stored[0]
            .checkpoint
            .property("updates")
            .and_then(serde_json::Value::as_u64)
            .unwrap();
        assert!(updates >= 2, "expected an early flush, saw {} updates", updates);
    }

    #[tokio::test]
    async fn test_close_joins_deterministically() {
        let (coordinator, task) = stack_with_task().await;
        let updater = QueryTaskUpdater::start(
            coordinator,
            logic(),
            task,
            Duration::from_millis(10),
            100,
        );
        // Returns only after the flush loop has exited.
        updater.close().await;
    }

    #[traced_test]
    #[tokio::test]
    async fn test_missing_task_is_tolerated_as_warning() {
        let (coordinator, task) = stack_with_task().await;
        let updater = QueryTaskUpdater::start(
            coordinator.clone(),
            logic(),
            task.clone(),
            Duration::from_millis(20),
            100,
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.delete_task(&task.task_key).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        updater.close().await;
        assert!(logs_contain("query was probably deleted"));
    }
}
