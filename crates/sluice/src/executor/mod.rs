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

//! The query executor service.
//!
//! [`QueryExecutor`] consumes task notifications from one executor pool,
//! bounds in-flight work with a semaphore, and drives each claimed task
//! through [`ExecutorTask`]. Workers race for tasks through the lock manager,
//! so running several executors against the same pool is safe; a notification
//! whose task is already locked elsewhere is simply dropped. The holder
//! republishes if the task pauses, and the orphan sweep
//! ([`QueryExecutor::find_orphaned_tasks`]) requeues tasks whose notification
//! was lost or whose worker died.

pub mod config;
pub mod task;
pub mod updater;

pub use config::{ExecutorConfig, ExecutorConfigBuilder};
pub use task::{ExecutorTask, ResultsAction};
pub use updater::QueryTaskUpdater;

use chrono::Utc;
use metrics::counter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::StorageError;
use crate::logic::QueryLogicFactory;
use crate::messaging::TaskNotification;
use crate::metrics::QueryMetricSink;
use crate::models::{QueryFailure, QueryTask, TaskState};
use crate::storage::QueryStorageCache;

/// Long-running worker consuming task notifications for one executor pool.
pub struct QueryExecutor {
    config: ExecutorConfig,
    coordinator: Arc<QueryStorageCache>,
    logic_factory: Arc<dyn QueryLogicFactory>,
    metric_sink: Arc<dyn QueryMetricSink>,
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl QueryExecutor {
    pub fn new(
        config: ExecutorConfig,
        coordinator: Arc<QueryStorageCache>,
        logic_factory: Arc<dyn QueryLogicFactory>,
        metric_sink: Arc<dyn QueryMetricSink>,
    ) -> Self {
        Self {
            config,
            coordinator,
            logic_factory,
            metric_sink,
            shutdown: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Runs the notification loop until [`shutdown`](Self::shutdown) is
    /// called. Tasks already dispatched run to completion.
    pub async fn run(&self) {
        let listener_id = format!("executor-{}", Uuid::new_v4());
        let mut listener = self
            .coordinator
            .queues()
            .create_task_listener(&listener_id, self.config.executor_pool());
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_tasks()));
        info!(
            pool = self.config.executor_pool(),
            max_concurrent_tasks = self.config.max_concurrent_tasks(),
            "Query executor started"
        );

        while !self.shutdown.load(Ordering::Acquire) {
            let notification = tokio::select! {
                _ = self.notify.notified() => continue,
                notification = listener.receive(self.config.listener_poll_interval()) => {
                    notification
                }
            };
            let Some(notification) = notification else {
                continue;
            };

            let permit = tokio::select! {
                _ = self.notify.notified() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                }
            };
            self.dispatch(notification, permit).await;
        }

        listener.stop();
        info!(pool = self.config.executor_pool(), "Query executor stopped");
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Claims the notified task and spawns its execution. A notification
    /// that cannot be claimed is dropped without error.
    async fn dispatch(&self, notification: TaskNotification, permit: OwnedSemaphorePermit) {
        let task_key = notification.task_key.clone();
        let task = match self
            .coordinator
            .get_task(&task_key, self.config.lock_wait())
            .await
        {
            Ok(Some(task)) => task,
            Ok(None) => {
                debug!(task_key = %task_key, "Task already completed, dropping notification");
                return;
            }
            Err(StorageError::Lock(e)) => {
                debug!(task_key = %task_key, error = %e, "Task claimed elsewhere, dropping notification");
                return;
            }
            Err(e) => {
                error!(task_key = %task_key, error = %e, "Failed to fetch notified task");
                return;
            }
        };

        let logic = match self.logic_factory.create(task.task_key.query_logic()) {
            Ok(logic) => logic,
            Err(e) => {
                error!(task_key = %task_key, error = %e, "Failed to create query logic");
                if let Err(e) = self
                    .coordinator
                    .update_failed_query_status(task_key.query_id(), QueryFailure::from(&e))
                    .await
                {
                    error!(task_key = %task_key, error = %e, "Failed to record query failure");
                }
                if let Err(e) = self
                    .coordinator
                    .update_task_state(&task_key, TaskState::Failed)
                    .await
                {
                    warn!(task_key = %task_key, error = %e, "Failed to record failed state");
                }
                if let Err(e) = self.coordinator.lock_manager().release_lock(&task_key).await {
                    warn!(task_key = %task_key, error = %e, "Failed to release lock");
                }
                return;
            }
        };

        let executor_task = ExecutorTask::new(
            self.coordinator.clone(),
            self.metric_sink.clone(),
            self.config.clone(),
            task,
        );
        tokio::spawn(async move {
            let _permit = permit;
            executor_task.run(logic).await;
        });
    }

    /// Finds READY and RUNNING tasks with no lock held whose record has not
    /// been touched within `max_age`. A stale RUNNING task belonged to a
    /// worker that died between heartbeats; a stale READY task lost its
    /// notification, e.g. every notified worker timed out claiming it and
    /// dropped the message.
    pub async fn find_orphaned_tasks(
        &self,
        max_age: Duration,
    ) -> Result<Vec<QueryTask>, StorageError> {
        let age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(age)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let mut orphans = Vec::new();
        for status in self.coordinator.get_query_statuses().await? {
            let query_id = status.query_id();
            let Some(states) = self.coordinator.get_task_states(query_id).await? else {
                continue;
            };
            for task in self.coordinator.get_tasks(query_id).await? {
                if !matches!(
                    states.state(task.task_key.task_id),
                    Some(TaskState::Ready) | Some(TaskState::Running)
                ) {
                    continue;
                }
                if task.last_updated >= cutoff {
                    continue;
                }
                if self.coordinator.lock_manager().is_locked(&task.task_key).await {
                    continue;
                }
                orphans.push(task);
            }
        }
        Ok(orphans)
    }

    /// Marks an orphaned task READY again and republishes its notification.
    pub async fn requeue_orphaned_task(&self, task: &QueryTask) -> Result<(), StorageError> {
        warn!(task_key = %task.task_key, "Requeueing orphaned task");
        self.coordinator
            .update_task_state(&task.task_key, TaskState::Ready)
            .await?;
        self.coordinator.post_task_notification(task).await?;
        counter!("sluice_tasks_recovered_total").increment(1);
        Ok(())
    }
}
