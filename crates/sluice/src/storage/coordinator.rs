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

//! The storage coordinator facade.
//!
//! [`QueryStorageCache`] ties the backing cache, the lock manager, the named
//! storage locks, and outbound task notifications together. It is the single
//! source of truth all workers and internal components consult.
//!
//! Lock-requiring operations fail with distinct already-locked / not-locked
//! errors rather than silently no-oping; see the crate error taxonomy.

use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{LockError, StorageError};
use crate::lock::QueryLockManager;
use crate::messaging::{QueryQueueManager, TaskNotification};
use crate::models::{
    QueryCheckpoint, QueryDefinition, QueryFailure, QueryKey, QueryState, QueryStatus, QueryTask,
    TaskAction, TaskDescription, TaskKey, TaskState, TaskStates,
};

use super::cache::QueryCache;
use super::locks::{QueryStorageLock, StorageLockRegistry};

/// Facade over status, task records, locks, and task notifications.
pub struct QueryStorageCache {
    cache: Arc<dyn QueryCache>,
    lock_manager: Arc<dyn QueryLockManager>,
    queues: Arc<dyn QueryQueueManager>,
    storage_locks: StorageLockRegistry,
}

impl QueryStorageCache {
    pub fn new(
        cache: Arc<dyn QueryCache>,
        lock_manager: Arc<dyn QueryLockManager>,
        queues: Arc<dyn QueryQueueManager>,
    ) -> Self {
        Self {
            cache,
            lock_manager,
            queues,
            storage_locks: StorageLockRegistry::new(),
        }
    }

    pub fn lock_manager(&self) -> &Arc<dyn QueryLockManager> {
        &self.lock_manager
    }

    pub fn queues(&self) -> &Arc<dyn QueryQueueManager> {
        &self.queues
    }

    // ----- named storage locks -----

    /// Lock guarding the `QueryStatus` record of a query.
    pub fn query_status_lock(&self, query_id: Uuid) -> QueryStorageLock {
        self.storage_locks.lock_for(format!("QUERY:{}", query_id))
    }

    /// Lock guarding the `TaskStates` record of a query.
    pub fn task_states_lock(&self, query_id: Uuid) -> QueryStorageLock {
        self.storage_locks.lock_for(format!("TASKS:{}", query_id))
    }

    /// Lock guarding one task record.
    pub fn task_lock(&self, task_key: &TaskKey) -> QueryStorageLock {
        self.storage_locks
            .lock_for(format!("TASK:{}", task_key.task_id))
    }

    // ----- query lifecycle -----

    /// Persists an initial DEFINED status, configures the semaphore, creates
    /// the initial DEFINE task, and publishes its notification.
    pub async fn define_query(
        &self,
        query_pool: &str,
        definition: QueryDefinition,
        count: usize,
    ) -> Result<TaskKey, StorageError> {
        self.store_query(
            query_pool,
            definition,
            count,
            QueryState::Defined,
            TaskAction::Define,
        )
        .await
    }

    /// Persists an initial CREATED status, configures the semaphore, creates
    /// the initial CREATE task, and publishes its notification.
    pub async fn create_query(
        &self,
        query_pool: &str,
        definition: QueryDefinition,
        count: usize,
    ) -> Result<TaskKey, StorageError> {
        self.store_query(
            query_pool,
            definition,
            count,
            QueryState::Created,
            TaskAction::Create,
        )
        .await
    }

    async fn store_query(
        &self,
        query_pool: &str,
        definition: QueryDefinition,
        count: usize,
        state: QueryState,
        action: TaskAction,
    ) -> Result<TaskKey, StorageError> {
        let query_id = Uuid::new_v4();
        let query_key = QueryKey::new(query_pool, query_id, definition.query_logic.clone());

        self.queues.ensure_queue_created(query_id).await?;

        let mut status = QueryStatus::new(query_key.clone(), definition);
        status.state = state;
        self.cache.update_query_status(status).await?;
        self.cache
            .update_task_states(TaskStates::new(query_key.clone(), Some(count)))
            .await?;
        self.lock_manager
            .create_semaphore(query_id, count)
            .await?;

        let task = self
            .create_task(action, QueryCheckpoint::new(query_key.clone()))
            .await?;
        info!(query_id = %query_id, state = %state, "Stored new query");
        Ok(task.task_key)
    }

    /// Destroys the query's status, task states, task records, semaphore, and
    /// result queue.
    pub async fn delete_query(&self, query_id: Uuid) -> Result<(), StorageError> {
        for task in self.cache.get_tasks(query_id).await? {
            self.cache.delete_task(&task.task_key).await?;
            self.storage_locks
                .remove(&format!("TASK:{}", task.task_key.task_id));
        }
        self.cache.delete_query_status(query_id).await?;
        self.cache.delete_task_states(query_id).await?;
        self.lock_manager.create_semaphore(query_id, 0).await?;
        self.queues.delete_queue(query_id).await?;
        self.storage_locks.remove(&format!("QUERY:{}", query_id));
        self.storage_locks.remove(&format!("TASKS:{}", query_id));
        info!(query_id = %query_id, "Deleted query");
        Ok(())
    }

    /// Wipes every query. Admin and test use only.
    pub async fn clear(&self) -> Result<(), StorageError> {
        for status in self.cache.get_query_statuses().await? {
            self.delete_query(status.query_id()).await?;
        }
        self.cache.clear().await
    }

    // ----- task CRUD -----

    /// Wraps a checkpoint in a fresh task, persists it, marks it READY, and
    /// publishes a task notification.
    pub async fn create_task(
        &self,
        action: TaskAction,
        checkpoint: QueryCheckpoint,
    ) -> Result<QueryTask, StorageError> {
        let task = QueryTask::new(action, checkpoint);
        let query_id = task.task_key.query_id();

        {
            let lock = self.task_states_lock(query_id);
            let _guard = lock.lock().await;
            let mut states = self
                .cache
                .get_task_states(query_id)
                .await?
                .ok_or(StorageError::TaskStatesNotFound(query_id))?;
            states.set_state(task.task_key.task_id, TaskState::Ready);
            self.cache.update_task_states(states).await?;
        }

        self.cache.put_task(task.clone()).await?;
        self.queues
            .publish_task_notification(
                task.task_key.query_pool(),
                TaskNotification::new(task.task_key.clone(), action),
            )
            .await?;
        counter!("sluice_tasks_created_total", "action" => action.to_string()).increment(1);
        debug!(task_key = %task.task_key, action = %action, "Created task");
        Ok(task)
    }

    /// Acquires the task lock as a precondition, then returns the task.
    ///
    /// Fails with a lock error if the task is already locked elsewhere or the
    /// bounded wait elapses. Returns `Ok(None)` if the record no longer
    /// exists because it was completed and deleted by someone else; the lock
    /// is released again in that case.
    pub async fn get_task(
        &self,
        task_key: &TaskKey,
        wait: Duration,
    ) -> Result<Option<QueryTask>, StorageError> {
        match self.lock_manager.acquire_lock(task_key, wait).await {
            Ok(true) => {}
            Ok(false) => return Err(LockError::Timeout(task_key.clone()).into()),
            Err(e) => return Err(e.into()),
        }
        let task = self.cache.get_task(task_key).await?;
        if task.is_none() {
            debug!(task_key = %task_key, "Task no longer exists, releasing lock");
            self.lock_manager.release_lock(task_key).await?;
        }
        Ok(task)
    }

    /// Replaces the task's checkpoint wholesale and releases the lock.
    ///
    /// Requires the task lock to be held. Publishes no notification.
    pub async fn checkpoint_task(
        &self,
        task_key: &TaskKey,
        checkpoint: QueryCheckpoint,
    ) -> Result<QueryTask, StorageError> {
        if !self.lock_manager.is_locked(task_key).await {
            return Err(LockError::NotLocked(task_key.clone()).into());
        }
        let mut task = match self.cache.get_task(task_key).await? {
            Some(task) => task,
            None => {
                self.lock_manager.release_lock(task_key).await?;
                return Err(StorageError::TaskNotFound(task_key.clone()));
            }
        };
        task.set_checkpoint(checkpoint);
        self.cache.put_task(task.clone()).await?;
        self.lock_manager.release_lock(task_key).await?;
        Ok(task)
    }

    /// Persists an updated checkpoint and timestamp mid-run without
    /// releasing the task lock. The checkpoint updater's write path.
    ///
    /// A vanished record reports [`StorageError::TaskNotFound`] even when the
    /// lock is also gone, since deletion releases the lock as a side effect
    /// and the missing record is the condition callers tolerate.
    pub async fn refresh_task(&self, task: &QueryTask) -> Result<(), StorageError> {
        if self.cache.get_task(&task.task_key).await?.is_none() {
            return Err(StorageError::TaskNotFound(task.task_key.clone()));
        }
        if !self.lock_manager.is_locked(&task.task_key).await {
            return Err(LockError::NotLocked(task.task_key.clone()).into());
        }
        let mut refreshed = task.clone();
        refreshed.touch();
        self.cache.put_task(refreshed).await
    }

    /// Removes the task record and releases the lock. Requires the lock to be
    /// held. Publishes no notification.
    pub async fn delete_task(&self, task_key: &TaskKey) -> Result<(), StorageError> {
        if !self.lock_manager.is_locked(task_key).await {
            return Err(LockError::NotLocked(task_key.clone()).into());
        }
        self.cache.delete_task(task_key).await?;
        self.lock_manager.release_lock(task_key).await?;
        self.storage_locks
            .remove(&format!("TASK:{}", task_key.task_id));
        debug!(task_key = %task_key, "Deleted task");
        Ok(())
    }

    pub async fn get_tasks(&self, query_id: Uuid) -> Result<Vec<QueryTask>, StorageError> {
        self.cache.get_tasks(query_id).await
    }

    /// Action and timestamp summaries of a query's outstanding tasks.
    pub async fn get_task_descriptions(
        &self,
        query_id: Uuid,
    ) -> Result<Vec<TaskDescription>, StorageError> {
        Ok(self
            .cache
            .get_tasks(query_id)
            .await?
            .iter()
            .map(TaskDescription::from)
            .collect())
    }

    /// Republishes a task notification, e.g. to requeue a paused task.
    pub async fn post_task_notification(&self, task: &QueryTask) -> Result<(), StorageError> {
        self.queues
            .publish_task_notification(
                task.task_key.query_pool(),
                TaskNotification::new(task.task_key.clone(), task.action),
            )
            .await
    }

    // ----- status CRUD -----

    pub async fn get_query_status(
        &self,
        query_id: Uuid,
    ) -> Result<Option<QueryStatus>, StorageError> {
        self.cache.get_query_status(query_id).await
    }

    pub async fn get_query_statuses(&self) -> Result<Vec<QueryStatus>, StorageError> {
        self.cache.get_query_statuses().await
    }

    pub async fn update_query_status(&self, status: QueryStatus) -> Result<(), StorageError> {
        self.cache.update_query_status(status).await
    }

    /// State-only update, performed under the query status lock.
    pub async fn update_query_state(
        &self,
        query_id: Uuid,
        state: QueryState,
    ) -> Result<(), StorageError> {
        let lock = self.query_status_lock(query_id);
        let _guard = lock.lock().await;
        let mut status = self
            .cache
            .get_query_status(query_id)
            .await?
            .ok_or(StorageError::QueryNotFound(query_id))?;
        status.set_state(state);
        self.cache.update_query_status(status).await?;
        info!(query_id = %query_id, state = %state, "Updated query state");
        Ok(())
    }

    /// Atomically transitions a query to FAIL and records the error. The
    /// single path by which an unrecoverable task failure becomes visible to
    /// clients.
    pub async fn update_failed_query_status(
        &self,
        query_id: Uuid,
        failure: QueryFailure,
    ) -> Result<(), StorageError> {
        let lock = self.query_status_lock(query_id);
        let _guard = lock.lock().await;
        let mut status = self
            .cache
            .get_query_status(query_id)
            .await?
            .ok_or(StorageError::QueryNotFound(query_id))?;
        status.set_failure(failure);
        self.cache.update_query_status(status).await?;
        counter!("sluice_queries_failed_total").increment(1);
        Ok(())
    }

    /// Increments the count of active NEXT generation passes; returns the new
    /// count.
    pub async fn increment_active_next_calls(&self, query_id: Uuid) -> Result<u64, StorageError> {
        let lock = self.query_status_lock(query_id);
        let _guard = lock.lock().await;
        let mut status = self
            .cache
            .get_query_status(query_id)
            .await?
            .ok_or(StorageError::QueryNotFound(query_id))?;
        status.active_next_calls += 1;
        let count = status.active_next_calls;
        status.touch();
        self.cache.update_query_status(status).await?;
        Ok(count)
    }

    pub async fn decrement_active_next_calls(&self, query_id: Uuid) -> Result<u64, StorageError> {
        let lock = self.query_status_lock(query_id);
        let _guard = lock.lock().await;
        let mut status = self
            .cache
            .get_query_status(query_id)
            .await?
            .ok_or(StorageError::QueryNotFound(query_id))?;
        status.active_next_calls = status.active_next_calls.saturating_sub(1);
        let count = status.active_next_calls;
        status.touch();
        self.cache.update_query_status(status).await?;
        Ok(count)
    }

    // ----- task states -----

    pub async fn get_task_states(
        &self,
        query_id: Uuid,
    ) -> Result<Option<TaskStates>, StorageError> {
        self.cache.get_task_states(query_id).await
    }

    /// Transitions one task's state under the task-states lock. Returns false
    /// when the transition was refused by the running cap.
    pub async fn update_task_state(
        &self,
        task_key: &TaskKey,
        state: TaskState,
    ) -> Result<bool, StorageError> {
        let query_id = task_key.query_id();
        let lock = self.task_states_lock(query_id);
        let _guard = lock.lock().await;
        let mut states = self
            .cache
            .get_task_states(query_id)
            .await?
            .ok_or(StorageError::TaskStatesNotFound(query_id))?;
        if !states.set_state(task_key.task_id, state) {
            return Ok(false);
        }
        self.cache.update_task_states(states).await?;
        Ok(true)
    }
}
