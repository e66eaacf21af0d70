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

//! In-process lock manager.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::error::LockError;
use crate::models::TaskKey;

use super::QueryLockManager;

struct QuerySemaphore {
    permits: usize,
    holders: HashMap<Uuid, TaskKey>,
    // notify_one stores a permit, so a release between a waiter's state check
    // and its await is not lost.
    notify: Arc<Notify>,
}

/// Lock manager backed by process-local state.
///
/// Permit accounting is guarded by a short-lived mutex; waiters park on a
/// per-query [`Notify`] with a deadline so every wait is bounded.
#[derive(Default)]
pub struct LocalLockManager {
    semaphores: Mutex<HashMap<Uuid, QuerySemaphore>>,
}

impl LocalLockManager {
    pub fn new() -> Self {
        Self::default()
    }
}

enum Attempt {
    Acquired,
    Full(Arc<Notify>),
}

impl LocalLockManager {
    fn try_acquire(&self, task_key: &TaskKey) -> Result<Attempt, LockError> {
        let mut semaphores = self.semaphores.lock();
        let semaphore = semaphores
            .get_mut(&task_key.query_id())
            .ok_or(LockError::NoSemaphore(task_key.query_id()))?;
        if semaphore.holders.contains_key(&task_key.task_id) {
            return Err(LockError::AlreadyLocked(task_key.clone()));
        }
        if semaphore.holders.len() < semaphore.permits {
            semaphore
                .holders
                .insert(task_key.task_id, task_key.clone());
            Ok(Attempt::Acquired)
        } else {
            Ok(Attempt::Full(semaphore.notify.clone()))
        }
    }
}

#[async_trait]
impl QueryLockManager for LocalLockManager {
    async fn create_semaphore(&self, query_id: Uuid, count: usize) -> Result<(), LockError> {
        let mut semaphores = self.semaphores.lock();
        if count == 0 {
            if let Some(semaphore) = semaphores.remove(&query_id) {
                debug!(query_id = %query_id, "Deleted semaphore, force-releasing held locks");
                semaphore.notify.notify_waiters();
            }
            return Ok(());
        }
        match semaphores.get_mut(&query_id) {
            Some(semaphore) => {
                semaphore.permits = count;
                // Raising the count may unblock waiters.
                semaphore.notify.notify_waiters();
            }
            None => {
                semaphores.insert(
                    query_id,
                    QuerySemaphore {
                        permits: count,
                        holders: HashMap::new(),
                        notify: Arc::new(Notify::new()),
                    },
                );
            }
        }
        Ok(())
    }

    async fn acquire_lock(&self, task_key: &TaskKey, wait: Duration) -> Result<bool, LockError> {
        let deadline = Instant::now() + wait;
        loop {
            let notify = match self.try_acquire(task_key)? {
                Attempt::Acquired => return Ok(true),
                Attempt::Full(notify) => notify,
            };
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let _ = tokio::time::timeout_at(deadline, notify.notified()).await;
        }
    }

    async fn release_lock(&self, task_key: &TaskKey) -> Result<(), LockError> {
        let mut semaphores = self.semaphores.lock();
        let semaphore = semaphores
            .get_mut(&task_key.query_id())
            .ok_or_else(|| LockError::NotLocked(task_key.clone()))?;
        if semaphore.holders.remove(&task_key.task_id).is_none() {
            return Err(LockError::NotLocked(task_key.clone()));
        }
        semaphore.notify.notify_one();
        Ok(())
    }

    async fn is_locked(&self, task_key: &TaskKey) -> bool {
        let semaphores = self.semaphores.lock();
        semaphores
            .get(&task_key.query_id())
            .map(|s| s.holders.contains_key(&task_key.task_id))
            .unwrap_or(false)
    }

    async fn locked_tasks(&self, query_id: Uuid) -> Vec<TaskKey> {
        let semaphores = self.semaphores.lock();
        semaphores
            .get(&query_id)
            .map(|s| s.holders.values().cloned().collect())
            .unwrap_or_default()
    }

    async fn queries(&self) -> Vec<Uuid> {
        let semaphores = self.semaphores.lock();
        semaphores.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueryKey;

    fn query_key() -> QueryKey {
        QueryKey::new("default", Uuid::new_v4(), "EventQuery")
    }

    const WAIT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_acquire_requires_semaphore() {
        let manager = LocalLockManager::new();
        let task_key = TaskKey::new(query_key());
        let err = manager.acquire_lock(&task_key, WAIT).await.unwrap_err();
        assert!(matches!(err, LockError::NoSemaphore(_)));
    }

    #[tokio::test]
    async fn test_lock_exclusivity_per_task() {
        let manager = LocalLockManager::new();
        let key = query_key();
        manager.create_semaphore(key.query_id, 2).await.unwrap();
        let task_key = TaskKey::new(key);

        assert!(manager.acquire_lock(&task_key, WAIT).await.unwrap());
        // Second acquire of the same task is a definite lock error, not a
        // timeout, even though semaphore slots remain.
        let err = manager.acquire_lock(&task_key, WAIT).await.unwrap_err();
        assert!(matches!(err, LockError::AlreadyLocked(_)));

        manager.release_lock(&task_key).await.unwrap();
        assert!(manager.acquire_lock(&task_key, WAIT).await.unwrap());
    }

    #[tokio::test]
    async fn test_semaphore_bounds_concurrent_locks() {
        let manager = Arc::new(LocalLockManager::new());
        let key = query_key();
        manager.create_semaphore(key.query_id, 2).await.unwrap();

        let tasks: Vec<TaskKey> = (0..3).map(|_| TaskKey::new(key.clone())).collect();
        assert!(manager.acquire_lock(&tasks[0], WAIT).await.unwrap());
        assert!(manager.acquire_lock(&tasks[1], WAIT).await.unwrap());
        // Third distinct task times out rather than erroring.
        assert!(!manager.acquire_lock(&tasks[2], WAIT).await.unwrap());

        manager.release_lock(&tasks[0]).await.unwrap();
        assert!(manager.acquire_lock(&tasks[2], WAIT).await.unwrap());
        assert_eq!(manager.locked_tasks(key.query_id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let manager = Arc::new(LocalLockManager::new());
        let key = query_key();
        manager.create_semaphore(key.query_id, 1).await.unwrap();
        let first = TaskKey::new(key.clone());
        let second = TaskKey::new(key);

        assert!(manager.acquire_lock(&first, WAIT).await.unwrap());

        let waiter = {
            let manager = manager.clone();
            let second = second.clone();
            tokio::spawn(async move {
                manager
                    .acquire_lock(&second, Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.release_lock(&first).await.unwrap();
        assert!(waiter.await.unwrap());
        assert!(manager.is_locked(&second).await);
    }

    #[tokio::test]
    async fn test_release_unlocked_task_errors() {
        let manager = LocalLockManager::new();
        let key = query_key();
        manager.create_semaphore(key.query_id, 1).await.unwrap();
        let task_key = TaskKey::new(key);
        let err = manager.release_lock(&task_key).await.unwrap_err();
        assert!(matches!(err, LockError::NotLocked(_)));
    }

    #[tokio::test]
    async fn test_zero_count_deletes_semaphore_and_releases_locks() {
        let manager = LocalLockManager::new();
        let key = query_key();
        manager.create_semaphore(key.query_id, 1).await.unwrap();
        let task_key = TaskKey::new(key.clone());
        assert!(manager.acquire_lock(&task_key, WAIT).await.unwrap());

        manager.create_semaphore(key.query_id, 0).await.unwrap();
        assert!(!manager.is_locked(&task_key).await);
        assert!(manager.queries().await.is_empty());
        let err = manager.acquire_lock(&task_key, WAIT).await.unwrap_err();
        assert!(matches!(err, LockError::NoSemaphore(_)));
    }

    #[tokio::test]
    async fn test_raising_count_unblocks_waiters() {
        let manager = Arc::new(LocalLockManager::new());
        let key = query_key();
        manager.create_semaphore(key.query_id, 1).await.unwrap();
        let first = TaskKey::new(key.clone());
        let second = TaskKey::new(key.clone());
        assert!(manager.acquire_lock(&first, WAIT).await.unwrap());

        let waiter = {
            let manager = manager.clone();
            let second = second.clone();
            tokio::spawn(async move {
                manager
                    .acquire_lock(&second, Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.create_semaphore(key.query_id, 2).await.unwrap();
        assert!(waiter.await.unwrap());
    }
}
