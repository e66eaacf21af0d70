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

//! Debounced-write view of one query's status.
//!
//! The result loop reads query state and bumps counters on every published
//! result; flushing each increment through the backing store would make every
//! result pay a storage round trip. This wrapper buffers counter increments
//! in memory and flushes them periodically or on a forced flush, trading a
//! small window of potential count loss on crash for drastically reduced
//! write load.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::QueryStatus;

use super::coordinator::QueryStorageCache;

pub struct CachedQueryStatus {
    coordinator: Arc<QueryStorageCache>,
    query_id: Uuid,
    status: QueryStatus,
    /// How long a fetched status stays fresh, and how often buffered
    /// increments are flushed. Zero disables caching entirely.
    expiration: Duration,
    last_fetch: Instant,
    last_flush: Instant,
    pending_generated: u64,
    pending_next: u64,
    pending_seek: u64,
}

impl CachedQueryStatus {
    pub async fn new(
        coordinator: Arc<QueryStorageCache>,
        query_id: Uuid,
        expiration: Duration,
    ) -> Result<Self, StorageError> {
        let status = coordinator
            .get_query_status(query_id)
            .await?
            .ok_or(StorageError::QueryNotFound(query_id))?;
        let now = Instant::now();
        Ok(Self {
            coordinator,
            query_id,
            status,
            expiration,
            last_fetch: now,
            last_flush: now,
            pending_generated: 0,
            pending_next: 0,
            pending_seek: 0,
        })
    }

    pub fn query_id(&self) -> Uuid {
        self.query_id
    }

    /// The current status, refetched from storage when the cached copy has
    /// expired. Buffered increments are always reflected in the returned
    /// view.
    pub async fn status(&mut self) -> Result<&QueryStatus, StorageError> {
        if self.expiration.is_zero() || self.last_fetch.elapsed() >= self.expiration {
            let mut fresh = self
                .coordinator
                .get_query_status(self.query_id)
                .await?
                .ok_or(StorageError::QueryNotFound(self.query_id))?;
            fresh.num_results_generated += self.pending_generated;
            fresh.next_count += self.pending_next;
            fresh.seek_count += self.pending_seek;
            self.status = fresh;
            self.last_fetch = Instant::now();
        }
        Ok(&self.status)
    }

    pub fn increment_results_generated(&mut self, count: u64) {
        self.pending_generated += count;
        self.status.num_results_generated += count;
    }

    pub fn increment_next_count(&mut self, count: u64) {
        self.pending_next += count;
        self.status.next_count += count;
    }

    pub fn increment_seek_count(&mut self, count: u64) {
        self.pending_seek += count;
        self.status.seek_count += count;
    }

    pub fn is_dirty(&self) -> bool {
        self.pending_generated > 0 || self.pending_next > 0 || self.pending_seek > 0
    }

    /// Flushes buffered increments when the debounce interval has elapsed.
    /// Called on the hot path; cheap when there is nothing to do.
    pub async fn maybe_flush(&mut self) -> Result<(), StorageError> {
        if self.is_dirty() && self.last_flush.elapsed() >= self.expiration {
            self.flush().await?;
        }
        Ok(())
    }

    /// Applies buffered increments to the stored status under the query
    /// status lock.
    pub async fn flush(&mut self) -> Result<(), StorageError> {
        if !self.is_dirty() {
            return Ok(());
        }
        let lock = self.coordinator.query_status_lock(self.query_id);
        let _guard = lock.lock().await;
        let mut stored = self
            .coordinator
            .get_query_status(self.query_id)
            .await?
            .ok_or(StorageError::QueryNotFound(self.query_id))?;
        stored.increment_num_results_generated(self.pending_generated);
        stored.next_count += self.pending_next;
        stored.seek_count += self.pending_seek;
        self.coordinator.update_query_status(stored.clone()).await?;
        debug!(
            query_id = %self.query_id,
            results = self.pending_generated,
            "Flushed buffered status increments"
        );
        self.pending_generated = 0;
        self.pending_next = 0;
        self.pending_seek = 0;
        self.status = stored;
        let now = Instant::now();
        self.last_fetch = now;
        self.last_flush = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LocalLockManager;
    use crate::messaging::LocalQueueManager;
    use crate::models::{QueryDefinition, QueryState};
    use crate::storage::cache::LocalQueryCache;

    async fn stack_with_query() -> (Arc<QueryStorageCache>, Uuid) {
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
        (coordinator, task_key.query_id())
    }

    #[tokio::test]
    async fn test_increments_buffer_until_flush() {
        let (coordinator, query_id) = stack_with_query().await;
        let mut cached =
            CachedQueryStatus::new(coordinator.clone(), query_id, Duration::from_secs(60))
                .await
                .unwrap();

        cached.increment_results_generated(5);
        assert_eq!(cached.status().await.unwrap().num_results_generated, 5);
        // Not yet visible in the store.
        let stored = coordinator.get_query_status(query_id).await.unwrap().unwrap();
        assert_eq!(stored.num_results_generated, 0);

        cached.flush().await.unwrap();
        let stored = coordinator.get_query_status(query_id).await.unwrap().unwrap();
        assert_eq!(stored.num_results_generated, 5);
        assert!(!cached.is_dirty());
    }

    #[tokio::test]
    async fn test_zero_expiration_reads_fresh_state() {
        let (coordinator, query_id) = stack_with_query().await;
        let mut cached = CachedQueryStatus::new(coordinator.clone(), query_id, Duration::ZERO)
            .await
            .unwrap();

        coordinator
            .update_query_state(query_id, QueryState::Cancel)
            .await
            .unwrap();
        assert_eq!(cached.status().await.unwrap().state, QueryState::Cancel);
    }

    #[tokio::test]
    async fn test_flush_preserves_concurrent_store_updates() {
        let (coordinator, query_id) = stack_with_query().await;
        let mut cached =
            CachedQueryStatus::new(coordinator.clone(), query_id, Duration::from_secs(60))
                .await
                .unwrap();
        cached.increment_results_generated(3);

        // Another worker bumps the stored counter while ours is buffered.
        {
            let lock = coordinator.query_status_lock(query_id);
            let _guard = lock.lock().await;
            let mut status = coordinator.get_query_status(query_id).await.unwrap().unwrap();
            status.increment_num_results_generated(4);
            coordinator.update_query_status(status).await.unwrap();
        }

        cached.flush().await.unwrap();
        let stored = coordinator.get_query_status(query_id).await.unwrap().unwrap();
        assert_eq!(stored.num_results_generated, 7);
    }

    #[tokio::test]
    async fn test_maybe_flush_respects_debounce() {
        let (coordinator, query_id) = stack_with_query().await;
        let mut cached =
            CachedQueryStatus::new(coordinator.clone(), query_id, Duration::from_secs(60))
                .await
                .unwrap();
        cached.increment_results_generated(1);
        cached.maybe_flush().await.unwrap();
        // Debounce interval has not elapsed, so nothing was written.
        let stored = coordinator.get_query_status(query_id).await.unwrap().unwrap();
        assert_eq!(stored.num_results_generated, 0);
        assert!(cached.is_dirty());
    }
}
