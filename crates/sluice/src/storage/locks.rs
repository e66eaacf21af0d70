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

//! Named storage locks for multi-step read-modify-write sequences.
//!
//! Callers mutating `QueryStatus` or `TaskStates` in place (e.g. increment a
//! counter while also checking the query state) hold the relevant named lock
//! for the duration of the sequence. Locks are keyed by the same string the
//! record is stored under.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Guard for a held storage lock; dropping it releases the lock.
pub struct QueryStorageGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Handle to one named storage lock.
#[derive(Clone)]
pub struct QueryStorageLock {
    name: String,
    inner: Arc<AsyncMutex<()>>,
}

impl QueryStorageLock {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits until the lock is held.
    pub async fn lock(&self) -> QueryStorageGuard {
        QueryStorageGuard {
            _guard: self.inner.clone().lock_owned().await,
        }
    }

    /// Waits up to `wait` for the lock; `None` on timeout.
    pub async fn try_lock_for(&self, wait: Duration) -> Option<QueryStorageGuard> {
        tokio::time::timeout(wait, self.lock()).await.ok()
    }

    /// Acquires only if immediately available.
    pub fn try_lock(&self) -> Option<QueryStorageGuard> {
        self.inner
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| QueryStorageGuard { _guard: guard })
    }
}

/// Registry handing out one lock per storage key.
#[derive(Default)]
pub struct StorageLockRegistry {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl StorageLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, name: impl Into<String>) -> QueryStorageLock {
        let name = name.into();
        let inner = self
            .locks
            .lock()
            .entry(name.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        QueryStorageLock { name, inner }
    }

    /// Drops the registry entry for a key. Outstanding handles keep working;
    /// new handles for the same key start fresh.
    pub fn remove(&self, name: &str) {
        self.locks.lock().remove(name);
    }
}
