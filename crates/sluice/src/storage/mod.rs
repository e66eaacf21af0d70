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

//! Storage: the backing cache, named storage locks, the coordinator facade,
//! and the debounced status view.

pub mod cache;
pub mod cached_status;
pub mod coordinator;
pub mod locks;

pub use cache::{LocalQueryCache, QueryCache};
pub use cached_status::CachedQueryStatus;
pub use coordinator::QueryStorageCache;
pub use locks::{QueryStorageGuard, QueryStorageLock, StorageLockRegistry};
