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

//! Backing store for query status, task states, and task records.
//!
//! The [`QueryCache`] trait is the persistence seam: [`LocalQueryCache`]
//! keeps everything in process maps, while a distributed deployment binds the
//! same trait to a shared data grid. Records are stored whole and replaced
//! whole; the coordinator layers locking and notifications on top.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{QueryStatus, QueryTask, TaskKey, TaskStates};

/// CRUD over the three persisted record families.
#[async_trait]
pub trait QueryCache: Send + Sync {
    async fn update_query_status(&self, status: QueryStatus) -> Result<(), StorageError>;

    async fn get_query_status(&self, query_id: Uuid) -> Result<Option<QueryStatus>, StorageError>;

    async fn get_query_statuses(&self) -> Result<Vec<QueryStatus>, StorageError>;

    async fn delete_query_status(&self, query_id: Uuid) -> Result<(), StorageError>;

    async fn update_task_states(&self, states: TaskStates) -> Result<(), StorageError>;

    async fn get_task_states(&self, query_id: Uuid) -> Result<Option<TaskStates>, StorageError>;

    async fn delete_task_states(&self, query_id: Uuid) -> Result<(), StorageError>;

    async fn put_task(&self, task: QueryTask) -> Result<(), StorageError>;

    async fn get_task(&self, task_key: &TaskKey) -> Result<Option<QueryTask>, StorageError>;

    /// All outstanding task records of one query.
    async fn get_tasks(&self, query_id: Uuid) -> Result<Vec<QueryTask>, StorageError>;

    async fn delete_task(&self, task_key: &TaskKey) -> Result<(), StorageError>;

    /// Wipes every record. Admin and test use only.
    async fn clear(&self) -> Result<(), StorageError>;
}

/// In-process cache implementation.
#[derive(Default)]
pub struct LocalQueryCache {
    statuses: RwLock<HashMap<Uuid, QueryStatus>>,
    task_states: RwLock<HashMap<Uuid, TaskStates>>,
    tasks: RwLock<HashMap<Uuid, QueryTask>>,
}

impl LocalQueryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueryCache for LocalQueryCache {
    async fn update_query_status(&self, status: QueryStatus) -> Result<(), StorageError> {
        self.statuses.write().insert(status.query_id(), status);
        Ok(())
    }

    async fn get_query_status(&self, query_id: Uuid) -> Result<Option<QueryStatus>, StorageError> {
        Ok(self.statuses.read().get(&query_id).cloned())
    }

    async fn get_query_statuses(&self) -> Result<Vec<QueryStatus>, StorageError> {
        Ok(self.statuses.read().values().cloned().collect())
    }

    async fn delete_query_status(&self, query_id: Uuid) -> Result<(), StorageError> {
        self.statuses.write().remove(&query_id);
        Ok(())
    }

    async fn update_task_states(&self, states: TaskStates) -> Result<(), StorageError> {
        self.task_states
            .write()
            .insert(states.query_key.query_id, states);
        Ok(())
    }

    async fn get_task_states(&self, query_id: Uuid) -> Result<Option<TaskStates>, StorageError> {
        Ok(self.task_states.read().get(&query_id).cloned())
    }

    async fn delete_task_states(&self, query_id: Uuid) -> Result<(), StorageError> {
        self.task_states.write().remove(&query_id);
        Ok(())
    }

    async fn put_task(&self, task: QueryTask) -> Result<(), StorageError> {
        self.tasks.write().insert(task.task_key.task_id, task);
        Ok(())
    }

    async fn get_task(&self, task_key: &TaskKey) -> Result<Option<QueryTask>, StorageError> {
        Ok(self.tasks.read().get(&task_key.task_id).cloned())
    }

    async fn get_tasks(&self, query_id: Uuid) -> Result<Vec<QueryTask>, StorageError> {
        Ok(self
            .tasks
            .read()
            .values()
            .filter(|t| t.task_key.query_id() == query_id)
            .cloned()
            .collect())
    }

    async fn delete_task(&self, task_key: &TaskKey) -> Result<(), StorageError> {
        self.tasks.write().remove(&task_key.task_id);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.statuses.write().clear();
        self.task_states.write().clear();
        self.tasks.write().clear();
        Ok(())
    }
}
