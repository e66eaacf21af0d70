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

//! Integration tests for lock semantics through the coordinator facade.

mod common;

use common::build_stack;
use sluice::error::{LockError, StorageError};
use sluice::models::{QueryDefinition, TaskAction};
use std::time::Duration;

const WAIT: Duration = Duration::from_millis(100);

#[tokio::test]
async fn test_semaphore_bounds_claimed_tasks_per_query() {
    let stack = build_stack();
    let coordinator = &stack.coordinator;
    let first = coordinator
        .create_query("default", QueryDefinition::new("EventQuery", "A == 'a'", 10), 1)
        .await
        .unwrap();

    let checkpoint = coordinator
        .get_tasks(first.query_id())
        .await
        .unwrap()
        .remove(0)
        .checkpoint;
    let second = coordinator
        .create_task(TaskAction::Next, checkpoint)
        .await
        .unwrap();

    // With one semaphore slot, claiming the second task times out while the
    // first is held.
    coordinator.get_task(&first, WAIT).await.unwrap().unwrap();
    let err = coordinator
        .get_task(&second.task_key, WAIT)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Lock(LockError::Timeout(_))));

    // Releasing the first slot (checkpoint releases the lock) frees it.
    let task = coordinator
        .get_tasks(first.query_id())
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.task_key == first)
        .unwrap();
    coordinator
        .checkpoint_task(&first, task.checkpoint)
        .await
        .unwrap();
    coordinator
        .get_task(&second.task_key, WAIT)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_queries_are_isolated_by_semaphore() {
    let stack = build_stack();
    let coordinator = &stack.coordinator;
    let a = coordinator
        .create_query("default", QueryDefinition::new("EventQuery", "A == 'a'", 10), 1)
        .await
        .unwrap();
    let b = coordinator
        .create_query("default", QueryDefinition::new("EventQuery", "B == 'b'", 10), 1)
        .await
        .unwrap();

    // Holding query A's only slot does not block query B.
    coordinator.get_task(&a, WAIT).await.unwrap().unwrap();
    coordinator.get_task(&b, WAIT).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_delete_query_force_releases_held_locks() {
    let stack = build_stack();
    let coordinator = &stack.coordinator;
    let task_key = coordinator
        .create_query("default", QueryDefinition::new("EventQuery", "A == 'a'", 10), 1)
        .await
        .unwrap();

    coordinator.get_task(&task_key, WAIT).await.unwrap().unwrap();
    coordinator.delete_query(task_key.query_id()).await.unwrap();

    assert!(!coordinator.lock_manager().is_locked(&task_key).await);
    assert!(coordinator.lock_manager().queries().await.is_empty());
}
