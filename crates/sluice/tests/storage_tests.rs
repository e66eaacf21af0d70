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

//! Integration tests for the storage coordinator facade.

mod common;

use common::build_stack;
use serde_json::json;
use sluice::error::{LockError, StorageError};
use sluice::models::{
    QueryDefinition, QueryFailure, QueryState, TaskAction, TaskState,
};
use std::time::Duration;

const WAIT: Duration = Duration::from_millis(100);

fn definition() -> QueryDefinition {
    QueryDefinition::new("EventQuery", "FOO == 'bar'", 10)
}

#[tokio::test]
async fn test_create_query_initializes_all_records() {
    let stack = build_stack();
    let coordinator = &stack.coordinator;

    let mut listener = coordinator.queues().create_task_listener("observer", "default");
    let task_key = coordinator
        .create_query("default", definition(), 2)
        .await
        .unwrap();
    let query_id = task_key.query_id();

    let status = coordinator.get_query_status(query_id).await.unwrap().unwrap();
    assert_eq!(status.state, QueryState::Created);
    assert_eq!(status.query.query, "FOO == 'bar'");
    assert_eq!(status.num_results_generated, 0);

    let states = coordinator.get_task_states(query_id).await.unwrap().unwrap();
    assert_eq!(states.max_running, Some(2));
    assert_eq!(states.state(task_key.task_id), Some(TaskState::Ready));

    let tasks = coordinator.get_tasks(query_id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].action, TaskAction::Create);
    assert_eq!(tasks[0].task_key, task_key);

    let notification = listener.receive(WAIT).await.unwrap();
    assert_eq!(notification.task_key, task_key);
    assert_eq!(notification.action, TaskAction::Create);
}

#[tokio::test]
async fn test_define_query_uses_define_action() {
    let stack = build_stack();
    let task_key = stack
        .coordinator
        .define_query("default", definition(), 1)
        .await
        .unwrap();

    let status = stack
        .coordinator
        .get_query_status(task_key.query_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.state, QueryState::Defined);

    let tasks = stack.coordinator.get_tasks(task_key.query_id()).await.unwrap();
    assert_eq!(tasks[0].action, TaskAction::Define);
}

#[tokio::test]
async fn test_get_task_enforces_lock_exclusivity() {
    let stack = build_stack();
    let task_key = stack
        .coordinator
        .create_query("default", definition(), 2)
        .await
        .unwrap();

    let task = stack.coordinator.get_task(&task_key, WAIT).await.unwrap();
    assert!(task.is_some());

    let err = stack.coordinator.get_task(&task_key, WAIT).await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::Lock(LockError::AlreadyLocked(_))
    ));
}

#[tokio::test]
async fn test_checkpoint_requires_lock_and_releases_it() {
    let stack = build_stack();
    let coordinator = &stack.coordinator;
    let task_key = coordinator
        .create_query("default", definition(), 1)
        .await
        .unwrap();

    // Checkpointing without holding the lock is a definite error.
    let checkpoint = coordinator
        .get_tasks(task_key.query_id())
        .await
        .unwrap()
        .remove(0)
        .checkpoint;
    let err = coordinator
        .checkpoint_task(&task_key, checkpoint.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Lock(LockError::NotLocked(_))));

    let task = coordinator.get_task(&task_key, WAIT).await.unwrap().unwrap();
    let mut updated = task.checkpoint.clone();
    updated.set_property("position", json!(42));
    coordinator.checkpoint_task(&task_key, updated).await.unwrap();

    // The lock was released, so the task can be claimed again and carries the
    // replaced checkpoint.
    assert!(!coordinator.lock_manager().is_locked(&task_key).await);
    let task = coordinator.get_task(&task_key, WAIT).await.unwrap().unwrap();
    assert_eq!(task.checkpoint.property("position"), Some(&json!(42)));
}

#[tokio::test]
async fn test_get_task_returns_none_after_deletion() {
    let stack = build_stack();
    let coordinator = &stack.coordinator;
    let task_key = coordinator
        .create_query("default", definition(), 1)
        .await
        .unwrap();

    coordinator.get_task(&task_key, WAIT).await.unwrap();
    coordinator.delete_task(&task_key).await.unwrap();

    // A stale notification consumer sees the record gone and holds no lock.
    let task = coordinator.get_task(&task_key, WAIT).await.unwrap();
    assert!(task.is_none());
    assert!(!coordinator.lock_manager().is_locked(&task_key).await);
}

#[tokio::test]
async fn test_refresh_reports_missing_record_over_lock_state() {
    let stack = build_stack();
    let coordinator = &stack.coordinator;
    let task_key = coordinator
        .create_query("default", definition(), 1)
        .await
        .unwrap();

    let task = coordinator.get_task(&task_key, WAIT).await.unwrap().unwrap();
    coordinator.delete_task(&task_key).await.unwrap();

    // Deletion released the lock too, but a heartbeat landing afterwards
    // must see the missing record, which callers tolerate as "query was
    // deleted", rather than a lock error.
    let err = coordinator.refresh_task(&task).await.unwrap_err();
    assert!(matches!(err, StorageError::TaskNotFound(_)));
}

#[tokio::test]
async fn test_delete_query_removes_all_state() {
    let stack = build_stack();
    let coordinator = &stack.coordinator;
    let doomed = coordinator
        .create_query("default", definition(), 1)
        .await
        .unwrap();
    let survivor = coordinator
        .create_query("default", definition(), 1)
        .await
        .unwrap();

    coordinator.delete_query(doomed.query_id()).await.unwrap();

    assert!(coordinator
        .get_query_status(doomed.query_id())
        .await
        .unwrap()
        .is_none());
    assert!(coordinator
        .get_task_states(doomed.query_id())
        .await
        .unwrap()
        .is_none());
    assert!(coordinator.get_tasks(doomed.query_id()).await.unwrap().is_empty());
    let err = coordinator.get_task(&doomed, WAIT).await.unwrap_err();
    assert!(matches!(err, StorageError::Lock(LockError::NoSemaphore(_))));

    // The other query is untouched.
    assert!(coordinator
        .get_query_status(survivor.query_id())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_failed_status_records_error() {
    let stack = build_stack();
    let task_key = stack
        .coordinator
        .create_query("default", definition(), 1)
        .await
        .unwrap();

    stack
        .coordinator
        .update_failed_query_status(
            task_key.query_id(),
            QueryFailure::new("LogicError", "scan exploded"),
        )
        .await
        .unwrap();

    let status = stack
        .coordinator
        .get_query_status(task_key.query_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.state, QueryState::Fail);
    let failure = status.failure.unwrap();
    assert_eq!(failure.error_type, "LogicError");
    assert_eq!(failure.message, "scan exploded");
}

#[tokio::test]
async fn test_active_next_calls_round_trip() {
    let stack = build_stack();
    let task_key = stack
        .coordinator
        .create_query("default", definition(), 2)
        .await
        .unwrap();
    let query_id = task_key.query_id();

    assert_eq!(
        stack.coordinator.increment_active_next_calls(query_id).await.unwrap(),
        1
    );
    assert_eq!(
        stack.coordinator.increment_active_next_calls(query_id).await.unwrap(),
        2
    );
    assert_eq!(
        stack.coordinator.decrement_active_next_calls(query_id).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_task_descriptions_summarize_outstanding_tasks() {
    let stack = build_stack();
    let coordinator = &stack.coordinator;
    let task_key = coordinator
        .create_query("default", definition(), 2)
        .await
        .unwrap();

    let checkpoint = coordinator
        .get_tasks(task_key.query_id())
        .await
        .unwrap()
        .remove(0)
        .checkpoint;
    coordinator
        .create_task(TaskAction::Next, checkpoint)
        .await
        .unwrap();

    let descriptions = coordinator
        .get_task_descriptions(task_key.query_id())
        .await
        .unwrap();
    assert_eq!(descriptions.len(), 2);
    let mut actions: Vec<_> = descriptions.iter().map(|d| d.action).collect();
    actions.sort_by_key(|a| format!("{}", a));
    assert_eq!(actions, vec![TaskAction::Create, TaskAction::Next]);
}

#[tokio::test]
async fn test_running_cap_refused_through_facade() {
    let stack = build_stack();
    let coordinator = &stack.coordinator;
    let task_key = coordinator
        .create_query("default", definition(), 1)
        .await
        .unwrap();

    let checkpoint = coordinator
        .get_tasks(task_key.query_id())
        .await
        .unwrap()
        .remove(0)
        .checkpoint;
    let second = coordinator
        .create_task(TaskAction::Next, checkpoint)
        .await
        .unwrap();

    assert!(coordinator
        .update_task_state(&task_key, TaskState::Running)
        .await
        .unwrap());
    // The cap of one refuses a second concurrent RUNNING transition.
    assert!(!coordinator
        .update_task_state(&second.task_key, TaskState::Running)
        .await
        .unwrap());

    assert!(coordinator
        .update_task_state(&task_key, TaskState::Completed)
        .await
        .unwrap());
    assert!(coordinator
        .update_task_state(&second.task_key, TaskState::Running)
        .await
        .unwrap());
}
