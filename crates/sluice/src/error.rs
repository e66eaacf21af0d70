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

//! Error taxonomy for the coordinator.
//!
//! Lock errors are always surfaced and never silently retried: callers must
//! be able to distinguish "someone else has it" ([`LockError::AlreadyLocked`])
//! from "you forgot to lock first" ([`LockError::NotLocked`]). Execution
//! errors are caught at the outer executor boundary and converted into a
//! query-level failure; they never crash the worker.

use thiserror::Error;
use uuid::Uuid;

use crate::models::{QueryFailure, TaskKey};

/// Errors from the lock manager and lock-requiring storage operations.
#[derive(Debug, Clone, Error)]
pub enum LockError {
    /// The task is already locked by someone else.
    #[error("task already locked: {0}")]
    AlreadyLocked(TaskKey),

    /// The operation requires a held lock but the task is not locked.
    #[error("task not locked: {0}")]
    NotLocked(TaskKey),

    /// The query has no semaphore configured.
    #[error("no semaphore exists for query {0}")]
    NoSemaphore(Uuid),

    /// A bounded wait for a semaphore slot elapsed.
    #[error("timed out waiting to lock task {0}")]
    Timeout(TaskKey),
}

/// Errors from the storage coordinator and its backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("query status not found: {0}")]
    QueryNotFound(Uuid),

    #[error("task not found: {0}")]
    TaskNotFound(TaskKey),

    #[error("task states not found for query {0}")]
    TaskStatesNotFound(Uuid),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport/backend failure publishing or persisting.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors raised while executing a task.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// An invariant violation, e.g. a non-checkpointable logic reaching NEXT.
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A failure raised by the query logic itself.
    #[error("query logic error: {0}")]
    Logic(String),
}

impl ExecutorError {
    /// The short classification name recorded onto a failed query status.
    pub fn error_type(&self) -> &'static str {
        match self {
            ExecutorError::IllegalState(_) => "IllegalState",
            ExecutorError::Storage(StorageError::Lock(_)) => "LockError",
            ExecutorError::Storage(_) => "StorageError",
            ExecutorError::Logic(_) => "LogicError",
        }
    }
}

impl From<&ExecutorError> for QueryFailure {
    fn from(error: &ExecutorError) -> Self {
        QueryFailure::new(error.error_type(), error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueryKey;

    fn task_key() -> TaskKey {
        TaskKey::new(QueryKey::new("default", Uuid::new_v4(), "EventQuery"))
    }

    #[test]
    fn test_lock_error_messages_name_the_task() {
        let key = task_key();
        let err = LockError::AlreadyLocked(key.clone());
        assert!(err.to_string().contains(&key.task_id.to_string()));
        let err = LockError::NotLocked(key.clone());
        assert!(err.to_string().starts_with("task not locked"));
    }

    #[test]
    fn test_failure_record_carries_error_type() {
        let err = ExecutorError::IllegalState("NEXT on non-checkpointable logic".into());
        let failure = QueryFailure::from(&err);
        assert_eq!(failure.error_type, "IllegalState");
        assert!(failure.message.contains("NEXT"));
    }

    #[test]
    fn test_lock_error_flows_into_executor_error() {
        let err: StorageError = LockError::NoSemaphore(Uuid::new_v4()).into();
        let err: ExecutorError = err.into();
        assert_eq!(err.error_type(), "LockError");
    }
}
