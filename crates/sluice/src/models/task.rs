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

//! Task records placed into storage and referenced by notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::checkpoint::QueryCheckpoint;
use super::keys::TaskKey;

/// The phase of query work a task performs.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskAction {
    Define,
    Create,
    Plan,
    Next,
    Close,
    Test,
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskAction::Define => "DEFINE",
            TaskAction::Create => "CREATE",
            TaskAction::Plan => "PLAN",
            TaskAction::Next => "NEXT",
            TaskAction::Close => "CLOSE",
            TaskAction::Test => "TEST",
        };
        write!(f, "{}", s)
    }
}

/// One resumable unit of query work.
///
/// Construction assigns a fresh random task id unless one is supplied via
/// [`QueryTask::with_task_id`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTask {
    pub task_key: TaskKey,
    pub action: TaskAction,
    pub checkpoint: QueryCheckpoint,
    pub last_updated: DateTime<Utc>,
}

impl QueryTask {
    pub fn new(action: TaskAction, checkpoint: QueryCheckpoint) -> Self {
        let task_key = TaskKey::new(checkpoint.query_key.clone());
        Self {
            task_key,
            action,
            checkpoint,
            last_updated: Utc::now(),
        }
    }

    pub fn with_task_id(task_id: Uuid, action: TaskAction, checkpoint: QueryCheckpoint) -> Self {
        let task_key = TaskKey::with_task_id(checkpoint.query_key.clone(), task_id);
        Self {
            task_key,
            action,
            checkpoint,
            last_updated: Utc::now(),
        }
    }

    /// Replaces the checkpoint wholesale and refreshes the timestamp.
    pub fn set_checkpoint(&mut self, checkpoint: QueryCheckpoint) {
        self.checkpoint = checkpoint;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

/// Introspection summary of an outstanding task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescription {
    pub task_key: TaskKey,
    pub action: TaskAction,
    pub last_updated: DateTime<Utc>,
}

impl From<&QueryTask> for TaskDescription {
    fn from(task: &QueryTask) -> Self {
        Self {
            task_key: task.task_key.clone(),
            action: task.action,
            last_updated: task.last_updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::keys::QueryKey;

    fn checkpoint() -> QueryCheckpoint {
        QueryCheckpoint::new(QueryKey::new("default", Uuid::new_v4(), "EventQuery"))
    }

    #[test]
    fn test_new_task_gets_fresh_task_id() {
        let cp = checkpoint();
        let a = QueryTask::new(TaskAction::Create, cp.clone());
        let b = QueryTask::new(TaskAction::Create, cp);
        assert_ne!(a.task_key.task_id, b.task_key.task_id);
        assert_eq!(a.task_key.query_key, b.task_key.query_key);
    }

    #[test]
    fn test_with_task_id_preserves_supplied_id() {
        let id = Uuid::new_v4();
        let task = QueryTask::with_task_id(id, TaskAction::Next, checkpoint());
        assert_eq!(task.task_key.task_id, id);
    }

    #[test]
    fn test_set_checkpoint_replaces_wholesale() {
        let mut task = QueryTask::new(TaskAction::Next, checkpoint());
        let mut replacement = task.checkpoint.clone();
        replacement.set_property("position", serde_json::json!(5));
        task.checkpoint
            .set_property("stale", serde_json::json!(true));
        task.set_checkpoint(replacement.clone());
        assert_eq!(task.checkpoint, replacement);
        assert!(task.checkpoint.property("stale").is_none());
    }

    #[test]
    fn test_action_display_matches_wire_form() {
        assert_eq!(TaskAction::Define.to_string(), "DEFINE");
        assert_eq!(TaskAction::Next.to_string(), "NEXT");
        let encoded = serde_json::to_string(&TaskAction::Close).unwrap();
        assert_eq!(encoded, "\"CLOSE\"");
    }
}
