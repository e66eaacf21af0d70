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

//! Per-query map of task execution states.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use super::keys::QueryKey;

/// Execution state of one task.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Ready,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Ready => "READY",
            TaskState::Running => "RUNNING",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// The execution states of every outstanding task of one query.
///
/// When `max_running` is set, transitions into `Running` beyond the cap are
/// refused; the cap mirrors the query's semaphore count so the state map and
/// the lock manager agree on how many tasks may run concurrently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStates {
    pub query_key: QueryKey,
    pub max_running: Option<usize>,
    pub task_states: HashMap<Uuid, TaskState>,
}

impl TaskStates {
    pub fn new(query_key: QueryKey, max_running: Option<usize>) -> Self {
        Self {
            query_key,
            max_running,
            task_states: HashMap::new(),
        }
    }

    pub fn state(&self, task_id: Uuid) -> Option<TaskState> {
        self.task_states.get(&task_id).copied()
    }

    /// Sets the state of a task. Returns false without mutating when the
    /// transition is into `Running` and the running cap is already reached by
    /// other tasks.
    pub fn set_state(&mut self, task_id: Uuid, state: TaskState) -> bool {
        if state == TaskState::Running {
            if let Some(max) = self.max_running {
                let running_others = self
                    .task_states
                    .iter()
                    .filter(|(id, s)| **id != task_id && **s == TaskState::Running)
                    .count();
                if running_others >= max {
                    return false;
                }
            }
        }
        self.task_states.insert(task_id, state);
        true
    }

    pub fn remove(&mut self, task_id: Uuid) -> Option<TaskState> {
        self.task_states.remove(&task_id)
    }

    pub fn running_count(&self) -> usize {
        self.task_states
            .values()
            .filter(|s| **s == TaskState::Running)
            .count()
    }

    pub fn tasks_in_state(&self, state: TaskState) -> Vec<Uuid> {
        self.task_states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.task_states.is_empty()
    }
}
