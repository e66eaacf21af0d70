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

//! Domain model: identity keys, checkpoints, task records, and query status.
//!
//! These types are pure data. All behavior lives in the lock manager, the
//! storage coordinator, and the executor.

pub mod checkpoint;
pub mod keys;
pub mod status;
pub mod task;
pub mod task_states;

pub use checkpoint::QueryCheckpoint;
pub use keys::{QueryKey, TaskKey, TaskKeyParseError};
pub use status::{QueryDefinition, QueryFailure, QueryState, QueryStatus};
pub use task::{QueryTask, TaskAction, TaskDescription};
pub use task_states::{TaskState, TaskStates};
