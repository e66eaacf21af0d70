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

//! Opaque query-logic resumption state.
//!
//! A checkpoint carries exactly the state a query logic needs to resume an
//! evaluation from where a previous task left off. The coordinator never
//! interprets its contents; it only stores, transports, and hands it back.
//! Checkpoints are replaced wholesale, never merged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::keys::QueryKey;

/// Snapshot of in-progress evaluation state for one query.
///
/// State is either a property bag ([`QueryCheckpoint::properties`]) or a list
/// of partition-specific work descriptors ([`QueryCheckpoint::partitions`]).
/// Both are opaque JSON owned by the query logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCheckpoint {
    pub query_key: QueryKey,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub partitions: Vec<Value>,
}

impl QueryCheckpoint {
    /// Creates an empty checkpoint for a query.
    pub fn new(query_key: QueryKey) -> Self {
        Self {
            query_key,
            properties: Map::new(),
            partitions: Vec::new(),
        }
    }

    /// Creates a property-bag checkpoint.
    pub fn with_properties(query_key: QueryKey, properties: Map<String, Value>) -> Self {
        Self {
            query_key,
            properties,
            partitions: Vec::new(),
        }
    }

    /// Creates a partitioned-work checkpoint.
    pub fn with_partitions(query_key: QueryKey, partitions: Vec<Value>) -> Self {
        Self {
            query_key,
            properties: Map::new(),
            partitions,
        }
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: Value) {
        self.properties.insert(name.into(), value);
    }
}
