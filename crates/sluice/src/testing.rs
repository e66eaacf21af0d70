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

//! Test doubles for the collaborator traits.
//!
//! [`ScriptedQueryLogic`] replays a fixed list of results and tracks its
//! resumption point through the `position` checkpoint property, so a paused
//! task picks up exactly where the previous one stopped. Used by the crate's
//! own tests and available to embedders testing against the coordinator.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::ExecutorError;
use crate::logic::{QueryLogic, QueryLogicFactory, SourceMetrics, TransformIterator};
use crate::metrics::{QueryMetricSink, QueryMetricUpdate};
use crate::models::{QueryCheckpoint, QueryDefinition, QueryKey};

/// Query logic that replays a scripted result list.
pub struct ScriptedQueryLogic {
    results: Vec<Value>,
    checkpointable: bool,
    max_results: Option<u64>,
    max_page_size: Option<u64>,
    dn_limits: HashMap<String, u64>,
    fail_message: Option<String>,
    plan: Option<String>,
    position: Arc<AtomicUsize>,
    updates: Arc<AtomicUsize>,
}

impl ScriptedQueryLogic {
    /// A logic that checkpoints its position and can be resumed.
    pub fn checkpointable(results: Vec<Value>) -> Self {
        Self {
            results,
            checkpointable: true,
            max_results: None,
            max_page_size: None,
            dn_limits: HashMap::new(),
            fail_message: None,
            plan: None,
            position: Arc::new(AtomicUsize::new(0)),
            updates: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A logic that must be exhausted by a single task.
    pub fn streaming(results: Vec<Value>) -> Self {
        let mut logic = Self::checkpointable(results);
        logic.checkpointable = false;
        logic
    }

    /// A logic whose iterator construction fails.
    pub fn failing(message: impl Into<String>) -> Self {
        let mut logic = Self::checkpointable(Vec::new());
        logic.fail_message = Some(message.into());
        logic
    }

    pub fn with_max_results(mut self, max_results: u64) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn with_max_page_size(mut self, max_page_size: u64) -> Self {
        self.max_page_size = Some(max_page_size);
        self
    }

    pub fn with_dn_limit(mut self, dn: impl Into<String>, limit: u64) -> Self {
        self.dn_limits.insert(dn.into(), limit);
        self
    }

    fn fresh(&self) -> Self {
        Self {
            results: self.results.clone(),
            checkpointable: self.checkpointable,
            max_results: self.max_results,
            max_page_size: self.max_page_size,
            dn_limits: self.dn_limits.clone(),
            fail_message: self.fail_message.clone(),
            plan: None,
            position: Arc::new(AtomicUsize::new(0)),
            updates: Arc::new(AtomicUsize::new(0)),
        }
    }
}

struct ScriptedIterator {
    results: Vec<Value>,
    position: Arc<AtomicUsize>,
    next_count: u64,
}

#[async_trait]
impl TransformIterator for ScriptedIterator {
    async fn next(&mut self) -> Result<Option<Value>, ExecutorError> {
        let position = self.position.load(Ordering::Acquire);
        if position >= self.results.len() {
            return Ok(None);
        }
        self.position.store(position + 1, Ordering::Release);
        self.next_count += 1;
        Ok(Some(self.results[position].clone()))
    }

    fn source_metrics(&self) -> Option<SourceMetrics> {
        Some(SourceMetrics {
            source_count: 1,
            next_count: self.next_count,
            ..Default::default()
        })
    }
}

#[async_trait]
impl QueryLogic for ScriptedQueryLogic {
    async fn initialize(
        &mut self,
        query_key: &QueryKey,
        definition: &QueryDefinition,
    ) -> Result<QueryCheckpoint, ExecutorError> {
        self.plan = Some(format!("scripted plan: {}", definition.query));
        let mut checkpoint = QueryCheckpoint::new(query_key.clone());
        checkpoint.set_property("position", json!(0));
        Ok(checkpoint)
    }

    async fn setup_query(&mut self, checkpoint: &QueryCheckpoint) -> Result<(), ExecutorError> {
        let position = checkpoint
            .property("position")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        self.position.store(position, Ordering::Release);
        Ok(())
    }

    async fn transform_iterator(
        &mut self,
        _definition: &QueryDefinition,
    ) -> Result<Box<dyn TransformIterator>, ExecutorError> {
        if let Some(message) = &self.fail_message {
            return Err(ExecutorError::Logic(message.clone()));
        }
        Ok(Box::new(ScriptedIterator {
            results: self.results.clone(),
            position: self.position.clone(),
            next_count: 0,
        }))
    }

    fn plan(&self) -> Option<String> {
        self.plan.clone()
    }

    fn max_results(&self) -> Option<u64> {
        self.max_results
    }

    fn max_page_size(&self) -> Option<u64> {
        self.max_page_size
    }

    fn result_limit(&self, dn_list: &[String]) -> Option<u64> {
        dn_list
            .iter()
            .filter_map(|dn| self.dn_limits.get(dn).copied())
            .min()
    }

    fn is_checkpointable(&self) -> bool {
        self.checkpointable
    }

    async fn checkpoint(
        &mut self,
        query_key: &QueryKey,
    ) -> Result<Vec<QueryCheckpoint>, ExecutorError> {
        let mut checkpoint = QueryCheckpoint::new(query_key.clone());
        checkpoint.set_property("position", json!(self.position.load(Ordering::Acquire)));
        Ok(vec![checkpoint])
    }

    async fn update_checkpoint(
        &mut self,
        mut checkpoint: QueryCheckpoint,
    ) -> Result<QueryCheckpoint, ExecutorError> {
        let updates = self.updates.fetch_add(1, Ordering::AcqRel) + 1;
        checkpoint.set_property("position", json!(self.position.load(Ordering::Acquire)));
        checkpoint.set_property("updates", json!(updates));
        Ok(checkpoint)
    }

    async fn close(&mut self) -> Result<(), ExecutorError> {
        Ok(())
    }
}

/// Factory handing out a fresh copy of one scripted logic per task.
pub struct ScriptedLogicFactory {
    prototype: ScriptedQueryLogic,
}

impl ScriptedLogicFactory {
    pub fn new(prototype: ScriptedQueryLogic) -> Self {
        Self { prototype }
    }
}

impl QueryLogicFactory for ScriptedLogicFactory {
    fn create(&self, _logic_name: &str) -> Result<Box<dyn QueryLogic>, ExecutorError> {
        Ok(Box::new(self.prototype.fresh()))
    }
}

/// Metric sink that records every submitted update.
#[derive(Default)]
pub struct CollectingMetricSink {
    updates: Mutex<Vec<QueryMetricUpdate>>,
}

impl CollectingMetricSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<QueryMetricUpdate> {
        self.updates.lock().clone()
    }
}

#[async_trait]
impl QueryMetricSink for CollectingMetricSink {
    async fn submit(&self, update: QueryMetricUpdate) -> Result<(), String> {
        self.updates.lock().push(update);
        Ok(())
    }
}
