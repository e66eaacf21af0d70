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

#![allow(dead_code)]

//! Shared fixtures for the integration tests: an in-process stack and a
//! polling helper for asynchronous assertions.

use sluice::executor::{ExecutorConfig, QueryExecutor};
use sluice::lock::LocalLockManager;
use sluice::messaging::LocalQueueManager;
use sluice::storage::{LocalQueryCache, QueryStorageCache};
use sluice::testing::{CollectingMetricSink, ScriptedLogicFactory, ScriptedQueryLogic};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub struct TestStack {
    pub coordinator: Arc<QueryStorageCache>,
    pub metric_sink: Arc<CollectingMetricSink>,
}

pub fn build_stack() -> TestStack {
    TestStack {
        coordinator: Arc::new(QueryStorageCache::new(
            Arc::new(LocalQueryCache::new()),
            Arc::new(LocalLockManager::new()),
            Arc::new(LocalQueueManager::new()),
        )),
        metric_sink: Arc::new(CollectingMetricSink::new()),
    }
}

/// A configuration tightened for tests: fresh status reads on every loop
/// iteration and short polling intervals.
pub fn test_config() -> ExecutorConfig {
    ExecutorConfig::builder()
        .lock_wait(Duration::from_secs(1))
        .checkpoint_flush_interval(Duration::from_millis(100))
        .checkpoint_flush_results(1)
        .available_results_page_multiplier(1.0)
        .query_status_expiration(Duration::ZERO)
        .listener_poll_interval(Duration::from_millis(50))
        .build()
}

/// Starts an executor over the stack consuming the `default` pool.
pub fn spawn_executor(
    stack: &TestStack,
    config: ExecutorConfig,
    logic: ScriptedQueryLogic,
) -> Arc<QueryExecutor> {
    let executor = Arc::new(QueryExecutor::new(
        config,
        stack.coordinator.clone(),
        Arc::new(ScriptedLogicFactory::new(logic)),
        stack.metric_sink.clone(),
    ));
    tokio::spawn({
        let executor = executor.clone();
        async move { executor.run().await }
    });
    executor
}

/// Polls `check` until it holds or `deadline` elapses.
pub async fn eventually<F, Fut>(deadline: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if check().await {
            return true;
        }
        if start.elapsed() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
