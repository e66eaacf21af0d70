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

//! Configuration for the query executor.

use std::time::Duration;

/// Configuration controlling executor concurrency, checkpoint flushing, and
/// backpressure.
///
/// # Construction
///
/// ```rust,ignore
/// let config = ExecutorConfig::builder()
///     .executor_pool("pool-a")
///     .checkpoint_flush_results(10)
///     .build();
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ExecutorConfig {
    executor_pool: String,
    max_concurrent_tasks: usize,
    lock_wait: Duration,
    checkpoint_flush_interval: Duration,
    checkpoint_flush_results: u64,
    available_results_page_multiplier: f64,
    query_status_expiration: Duration,
    max_page_size: u64,
    listener_poll_interval: Duration,
}

impl ExecutorConfig {
    pub fn builder() -> ExecutorConfigBuilder {
        ExecutorConfigBuilder::default()
    }

    /// The executor pool whose task notifications this executor consumes.
    pub fn executor_pool(&self) -> &str {
        &self.executor_pool
    }

    /// Maximum number of tasks this executor runs concurrently.
    pub fn max_concurrent_tasks(&self) -> usize {
        self.max_concurrent_tasks
    }

    /// Bounded wait when acquiring a task lock.
    pub fn lock_wait(&self) -> Duration {
        self.lock_wait
    }

    /// Timer interval for the checkpoint updater.
    pub fn checkpoint_flush_interval(&self) -> Duration {
        self.checkpoint_flush_interval
    }

    /// Result count after which the checkpoint updater is woken early.
    pub fn checkpoint_flush_results(&self) -> u64 {
        self.checkpoint_flush_results
    }

    /// Multiplier applied to the page-size-derived buffer target.
    pub fn available_results_page_multiplier(&self) -> f64 {
        self.available_results_page_multiplier
    }

    /// How long a cached query status stays fresh.
    pub fn query_status_expiration(&self) -> Duration {
        self.query_status_expiration
    }

    /// Hard cap on the page size used by the result loop.
    pub fn max_page_size(&self) -> u64 {
        self.max_page_size
    }

    /// Bounded wait per task-notification receive.
    pub fn listener_poll_interval(&self) -> Duration {
        self.listener_poll_interval
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfigBuilder::default().build()
    }
}

/// Builder for [`ExecutorConfig`].
#[derive(Debug, Clone)]
pub struct ExecutorConfigBuilder {
    config: ExecutorConfig,
}

impl Default for ExecutorConfigBuilder {
    fn default() -> Self {
        Self {
            config: ExecutorConfig {
                executor_pool: "default".to_string(),
                max_concurrent_tasks: 4,
                lock_wait: Duration::from_secs(30),
                checkpoint_flush_interval: Duration::from_secs(2),
                checkpoint_flush_results: 2,
                available_results_page_multiplier: 2.5,
                query_status_expiration: Duration::from_secs(60),
                max_page_size: 10_000,
                listener_poll_interval: Duration::from_millis(500),
            },
        }
    }
}

impl ExecutorConfigBuilder {
    pub fn executor_pool(mut self, value: impl Into<String>) -> Self {
        self.config.executor_pool = value.into();
        self
    }

    pub fn max_concurrent_tasks(mut self, value: usize) -> Self {
        self.config.max_concurrent_tasks = value;
        self
    }

    pub fn lock_wait(mut self, value: Duration) -> Self {
        self.config.lock_wait = value;
        self
    }

    pub fn checkpoint_flush_interval(mut self, value: Duration) -> Self {
        self.config.checkpoint_flush_interval = value;
        self
    }

    pub fn checkpoint_flush_results(mut self, value: u64) -> Self {
        self.config.checkpoint_flush_results = value;
        self
    }

    /// Panics in `build` if set below 1.0.
    pub fn available_results_page_multiplier(mut self, value: f64) -> Self {
        self.config.available_results_page_multiplier = value;
        self
    }

    pub fn query_status_expiration(mut self, value: Duration) -> Self {
        self.config.query_status_expiration = value;
        self
    }

    pub fn max_page_size(mut self, value: u64) -> Self {
        self.config.max_page_size = value;
        self
    }

    pub fn listener_poll_interval(mut self, value: Duration) -> Self {
        self.config.listener_poll_interval = value;
        self
    }

    pub fn build(self) -> ExecutorConfig {
        assert!(
            self.config.available_results_page_multiplier >= 1.0,
            "available_results_page_multiplier must be at least 1.0"
        );
        assert!(self.config.max_page_size > 0, "max_page_size must be nonzero");
        self.config
    }
}
