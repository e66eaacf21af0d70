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

//! Per-task executor: action dispatch, the outer completion state machine,
//! and the backpressure-driven result-generation loop.
//!
//! One run: `lock -> execute(action) -> {COMPLETED | FAILED | READY}`. A
//! completed task is deleted; a failed task marks the whole query failed and
//! is never requeued; a paused task is re-marked READY and a fresh
//! notification is published so an idle worker picks it up again.

use metrics::counter;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ExecutorError, StorageError};
use crate::logic::{QueryLogic, SourceMetrics};
use crate::messaging::QueryResult;
use crate::metrics::{QueryMetricSink, QueryMetricUpdate};
use crate::models::{
    QueryCheckpoint, QueryDefinition, QueryFailure, QueryState, QueryStatus, QueryTask,
    TaskAction, TaskState,
};
use crate::storage::{CachedQueryStatus, QueryStorageCache};

use super::config::ExecutorConfig;
use super::updater::QueryTaskUpdater;

/// Decision taken before pulling each result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultsAction {
    Generate,
    Pause,
    Complete,
}

enum TaskOutcome {
    /// The work is exhausted; the task record can be deleted.
    Exhausted,
    /// More work remains; requeue with this checkpoint.
    Paused(QueryCheckpoint),
}

/// Executes one task to completion, pause, or failure.
///
/// The task lock must already be held when [`run`](Self::run) is called;
/// every exit path settles the lock and joins the checkpoint updater.
pub struct ExecutorTask {
    coordinator: Arc<QueryStorageCache>,
    metric_sink: Arc<dyn QueryMetricSink>,
    config: ExecutorConfig,
    task: QueryTask,
}

impl ExecutorTask {
    pub fn new(
        coordinator: Arc<QueryStorageCache>,
        metric_sink: Arc<dyn QueryMetricSink>,
        config: ExecutorConfig,
        task: QueryTask,
    ) -> Self {
        Self {
            coordinator,
            metric_sink,
            config,
            task,
        }
    }

    /// Runs the task and resolves it to a final state.
    pub async fn run(self, logic: Box<dyn QueryLogic>) -> TaskState {
        let task_key = self.task.task_key.clone();
        let query_id = task_key.query_id();

        match self
            .coordinator
            .update_task_state(&task_key, TaskState::Running)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(task_key = %task_key, "Running cap reached, requeueing task");
                if let Err(e) = self.coordinator.lock_manager().release_lock(&task_key).await {
                    warn!(task_key = %task_key, error = %e, "Failed to release lock");
                }
                if let Err(e) = self.coordinator.post_task_notification(&self.task).await {
                    warn!(task_key = %task_key, error = %e, "Failed to requeue task");
                }
                return TaskState::Ready;
            }
            Err(e) => {
                error!(task_key = %task_key, error = %e, "Failed to mark task running");
                let _ = self.coordinator.lock_manager().release_lock(&task_key).await;
                return TaskState::Failed;
            }
        }

        let logic = Arc::new(Mutex::new(logic));
        let updater = QueryTaskUpdater::start(
            self.coordinator.clone(),
            logic.clone(),
            self.task.clone(),
            self.config.checkpoint_flush_interval(),
            self.config.checkpoint_flush_results(),
        );

        let outcome = self.execute(&logic, &updater).await;

        // Teardown runs regardless of outcome: join the updater, then close
        // the logic so it releases whatever scan resources it acquired.
        updater.close().await;
        if let Err(e) = logic.lock().await.close().await {
            warn!(task_key = %task_key, error = %e, "Query logic close failed");
        }

        match outcome {
            Ok(TaskOutcome::Exhausted) => {
                if let Err(e) = self
                    .coordinator
                    .update_task_state(&task_key, TaskState::Completed)
                    .await
                {
                    warn!(task_key = %task_key, error = %e, "Failed to record completed state");
                }
                if let Err(e) = self.coordinator.delete_task(&task_key).await {
                    // Already marked complete; an undeleted record is a
                    // cleanup concern, not a correctness one.
                    warn!(
                        task_key = %task_key,
                        error = %e,
                        "Could not delete completed task, leaving potential orphan"
                    );
                    let _ = self.coordinator.lock_manager().release_lock(&task_key).await;
                }
                counter!("sluice_tasks_completed_total").increment(1);
                debug!(task_key = %task_key, "Task completed");
                TaskState::Completed
            }
            Ok(TaskOutcome::Paused(checkpoint)) => {
                match self.coordinator.checkpoint_task(&task_key, checkpoint).await {
                    Ok(requeued) => {
                        if let Err(e) = self
                            .coordinator
                            .update_task_state(&task_key, TaskState::Ready)
                            .await
                        {
                            warn!(task_key = %task_key, error = %e, "Failed to re-mark task ready");
                        }
                        if let Err(e) = self.coordinator.post_task_notification(&requeued).await {
                            warn!(task_key = %task_key, error = %e, "Failed to republish task");
                        }
                        counter!("sluice_tasks_requeued_total").increment(1);
                        debug!(task_key = %task_key, "Task paused and requeued");
                        TaskState::Ready
                    }
                    Err(e) => {
                        self.fail(query_id, &task_key, &ExecutorError::Storage(e))
                            .await
                    }
                }
            }
            Err(e) => self.fail(query_id, &task_key, &e).await,
        }
    }

    async fn fail(
        &self,
        query_id: Uuid,
        task_key: &crate::models::TaskKey,
        error: &ExecutorError,
    ) -> TaskState {
        error!(task_key = %task_key, error = %error, "Task failed");
        if let Err(e) = self
            .coordinator
            .update_failed_query_status(query_id, QueryFailure::from(error))
            .await
        {
            error!(query_id = %query_id, error = %e, "Failed to record query failure");
        }
        if let Err(e) = self
            .coordinator
            .update_task_state(task_key, TaskState::Failed)
            .await
        {
            warn!(task_key = %task_key, error = %e, "Failed to record failed state");
        }
        if let Err(e) = self.coordinator.lock_manager().release_lock(task_key).await {
            warn!(task_key = %task_key, error = %e, "Failed to release lock");
        }
        counter!("sluice_tasks_failed_total").increment(1);
        TaskState::Failed
    }

    async fn execute(
        &self,
        logic: &Arc<Mutex<Box<dyn QueryLogic>>>,
        updater: &QueryTaskUpdater,
    ) -> Result<TaskOutcome, ExecutorError> {
        match self.task.action {
            TaskAction::Define | TaskAction::Create => {
                self.create_query_tasks(logic, updater).await
            }
            TaskAction::Plan => self.plan_query(logic).await,
            TaskAction::Next => self.next_results(logic, updater).await,
            TaskAction::Close => self.close_query().await,
            TaskAction::Test => Ok(TaskOutcome::Exhausted),
        }
    }

    /// CREATE/DEFINE: initialize the logic, persist the plan, then either
    /// split the work into NEXT tasks (checkpointable) or exhaust the query
    /// in place (non-checkpointable).
    async fn create_query_tasks(
        &self,
        logic: &Arc<Mutex<Box<dyn QueryLogic>>>,
        updater: &QueryTaskUpdater,
    ) -> Result<TaskOutcome, ExecutorError> {
        let query_id = self.task.task_key.query_id();
        let query_key = &self.task.task_key.query_key;
        let definition = self.query_definition(query_id).await?;

        let mut guard = logic.lock().await;
        let initial_checkpoint = guard.initialize(query_key, &definition).await?;
        let plan = guard.plan();
        let checkpointable = guard.is_checkpointable();
        drop(guard);

        self.store_plan(query_id, plan.clone()).await?;
        if let Err(e) = self
            .metric_sink
            .submit(QueryMetricUpdate::plan_update(query_id, plan))
            .await
        {
            warn!(query_id = %query_id, error = %e, "Failed to submit plan metric");
        }

        if checkpointable {
            let checkpoints = logic.lock().await.checkpoint(query_key).await?;
            info!(
                query_id = %query_id,
                tasks = checkpoints.len(),
                "Split query into result tasks"
            );
            for checkpoint in checkpoints {
                self.coordinator
                    .create_task(TaskAction::Next, checkpoint)
                    .await?;
            }
            Ok(TaskOutcome::Exhausted)
        } else {
            // The entire query must be exhausted by this one worker.
            logic.lock().await.setup_query(&initial_checkpoint).await?;
            let complete = self
                .pull_results(logic, updater, &definition, true, false)
                .await?;
            if !complete {
                // Exhaust mode only exits on iterator drain or COMPLETE.
                return Err(ExecutorError::IllegalState(
                    "exhaustive generation paused unexpectedly".to_string(),
                ));
            }
            Ok(TaskOutcome::Exhausted)
        }
    }

    /// PLAN: produce a human-readable execution plan only.
    async fn plan_query(
        &self,
        logic: &Arc<Mutex<Box<dyn QueryLogic>>>,
    ) -> Result<TaskOutcome, ExecutorError> {
        let query_id = self.task.task_key.query_id();
        let definition = self.query_definition(query_id).await?;

        let mut guard = logic.lock().await;
        guard
            .initialize(&self.task.task_key.query_key, &definition)
            .await?;
        let plan = guard.plan();
        drop(guard);

        self.store_plan(query_id, plan.clone()).await?;
        if let Err(e) = self
            .metric_sink
            .submit(QueryMetricUpdate::plan_update(query_id, plan))
            .await
        {
            warn!(query_id = %query_id, error = %e, "Failed to submit plan metric");
        }
        Ok(TaskOutcome::Exhausted)
    }

    /// NEXT: resume from the task's checkpoint and run the generation loop.
    async fn next_results(
        &self,
        logic: &Arc<Mutex<Box<dyn QueryLogic>>>,
        updater: &QueryTaskUpdater,
    ) -> Result<TaskOutcome, ExecutorError> {
        let query_id = self.task.task_key.query_id();
        if !logic.lock().await.is_checkpointable() {
            return Err(ExecutorError::IllegalState(format!(
                "logic {} cannot be checkpointed, NEXT task is invalid",
                self.task.task_key.query_logic()
            )));
        }
        let definition = self.query_definition(query_id).await?;

        self.coordinator.increment_active_next_calls(query_id).await?;
        let result = self.run_next(logic, updater, &definition).await;
        if let Err(e) = self.coordinator.decrement_active_next_calls(query_id).await {
            warn!(query_id = %query_id, error = %e, "Failed to decrement active next calls");
        }
        result
    }

    async fn run_next(
        &self,
        logic: &Arc<Mutex<Box<dyn QueryLogic>>>,
        updater: &QueryTaskUpdater,
        definition: &QueryDefinition,
    ) -> Result<TaskOutcome, ExecutorError> {
        logic.lock().await.setup_query(&self.task.checkpoint).await?;
        let complete = self
            .pull_results(logic, updater, definition, false, true)
            .await?;
        if complete {
            Ok(TaskOutcome::Exhausted)
        } else {
            let checkpoint = logic
                .lock()
                .await
                .update_checkpoint(self.task.checkpoint.clone())
                .await?;
            Ok(TaskOutcome::Paused(checkpoint))
        }
    }

    /// CLOSE: transition query state; no result generation. The query is
    /// finalized to CLOSED once no generation passes remain; otherwise the
    /// CLOSE intent stays in place for the running loops to observe.
    async fn close_query(&self) -> Result<TaskOutcome, ExecutorError> {
        let query_id = self.task.task_key.query_id();
        let status = self.query_status(query_id).await?;
        if status.state == QueryState::Close && status.active_next_calls == 0 {
            self.coordinator
                .update_query_state(query_id, QueryState::Closed)
                .await
                .map_err(ExecutorError::Storage)?;
        }
        Ok(TaskOutcome::Exhausted)
    }

    /// The backpressure-driven generation loop. Returns `true` when the task
    /// is complete (iterator exhausted or a COMPLETE condition) and `false`
    /// when it paused with more work remaining.
    async fn pull_results(
        &self,
        logic: &Arc<Mutex<Box<dyn QueryLogic>>>,
        updater: &QueryTaskUpdater,
        definition: &QueryDefinition,
        exhaust: bool,
        counted_self: bool,
    ) -> Result<bool, ExecutorError> {
        let query_id = self.task.task_key.query_id();
        let mut cached = CachedQueryStatus::new(
            self.coordinator.clone(),
            query_id,
            self.config.query_status_expiration(),
        )
        .await
        .map_err(ExecutorError::Storage)?;

        let (max_results, page_size) = {
            let guard = logic.lock().await;
            let max_results = effective_result_limit(&**guard, definition);
            let page_size = definition
                .page_size
                .min(guard.max_page_size().unwrap_or(self.config.max_page_size()))
                .min(self.config.max_page_size())
                .max(1);
            (max_results, page_size)
        };
        let mut iter = logic.lock().await.transform_iterator(definition).await?;

        let mut batch_results: u64 = 0;
        let mut source_metrics: Option<SourceMetrics> = None;
        let mut failure: Option<ExecutorError> = None;
        let mut complete = false;

        loop {
            let action = match self
                .should_generate(&mut cached, exhaust, counted_self, page_size, max_results)
                .await
            {
                Ok(action) => action,
                Err(e) => {
                    failure = Some(ExecutorError::Storage(e));
                    break;
                }
            };
            match action {
                ResultsAction::Complete => {
                    complete = true;
                    break;
                }
                ResultsAction::Pause => break,
                ResultsAction::Generate => {}
            }

            match iter.next().await {
                Ok(Some(payload)) => {
                    let publish = self
                        .coordinator
                        .queues()
                        .publish_result(QueryResult::new(query_id, payload))
                        .await;
                    if let Err(e) = publish {
                        failure = Some(ExecutorError::Storage(e));
                        break;
                    }
                    cached.increment_results_generated(1);
                    updater.result_published();
                    counter!("sluice_results_generated_total").increment(1);
                    batch_results += 1;
                    source_metrics = iter.source_metrics();
                    if let Err(e) = cached.maybe_flush().await {
                        warn!(query_id = %query_id, error = %e, "Failed to flush status counters");
                    }
                }
                Ok(None) => {
                    complete = true;
                    break;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Err(e) = cached.flush().await {
            warn!(query_id = %query_id, error = %e, "Failed to flush status counters");
        }
        if batch_results > 0 {
            let update = QueryMetricUpdate::results_update(query_id, batch_results, source_metrics);
            if let Err(e) = self.metric_sink.submit(update).await {
                warn!(query_id = %query_id, error = %e, "Failed to submit results metric");
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(complete),
        }
    }

    /// Evaluates the GENERATE/PAUSE/COMPLETE decision.
    async fn should_generate(
        &self,
        cached: &mut CachedQueryStatus,
        exhaust: bool,
        counted_self: bool,
        page_size: u64,
        max_results: Option<u64>,
    ) -> Result<ResultsAction, StorageError> {
        let status = cached.status().await?;
        let state = status.state;
        let generated = status.num_results_generated;
        let active_next_calls = status.active_next_calls;

        if matches!(
            state,
            QueryState::Cancel | QueryState::Canceled | QueryState::Fail | QueryState::Closed
        ) {
            return Ok(ResultsAction::Complete);
        }

        let mut multiplier = self.config.available_results_page_multiplier();
        if state == QueryState::Close {
            let others = active_next_calls.saturating_sub(counted_self as u64);
            if others == 0 {
                return Ok(ResultsAction::Complete);
            }
            // This is the last generation pass for a closing query, so the
            // buffer target is clamped to exactly one page's worth.
            multiplier = 1.0;
        }

        // A reached result cap always completes, even mid-close.
        if let Some(max) = max_results {
            if generated >= max {
                return Ok(ResultsAction::Complete);
            }
        }

        if exhaust {
            return Ok(ResultsAction::Generate);
        }

        let buffered = self
            .coordinator
            .queues()
            .num_results_remaining(self.task.task_key.query_id())
            .await as f64;
        let concurrency = active_next_calls.max(1) as f64;
        let mut target = page_size as f64 * concurrency * multiplier;
        if let Some(max) = max_results {
            target = target.min((max - generated) as f64);
        }
        if buffered < target {
            Ok(ResultsAction::Generate)
        } else {
            Ok(ResultsAction::Pause)
        }
    }

    async fn query_status(&self, query_id: Uuid) -> Result<QueryStatus, ExecutorError> {
        self.coordinator
            .get_query_status(query_id)
            .await?
            .ok_or(StorageError::QueryNotFound(query_id))
            .map_err(ExecutorError::Storage)
    }

    async fn query_definition(&self, query_id: Uuid) -> Result<QueryDefinition, ExecutorError> {
        Ok(self.query_status(query_id).await?.query)
    }

    async fn store_plan(
        &self,
        query_id: Uuid,
        plan: Option<String>,
    ) -> Result<(), ExecutorError> {
        let lock = self.coordinator.query_status_lock(query_id);
        let _guard = lock.lock().await;
        let mut status = self.query_status(query_id).await?;
        status.plan = plan;
        status.touch();
        self.coordinator
            .update_query_status(status)
            .await
            .map_err(ExecutorError::Storage)
    }
}

/// The result-count limit the generation loop enforces: the logic's default,
/// narrowed by a more restrictive per-DN limit, widened again only by an
/// explicit client override (the wider of override vs. DN limit wins).
fn effective_result_limit(logic: &dyn QueryLogic, definition: &QueryDefinition) -> Option<u64> {
    let mut limit = logic.max_results();
    if let Some(dn_limit) = logic.result_limit(&definition.dn_list) {
        limit = Some(limit.map_or(dn_limit, |l| l.min(dn_limit)));
    }
    if let Some(user_override) = definition.max_results_override {
        limit = Some(limit.map_or(user_override, |l| l.max(user_override)));
    }
    limit
}
