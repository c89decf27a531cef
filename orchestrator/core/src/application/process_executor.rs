// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Process Step Runner
//!
//! [`ProcessExecutor`] drives the TODO steps of one process through the
//! executor registered for its [`ProcessType`]. [`ProcessRunner`] polls for
//! due processes and runs them concurrently.
//!
//! # Per-step commit
//!
//! Each executed step is committed as one [`ProcessChangeSet`]: the step
//! status, the message, checklist writes, scheduled and skipped steps, and a
//! process version bump that the store checks on write. Executors that
//! finalize through the checklist orchestration stage all of it themselves;
//! for the others the runner stages the result (first TODO step of the type
//! gets the status, further TODO steps of the same type become DUPLICATE). A
//! stale version aborts the run with a retryable `ConcurrencyConflict`.
//!
//! A step left in TODO is not retried within the same run.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::process_type_executor::{ProcessTypeExecutor, StepExecutionResult};
use crate::domain::change_set::ProcessChangeSet;
use crate::domain::errors::ProcessError;
use crate::domain::events::ProcessEvent;
use crate::domain::process::{
    assign_status_with_duplicates, Process, ProcessId, ProcessStep, ProcessStepStatus, ProcessStepType, ProcessType,
};
use crate::domain::repository::ProcessRepository;
use crate::domain::worker_config::WorkerConfig;
use crate::infrastructure::event_bus::EventBus;

/// Outcome of driving one process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessRunSummary {
    pub steps_executed: usize,
    pub steps_failed: usize,
    pub steps_left_todo: usize,
}

pub struct ProcessExecutor {
    repository: Arc<dyn ProcessRepository>,
    executors: HashMap<ProcessType, Arc<dyn ProcessTypeExecutor>>,
    event_bus: Arc<EventBus>,
    lock_expiry: chrono::Duration,
}

impl ProcessExecutor {
    pub fn new(
        repository: Arc<dyn ProcessRepository>,
        executors: Vec<Arc<dyn ProcessTypeExecutor>>,
        event_bus: Arc<EventBus>,
        lock_expiry: Duration,
    ) -> Self {
        let executors = executors
            .into_iter()
            .map(|executor| (executor.process_type(), executor))
            .collect();
        Self {
            repository,
            executors,
            event_bus,
            lock_expiry: chrono::Duration::from_std(lock_expiry).unwrap_or(chrono::Duration::minutes(5)),
        }
    }

    pub fn process_types(&self) -> Vec<ProcessType> {
        let mut types: Vec<ProcessType> = self.executors.keys().copied().collect();
        types.sort();
        types
    }

    pub fn executable_step_types(&self) -> Vec<ProcessStepType> {
        let mut types: Vec<ProcessStepType> = self
            .executors
            .values()
            .flat_map(|executor| executor.executable_step_types().iter().copied())
            .collect();
        types.sort();
        types.dedup();
        types
    }

    /// Run every executable TODO step of `process` until none is left, the
    /// remaining ones were already attempted, or `cancel` fires.
    pub async fn execute_process(
        &self,
        process: Process,
        cancel: &CancellationToken,
    ) -> Result<ProcessRunSummary, ProcessError> {
        let executor = self.executors.get(&process.process_type).cloned().ok_or_else(|| {
            ProcessError::unexpected(format!("no executor registered for process type {}", process.process_type))
        })?;

        let mut process = process;
        let mut locked_here = false;
        let result = self.drive(executor.as_ref(), &mut process, &mut locked_here, cancel).await;

        if locked_here && process.lock_expiry_date.is_some() {
            let mut changes = ProcessChangeSet::new();
            changes.attach_process_for_lock(&mut process, |p| {
                p.release_lock();
            });
            match self.repository.save_changes(changes).await {
                Ok(()) => {
                    debug!(process_id = %process.id, "Released process lock");
                    self.event_bus.publish_process_event(ProcessEvent::ProcessReleased {
                        process_id: process.id,
                        released_at: Utc::now(),
                    });
                }
                // The lease expires on its own.
                Err(e) => warn!(process_id = %process.id, error = %e, "Failed to release process lock"),
            }
        }

        result
    }

    async fn drive(
        &self,
        executor: &dyn ProcessTypeExecutor,
        process: &mut Process,
        locked_here: &mut bool,
        cancel: &CancellationToken,
    ) -> Result<ProcessRunSummary, ProcessError> {
        let mut todo = self
            .repository
            .get_process_steps(process.id, Some(ProcessStepStatus::Todo))
            .await?;
        let step_types = distinct_types(&todo);
        let initialization = executor.initialize_process(process.id, &step_types).await?;
        let subject_id = initialization.subject_id;

        if let Some(schedule) = initialization.schedule_step_type_ids {
            let mut changes = ProcessChangeSet::new();
            let created = changes.schedule_process_steps(&todo, &schedule, process.id);
            if !created.is_empty() {
                changes.attach_process_for_lock(process, |p| p.update_version());
                self.repository.save_changes(changes).await?;
                todo.extend(created);
            }
        }

        let mut summary = ProcessRunSummary::default();
        let mut attempted: HashSet<ProcessStepType> = HashSet::new();

        loop {
            if cancel.is_cancelled() {
                debug!(process_id = %process.id, "Cancelled, stopping process run");
                break;
            }

            let next = todo
                .iter()
                .map(|s| s.process_step_type)
                .find(|t| executor.is_executable_step_type(*t) && !attempted.contains(t));
            let Some(step_type) = next else {
                break;
            };
            attempted.insert(step_type);

            if executor.is_lock_requested(step_type) && !process.is_locked() {
                self.acquire_lock(process).await?;
                *locked_here = true;
            }

            let remaining: Vec<ProcessStepType> = distinct_types(&todo)
                .into_iter()
                .filter(|t| *t != step_type)
                .collect();

            let mut changes = ProcessChangeSet::new();
            let result = executor
                .execute_process_step(process, subject_id, step_type, &remaining, &mut changes, cancel)
                .await?;

            if !result.finalized {
                apply_step_result(&mut changes, &todo, step_type, &result, process.id);
            }
            if changes.is_empty() {
                summary.steps_left_todo += 1;
                continue;
            }

            let had_lock = process.lock_expiry_date.is_some();
            let staged = changes
                .processes()
                .iter()
                .find(|c| c.process_id == process.id)
                .map(|c| (c.version, c.lock_expiry_date));
            match staged {
                Some((version, lock_expiry_date)) => {
                    process.version = version;
                    process.lock_expiry_date = lock_expiry_date;
                }
                None => changes.attach_process_for_lock(process, |p| p.update_version()),
            }
            let touched: HashMap<_, _> = changes
                .process_steps()
                .iter()
                .filter_map(|c| c.status.map(|status| (c.step_id, status)))
                .collect();
            let created: Vec<ProcessStep> = changes.created_steps().iter().filter(|s| s.is_todo()).cloned().collect();
            self.repository.save_changes(changes).await?;

            todo.retain(|s| touched.get(&s.id).map_or(true, |status| *status == ProcessStepStatus::Todo));
            todo.extend(created);

            if had_lock && process.lock_expiry_date.is_none() {
                debug!(process_id = %process.id, step_type = %step_type, "Lock released with step");
                *locked_here = false;
                self.event_bus.publish_process_event(ProcessEvent::ProcessReleased {
                    process_id: process.id,
                    released_at: Utc::now(),
                });
            }

            match result.step_status {
                ProcessStepStatus::Todo => summary.steps_left_todo += 1,
                ProcessStepStatus::Failed => {
                    summary.steps_failed += 1;
                    metrics::counter!("process_step_failures_total", "step_type" => step_type.as_str()).increment(1);
                }
                _ => summary.steps_executed += 1,
            }
            metrics::counter!(
                "process_steps_executed_total",
                "step_type" => step_type.as_str(),
                "status" => result.step_status.as_str()
            )
            .increment(1);

            info!(
                process_id = %process.id,
                step_type = %step_type,
                status = %result.step_status,
                "Process step executed"
            );
            self.event_bus.publish_process_event(ProcessEvent::ProcessStepExecuted {
                process_id: process.id,
                step_type,
                status: result.step_status,
                scheduled: result.schedule_step_type_ids.clone().unwrap_or_default(),
                skipped: result.skip_step_type_ids.clone().unwrap_or_default(),
                message: result.message.clone(),
                executed_at: Utc::now(),
            });
        }

        Ok(summary)
    }

    async fn acquire_lock(&self, process: &mut Process) -> Result<(), ProcessError> {
        let now = Utc::now();
        let expiry = now + self.lock_expiry;
        let mut acquired = false;
        let mut changes = ProcessChangeSet::new();
        changes.attach_process_for_lock(process, |p| {
            acquired = p.try_lock(expiry, now);
        });
        if !acquired {
            return Err(ProcessError::conflict(format!(
                "process {} is locked, lock expiry is set to {:?}",
                process.id, process.lock_expiry_date
            )));
        }
        self.repository.save_changes(changes).await?;

        debug!(process_id = %process.id, lock_expiry_date = %expiry, "Acquired process lock");
        self.event_bus.publish_process_event(ProcessEvent::ProcessLocked {
            process_id: process.id,
            process_type: process.process_type,
            lock_expiry_date: expiry,
            locked_at: now,
        });
        Ok(())
    }
}

fn distinct_types(steps: &[ProcessStep]) -> Vec<ProcessStepType> {
    let mut seen = HashSet::new();
    steps
        .iter()
        .map(|s| s.process_step_type)
        .filter(|t| seen.insert(*t))
        .collect()
}

/// Stage the status, schedule and skip effects of a result the executor did
/// not finalize itself.
fn apply_step_result(
    changes: &mut ProcessChangeSet,
    todo: &[ProcessStep],
    step_type: ProcessStepType,
    result: &StepExecutionResult,
    process_id: ProcessId,
) {
    let same_type: Vec<&ProcessStep> = todo.iter().filter(|s| s.process_step_type == step_type).collect();
    for (index, (step_id, status)) in assign_status_with_duplicates(same_type, result.step_status)
        .into_iter()
        .enumerate()
    {
        changes.attach_and_modify_process_step(step_id, None, |step| {
            step.status = status;
            if index == 0 && result.message.is_some() {
                step.message = result.message.clone();
            }
        });
    }

    let skip: Vec<ProcessStepType> = result
        .skip_step_type_ids
        .iter()
        .flatten()
        .copied()
        .filter(|t| *t != step_type)
        .collect();
    changes.skip_process_steps(todo, &skip, None);

    // Steps of the executed type that stay TODO still block rescheduling it.
    let still_todo: Vec<ProcessStep> = todo
        .iter()
        .filter(|s| {
            let skipped = skip.contains(&s.process_step_type);
            let finished = s.process_step_type == step_type && result.step_status != ProcessStepStatus::Todo;
            !skipped && !finished
        })
        .cloned()
        .collect();
    if let Some(schedule) = &result.schedule_step_type_ids {
        changes.schedule_process_steps(&still_todo, schedule, process_id);
    }
}

/// Tally of one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub processes: usize,
    pub steps_executed: usize,
    pub steps_failed: usize,
    pub concurrency_conflicts: usize,
    pub errors: usize,
}

pub struct ProcessRunner {
    executor: Arc<ProcessExecutor>,
    repository: Arc<dyn ProcessRepository>,
    event_bus: Arc<EventBus>,
    poll_interval: Duration,
    max_processes_per_run: usize,
    max_parallel_processes: usize,
}

impl ProcessRunner {
    pub fn new(
        executor: Arc<ProcessExecutor>,
        repository: Arc<dyn ProcessRepository>,
        event_bus: Arc<EventBus>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            executor,
            repository,
            event_bus,
            poll_interval: config.poll_interval(),
            max_processes_per_run: config.max_processes_per_run.max(1),
            max_parallel_processes: config.max_parallel_processes.max(1),
        }
    }

    /// Fetch due processes once and drive each of them.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<RunReport, ProcessError> {
        let processes = self
            .repository
            .get_active_processes(
                &self.executor.process_types(),
                &self.executor.executable_step_types(),
                Utc::now(),
                self.max_processes_per_run,
            )
            .await?;

        let mut report = RunReport {
            processes: processes.len(),
            ..RunReport::default()
        };
        if processes.is_empty() {
            return Ok(report);
        }

        let outcomes: Vec<(ProcessId, Result<ProcessRunSummary, ProcessError>)> = stream::iter(processes)
            .map(|process| async move {
                let process_id = process.id;
                (process_id, self.executor.execute_process(process, cancel).await)
            })
            .buffer_unordered(self.max_parallel_processes)
            .collect()
            .await;

        for (process_id, outcome) in outcomes {
            match outcome {
                Ok(summary) => {
                    report.steps_executed += summary.steps_executed;
                    report.steps_failed += summary.steps_failed;
                }
                Err(e) if e.is_retryable() => {
                    report.concurrency_conflicts += 1;
                    metrics::counter!("process_concurrency_conflicts_total").increment(1);
                    warn!(process_id = %process_id, "Process changed concurrently, retrying on next poll");
                    self.event_bus.publish_process_event(ProcessEvent::ConcurrencyConflict {
                        process_id,
                        detected_at: Utc::now(),
                    });
                }
                Err(e @ (ProcessError::NotFound(_) | ProcessError::Conflict(_))) => {
                    report.errors += 1;
                    warn!(process_id = %process_id, error = %e, "Process could not be executed");
                }
                Err(e) => {
                    report.errors += 1;
                    error!(process_id = %process_id, error = %e, "Process execution failed");
                }
            }
        }

        Ok(report)
    }

    /// Poll until `cancel` fires. A full batch is followed by an immediate
    /// poll; otherwise the runner waits `poll_interval`.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            poll_interval_seconds = self.poll_interval.as_secs(),
            max_processes_per_run = self.max_processes_per_run,
            max_parallel_processes = self.max_parallel_processes,
            "Starting process runner"
        );

        loop {
            let full_batch = match self.run_once(&cancel).await {
                Ok(report) => {
                    if report.processes > 0 {
                        info!(
                            processes = report.processes,
                            steps_executed = report.steps_executed,
                            steps_failed = report.steps_failed,
                            conflicts = report.concurrency_conflicts,
                            errors = report.errors,
                            "Process runner cycle completed"
                        );
                    }
                    report.processes >= self.max_processes_per_run
                }
                Err(e) => {
                    warn!("Process runner cycle failed: {}", e);
                    false
                }
            };

            if cancel.is_cancelled() {
                break;
            }
            if full_batch {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled() => break,
            }
        }

        info!("Process runner stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(step_type: ProcessStepType, process_id: ProcessId) -> ProcessStep {
        ProcessStep::new(step_type, ProcessStepStatus::Todo, process_id)
    }

    #[test]
    fn test_result_marks_first_and_duplicates_rest() {
        let process_id = ProcessId::new();
        let todo = vec![
            step(ProcessStepType::StartClearingHouse, process_id),
            step(ProcessStepType::StartClearingHouse, process_id),
        ];
        let mut changes = ProcessChangeSet::new();
        let result = StepExecutionResult::done(Some(ProcessStepType::EndClearingHouse), Some("sent".to_string()));

        apply_step_result(&mut changes, &todo, ProcessStepType::StartClearingHouse, &result, process_id);

        assert_eq!(changes.process_steps()[0].status, Some(ProcessStepStatus::Done));
        assert_eq!(changes.process_steps()[0].message, Some(Some("sent".to_string())));
        assert_eq!(changes.process_steps()[1].status, Some(ProcessStepStatus::Duplicate));
        let created = changes.created_steps();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].process_step_type, ProcessStepType::EndClearingHouse);
    }

    #[test]
    fn test_schedule_skips_types_already_todo() {
        let process_id = ProcessId::new();
        let todo = vec![
            step(ProcessStepType::CreateIdentityWallet, process_id),
            step(ProcessStepType::StartClearingHouse, process_id),
        ];
        let mut changes = ProcessChangeSet::new();
        let result = StepExecutionResult {
            modified: true,
            step_status: ProcessStepStatus::Done,
            schedule_step_type_ids: Some(vec![ProcessStepType::StartClearingHouse, ProcessStepType::CreateIdentityWallet]),
            skip_step_type_ids: None,
            message: None,
            finalized: false,
        };

        apply_step_result(&mut changes, &todo, ProcessStepType::CreateIdentityWallet, &result, process_id);

        // The executed step is finished, so its own type may be scheduled again.
        let created_types: Vec<_> = changes.created_steps().iter().map(|s| s.process_step_type).collect();
        assert_eq!(created_types, vec![ProcessStepType::CreateIdentityWallet]);
    }

    #[test]
    fn test_recoverable_result_without_message_stages_nothing() {
        let process_id = ProcessId::new();
        let todo = vec![step(ProcessStepType::StartClearingHouse, process_id)];
        let mut changes = ProcessChangeSet::new();
        let result = StepExecutionResult {
            modified: false,
            step_status: ProcessStepStatus::Todo,
            schedule_step_type_ids: None,
            skip_step_type_ids: None,
            message: None,
            finalized: false,
        };

        apply_step_result(&mut changes, &todo, ProcessStepType::StartClearingHouse, &result, process_id);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_skip_list_skips_first_and_duplicates_rest() {
        let process_id = ProcessId::new();
        let todo = vec![
            step(ProcessStepType::VerifyRegistration, process_id),
            step(ProcessStepType::DeclineApplication, process_id),
            step(ProcessStepType::DeclineApplication, process_id),
        ];
        let mut changes = ProcessChangeSet::new();
        let result = StepExecutionResult {
            modified: true,
            step_status: ProcessStepStatus::Done,
            schedule_step_type_ids: None,
            skip_step_type_ids: Some(vec![ProcessStepType::DeclineApplication]),
            message: None,
            finalized: false,
        };

        apply_step_result(&mut changes, &todo, ProcessStepType::VerifyRegistration, &result, process_id);

        let status_of = |id| changes.process_steps().iter().find(|c| c.step_id == id).and_then(|c| c.status);
        assert_eq!(status_of(todo[0].id), Some(ProcessStepStatus::Done));
        assert_eq!(status_of(todo[1].id), Some(ProcessStepStatus::Skipped));
        assert_eq!(status_of(todo[2].id), Some(ProcessStepStatus::Duplicate));
    }
}
