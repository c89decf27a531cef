// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Checklist Process Service
//!
//! State-transition core for checklist-guarded process steps. A caller
//! verifies a step against the checklist and process, optionally takes the
//! lock lease, runs its business handler, then finalizes or skips. Every
//! mutation is staged into a [`ProcessChangeSet`] and committed as one unit.
//!
//! # Flow
//!
//! 1. `verify_checklist_entry_and_process_steps` → [`VerifiedContext`]
//! 2. `request_lock` (steps with irreversible side effects)
//! 3. business handler runs against the context
//! 4. `finalize_checklist_entry_and_process_steps` / `skip_process_steps`
//! 5. `commit`
//!
//! Handler failures are classified by `handle_service_error` into an
//! [`ErrorHandlingResult`] that the caller folds into the same commit.
//! Validation failures are returned as [`ProcessError`] and never become
//! checklist state.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::change_set::ProcessChangeSet;
use crate::domain::checklist::{
    ChecklistEntry, ChecklistEntryModification, ChecklistEntryStatus, ChecklistEntryType, SubjectId,
};
use crate::domain::errors::{ProcessError, StepError};
use crate::domain::process::{Process, ProcessStep, ProcessStepId, ProcessStepStatus, ProcessStepType};
use crate::domain::repository::{ApplicationChecklistRepository, ProcessRepository};

/// Snapshot a step handler may read and the orchestration service may write.
#[derive(Debug, Clone)]
pub struct VerifiedContext {
    pub subject_id: SubjectId,
    pub entry_type: ChecklistEntryType,
    pub process_step_type: ProcessStepType,
    pub process: Process,
    /// Entry type → (status, comment), restricted to the requested entry type and its siblings.
    pub checklist: BTreeMap<ChecklistEntryType, (ChecklistEntryStatus, Option<String>)>,
    /// Steps restricted to the requested step type and its siblings, creation order.
    pub process_steps: Vec<ProcessStep>,
    /// The one `TODO` step being executed.
    pub process_step_id: ProcessStepId,
}

impl VerifiedContext {
    pub fn entry_status(&self, entry_type: ChecklistEntryType) -> Option<ChecklistEntryStatus> {
        self.checklist.get(&entry_type).map(|(status, _)| *status)
    }
}

/// Outcome of classifying a handler failure; applied by the caller inside the
/// finalizing commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorHandlingResult {
    pub modify_entry: Option<ChecklistEntryModification>,
    pub schedule_step_type_ids: Option<Vec<ProcessStepType>>,
    pub modified: bool,
    pub step_status: ProcessStepStatus,
}

/// Classify a handler failure.
///
/// Recoverable service errors leave everything untouched and keep the step
/// `TODO`. Anything else marks the entry `FAILED` with the error message as
/// comment and schedules `retrigger_step_type`.
pub fn classify_service_error(error: &StepError, retrigger_step_type: ProcessStepType) -> ErrorHandlingResult {
    if error.is_recoverable() {
        debug!(error = %error, "Recoverable service error, step stays TODO");
        return ErrorHandlingResult {
            modify_entry: None,
            schedule_step_type_ids: None,
            modified: false,
            step_status: ProcessStepStatus::Todo,
        };
    }

    warn!(error = %error, retrigger = %retrigger_step_type, "Step failed, scheduling retrigger");
    ErrorHandlingResult {
        modify_entry: Some(
            ChecklistEntryModification::status(ChecklistEntryStatus::Failed).with_comment(Some(error.to_string())),
        ),
        schedule_step_type_ids: Some(vec![retrigger_step_type]),
        modified: true,
        step_status: ProcessStepStatus::Failed,
    }
}

pub struct ChecklistProcessService {
    process_repository: Arc<dyn ProcessRepository>,
    checklist_repository: Arc<dyn ApplicationChecklistRepository>,
}

impl ChecklistProcessService {
    pub fn new(
        process_repository: Arc<dyn ProcessRepository>,
        checklist_repository: Arc<dyn ApplicationChecklistRepository>,
    ) -> Self {
        Self { process_repository, checklist_repository }
    }

    /// Load and validate the checklist/process state for one step execution.
    ///
    /// Checks run in order and fail on the first violation:
    /// subject exists, subject submitted, process bound, process unlocked,
    /// entry status allowed, exactly one `TODO` step of the requested type.
    ///
    /// # Errors
    ///
    /// - `NotFound`: subject does not exist
    /// - `Conflict`: any precondition above does not hold
    /// - `UnexpectedCondition`: steps of the type exist but none is `TODO`
    pub async fn verify_checklist_entry_and_process_steps(
        &self,
        subject_id: SubjectId,
        entry_type: ChecklistEntryType,
        expected_entry_statuses: &[ChecklistEntryStatus],
        process_step_type: ProcessStepType,
        sibling_entry_types: &[ChecklistEntryType],
        sibling_step_types: &[ProcessStepType],
    ) -> Result<VerifiedContext, ProcessError> {
        self.verify(
            None,
            subject_id,
            entry_type,
            expected_entry_statuses,
            process_step_type,
            sibling_entry_types,
            sibling_step_types,
        )
        .await
    }

    /// Same checks as [`Self::verify_checklist_entry_and_process_steps`] for
    /// a caller that already drives `held`. A live lock is accepted when the
    /// stored process is still at `held`'s version, i.e. the lease is the
    /// caller's own.
    pub async fn verify_as_lease_holder(
        &self,
        held: &Process,
        subject_id: SubjectId,
        entry_type: ChecklistEntryType,
        expected_entry_statuses: &[ChecklistEntryStatus],
        process_step_type: ProcessStepType,
        sibling_entry_types: &[ChecklistEntryType],
        sibling_step_types: &[ProcessStepType],
    ) -> Result<VerifiedContext, ProcessError> {
        self.verify(
            Some(held.version),
            subject_id,
            entry_type,
            expected_entry_statuses,
            process_step_type,
            sibling_entry_types,
            sibling_step_types,
        )
        .await
    }

    async fn verify(
        &self,
        lease_version: Option<Uuid>,
        subject_id: SubjectId,
        entry_type: ChecklistEntryType,
        expected_entry_statuses: &[ChecklistEntryStatus],
        process_step_type: ProcessStepType,
        sibling_entry_types: &[ChecklistEntryType],
        sibling_step_types: &[ProcessStepType],
    ) -> Result<VerifiedContext, ProcessError> {
        let mut entry_types: Vec<ChecklistEntryType> = sibling_entry_types.to_vec();
        if !entry_types.contains(&entry_type) {
            entry_types.push(entry_type);
        }
        let mut step_types: Vec<ProcessStepType> = sibling_step_types.to_vec();
        if !step_types.contains(&process_step_type) {
            step_types.push(process_step_type);
        }

        let data = self
            .checklist_repository
            .load_checklist_and_process_steps(subject_id, &entry_types, &step_types)
            .await?
            .ok_or_else(|| ProcessError::not_found(format!("subject {} does not exist", subject_id)))?;

        if !data.is_submitted {
            return Err(ProcessError::conflict(format!(
                "subject {} is not in the submitted state",
                subject_id
            )));
        }

        let process = data
            .process
            .ok_or_else(|| ProcessError::conflict(format!("subject {} has no checklist process", subject_id)))?;

        let foreign_lock = process
            .lock_expiry_date
            .filter(|_| process.is_locked() && lease_version != Some(process.version));
        if let Some(expiry) = foreign_lock {
            return Err(ProcessError::conflict(format!(
                "process {} is locked, lock expiry is set to {}",
                process.id, expiry
            )));
        }

        let entry = data.checklist.iter().find(|e| e.entry_type == entry_type);
        match entry {
            Some(entry) if expected_entry_statuses.contains(&entry.status) => {}
            _ => {
                let allowed: Vec<&str> = expected_entry_statuses.iter().map(|s| s.as_str()).collect();
                return Err(ProcessError::conflict(format!(
                    "checklist entry {} is not in status [{}]",
                    entry_type,
                    allowed.join(", ")
                )));
            }
        }

        let of_type: Vec<&ProcessStep> = data
            .process_steps
            .iter()
            .filter(|s| s.process_step_type == process_step_type)
            .collect();
        let todo: Vec<&&ProcessStep> = of_type.iter().filter(|s| s.is_todo()).collect();
        let process_step_id = match todo.as_slice() {
            [step] => step.id,
            [] if !of_type.is_empty() => {
                return Err(ProcessError::unexpected(format!(
                    "process step {} of process {} was dispatched but is not in status TODO",
                    process_step_type, process.id
                )));
            }
            _ => {
                return Err(ProcessError::conflict(format!(
                    "process step {} is not eligible to run",
                    process_step_type
                )));
            }
        };

        let checklist = data
            .checklist
            .into_iter()
            .filter(|e| entry_types.contains(&e.entry_type))
            .map(|e| (e.entry_type, (e.status, e.comment)))
            .collect();
        let process_steps = data
            .process_steps
            .into_iter()
            .filter(|s| step_types.contains(&s.process_step_type))
            .collect();

        debug!(subject_id = %subject_id, process_id = %process.id, step_type = %process_step_type, "Verified checklist and process steps");

        Ok(VerifiedContext {
            subject_id,
            entry_type,
            process_step_type,
            process,
            checklist,
            process_steps,
            process_step_id,
        })
    }

    /// Stage the lock lease on the context's process.
    ///
    /// The version is replaced; the commit fails with a retryable concurrency
    /// conflict if another worker changed the process since it was loaded.
    pub fn request_lock(
        &self,
        context: &mut VerifiedContext,
        lock_expiry_date: DateTime<Utc>,
        changes: &mut ProcessChangeSet,
    ) -> Result<(), ProcessError> {
        let now = Utc::now();
        if context.process.is_locked_at(now) {
            return Err(ProcessError::unexpected(format!(
                "process {} is already locked",
                context.process.id
            )));
        }

        let mut acquired = false;
        changes.attach_process_for_lock(&mut context.process, |process| {
            acquired = process.try_lock(lock_expiry_date, now);
        });
        if !acquired {
            return Err(ProcessError::unexpected(format!(
                "process {} could not be locked",
                context.process.id
            )));
        }

        debug!(process_id = %context.process.id, lock_expiry_date = %lock_expiry_date, "Lock requested");
        Ok(())
    }

    /// Stage completion of the context's step.
    ///
    /// Marks the step `DONE`, applies `modify` to the checklist entry (seeded
    /// by `initialize`), schedules each of `next_step_type_ids` that has no
    /// `TODO` step in the context yet, and releases the lock lease.
    pub fn finalize_checklist_entry_and_process_steps(
        &self,
        context: &mut VerifiedContext,
        initialize: Option<&dyn Fn(&mut ChecklistEntry)>,
        modify: Option<&dyn Fn(&mut ChecklistEntry)>,
        next_step_type_ids: Option<&[ProcessStepType]>,
        changes: &mut ProcessChangeSet,
    ) {
        self.close_process_step(
            context,
            ProcessStepStatus::Done,
            None,
            initialize,
            modify,
            next_step_type_ids,
            changes,
        );
    }

    /// Stage the outcome of the context's step.
    ///
    /// Like [`Self::finalize_checklist_entry_and_process_steps`] with an
    /// explicit step status and message, for handler failures folded into
    /// the same commit. A step closed as `TODO` keeps blocking a new step of
    /// its own type.
    pub fn close_process_step(
        &self,
        context: &mut VerifiedContext,
        step_status: ProcessStepStatus,
        message: Option<String>,
        initialize: Option<&dyn Fn(&mut ChecklistEntry)>,
        modify: Option<&dyn Fn(&mut ChecklistEntry)>,
        next_step_type_ids: Option<&[ProcessStepType]>,
        changes: &mut ProcessChangeSet,
    ) {
        changes.attach_and_modify_process_step(context.process_step_id, None, |step| {
            step.status = step_status;
            if message.is_some() {
                step.message = message.clone();
            }
        });
        if let Some(step) = context.process_steps.iter_mut().find(|s| s.id == context.process_step_id) {
            step.status = step_status;
            if message.is_some() {
                step.message = message;
            }
        }

        if let Some(modify) = modify {
            let entry = changes.attach_and_modify_checklist_entry(
                context.subject_id,
                context.entry_type,
                initialize,
                |entry| modify(entry),
            );
            context.checklist.insert(entry.entry_type, (entry.status, entry.comment));
        }

        let created = changes.schedule_process_steps(
            &context.process_steps,
            next_step_type_ids.unwrap_or_default(),
            context.process.id,
        );
        let scheduled: Vec<ProcessStepType> = created.iter().map(|s| s.process_step_type).collect();
        context.process_steps.extend(created);

        let had_lock = context.process.lock_expiry_date.is_some();
        changes.attach_process_for_lock(&mut context.process, |process| {
            if !process.release_lock() {
                process.update_version();
            }
        });

        info!(
            process_id = %context.process.id,
            step_type = %context.process_step_type,
            status = %step_status,
            scheduled = ?scheduled,
            released_lock = had_lock,
            "Closed process step"
        );
    }

    /// Stage skipping of pending steps that are no longer needed.
    ///
    /// Per requested type the first `TODO` step becomes `SKIPPED` and any
    /// further `TODO` steps of that type become `DUPLICATE`. The step being
    /// executed is never touched.
    pub fn skip_process_steps(
        &self,
        context: &mut VerifiedContext,
        process_step_type_ids: &[ProcessStepType],
        changes: &mut ProcessChangeSet,
    ) {
        let statuses = changes.skip_process_steps(
            &context.process_steps,
            process_step_type_ids,
            Some(context.process_step_id),
        );
        for (step_id, status) in statuses {
            if let Some(step) = context.process_steps.iter_mut().find(|s| s.id == step_id) {
                step.status = status;
            }
        }
    }

    /// Classify a handler failure; see [`classify_service_error`].
    pub fn handle_service_error(&self, error: &StepError, retrigger_step_type: ProcessStepType) -> ErrorHandlingResult {
        classify_service_error(error, retrigger_step_type)
    }

    /// Commit staged changes atomically.
    pub async fn commit(&self, changes: ProcessChangeSet) -> Result<(), ProcessError> {
        if changes.is_empty() {
            return Ok(());
        }
        self.process_repository.save_changes(changes).await?;
        Ok(())
    }

    /// Take the lock lease and persist it before a handler with external side
    /// effects runs.
    pub async fn lock(&self, context: &mut VerifiedContext, lock_expiry_date: DateTime<Utc>) -> Result<(), ProcessError> {
        let mut changes = ProcessChangeSet::new();
        self.request_lock(context, lock_expiry_date, &mut changes)?;
        self.commit(changes).await
    }
}
