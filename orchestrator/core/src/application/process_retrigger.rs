// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Retrigger Process Step Use Case
//!
//! Completes an operator-facing `RETRIGGER_*` step and reschedules the
//! automated step it stands for, so a workflow stopped by a non-recoverable
//! failure resumes on the next runner poll. For application checklists the
//! failed entry is verified and reset through [`ChecklistProcessService`] in
//! the same commit.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::application::application_checklist_executor::step_binding;
use crate::application::process_orchestration::ChecklistProcessService;
use crate::domain::change_set::ProcessChangeSet;
use crate::domain::checklist::{ChecklistEntry, ChecklistEntryStatus};
use crate::domain::errors::ProcessError;
use crate::domain::events::ProcessEvent;
use crate::domain::process::{Process, ProcessId, ProcessStepStatus, ProcessStepType, ProcessType};
use crate::domain::repository::{ApplicationChecklistRepository, ProcessRepository};
use crate::infrastructure::event_bus::EventBus;

pub struct ProcessStepRetriggerService {
    repository: Arc<dyn ProcessRepository>,
    checklist_repository: Arc<dyn ApplicationChecklistRepository>,
    orchestration: ChecklistProcessService,
    event_bus: Arc<EventBus>,
}

impl ProcessStepRetriggerService {
    pub fn new(
        repository: Arc<dyn ProcessRepository>,
        checklist_repository: Arc<dyn ApplicationChecklistRepository>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let orchestration = ChecklistProcessService::new(repository.clone(), checklist_repository.clone());
        Self {
            repository,
            checklist_repository,
            orchestration,
            event_bus,
        }
    }

    /// Mark the pending `retrigger_step_type` step DONE and schedule the step
    /// it retriggers, in one commit.
    ///
    /// On an application checklist the entry of the retriggered step must be
    /// `FAILED`; it is reset to the status the step runs from and its
    /// comment is cleared.
    ///
    /// Returns the rescheduled step type.
    ///
    /// # Errors
    ///
    /// - `NotFound`: process or its application does not exist
    /// - `Conflict`: not a retrigger step type, process locked, entry not
    ///   `FAILED`, or no single TODO step of that type
    pub async fn retrigger_step(
        &self,
        process_id: ProcessId,
        retrigger_step_type: ProcessStepType,
    ) -> Result<ProcessStepType, ProcessError> {
        let target = retrigger_step_type.step_for_retrigger().ok_or_else(|| {
            ProcessError::conflict(format!("{} is not a retrigger step", retrigger_step_type))
        })?;

        let process = self
            .repository
            .get_process(process_id)
            .await?
            .ok_or_else(|| ProcessError::not_found(format!("process {} does not exist", process_id)))?;

        match process.process_type {
            ProcessType::ApplicationChecklist => {
                self.retrigger_checklist_step(process_id, retrigger_step_type, target)
                    .await?
            }
            _ => self.retrigger_process_step(process, retrigger_step_type, target).await?,
        }

        info!(process_id = %process_id, retrigger = %retrigger_step_type, scheduled = %target, "Retriggered process step");
        self.event_bus.publish_process_event(ProcessEvent::ProcessStepRetriggered {
            process_id,
            retrigger_step_type,
            scheduled: target,
            retriggered_at: Utc::now(),
        });

        Ok(target)
    }

    async fn retrigger_checklist_step(
        &self,
        process_id: ProcessId,
        retrigger_step_type: ProcessStepType,
        target: ProcessStepType,
    ) -> Result<(), ProcessError> {
        let binding = step_binding(target).ok_or_else(|| {
            ProcessError::conflict(format!("{} does not advance a checklist entry", target))
        })?;
        let reset_status = binding
            .expected_entry_statuses
            .first()
            .copied()
            .unwrap_or(ChecklistEntryStatus::ToDo);

        let application = self
            .checklist_repository
            .get_application_for_process(process_id)
            .await?
            .ok_or_else(|| ProcessError::not_found(format!("process {} has no application", process_id)))?;

        let mut context = self
            .orchestration
            .verify_checklist_entry_and_process_steps(
                application.subject_id,
                binding.entry_type,
                &[ChecklistEntryStatus::Failed],
                retrigger_step_type,
                &[],
                &[target],
            )
            .await?;

        let comment = context
            .checklist
            .get(&binding.entry_type)
            .and_then(|(_, comment)| comment.clone());
        let initialize = move |entry: &mut ChecklistEntry| {
            entry.status = ChecklistEntryStatus::Failed;
            entry.comment = comment.clone();
        };
        let reset = move |entry: &mut ChecklistEntry| {
            entry.status = reset_status;
            entry.comment = None;
        };
        let mut changes = ProcessChangeSet::new();
        self.orchestration.finalize_checklist_entry_and_process_steps(
            &mut context,
            Some(&initialize),
            Some(&reset),
            Some(&[target]),
            &mut changes,
        );
        self.orchestration.commit(changes).await
    }

    async fn retrigger_process_step(
        &self,
        mut process: Process,
        retrigger_step_type: ProcessStepType,
        target: ProcessStepType,
    ) -> Result<(), ProcessError> {
        let process_id = process.id;
        if let Some(expiry) = process.lock_expiry_date.filter(|_| process.is_locked()) {
            return Err(ProcessError::conflict(format!(
                "process {} is locked, lock expiry is set to {}",
                process_id, expiry
            )));
        }

        let todo = self
            .repository
            .get_process_steps(process_id, Some(ProcessStepStatus::Todo))
            .await?;
        let pending: Vec<_> = todo
            .iter()
            .filter(|s| s.process_step_type == retrigger_step_type)
            .collect();
        let [retrigger] = pending.as_slice() else {
            return Err(ProcessError::conflict(format!(
                "process step {} is not eligible to run",
                retrigger_step_type
            )));
        };

        let mut changes = ProcessChangeSet::new();
        changes.attach_and_modify_process_step(retrigger.id, None, |step| {
            step.status = ProcessStepStatus::Done;
        });
        changes.schedule_process_steps(&todo, &[target], process_id);
        changes.attach_process_for_lock(&mut process, |p| p.update_version());
        self.repository.save_changes(changes).await?;
        Ok(())
    }
}
