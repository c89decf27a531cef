// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Process Change Set (Unit of Work)
//!
//! Stages every write that belongs to one consistency unit (a process, its
//! steps, and the checklist of its subject). Nothing touches storage until a
//! repository commits the whole set through
//! [`crate::domain::repository::ProcessRepository::save_changes`], which
//! applies all of it or none of it.
//!
//! Modifications follow a read-modify-write against a partial projection: an
//! optional `initialize` closure seeds the fields the caller already knows,
//! then `modify` runs, and only the fields `modify` changed are recorded.
//! Process writes record the version observed before modification so the
//! storage layer can compare-and-swap on it.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::checklist::{ChecklistEntry, ChecklistEntryStatus, ChecklistEntryType, SubjectId};
use crate::domain::process::{
    assign_status_with_duplicates, Process, ProcessId, ProcessStep, ProcessStepId, ProcessStepStatus, ProcessStepType,
};

/// Field patch for one checklist entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistEntryChange {
    pub subject_id: SubjectId,
    pub entry_type: ChecklistEntryType,
    pub status: Option<ChecklistEntryStatus>,
    pub comment: Option<Option<String>>,
    pub last_modified: DateTime<Utc>,
}

/// Mutable view of a process step handed to modification closures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStepState {
    pub status: ProcessStepStatus,
    pub message: Option<String>,
}

/// Field patch for one existing process step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStepChange {
    pub step_id: ProcessStepId,
    pub status: Option<ProcessStepStatus>,
    pub message: Option<Option<String>>,
}

/// Compare-and-swap write of a process's concurrency token and lock lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessVersionChange {
    pub process_id: ProcessId,
    pub expected_version: Uuid,
    pub version: Uuid,
    pub lock_expiry_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessChangeSet {
    processes: Vec<ProcessVersionChange>,
    checklist_entries: Vec<ChecklistEntryChange>,
    process_steps: Vec<ProcessStepChange>,
    created_steps: Vec<ProcessStep>,
}

impl ProcessChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
            && self.checklist_entries.is_empty()
            && self.process_steps.is_empty()
            && self.created_steps.is_empty()
    }

    pub fn processes(&self) -> &[ProcessVersionChange] {
        &self.processes
    }

    pub fn checklist_entries(&self) -> &[ChecklistEntryChange] {
        &self.checklist_entries
    }

    pub fn process_steps(&self) -> &[ProcessStepChange] {
        &self.process_steps
    }

    pub fn created_steps(&self) -> &[ProcessStep] {
        &self.created_steps
    }

    /// Stage a modification of the checklist entry `(subject_id, entry_type)`.
    ///
    /// Returns the projection after `modify` ran.
    pub fn attach_and_modify_checklist_entry(
        &mut self,
        subject_id: SubjectId,
        entry_type: ChecklistEntryType,
        initialize: Option<&dyn Fn(&mut ChecklistEntry)>,
        modify: impl FnOnce(&mut ChecklistEntry),
    ) -> ChecklistEntry {
        let mut entry = ChecklistEntry::new(subject_id, entry_type, ChecklistEntryStatus::ToDo);
        let staged = self
            .checklist_entries
            .iter()
            .position(|c| c.subject_id == subject_id && c.entry_type == entry_type);
        if let Some(index) = staged {
            let change = &self.checklist_entries[index];
            if let Some(status) = change.status {
                entry.status = status;
            }
            if let Some(comment) = &change.comment {
                entry.comment = comment.clone();
            }
        }

        if let Some(initialize) = initialize {
            initialize(&mut entry);
        }
        let before = entry.clone();
        modify(&mut entry);
        entry.last_modified = Utc::now();

        let status = (entry.status != before.status).then_some(entry.status);
        let comment = (entry.comment != before.comment).then(|| entry.comment.clone());

        match staged {
            Some(index) => {
                let change = &mut self.checklist_entries[index];
                if status.is_some() {
                    change.status = status;
                }
                if comment.is_some() {
                    change.comment = comment;
                }
                change.last_modified = entry.last_modified;
            }
            None => self.checklist_entries.push(ChecklistEntryChange {
                subject_id,
                entry_type,
                status,
                comment,
                last_modified: entry.last_modified,
            }),
        }
        entry
    }

    /// Stage a modification of an existing step, or of a step created in this
    /// change set.
    pub fn attach_and_modify_process_step(
        &mut self,
        step_id: ProcessStepId,
        initialize: Option<&dyn Fn(&mut ProcessStepState)>,
        modify: impl FnOnce(&mut ProcessStepState),
    ) {
        if let Some(created) = self.created_steps.iter_mut().find(|s| s.id == step_id) {
            let mut state = ProcessStepState { status: created.status, message: created.message.clone() };
            modify(&mut state);
            created.status = state.status;
            created.message = state.message;
            return;
        }

        let mut state = ProcessStepState { status: ProcessStepStatus::Todo, message: None };
        let staged = self.process_steps.iter().position(|c| c.step_id == step_id);
        if let Some(index) = staged {
            let change = &self.process_steps[index];
            if let Some(status) = change.status {
                state.status = status;
            }
            if let Some(message) = &change.message {
                state.message = message.clone();
            }
        }

        if let Some(initialize) = initialize {
            initialize(&mut state);
        }
        let before = state.clone();
        modify(&mut state);

        let status = (state.status != before.status).then_some(state.status);
        let message = (state.message != before.message).then(|| state.message.clone());

        match staged {
            Some(index) => {
                let change = &mut self.process_steps[index];
                if status.is_some() {
                    change.status = status;
                }
                if message.is_some() {
                    change.message = message;
                }
            }
            None if status.is_some() || message.is_some() => {
                self.process_steps.push(ProcessStepChange { step_id, status, message })
            }
            None => {}
        }
    }

    /// Stage a bulk status assignment, e.g. from
    /// [`crate::domain::process::assign_status_with_duplicates`].
    pub fn modify_process_step_statuses(&mut self, statuses: impl IntoIterator<Item = (ProcessStepId, ProcessStepStatus)>) {
        for (step_id, status) in statuses {
            self.attach_and_modify_process_step(step_id, None, |step| step.status = status);
        }
    }

    pub fn create_process_steps(
        &mut self,
        steps: impl IntoIterator<Item = (ProcessStepType, ProcessStepStatus, ProcessId)>,
    ) -> Vec<ProcessStep> {
        let created: Vec<ProcessStep> = steps
            .into_iter()
            .map(|(step_type, status, process_id)| ProcessStep::new(step_type, status, process_id))
            .collect();
        self.created_steps.extend(created.iter().cloned());
        created
    }

    /// Stage a TODO step for each of `step_types` that has no TODO step in
    /// `steps` yet. A type listed twice is created once.
    pub fn schedule_process_steps(
        &mut self,
        steps: &[ProcessStep],
        step_types: &[ProcessStepType],
        process_id: ProcessId,
    ) -> Vec<ProcessStep> {
        let mut seen: HashSet<ProcessStepType> =
            steps.iter().filter(|s| s.is_todo()).map(|s| s.process_step_type).collect();
        let missing: Vec<ProcessStepType> = step_types.iter().copied().filter(|t| seen.insert(*t)).collect();
        if missing.is_empty() {
            return Vec::new();
        }
        self.create_process_steps(missing.into_iter().map(|t| (t, ProcessStepStatus::Todo, process_id)))
    }

    /// Stage `SKIPPED` on the first TODO step of each of `step_types` in
    /// `steps` and `DUPLICATE` on any further TODO step of that type. The
    /// `executing` step is never touched.
    pub fn skip_process_steps(
        &mut self,
        steps: &[ProcessStep],
        step_types: &[ProcessStepType],
        executing: Option<ProcessStepId>,
    ) -> Vec<(ProcessStepId, ProcessStepStatus)> {
        let mut handled = HashSet::new();
        let mut assigned = Vec::new();
        for step_type in step_types {
            if !handled.insert(*step_type) {
                continue;
            }
            let pending = steps
                .iter()
                .filter(|s| s.process_step_type == *step_type && s.is_todo() && Some(s.id) != executing);
            assigned.extend(assign_status_with_duplicates(pending, ProcessStepStatus::Skipped));
        }
        self.modify_process_step_statuses(assigned.iter().copied());
        assigned
    }

    /// Register `process` for an optimistic-concurrency write and apply
    /// `modify` to it.
    ///
    /// The expected version is the one observed on first attach, so repeated
    /// attaches within one change set still compare against the stored row.
    pub fn attach_process_for_lock(&mut self, process: &mut Process, modify: impl FnOnce(&mut Process)) {
        let staged = self.processes.iter().position(|c| c.process_id == process.id);
        let expected_version = staged
            .map(|index| self.processes[index].expected_version)
            .unwrap_or(process.version);

        modify(process);

        let change = ProcessVersionChange {
            process_id: process.id,
            expected_version,
            version: process.version,
            lock_expiry_date: process.lock_expiry_date,
        };
        match staged {
            Some(index) => self.processes[index] = change,
            None => self.processes.push(change),
        }
    }
}
