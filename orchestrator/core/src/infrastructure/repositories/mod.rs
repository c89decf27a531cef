// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository abstractions defined in
//! the domain layer.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve processes, steps and checklists
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **PostgresProcessRepository** - production storage, one transaction per
//!   change set, version compare-and-swap via `UPDATE ... WHERE version = $old`
//! - **InMemoryProcessRepository** - tests and local development; validates a
//!   whole change set under one write lock before applying any of it
//!
//! Both implement `ProcessRepository`, `ApplicationChecklistRepository` and
//! `InvitationRepository` over a single store.

pub mod postgres_process;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::change_set::ProcessChangeSet;
use crate::domain::checklist::{ChecklistEntry, ChecklistEntryStatus, ChecklistEntryType, SubjectId};
use crate::domain::process::{Process, ProcessId, ProcessStep, ProcessStepStatus, ProcessStepType, ProcessType};
use crate::domain::repository::{
    ApplicationChecklistRepository, ApplicationProcessData, ChecklistCreationData, InvitationRepository,
    ProcessRepository, RepositoryError, VerifyChecklistData,
};

#[derive(Debug, Clone)]
struct ApplicationRecord {
    business_partner_number: Option<String>,
    is_submitted: bool,
    checklist_process_id: Option<ProcessId>,
}

#[derive(Default)]
struct InMemoryState {
    processes: HashMap<ProcessId, Process>,
    /// Creation order.
    steps: Vec<ProcessStep>,
    checklist: HashMap<(SubjectId, ChecklistEntryType), ChecklistEntry>,
    applications: HashMap<SubjectId, ApplicationRecord>,
    invitations: HashMap<SubjectId, ProcessId>,
}

impl InMemoryState {
    fn checklist_of(&self, subject_id: SubjectId) -> Vec<ChecklistEntry> {
        let mut entries: Vec<ChecklistEntry> = self
            .checklist
            .values()
            .filter(|e| e.subject_id == subject_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.entry_type);
        entries
    }

    /// Every check a commit needs, without mutating anything.
    fn validate(&self, changes: &ProcessChangeSet) -> Result<(), RepositoryError> {
        for change in changes.processes() {
            let stored = self
                .processes
                .get(&change.process_id)
                .ok_or_else(|| RepositoryError::NotFound(format!("process {}", change.process_id)))?;
            if stored.version != change.expected_version {
                return Err(RepositoryError::ConcurrencyConflict(format!(
                    "process {} was modified concurrently",
                    change.process_id
                )));
            }
        }

        for change in changes.process_steps() {
            let stored = self
                .steps
                .iter()
                .find(|s| s.id == change.step_id)
                .ok_or_else(|| RepositoryError::NotFound(format!("process step {}", change.step_id)))?;
            if let Some(status) = change.status {
                if !stored.status.can_transition_to(status) {
                    return Err(RepositoryError::InvalidStateTransition(format!(
                        "process step {} cannot move from {} to {}",
                        change.step_id, stored.status, status
                    )));
                }
            }
        }

        for step in changes.created_steps() {
            if !self.processes.contains_key(&step.process_id) {
                return Err(RepositoryError::NotFound(format!("process {}", step.process_id)));
            }
        }

        for change in changes.checklist_entries() {
            if !self.checklist.contains_key(&(change.subject_id, change.entry_type)) {
                return Err(RepositoryError::NotFound(format!(
                    "checklist entry {} of subject {}",
                    change.entry_type, change.subject_id
                )));
            }
        }

        Ok(())
    }

    fn apply(&mut self, changes: ProcessChangeSet) {
        for change in changes.processes() {
            if let Some(process) = self.processes.get_mut(&change.process_id) {
                process.version = change.version;
                process.lock_expiry_date = change.lock_expiry_date;
            }
        }

        for change in changes.process_steps() {
            if let Some(step) = self.steps.iter_mut().find(|s| s.id == change.step_id) {
                if let Some(status) = change.status {
                    step.status = status;
                }
                if let Some(message) = &change.message {
                    step.message = message.clone();
                }
            }
        }

        self.steps.extend(changes.created_steps().iter().cloned());

        for change in changes.checklist_entries() {
            if let Some(entry) = self.checklist.get_mut(&(change.subject_id, change.entry_type)) {
                if let Some(status) = change.status {
                    entry.status = status;
                }
                if let Some(comment) = &change.comment {
                    entry.comment = comment.clone();
                }
                entry.last_modified = change.last_modified;
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryProcessRepository {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryProcessRepository {
    pub fn new() -> Self {
        Self::default()
    }

    // Seeding helpers

    pub fn insert_process(&self, process: Process) {
        self.state.write().processes.insert(process.id, process);
    }

    pub fn insert_step(&self, step: ProcessStep) {
        self.state.write().steps.push(step);
    }

    pub fn insert_checklist_entry(&self, entry: ChecklistEntry) {
        self.state.write().checklist.insert((entry.subject_id, entry.entry_type), entry);
    }

    /// Register an application subject, optionally bound to its checklist process.
    pub fn add_application(
        &self,
        subject_id: SubjectId,
        business_partner_number: Option<String>,
        is_submitted: bool,
        checklist_process_id: Option<ProcessId>,
    ) {
        self.state.write().applications.insert(
            subject_id,
            ApplicationRecord {
                business_partner_number,
                is_submitted,
                checklist_process_id,
            },
        );
    }

    pub fn add_invitation(&self, invitation_id: SubjectId, process_id: ProcessId) {
        self.state.write().invitations.insert(invitation_id, process_id);
    }

    /// All steps of a process in creation order, any status.
    pub fn steps_of(&self, process_id: ProcessId) -> Vec<ProcessStep> {
        self.state
            .read()
            .steps
            .iter()
            .filter(|s| s.process_id == process_id)
            .cloned()
            .collect()
    }

    pub fn checklist_entry(&self, subject_id: SubjectId, entry_type: ChecklistEntryType) -> Option<ChecklistEntry> {
        self.state.read().checklist.get(&(subject_id, entry_type)).cloned()
    }
}

#[async_trait]
impl ProcessRepository for InMemoryProcessRepository {
    async fn get_process(&self, id: ProcessId) -> Result<Option<Process>, RepositoryError> {
        Ok(self.state.read().processes.get(&id).cloned())
    }

    async fn get_process_steps(
        &self,
        process_id: ProcessId,
        status: Option<ProcessStepStatus>,
    ) -> Result<Vec<ProcessStep>, RepositoryError> {
        Ok(self
            .state
            .read()
            .steps
            .iter()
            .filter(|s| s.process_id == process_id && status.map_or(true, |status| s.status == status))
            .cloned()
            .collect())
    }

    async fn get_active_processes(
        &self,
        process_types: &[ProcessType],
        step_types: &[ProcessStepType],
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Process>, RepositoryError> {
        let state = self.state.read();
        let mut due: Vec<(DateTime<Utc>, Process)> = state
            .processes
            .values()
            .filter(|p| process_types.contains(&p.process_type) && !p.is_locked_at(now))
            .filter_map(|p| {
                state
                    .steps
                    .iter()
                    .filter(|s| s.process_id == p.id && s.is_todo() && step_types.contains(&s.process_step_type))
                    .map(|s| s.date_created)
                    .min()
                    .map(|oldest| (oldest, p.clone()))
            })
            .collect();
        due.sort_by_key(|(oldest, _)| *oldest);
        Ok(due.into_iter().take(limit).map(|(_, p)| p).collect())
    }

    async fn create_process(&self, process_type: ProcessType) -> Result<Process, RepositoryError> {
        let process = Process::new(process_type);
        self.insert_process(process.clone());
        Ok(process)
    }

    async fn save_changes(&self, changes: ProcessChangeSet) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        state.validate(&changes)?;
        state.apply(changes);
        Ok(())
    }
}

#[async_trait]
impl ApplicationChecklistRepository for InMemoryProcessRepository {
    async fn get_checklist_creation_data(
        &self,
        subject_id: SubjectId,
    ) -> Result<Option<ChecklistCreationData>, RepositoryError> {
        let state = self.state.read();
        Ok(state.applications.get(&subject_id).map(|application| ChecklistCreationData {
            business_partner_number: application.business_partner_number.clone(),
            existing_entry_types: state.checklist_of(subject_id).into_iter().map(|e| e.entry_type).collect(),
        }))
    }

    async fn create_checklist_entries(
        &self,
        subject_id: SubjectId,
        entries: &[(ChecklistEntryType, ChecklistEntryStatus)],
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        if !state.applications.contains_key(&subject_id) {
            return Err(RepositoryError::NotFound(format!("subject {}", subject_id)));
        }
        if let Some((entry_type, _)) = entries
            .iter()
            .find(|(entry_type, _)| state.checklist.contains_key(&(subject_id, *entry_type)))
        {
            return Err(RepositoryError::InvalidStateTransition(format!(
                "checklist entry {} already exists for subject {}",
                entry_type, subject_id
            )));
        }
        for (entry_type, status) in entries {
            state
                .checklist
                .insert((subject_id, *entry_type), ChecklistEntry::new(subject_id, *entry_type, *status));
        }
        Ok(())
    }

    async fn load_checklist_and_process_steps(
        &self,
        subject_id: SubjectId,
        entry_types: &[ChecklistEntryType],
        step_types: &[ProcessStepType],
    ) -> Result<Option<VerifyChecklistData>, RepositoryError> {
        let state = self.state.read();
        let Some(application) = state.applications.get(&subject_id) else {
            return Ok(None);
        };
        let process = application
            .checklist_process_id
            .and_then(|id| state.processes.get(&id).cloned());
        let process_steps = match &process {
            Some(process) => state
                .steps
                .iter()
                .filter(|s| s.process_id == process.id && step_types.contains(&s.process_step_type))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        let checklist = state
            .checklist_of(subject_id)
            .into_iter()
            .filter(|e| entry_types.contains(&e.entry_type))
            .collect();

        Ok(Some(VerifyChecklistData {
            is_submitted: application.is_submitted,
            process,
            checklist,
            process_steps,
        }))
    }

    async fn get_checklist(&self, subject_id: SubjectId) -> Result<Vec<ChecklistEntry>, RepositoryError> {
        Ok(self.state.read().checklist_of(subject_id))
    }

    async fn get_application_for_process(
        &self,
        process_id: ProcessId,
    ) -> Result<Option<ApplicationProcessData>, RepositoryError> {
        let state = self.state.read();
        Ok(state
            .applications
            .iter()
            .find(|(_, application)| application.checklist_process_id == Some(process_id))
            .map(|(subject_id, application)| ApplicationProcessData {
                subject_id: *subject_id,
                is_submitted: application.is_submitted,
                checklist: state.checklist_of(*subject_id),
            }))
    }
}

#[async_trait]
impl InvitationRepository for InMemoryProcessRepository {
    async fn get_invitation_for_process(&self, process_id: ProcessId) -> Result<Option<SubjectId>, RepositoryError> {
        Ok(self
            .state
            .read()
            .invitations
            .iter()
            .find(|(_, bound)| **bound == process_id)
            .map(|(invitation_id, _)| *invitation_id))
    }
}
