// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts consumed by the orchestration engine. The interfaces
//! live in the domain layer and are implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Concern | Implementations |
//! |-------|---------|----------------|
//! | `ProcessRepository` | processes, steps, atomic commit | `InMemoryProcessRepository`, `PostgresProcessRepository` |
//! | `ApplicationChecklistRepository` | checklist entries, subject binding | `InMemoryProcessRepository`, `PostgresProcessRepository` |
//! | `InvitationRepository` | invitation binding | `InMemoryProcessRepository`, `PostgresProcessRepository` |
//!
//! ## Atomicity
//!
//! Every write of the engine goes through [`ProcessRepository::save_changes`]:
//! the whole [`ProcessChangeSet`] is applied or nothing is. Process rows are
//! written with a compare-and-swap on their version; a mismatch is reported as
//! [`RepositoryError::ConcurrencyConflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::change_set::ProcessChangeSet;
use crate::domain::checklist::{ChecklistEntry, ChecklistEntryStatus, ChecklistEntryType, SubjectId};
use crate::domain::process::{Process, ProcessId, ProcessStep, ProcessStepStatus, ProcessStepType, ProcessType};

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

/// Facts about a subject needed to seed its checklist, read in one query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecklistCreationData {
    pub business_partner_number: Option<String>,
    pub existing_entry_types: Vec<ChecklistEntryType>,
}

/// Snapshot loaded for checklist/process verification.
#[derive(Debug, Clone)]
pub struct VerifyChecklistData {
    /// Subject is in the workflow stage that permits checklist execution.
    pub is_submitted: bool,
    pub process: Option<Process>,
    pub checklist: Vec<ChecklistEntry>,
    /// Steps of the requested types, any status, in creation order.
    pub process_steps: Vec<ProcessStep>,
}

/// Subject bound to an application-checklist process.
#[derive(Debug, Clone)]
pub struct ApplicationProcessData {
    pub subject_id: SubjectId,
    pub is_submitted: bool,
    pub checklist: Vec<ChecklistEntry>,
}

#[async_trait]
pub trait ProcessRepository: Send + Sync {
    async fn get_process(&self, id: ProcessId) -> Result<Option<Process>, RepositoryError>;

    /// Steps of a process in creation order, optionally filtered by status.
    async fn get_process_steps(
        &self,
        process_id: ProcessId,
        status: Option<ProcessStepStatus>,
    ) -> Result<Vec<ProcessStep>, RepositoryError>;

    /// Processes of the given types that hold at least one `TODO` step of the
    /// given step types and are not locked at `now`.
    async fn get_active_processes(
        &self,
        process_types: &[ProcessType],
        step_types: &[ProcessStepType],
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Process>, RepositoryError>;

    async fn create_process(&self, process_type: ProcessType) -> Result<Process, RepositoryError>;

    /// Commit a change set atomically.
    async fn save_changes(&self, changes: ProcessChangeSet) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ApplicationChecklistRepository: Send + Sync {
    /// `None` if the subject does not exist.
    async fn get_checklist_creation_data(
        &self,
        subject_id: SubjectId,
    ) -> Result<Option<ChecklistCreationData>, RepositoryError>;

    /// Persist entries in one batch. Fails without writing if any entry type
    /// already exists for the subject.
    async fn create_checklist_entries(
        &self,
        subject_id: SubjectId,
        entries: &[(ChecklistEntryType, ChecklistEntryStatus)],
    ) -> Result<(), RepositoryError>;

    /// `None` if the subject does not exist. Checklist and steps are filtered
    /// by the given types; steps belong to the subject's checklist process.
    async fn load_checklist_and_process_steps(
        &self,
        subject_id: SubjectId,
        entry_types: &[ChecklistEntryType],
        step_types: &[ProcessStepType],
    ) -> Result<Option<VerifyChecklistData>, RepositoryError>;

    async fn get_checklist(&self, subject_id: SubjectId) -> Result<Vec<ChecklistEntry>, RepositoryError>;

    async fn get_application_for_process(
        &self,
        process_id: ProcessId,
    ) -> Result<Option<ApplicationProcessData>, RepositoryError>;
}

#[async_trait]
pub trait InvitationRepository: Send + Sync {
    async fn get_invitation_for_process(&self, process_id: ProcessId) -> Result<Option<SubjectId>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// Stale version on write; the caller should reload and retry.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

impl From<crate::domain::process::UnknownVariant> for RepositoryError {
    fn from(err: crate::domain::process::UnknownVariant) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
