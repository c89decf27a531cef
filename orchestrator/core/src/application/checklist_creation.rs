// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Checklist Creation Use Case
//!
//! Seeds the checklist of a new workflow subject and derives the process steps
//! that become eligible from that initial state.
//!
//! # DDD Pattern: Application Service
//!
//! - **Layer:** Application
//! - **Responsibility:** Initial and repair-time checklist creation
//! - **Collaborators:**
//!   - Domain: ChecklistEntryType closed set, StepDependencyTable
//!   - Infrastructure: ApplicationChecklistRepository
//!
//! # Flow
//!
//! 1. Read prerequisite facts for the subject in one query
//! 2. Return early if the subject already has a checklist
//! 3. Derive one status per entry type (DONE when a prerequisite satisfies it)
//! 4. Persist the full entry set in one batch
//!
//! The step dependency table is injected so alternative tables can be used in
//! tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::checklist::{ChecklistEntryStatus, ChecklistEntryType, SubjectId};
use crate::domain::errors::ProcessError;
use crate::domain::process::ProcessStepType;
use crate::domain::repository::{ApplicationChecklistRepository, ChecklistCreationData, RepositoryError};

/// Immutable map from checklist entry type to the step types that become
/// eligible while that entry is `TO_DO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDependencyTable {
    steps: HashMap<ChecklistEntryType, Vec<ProcessStepType>>,
}

impl StepDependencyTable {
    pub fn new(steps: HashMap<ChecklistEntryType, Vec<ProcessStepType>>) -> Self {
        Self { steps }
    }

    /// Table used by the onboarding portal.
    pub fn standard() -> Self {
        Self::new(HashMap::from([
            (
                ChecklistEntryType::RegistrationVerification,
                vec![ProcessStepType::VerifyRegistration, ProcessStepType::DeclineApplication],
            ),
            (
                ChecklistEntryType::BusinessPartnerNumber,
                vec![
                    ProcessStepType::CreateBusinessPartnerNumberPush,
                    ProcessStepType::CreateBusinessPartnerNumberManual,
                ],
            ),
        ]))
    }

    pub fn steps_for(&self, entry_type: ChecklistEntryType) -> &[ProcessStepType] {
        self.steps.get(&entry_type).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Default for StepDependencyTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[async_trait]
pub trait ChecklistCreationUseCase: Send + Sync {
    /// Create the full checklist for a checklist-less subject.
    ///
    /// Returns the created `(type, status)` pairs, or an empty list without
    /// writing if the subject already has a checklist.
    ///
    /// # Errors
    ///
    /// - `ProcessError::NotFound`: subject does not exist
    /// - `ProcessError::Repository`: read or batch insert failed
    async fn create_initial_checklist(
        &self,
        subject_id: SubjectId,
    ) -> Result<Vec<(ChecklistEntryType, ChecklistEntryStatus)>, ProcessError>;

    /// Persist every entry type missing from `existing_entry_types` as `TO_DO`.
    ///
    /// Returns the created entry types; issues no write when nothing is missing.
    async fn create_missing_checklist_items(
        &self,
        subject_id: SubjectId,
        existing_entry_types: &[ChecklistEntryType],
    ) -> Result<Vec<ChecklistEntryType>, ProcessError>;

    /// Step types unlocked by the `TO_DO` entries of `entries`.
    ///
    /// May contain duplicates when several entries map to the same step type.
    fn get_initial_process_step_type_ids(
        &self,
        entries: &[(ChecklistEntryType, ChecklistEntryStatus)],
    ) -> Vec<ProcessStepType>;
}

pub struct StandardChecklistCreationService {
    repository: Arc<dyn ApplicationChecklistRepository>,
    dependencies: StepDependencyTable,
}

impl StandardChecklistCreationService {
    pub fn new(repository: Arc<dyn ApplicationChecklistRepository>, dependencies: StepDependencyTable) -> Self {
        Self { repository, dependencies }
    }

    fn initial_status(entry_type: ChecklistEntryType, data: &ChecklistCreationData) -> ChecklistEntryStatus {
        match entry_type {
            ChecklistEntryType::BusinessPartnerNumber if data.business_partner_number.is_some() => {
                ChecklistEntryStatus::Done
            }
            _ => ChecklistEntryStatus::ToDo,
        }
    }
}

#[async_trait]
impl ChecklistCreationUseCase for StandardChecklistCreationService {
    async fn create_initial_checklist(
        &self,
        subject_id: SubjectId,
    ) -> Result<Vec<(ChecklistEntryType, ChecklistEntryStatus)>, ProcessError> {
        let data = self
            .repository
            .get_checklist_creation_data(subject_id)
            .await?
            .ok_or_else(|| ProcessError::not_found(format!("subject {} does not exist", subject_id)))?;

        if !data.existing_entry_types.is_empty() {
            debug!(subject_id = %subject_id, "Checklist already exists, skipping creation");
            return Ok(Vec::new());
        }

        let entries: Vec<(ChecklistEntryType, ChecklistEntryStatus)> = ChecklistEntryType::ALL
            .into_iter()
            .map(|entry_type| (entry_type, Self::initial_status(entry_type, &data)))
            .collect();

        match self.repository.create_checklist_entries(subject_id, &entries).await {
            Ok(()) => {}
            // A concurrent creator inserted the checklist after our read.
            Err(RepositoryError::InvalidStateTransition(reason)) => {
                debug!(subject_id = %subject_id, reason = %reason, "Checklist created concurrently, skipping creation");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        }

        info!(subject_id = %subject_id, entries = entries.len(), "Created initial checklist");
        Ok(entries)
    }

    async fn create_missing_checklist_items(
        &self,
        subject_id: SubjectId,
        existing_entry_types: &[ChecklistEntryType],
    ) -> Result<Vec<ChecklistEntryType>, ProcessError> {
        let existing: HashSet<ChecklistEntryType> = existing_entry_types.iter().copied().collect();
        let missing: Vec<ChecklistEntryType> = ChecklistEntryType::ALL
            .into_iter()
            .filter(|entry_type| !existing.contains(entry_type))
            .collect();

        if missing.is_empty() {
            return Ok(missing);
        }

        let entries: Vec<(ChecklistEntryType, ChecklistEntryStatus)> =
            missing.iter().map(|entry_type| (*entry_type, ChecklistEntryStatus::ToDo)).collect();
        self.repository.create_checklist_entries(subject_id, &entries).await?;

        info!(subject_id = %subject_id, missing = ?missing, "Created missing checklist items");
        Ok(missing)
    }

    fn get_initial_process_step_type_ids(
        &self,
        entries: &[(ChecklistEntryType, ChecklistEntryStatus)],
    ) -> Vec<ProcessStepType> {
        entries
            .iter()
            .filter(|(_, status)| *status == ChecklistEntryStatus::ToDo)
            .flat_map(|(entry_type, _)| self.dependencies.steps_for(*entry_type).iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::checklist::ChecklistEntry;
    use crate::domain::process::ProcessId;
    use crate::domain::repository::{ApplicationProcessData, VerifyChecklistData};
    use parking_lot::Mutex;

    /// Records every batch insert; returns fixed creation data.
    struct RecordingRepository {
        data: Option<ChecklistCreationData>,
        writes: Mutex<Vec<Vec<(ChecklistEntryType, ChecklistEntryStatus)>>>,
        /// Entries already inserted by another writer after the read.
        raced: bool,
    }

    impl RecordingRepository {
        fn new(data: Option<ChecklistCreationData>) -> Self {
            Self { data, writes: Mutex::new(Vec::new()), raced: false }
        }

        fn raced(data: ChecklistCreationData) -> Self {
            Self { raced: true, ..Self::new(Some(data)) }
        }
    }

    #[async_trait]
    impl ApplicationChecklistRepository for RecordingRepository {
        async fn get_checklist_creation_data(
            &self,
            _subject_id: SubjectId,
        ) -> Result<Option<ChecklistCreationData>, RepositoryError> {
            Ok(self.data.clone())
        }

        async fn create_checklist_entries(
            &self,
            _subject_id: SubjectId,
            entries: &[(ChecklistEntryType, ChecklistEntryStatus)],
        ) -> Result<(), RepositoryError> {
            if self.raced {
                return Err(RepositoryError::InvalidStateTransition("checklist entries already exist".to_string()));
            }
            self.writes.lock().push(entries.to_vec());
            Ok(())
        }

        async fn load_checklist_and_process_steps(
            &self,
            _subject_id: SubjectId,
            _entry_types: &[ChecklistEntryType],
            _step_types: &[ProcessStepType],
        ) -> Result<Option<VerifyChecklistData>, RepositoryError> {
            Ok(None)
        }

        async fn get_checklist(&self, _subject_id: SubjectId) -> Result<Vec<ChecklistEntry>, RepositoryError> {
            Ok(Vec::new())
        }

        async fn get_application_for_process(
            &self,
            _process_id: ProcessId,
        ) -> Result<Option<ApplicationProcessData>, RepositoryError> {
            Ok(None)
        }
    }

    fn service(repository: Arc<RecordingRepository>) -> StandardChecklistCreationService {
        StandardChecklistCreationService::new(repository, StepDependencyTable::standard())
    }

    #[tokio::test]
    async fn test_known_business_partner_number_marks_entry_done() {
        let repository = Arc::new(RecordingRepository::new(Some(ChecklistCreationData {
            business_partner_number: Some("BPNL00000001TEST".to_string()),
            existing_entry_types: Vec::new(),
        })));
        let entries = service(repository.clone()).create_initial_checklist(SubjectId::new()).await.unwrap();

        assert_eq!(entries.len(), ChecklistEntryType::ALL.len());
        for (entry_type, status) in &entries {
            let expected = if *entry_type == ChecklistEntryType::BusinessPartnerNumber {
                ChecklistEntryStatus::Done
            } else {
                ChecklistEntryStatus::ToDo
            };
            assert_eq!(*status, expected, "{}", entry_type);
        }
        assert_eq!(repository.writes.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_existing_checklist_is_not_recreated() {
        let repository = Arc::new(RecordingRepository::new(Some(ChecklistCreationData {
            business_partner_number: None,
            existing_entry_types: vec![ChecklistEntryType::ClearingHouse],
        })));
        let entries = service(repository.clone()).create_initial_checklist(SubjectId::new()).await.unwrap();

        assert!(entries.is_empty());
        assert!(repository.writes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_concurrently_created_checklist_is_a_no_op() {
        let repository = Arc::new(RecordingRepository::raced(ChecklistCreationData::default()));
        let entries = service(repository.clone()).create_initial_checklist(SubjectId::new()).await.unwrap();

        assert!(entries.is_empty());
        assert!(repository.writes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_subject_is_not_found() {
        let repository = Arc::new(RecordingRepository::new(None));
        let result = service(repository.clone()).create_initial_checklist(SubjectId::new()).await;

        assert!(matches!(result, Err(ProcessError::NotFound(_))));
        assert!(repository.writes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_items_written_once_and_never_when_complete() {
        let repository = Arc::new(RecordingRepository::new(None));
        let svc = service(repository.clone());
        let subject = SubjectId::new();

        let created = svc
            .create_missing_checklist_items(
                subject,
                &[ChecklistEntryType::RegistrationVerification, ChecklistEntryType::IdentityWallet],
            )
            .await
            .unwrap();
        assert_eq!(created.len(), 4);
        assert!(!created.contains(&ChecklistEntryType::IdentityWallet));

        let none = svc.create_missing_checklist_items(subject, &ChecklistEntryType::ALL).await.unwrap();
        assert!(none.is_empty());

        let writes = repository.writes.lock();
        assert_eq!(writes.len(), 1);
        assert!(writes[0].iter().all(|(_, s)| *s == ChecklistEntryStatus::ToDo));
    }

    #[test]
    fn test_initial_steps_only_from_todo_entries() {
        let svc = service(Arc::new(RecordingRepository::new(None)));
        let steps = svc.get_initial_process_step_type_ids(&[
            (ChecklistEntryType::RegistrationVerification, ChecklistEntryStatus::ToDo),
            (ChecklistEntryType::BusinessPartnerNumber, ChecklistEntryStatus::Done),
            (ChecklistEntryType::IdentityWallet, ChecklistEntryStatus::ToDo),
        ]);
        assert_eq!(steps, vec![ProcessStepType::VerifyRegistration, ProcessStepType::DeclineApplication]);
    }

    #[test]
    fn test_injected_table_replaces_standard_mapping() {
        let table = StepDependencyTable::new(HashMap::from([(
            ChecklistEntryType::ClearingHouse,
            vec![ProcessStepType::StartClearingHouse],
        )]));
        let svc = StandardChecklistCreationService::new(Arc::new(RecordingRepository::new(None)), table);

        let steps = svc.get_initial_process_step_type_ids(&[
            (ChecklistEntryType::RegistrationVerification, ChecklistEntryStatus::ToDo),
            (ChecklistEntryType::ClearingHouse, ChecklistEntryStatus::ToDo),
        ]);
        assert_eq!(steps, vec![ProcessStepType::StartClearingHouse]);
    }
}
