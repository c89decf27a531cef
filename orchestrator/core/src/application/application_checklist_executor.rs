// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Application Checklist Process Type Executor
//!
//! Runs the automated steps of the onboarding checklist. Each step is bound to
//! the checklist entry it advances, the entry statuses it may run from, and
//! the neighbouring entries its handler reads. Before a handler runs the step
//! is verified through [`ChecklistProcessService`]; the handler outcome is
//! then finalized through the same service into the runner's change set, so
//! the entry, the step status, successors and the process version commit
//! together.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::checklist_creation::ChecklistCreationUseCase;
use crate::application::process_orchestration::{ChecklistProcessService, VerifiedContext};
use crate::application::process_type_executor::{
    ProcessInitialization, ProcessTypeExecutor, RegistryError, StepExecutionResult, StepHandlerRegistry,
};
use crate::domain::change_set::ProcessChangeSet;
use crate::domain::checklist::{
    ChecklistEntry, ChecklistEntryModification, ChecklistEntryStatus, ChecklistEntryType, SubjectId,
};
use crate::domain::errors::{ProcessError, StepError};
use crate::domain::process::{Process, ProcessId, ProcessStepStatus, ProcessStepType, ProcessType};
use crate::domain::repository::ApplicationChecklistRepository;

pub const APPLICATION_CHECKLIST_STEP_TYPES: [ProcessStepType; 6] = [
    ProcessStepType::CreateBusinessPartnerNumberPush,
    ProcessStepType::CreateBusinessPartnerNumberPull,
    ProcessStepType::CreateIdentityWallet,
    ProcessStepType::StartClearingHouse,
    ProcessStepType::StartSelfDescriptionLp,
    ProcessStepType::ActivateApplication,
];

/// Verification binding of an automated step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecklistStepBinding {
    /// Entry the step advances.
    pub entry_type: ChecklistEntryType,
    /// Statuses the entry must be in for the step to run.
    pub expected_entry_statuses: &'static [ChecklistEntryStatus],
    /// Further entries the handler reads.
    pub sibling_entry_types: &'static [ChecklistEntryType],
}

const fn entry_binding(
    entry_type: ChecklistEntryType,
    expected_entry_statuses: &'static [ChecklistEntryStatus],
    sibling_entry_types: &'static [ChecklistEntryType],
) -> ChecklistStepBinding {
    ChecklistStepBinding {
        entry_type,
        expected_entry_statuses,
        sibling_entry_types,
    }
}

pub fn step_binding(step_type: ProcessStepType) -> Option<ChecklistStepBinding> {
    const TO_DO: &[ChecklistEntryStatus] = &[ChecklistEntryStatus::ToDo];

    let binding = match step_type {
        ProcessStepType::CreateBusinessPartnerNumberPush => entry_binding(
            ChecklistEntryType::BusinessPartnerNumber,
            TO_DO,
            &[ChecklistEntryType::RegistrationVerification],
        ),
        // The pull follows a push that left the entry IN_PROGRESS.
        ProcessStepType::CreateBusinessPartnerNumberPull => entry_binding(
            ChecklistEntryType::BusinessPartnerNumber,
            &[ChecklistEntryStatus::InProgress],
            &[ChecklistEntryType::RegistrationVerification],
        ),
        ProcessStepType::CreateIdentityWallet => entry_binding(
            ChecklistEntryType::IdentityWallet,
            TO_DO,
            &[ChecklistEntryType::RegistrationVerification, ChecklistEntryType::BusinessPartnerNumber],
        ),
        ProcessStepType::StartClearingHouse => entry_binding(
            ChecklistEntryType::ClearingHouse,
            TO_DO,
            &[ChecklistEntryType::IdentityWallet, ChecklistEntryType::BusinessPartnerNumber],
        ),
        ProcessStepType::StartSelfDescriptionLp => {
            entry_binding(ChecklistEntryType::SelfDescriptionLp, TO_DO, &[ChecklistEntryType::ClearingHouse])
        }
        ProcessStepType::ActivateApplication => entry_binding(
            ChecklistEntryType::ApplicationActivation,
            TO_DO,
            &[
                ChecklistEntryType::RegistrationVerification,
                ChecklistEntryType::BusinessPartnerNumber,
                ChecklistEntryType::IdentityWallet,
                ChecklistEntryType::ClearingHouse,
                ChecklistEntryType::SelfDescriptionLp,
            ],
        ),
        _ => return None,
    };
    Some(binding)
}

/// Checklist entry advanced by an automated step.
pub fn entry_type_for_step(step_type: ProcessStepType) -> Option<ChecklistEntryType> {
    step_binding(step_type).map(|binding| binding.entry_type)
}

/// Read-only view handed to a checklist step handler.
#[derive(Debug, Clone)]
pub struct ChecklistStepContext {
    pub application_id: SubjectId,
    pub step_type: ProcessStepType,
    pub checklist: BTreeMap<ChecklistEntryType, (ChecklistEntryStatus, Option<String>)>,
    pub remaining_step_types: Vec<ProcessStepType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistStepOutcome {
    pub step_status: ProcessStepStatus,
    pub modify_entry: Option<ChecklistEntryModification>,
    pub schedule_step_type_ids: Option<Vec<ProcessStepType>>,
    pub skip_step_type_ids: Option<Vec<ProcessStepType>>,
    pub modified: bool,
    pub message: Option<String>,
}

impl ChecklistStepOutcome {
    /// Step done, entry set to `entry_status`, `next` scheduled.
    pub fn done(entry_status: ChecklistEntryStatus, next: Vec<ProcessStepType>) -> Self {
        Self {
            step_status: ProcessStepStatus::Done,
            modify_entry: Some(ChecklistEntryModification::status(entry_status).with_comment(None)),
            schedule_step_type_ids: (!next.is_empty()).then_some(next),
            skip_step_type_ids: None,
            modified: true,
            message: None,
        }
    }
}

#[async_trait]
pub trait ChecklistStepHandler: Send + Sync {
    async fn execute(
        &self,
        context: &ChecklistStepContext,
        cancel: &CancellationToken,
    ) -> Result<ChecklistStepOutcome, StepError>;
}

pub struct ApplicationChecklistProcessTypeExecutor {
    repository: Arc<dyn ApplicationChecklistRepository>,
    checklist_creation: Arc<dyn ChecklistCreationUseCase>,
    orchestration: Arc<ChecklistProcessService>,
    handlers: StepHandlerRegistry<Arc<dyn ChecklistStepHandler>>,
}

impl ApplicationChecklistProcessTypeExecutor {
    pub fn new(
        repository: Arc<dyn ApplicationChecklistRepository>,
        checklist_creation: Arc<dyn ChecklistCreationUseCase>,
        orchestration: Arc<ChecklistProcessService>,
        handlers: HashMap<ProcessStepType, Arc<dyn ChecklistStepHandler>>,
    ) -> Result<Self, RegistryError> {
        Ok(Self {
            repository,
            checklist_creation,
            orchestration,
            handlers: StepHandlerRegistry::new(&APPLICATION_CHECKLIST_STEP_TYPES, handlers)?,
        })
    }

    /// Stage the outcome of the verified step, seeding the entry projection
    /// with the state read during verification.
    fn close_step(
        &self,
        context: &mut VerifiedContext,
        step_status: ProcessStepStatus,
        message: Option<String>,
        modification: Option<&ChecklistEntryModification>,
        next_step_type_ids: Option<&[ProcessStepType]>,
        changes: &mut ProcessChangeSet,
    ) {
        let seed = context.checklist.get(&context.entry_type).cloned();
        let initialize = move |entry: &mut ChecklistEntry| {
            if let Some((status, comment)) = &seed {
                entry.status = *status;
                entry.comment = comment.clone();
            }
        };
        let apply_modification = |entry: &mut ChecklistEntry| {
            if let Some(modification) = modification {
                modification.apply(entry);
            }
        };
        let modify = modification.map(|_| &apply_modification as &dyn Fn(&mut ChecklistEntry));

        if step_status == ProcessStepStatus::Done && message.is_none() {
            self.orchestration.finalize_checklist_entry_and_process_steps(
                context,
                Some(&initialize),
                modify,
                next_step_type_ids,
                changes,
            );
        } else {
            self.orchestration.close_process_step(
                context,
                step_status,
                message,
                Some(&initialize),
                modify,
                next_step_type_ids,
                changes,
            );
        }
    }
}

#[async_trait]
impl ProcessTypeExecutor for ApplicationChecklistProcessTypeExecutor {
    fn process_type(&self) -> ProcessType {
        ProcessType::ApplicationChecklist
    }

    fn executable_step_types(&self) -> &[ProcessStepType] {
        self.handlers.step_types()
    }

    fn is_lock_requested(&self, step_type: ProcessStepType) -> bool {
        step_type == ProcessStepType::ActivateApplication
    }

    async fn initialize_process(
        &self,
        process_id: ProcessId,
        _step_types: &[ProcessStepType],
    ) -> Result<ProcessInitialization, ProcessError> {
        let application = self
            .repository
            .get_application_for_process(process_id)
            .await?
            .ok_or_else(|| ProcessError::not_found(format!("process {} has no application", process_id)))?;

        if !application.is_submitted {
            return Err(ProcessError::conflict(format!(
                "application {} is not in the submitted state",
                application.subject_id
            )));
        }

        let existing: Vec<ChecklistEntryType> = application.checklist.iter().map(|e| e.entry_type).collect();
        let created = self
            .checklist_creation
            .create_missing_checklist_items(application.subject_id, &existing)
            .await?;

        Ok(ProcessInitialization {
            modified: !created.is_empty(),
            schedule_step_type_ids: None,
            subject_id: application.subject_id,
        })
    }

    async fn execute_process_step(
        &self,
        process: &Process,
        subject_id: SubjectId,
        step_type: ProcessStepType,
        remaining_step_types: &[ProcessStepType],
        changes: &mut ProcessChangeSet,
        cancel: &CancellationToken,
    ) -> Result<StepExecutionResult, ProcessError> {
        let (handler, binding, retrigger) = match (
            self.handlers.get(step_type),
            step_binding(step_type),
            step_type.retrigger_step(),
        ) {
            (Some(handler), Some(binding), Some(retrigger)) => (handler, binding, retrigger),
            _ => {
                return Err(ProcessError::unexpected(format!(
                    "{} is not an application checklist step",
                    step_type
                )))
            }
        };

        let mut sibling_step_types = remaining_step_types.to_vec();
        sibling_step_types.push(retrigger);

        let verified = self
            .orchestration
            .verify_as_lease_holder(
                process,
                subject_id,
                binding.entry_type,
                binding.expected_entry_statuses,
                step_type,
                binding.sibling_entry_types,
                &sibling_step_types,
            )
            .await;
        let mut context = match verified {
            Ok(context) => context,
            // The handler never runs and the checklist stays as it is.
            Err(e @ ProcessError::Conflict(_)) => {
                warn!(application_id = %subject_id, step_type = %step_type, error = %e, "Checklist step rejected");
                return Ok(StepExecutionResult {
                    modified: true,
                    step_status: ProcessStepStatus::Failed,
                    schedule_step_type_ids: None,
                    skip_step_type_ids: None,
                    message: Some(e.to_string()),
                    finalized: false,
                });
            }
            Err(e) => return Err(e),
        };

        let step_context = ChecklistStepContext {
            application_id: subject_id,
            step_type,
            checklist: context.checklist.clone(),
            remaining_step_types: remaining_step_types.to_vec(),
        };

        debug!(application_id = %subject_id, step_type = %step_type, "Executing checklist step");

        match handler.execute(&step_context, cancel).await {
            Ok(outcome) => {
                let untouched = !outcome.modified
                    && outcome.step_status == ProcessStepStatus::Todo
                    && outcome.modify_entry.is_none()
                    && outcome.message.is_none();
                if untouched {
                    return Ok(StepExecutionResult {
                        modified: false,
                        step_status: ProcessStepStatus::Todo,
                        schedule_step_type_ids: None,
                        skip_step_type_ids: None,
                        message: None,
                        finalized: false,
                    });
                }

                if let Some(skip) = &outcome.skip_step_type_ids {
                    self.orchestration.skip_process_steps(&mut context, skip, changes);
                }
                self.close_step(
                    &mut context,
                    outcome.step_status,
                    outcome.message.clone(),
                    outcome.modify_entry.as_ref(),
                    outcome.schedule_step_type_ids.as_deref(),
                    changes,
                );
                info!(
                    application_id = %subject_id,
                    step_type = %step_type,
                    status = %outcome.step_status,
                    "Checklist step executed"
                );
                Ok(StepExecutionResult {
                    modified: true,
                    step_status: outcome.step_status,
                    schedule_step_type_ids: outcome.schedule_step_type_ids,
                    skip_step_type_ids: outcome.skip_step_type_ids,
                    message: outcome.message,
                    finalized: true,
                })
            }
            Err(StepError::Fatal(e)) => Err(e),
            Err(e) => {
                let handled = self.orchestration.handle_service_error(&e, retrigger);
                let message = e.to_string();
                self.close_step(
                    &mut context,
                    handled.step_status,
                    Some(message.clone()),
                    handled.modify_entry.as_ref(),
                    handled.schedule_step_type_ids.as_deref(),
                    changes,
                );
                Ok(StepExecutionResult {
                    modified: true,
                    step_status: handled.step_status,
                    schedule_step_type_ids: handled.schedule_step_type_ids,
                    skip_step_type_ids: None,
                    message: Some(message),
                    finalized: true,
                })
            }
        }
    }
}
