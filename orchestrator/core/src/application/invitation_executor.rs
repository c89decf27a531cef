// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Invitation Process Type Executor
//!
//! Drives the partner-invitation workflow over a fixed linear step graph:
//!
//! ```text
//! CREATE_CENTRAL_IDP → CREATE_SHARED_IDP_SERVICE_ACCOUNT → UPDATE_CENTRAL_IDP_URLS
//!   → CREATE_CENTRAL_IDP_ORG_MAPPER → CREATE_SHARED_REALM_IDP_CLIENT → ENABLE_CENTRAL_IDP
//!   → CREATE_DATABASE_IDP → CREATE_USER → SEND_MAIL
//! ```
//!
//! Identity-provider provisioning and mail delivery live behind
//! [`InvitationStepHandler`]; this executor only sequences them and
//! classifies their failures.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::process_orchestration::classify_service_error;
use crate::application::process_type_executor::{
    ProcessInitialization, ProcessTypeExecutor, RegistryError, StepExecutionResult, StepHandlerRegistry,
};
use crate::domain::change_set::ProcessChangeSet;
use crate::domain::checklist::SubjectId;
use crate::domain::errors::{ProcessError, StepError};
use crate::domain::process::{Process, ProcessId, ProcessStepType, ProcessType};
use crate::domain::repository::InvitationRepository;

/// (step, successor)
const INVITATION_STEP_GRAPH: [(ProcessStepType, Option<ProcessStepType>); 9] = [
    (ProcessStepType::InvitationCreateCentralIdp, Some(ProcessStepType::InvitationCreateSharedIdpServiceAccount)),
    (ProcessStepType::InvitationCreateSharedIdpServiceAccount, Some(ProcessStepType::InvitationUpdateCentralIdpUrls)),
    (ProcessStepType::InvitationUpdateCentralIdpUrls, Some(ProcessStepType::InvitationCreateCentralIdpOrgMapper)),
    (ProcessStepType::InvitationCreateCentralIdpOrgMapper, Some(ProcessStepType::InvitationCreateSharedRealmIdpClient)),
    (ProcessStepType::InvitationCreateSharedRealmIdpClient, Some(ProcessStepType::InvitationEnableCentralIdp)),
    (ProcessStepType::InvitationEnableCentralIdp, Some(ProcessStepType::InvitationCreateDatabaseIdp)),
    (ProcessStepType::InvitationCreateDatabaseIdp, Some(ProcessStepType::InvitationCreateUser)),
    (ProcessStepType::InvitationCreateUser, Some(ProcessStepType::InvitationSendMail)),
    (ProcessStepType::InvitationSendMail, None),
];

pub const INVITATION_STEP_TYPES: [ProcessStepType; 9] = [
    ProcessStepType::InvitationCreateCentralIdp,
    ProcessStepType::InvitationCreateSharedIdpServiceAccount,
    ProcessStepType::InvitationUpdateCentralIdpUrls,
    ProcessStepType::InvitationCreateCentralIdpOrgMapper,
    ProcessStepType::InvitationCreateSharedRealmIdpClient,
    ProcessStepType::InvitationEnableCentralIdp,
    ProcessStepType::InvitationCreateDatabaseIdp,
    ProcessStepType::InvitationCreateUser,
    ProcessStepType::InvitationSendMail,
];

fn successor(step_type: ProcessStepType) -> Option<ProcessStepType> {
    INVITATION_STEP_GRAPH
        .iter()
        .find(|(step, _)| *step == step_type)
        .and_then(|(_, next)| *next)
}

/// Business side of one invitation step.
#[async_trait]
pub trait InvitationStepHandler: Send + Sync {
    /// Returns an optional message recorded on the step.
    async fn execute(&self, invitation_id: SubjectId, cancel: &CancellationToken) -> Result<Option<String>, StepError>;
}

pub struct InvitationProcessTypeExecutor {
    repository: Arc<dyn InvitationRepository>,
    handlers: StepHandlerRegistry<Arc<dyn InvitationStepHandler>>,
}

impl InvitationProcessTypeExecutor {
    pub fn new(
        repository: Arc<dyn InvitationRepository>,
        handlers: HashMap<ProcessStepType, Arc<dyn InvitationStepHandler>>,
    ) -> Result<Self, RegistryError> {
        Ok(Self {
            repository,
            handlers: StepHandlerRegistry::new(&INVITATION_STEP_TYPES, handlers)?,
        })
    }
}

#[async_trait]
impl ProcessTypeExecutor for InvitationProcessTypeExecutor {
    fn process_type(&self) -> ProcessType {
        ProcessType::Invitation
    }

    fn executable_step_types(&self) -> &[ProcessStepType] {
        self.handlers.step_types()
    }

    fn is_lock_requested(&self, step_type: ProcessStepType) -> bool {
        step_type != ProcessStepType::InvitationSendMail
    }

    async fn initialize_process(
        &self,
        process_id: ProcessId,
        _step_types: &[ProcessStepType],
    ) -> Result<ProcessInitialization, ProcessError> {
        let invitation_id = self
            .repository
            .get_invitation_for_process(process_id)
            .await?
            .ok_or_else(|| ProcessError::not_found(format!("process {} has no invitation", process_id)))?;

        Ok(ProcessInitialization {
            modified: false,
            schedule_step_type_ids: None,
            subject_id: invitation_id,
        })
    }

    async fn execute_process_step(
        &self,
        _process: &Process,
        subject_id: SubjectId,
        step_type: ProcessStepType,
        _remaining_step_types: &[ProcessStepType],
        _changes: &mut ProcessChangeSet,
        cancel: &CancellationToken,
    ) -> Result<StepExecutionResult, ProcessError> {
        let handler = self
            .handlers
            .get(step_type)
            .ok_or_else(|| ProcessError::unexpected(format!("{} is not an invitation step", step_type)))?;

        debug!(invitation_id = %subject_id, step_type = %step_type, "Executing invitation step");

        match handler.execute(subject_id, cancel).await {
            Ok(message) => {
                info!(invitation_id = %subject_id, step_type = %step_type, "Invitation step completed");
                Ok(StepExecutionResult::done(successor(step_type), message))
            }
            Err(StepError::Fatal(e)) => Err(e),
            Err(e) => {
                let retrigger = step_type
                    .retrigger_step()
                    .ok_or_else(|| ProcessError::unexpected(format!("{} has no retrigger step", step_type)))?;
                let handled = classify_service_error(&e, retrigger);
                Ok(StepExecutionResult {
                    modified: true,
                    step_status: handled.step_status,
                    schedule_step_type_ids: handled.schedule_step_type_ids,
                    skip_step_type_ids: None,
                    message: Some(e.to_string()),
                    finalized: false,
                })
            }
        }
    }
}
