// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Dry-run step handlers
//!
//! Stand-ins for the identity-provider, wallet, clearing-house and mail
//! integrations. Each handler logs the step it was asked to run and reports
//! success, so a worker can be exercised end to end against a real store
//! without touching external systems.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use portal_process_core::application::application_checklist_executor::{
    ChecklistStepContext, ChecklistStepHandler, ChecklistStepOutcome, APPLICATION_CHECKLIST_STEP_TYPES,
};
use portal_process_core::application::invitation_executor::{InvitationStepHandler, INVITATION_STEP_TYPES};
use portal_process_core::domain::checklist::{ChecklistEntryStatus, SubjectId};
use portal_process_core::domain::errors::StepError;
use portal_process_core::domain::process::ProcessStepType;

pub struct DryRunInvitationHandler {
    step_type: ProcessStepType,
}

#[async_trait]
impl InvitationStepHandler for DryRunInvitationHandler {
    async fn execute(&self, invitation_id: SubjectId, _cancel: &CancellationToken) -> Result<Option<String>, StepError> {
        info!(invitation_id = %invitation_id, step_type = %self.step_type, "Dry run: invitation step");
        Ok(None)
    }
}

pub struct DryRunChecklistHandler;

impl DryRunChecklistHandler {
    /// Steps that hand off to an asynchronous callback leave their entry
    /// IN_PROGRESS and schedule the step the callback completes.
    fn outcome_for(step_type: ProcessStepType) -> ChecklistStepOutcome {
        match step_type {
            ProcessStepType::StartClearingHouse => {
                ChecklistStepOutcome::done(ChecklistEntryStatus::InProgress, vec![ProcessStepType::EndClearingHouse])
            }
            ProcessStepType::StartSelfDescriptionLp => ChecklistStepOutcome::done(
                ChecklistEntryStatus::InProgress,
                vec![ProcessStepType::FinishSelfDescriptionLp],
            ),
            _ => ChecklistStepOutcome::done(ChecklistEntryStatus::Done, Vec::new()),
        }
    }
}

#[async_trait]
impl ChecklistStepHandler for DryRunChecklistHandler {
    async fn execute(
        &self,
        context: &ChecklistStepContext,
        _cancel: &CancellationToken,
    ) -> Result<ChecklistStepOutcome, StepError> {
        info!(
            application_id = %context.application_id,
            step_type = %context.step_type,
            "Dry run: checklist step"
        );
        Ok(Self::outcome_for(context.step_type))
    }
}

pub fn invitation_handlers() -> HashMap<ProcessStepType, Arc<dyn InvitationStepHandler>> {
    INVITATION_STEP_TYPES
        .iter()
        .map(|step_type| {
            (
                *step_type,
                Arc::new(DryRunInvitationHandler { step_type: *step_type }) as Arc<dyn InvitationStepHandler>,
            )
        })
        .collect()
}

pub fn checklist_handlers() -> HashMap<ProcessStepType, Arc<dyn ChecklistStepHandler>> {
    let handler: Arc<dyn ChecklistStepHandler> = Arc::new(DryRunChecklistHandler);
    APPLICATION_CHECKLIST_STEP_TYPES
        .iter()
        .map(|step_type| (*step_type, handler.clone()))
        .collect()
}
