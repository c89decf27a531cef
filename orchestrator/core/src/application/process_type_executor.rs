// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Process Type Executor contract
//!
//! One executor per [`ProcessType`] owns a closed set of step types and maps
//! each of them to exactly one business handler. The step runner routes TODO
//! steps to the executor that declares them and asks it whether the process
//! lock has to be taken first.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::domain::change_set::ProcessChangeSet;
use crate::domain::checklist::SubjectId;
use crate::domain::errors::ProcessError;
use crate::domain::process::{Process, ProcessId, ProcessStepStatus, ProcessStepType, ProcessType};

/// Result of binding an executor to a process before its steps run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInitialization {
    pub modified: bool,
    pub schedule_step_type_ids: Option<Vec<ProcessStepType>>,
    /// Subject the process works on (application, invitation, ...).
    pub subject_id: SubjectId,
}

/// Outcome of one step execution.
///
/// Unless `finalized` is set the runner stages the status, message, skips
/// and successors itself. A finalized result was already staged into the
/// change set together with the process version write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepExecutionResult {
    pub modified: bool,
    pub step_status: ProcessStepStatus,
    pub schedule_step_type_ids: Option<Vec<ProcessStepType>>,
    pub skip_step_type_ids: Option<Vec<ProcessStepType>>,
    pub message: Option<String>,
    pub finalized: bool,
}

impl StepExecutionResult {
    pub fn done(next: Option<ProcessStepType>, message: Option<String>) -> Self {
        Self {
            modified: true,
            step_status: ProcessStepStatus::Done,
            schedule_step_type_ids: next.map(|step| vec![step]),
            skip_step_type_ids: None,
            message,
            finalized: false,
        }
    }
}

#[async_trait]
pub trait ProcessTypeExecutor: Send + Sync {
    fn process_type(&self) -> ProcessType;

    fn executable_step_types(&self) -> &[ProcessStepType];

    fn is_executable_step_type(&self, step_type: ProcessStepType) -> bool {
        self.executable_step_types().contains(&step_type)
    }

    /// Whether the exclusive process lock must be held before `step_type` runs.
    fn is_lock_requested(&self, step_type: ProcessStepType) -> bool;

    /// Resolve the subject bound to `process_id`.
    ///
    /// # Errors
    ///
    /// - `ProcessError::NotFound`: no subject is bound to the process
    async fn initialize_process(
        &self,
        process_id: ProcessId,
        step_types: &[ProcessStepType],
    ) -> Result<ProcessInitialization, ProcessError>;

    /// Run the handler of `step_type` for `process`, as held by the runner.
    ///
    /// Handler failures are classified into the returned status; checklist
    /// writes are staged into `changes` and committed by the caller together
    /// with the step status. Only engine faults are returned as errors.
    async fn execute_process_step(
        &self,
        process: &Process,
        subject_id: SubjectId,
        step_type: ProcessStepType,
        remaining_step_types: &[ProcessStepType],
        changes: &mut ProcessChangeSet,
        cancel: &CancellationToken,
    ) -> Result<StepExecutionResult, ProcessError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no handler registered for executable step type {0}")]
    MissingHandler(ProcessStepType),

    #[error("handler registered for undeclared step type {0}")]
    UnexpectedHandler(ProcessStepType),
}

/// Step type → handler map that covers exactly a declared step set.
pub struct StepHandlerRegistry<H> {
    step_types: Vec<ProcessStepType>,
    handlers: HashMap<ProcessStepType, H>,
}

impl<H> StepHandlerRegistry<H> {
    pub fn new(declared: &[ProcessStepType], handlers: HashMap<ProcessStepType, H>) -> Result<Self, RegistryError> {
        if let Some(missing) = declared.iter().find(|step| !handlers.contains_key(step)) {
            return Err(RegistryError::MissingHandler(*missing));
        }

        let mut unexpected: Vec<ProcessStepType> =
            handlers.keys().filter(|step| !declared.contains(step)).copied().collect();
        unexpected.sort();
        if let Some(step) = unexpected.first() {
            return Err(RegistryError::UnexpectedHandler(*step));
        }

        Ok(Self { step_types: declared.to_vec(), handlers })
    }

    pub fn step_types(&self) -> &[ProcessStepType] {
        &self.step_types
    }

    pub fn get(&self, step_type: ProcessStepType) -> Option<&H> {
        self.handlers.get(&step_type)
    }

    pub fn contains(&self, step_type: ProcessStepType) -> bool {
        self.handlers.contains_key(&step_type)
    }
}
