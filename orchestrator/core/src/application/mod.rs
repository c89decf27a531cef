// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod checklist_creation;
pub mod process_orchestration;
pub mod process_type_executor;
pub mod invitation_executor;
pub mod application_checklist_executor;
pub mod process_executor;
pub mod process_retrigger;
pub mod repository_factory;

// Re-export services for convenience
pub use checklist_creation::{ChecklistCreationUseCase, StandardChecklistCreationService, StepDependencyTable};
pub use process_orchestration::{ChecklistProcessService, ErrorHandlingResult, VerifiedContext};
pub use process_type_executor::{ProcessInitialization, ProcessTypeExecutor, RegistryError, StepExecutionResult, StepHandlerRegistry};
pub use process_executor::{ProcessExecutor, ProcessRunner, ProcessRunSummary, RunReport};
pub use process_retrigger::ProcessStepRetriggerService;
