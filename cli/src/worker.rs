// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Worker composition root: config → repositories → executors → runner.

use anyhow::{Context, Result};
use std::sync::Arc;

use portal_process_core::application::application_checklist_executor::ApplicationChecklistProcessTypeExecutor;
use portal_process_core::application::checklist_creation::{StandardChecklistCreationService, StepDependencyTable};
use portal_process_core::application::invitation_executor::InvitationProcessTypeExecutor;
use portal_process_core::application::process_executor::{ProcessExecutor, ProcessRunner};
use portal_process_core::application::process_orchestration::ChecklistProcessService;
use portal_process_core::application::process_type_executor::ProcessTypeExecutor;
use portal_process_core::application::repository_factory::{create_process_repositories, ProcessRepositories};
use portal_process_core::domain::repository::StorageBackend;
use portal_process_core::domain::worker_config::ProcessWorkerConfigManifest;
use portal_process_core::infrastructure::db::Database;
use portal_process_core::infrastructure::event_bus::EventBus;

use crate::handlers;

/// Connect to the configured store.
pub async fn build_repositories(config: &ProcessWorkerConfigManifest) -> Result<ProcessRepositories> {
    let backend = config.storage_backend()?;
    let pool = match &backend {
        StorageBackend::PostgreSQL(postgres) => {
            let database = Database::connect(postgres)
                .await
                .context("Failed to connect to database")?;
            Some(database.get_pool().clone())
        }
        StorageBackend::InMemory => None,
    };
    create_process_repositories(&backend, pool)
}

pub fn build_executors(repositories: &ProcessRepositories) -> Result<Vec<Arc<dyn ProcessTypeExecutor>>> {
    let checklist_creation = Arc::new(StandardChecklistCreationService::new(
        repositories.checklists.clone(),
        StepDependencyTable::standard(),
    ));

    let invitation = InvitationProcessTypeExecutor::new(repositories.invitations.clone(), handlers::invitation_handlers())
        .context("Invalid invitation handler registry")?;
    let orchestration = Arc::new(ChecklistProcessService::new(
        repositories.processes.clone(),
        repositories.checklists.clone(),
    ));
    let checklist = ApplicationChecklistProcessTypeExecutor::new(
        repositories.checklists.clone(),
        checklist_creation,
        orchestration,
        handlers::checklist_handlers(),
    )
    .context("Invalid application checklist handler registry")?;

    Ok(vec![Arc::new(invitation), Arc::new(checklist)])
}

pub fn build_runner(
    config: &ProcessWorkerConfigManifest,
    repositories: &ProcessRepositories,
    event_bus: Arc<EventBus>,
) -> Result<ProcessRunner> {
    let worker = &config.spec.worker;
    let executor = Arc::new(ProcessExecutor::new(
        repositories.processes.clone(),
        build_executors(repositories)?,
        event_bus.clone(),
        worker.lock_expiry(),
    ));
    Ok(ProcessRunner::new(executor, repositories.processes.clone(), event_bus, worker))
}
