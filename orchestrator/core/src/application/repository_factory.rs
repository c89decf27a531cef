// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates concrete repository implementations based on storage backend
//! configuration, keeping the domain layer free of infrastructure types.
//!
//! One backend instance serves all three repository traits so a change set
//! committed through `ProcessRepository` is visible to the checklist and
//! invitation reads.

use sqlx::PgPool;
use std::sync::Arc;

use crate::domain::repository::{
    ApplicationChecklistRepository, InvitationRepository, ProcessRepository, StorageBackend,
};
use crate::infrastructure::repositories::postgres_process::PostgresProcessRepository;
use crate::infrastructure::repositories::InMemoryProcessRepository;

/// The repository trait objects shared by services, executors and the runner.
#[derive(Clone)]
pub struct ProcessRepositories {
    pub processes: Arc<dyn ProcessRepository>,
    pub checklists: Arc<dyn ApplicationChecklistRepository>,
    pub invitations: Arc<dyn InvitationRepository>,
}

impl ProcessRepositories {
    pub fn from_in_memory(repository: Arc<InMemoryProcessRepository>) -> Self {
        Self {
            processes: repository.clone(),
            checklists: repository.clone(),
            invitations: repository,
        }
    }

    pub fn from_postgres(repository: Arc<PostgresProcessRepository>) -> Self {
        Self {
            processes: repository.clone(),
            checklists: repository.clone(),
            invitations: repository,
        }
    }
}

/// Creates the repositories for the configured backend.
///
/// `pool` is only used by the PostgreSQL backend.
pub fn create_process_repositories(backend: &StorageBackend, pool: Option<PgPool>) -> anyhow::Result<ProcessRepositories> {
    match backend {
        StorageBackend::InMemory => Ok(ProcessRepositories::from_in_memory(Arc::new(InMemoryProcessRepository::new()))),
        StorageBackend::PostgreSQL(_) => {
            let pool = pool.ok_or_else(|| anyhow::anyhow!("PostgreSQL backend selected but no connection pool was provided"))?;
            Ok(ProcessRepositories::from_postgres(Arc::new(PostgresProcessRepository::new(pool))))
        }
    }
}
