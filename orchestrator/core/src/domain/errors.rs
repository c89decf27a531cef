// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Process Error Taxonomy
//!
//! | Error | Raised by | Handling |
//! |-------|-----------|----------|
//! | [`ProcessError::NotFound`] | orchestration / executors | fatal to the invocation, never retried |
//! | [`ProcessError::Conflict`] | orchestration | surfaced to caller/operator |
//! | [`ProcessError::UnexpectedCondition`] | orchestration / runner | wiring defect, never absorbed |
//! | [`ProcessError::Repository`] | storage | `ConcurrencyConflict` is retryable |
//! | [`ServiceError`] (`recoverable`) | step handlers | step stays `TODO`, checklist untouched |
//! | [`StepError::Service`] / [`StepError::Other`] | step handlers | entry `FAILED`, retrigger scheduled |
//! | [`StepError::Fatal`] | step handlers | propagated out of the executor |
//!
//! Validation failures are never turned into checklist state; only handler
//! failures are, via
//! [`crate::application::process_orchestration::ChecklistProcessService::handle_service_error`].

use thiserror::Error;

use crate::domain::repository::RepositoryError;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unexpected condition: {0}")]
    UnexpectedCondition(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ProcessError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::UnexpectedCondition(message.into())
    }

    /// Stale-version writes are the only retryable failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessError::Repository(RepositoryError::ConcurrencyConflict(_)))
    }
}

/// Failure reported by a business handler talking to an external system.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ServiceError {
    pub message: String,
    /// Transient outage: the step is retried later without operator action.
    pub recoverable: bool,
}

impl ServiceError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self { message: message.into(), recoverable: true }
    }

    pub fn non_recoverable(message: impl Into<String>) -> Self {
        Self { message: message.into(), recoverable: false }
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Unclassified handler failure; treated as non-recoverable.
    #[error(transparent)]
    Other(anyhow::Error),

    /// Engine or storage fault; propagated instead of being recorded.
    #[error(transparent)]
    Fatal(#[from] ProcessError),
}

impl StepError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StepError::Service(ServiceError { recoverable: true, .. }))
    }
}

impl From<anyhow::Error> for StepError {
    fn from(err: anyhow::Error) -> Self {
        StepError::Other(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_concurrency_conflicts_are_retryable() {
        assert!(ProcessError::Repository(RepositoryError::ConcurrencyConflict("p".into())).is_retryable());
        assert!(!ProcessError::Repository(RepositoryError::Database("down".into())).is_retryable());
        assert!(!ProcessError::conflict("locked").is_retryable());
        assert!(!ProcessError::unexpected("bug").is_retryable());
    }

    #[test]
    fn test_recoverable_flag_is_carried_by_service_errors_only() {
        assert!(StepError::from(ServiceError::recoverable("timeout")).is_recoverable());
        assert!(!StepError::from(ServiceError::non_recoverable("rejected")).is_recoverable());
        assert!(!StepError::from(anyhow::anyhow!("boom")).is_recoverable());
        assert_eq!(StepError::from(ServiceError::recoverable("timeout")).to_string(), "timeout");
    }
}
