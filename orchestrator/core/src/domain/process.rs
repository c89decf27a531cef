// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Process Domain Model
//!
//! A [`Process`] is the persisted, lockable unit of workflow state for one
//! subject and one workflow kind. It owns an ordered set of [`ProcessStep`]s,
//! each of which references its process by id only.
//!
//! # Invariants
//!
//! - `version` is replaced on every successful lock acquisition or release and
//!   is never reused; the storage layer compares it on write.
//! - A process is locked while `lock_expiry_date` lies in the future.
//! - Terminal step statuses (`DONE`, `SKIPPED`, `FAILED`, `DUPLICATE`) never
//!   transition to a different status.
//! - At most one step of a given type is `TODO` per process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Value Objects: Identifiers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(pub Uuid);

impl ProcessId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessStepId(pub Uuid);

impl ProcessStepId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProcessStepId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessStepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returned when a stored enumeration value is not part of the closed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

// ============================================================================
// Enumerations
// ============================================================================

/// Workflow kind; selects the executor that owns a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessType {
    ApplicationChecklist,
    Invitation,
}

impl ProcessType {
    pub const ALL: [ProcessType; 2] = [ProcessType::ApplicationChecklist, ProcessType::Invitation];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessType::ApplicationChecklist => "APPLICATION_CHECKLIST",
            ProcessType::Invitation => "INVITATION",
        }
    }
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| UnknownVariant { kind: "process type", value: s.to_string() })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStepStatus {
    Todo,
    Done,
    Skipped,
    Failed,
    Duplicate,
}

impl ProcessStepStatus {
    pub const ALL: [ProcessStepStatus; 5] = [
        ProcessStepStatus::Todo,
        ProcessStepStatus::Done,
        ProcessStepStatus::Skipped,
        ProcessStepStatus::Failed,
        ProcessStepStatus::Duplicate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStepStatus::Todo => "TODO",
            ProcessStepStatus::Done => "DONE",
            ProcessStepStatus::Skipped => "SKIPPED",
            ProcessStepStatus::Failed => "FAILED",
            ProcessStepStatus::Duplicate => "DUPLICATE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessStepStatus::Todo)
    }

    /// `TODO` may move anywhere; terminal statuses only to themselves.
    pub fn can_transition_to(&self, next: ProcessStepStatus) -> bool {
        !self.is_terminal() || *self == next
    }
}

impl fmt::Display for ProcessStepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessStepStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| UnknownVariant { kind: "process step status", value: s.to_string() })
    }
}

/// Closed set of step types across all workflow kinds.
///
/// Automated steps are executed by a process type executor; `RETRIGGER_*`
/// steps are operator-facing resumption points and are only ever completed
/// through [`crate::application::process_retrigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStepType {
    // Application checklist
    VerifyRegistration,
    DeclineApplication,
    CreateBusinessPartnerNumberPush,
    CreateBusinessPartnerNumberPull,
    CreateBusinessPartnerNumberManual,
    RetriggerBusinessPartnerNumberPush,
    RetriggerBusinessPartnerNumberPull,
    CreateIdentityWallet,
    RetriggerIdentityWallet,
    StartClearingHouse,
    RetriggerClearingHouse,
    EndClearingHouse,
    StartSelfDescriptionLp,
    RetriggerSelfDescriptionLp,
    FinishSelfDescriptionLp,
    ActivateApplication,
    RetriggerActivateApplication,

    // Invitation
    InvitationCreateCentralIdp,
    InvitationCreateSharedIdpServiceAccount,
    InvitationUpdateCentralIdpUrls,
    InvitationCreateCentralIdpOrgMapper,
    InvitationCreateSharedRealmIdpClient,
    InvitationEnableCentralIdp,
    InvitationCreateDatabaseIdp,
    InvitationCreateUser,
    InvitationSendMail,
    RetriggerInvitationCreateCentralIdp,
    RetriggerInvitationCreateSharedIdpServiceAccount,
    RetriggerInvitationUpdateCentralIdpUrls,
    RetriggerInvitationCreateCentralIdpOrgMapper,
    RetriggerInvitationCreateSharedRealmIdpClient,
    RetriggerInvitationEnableCentralIdp,
    RetriggerInvitationCreateDatabaseIdp,
    RetriggerInvitationCreateUser,
    RetriggerInvitationSendMail,
}

/// (automated step, its retrigger step)
const RETRIGGER_PAIRS: [(ProcessStepType, ProcessStepType); 15] = [
    (ProcessStepType::CreateBusinessPartnerNumberPush, ProcessStepType::RetriggerBusinessPartnerNumberPush),
    (ProcessStepType::CreateBusinessPartnerNumberPull, ProcessStepType::RetriggerBusinessPartnerNumberPull),
    (ProcessStepType::CreateIdentityWallet, ProcessStepType::RetriggerIdentityWallet),
    (ProcessStepType::StartClearingHouse, ProcessStepType::RetriggerClearingHouse),
    (ProcessStepType::StartSelfDescriptionLp, ProcessStepType::RetriggerSelfDescriptionLp),
    (ProcessStepType::ActivateApplication, ProcessStepType::RetriggerActivateApplication),
    (ProcessStepType::InvitationCreateCentralIdp, ProcessStepType::RetriggerInvitationCreateCentralIdp),
    (ProcessStepType::InvitationCreateSharedIdpServiceAccount, ProcessStepType::RetriggerInvitationCreateSharedIdpServiceAccount),
    (ProcessStepType::InvitationUpdateCentralIdpUrls, ProcessStepType::RetriggerInvitationUpdateCentralIdpUrls),
    (ProcessStepType::InvitationCreateCentralIdpOrgMapper, ProcessStepType::RetriggerInvitationCreateCentralIdpOrgMapper),
    (ProcessStepType::InvitationCreateSharedRealmIdpClient, ProcessStepType::RetriggerInvitationCreateSharedRealmIdpClient),
    (ProcessStepType::InvitationEnableCentralIdp, ProcessStepType::RetriggerInvitationEnableCentralIdp),
    (ProcessStepType::InvitationCreateDatabaseIdp, ProcessStepType::RetriggerInvitationCreateDatabaseIdp),
    (ProcessStepType::InvitationCreateUser, ProcessStepType::RetriggerInvitationCreateUser),
    (ProcessStepType::InvitationSendMail, ProcessStepType::RetriggerInvitationSendMail),
];

impl ProcessStepType {
    pub const ALL: [ProcessStepType; 35] = [
        ProcessStepType::VerifyRegistration,
        ProcessStepType::DeclineApplication,
        ProcessStepType::CreateBusinessPartnerNumberPush,
        ProcessStepType::CreateBusinessPartnerNumberPull,
        ProcessStepType::CreateBusinessPartnerNumberManual,
        ProcessStepType::RetriggerBusinessPartnerNumberPush,
        ProcessStepType::RetriggerBusinessPartnerNumberPull,
        ProcessStepType::CreateIdentityWallet,
        ProcessStepType::RetriggerIdentityWallet,
        ProcessStepType::StartClearingHouse,
        ProcessStepType::RetriggerClearingHouse,
        ProcessStepType::EndClearingHouse,
        ProcessStepType::StartSelfDescriptionLp,
        ProcessStepType::RetriggerSelfDescriptionLp,
        ProcessStepType::FinishSelfDescriptionLp,
        ProcessStepType::ActivateApplication,
        ProcessStepType::RetriggerActivateApplication,
        ProcessStepType::InvitationCreateCentralIdp,
        ProcessStepType::InvitationCreateSharedIdpServiceAccount,
        ProcessStepType::InvitationUpdateCentralIdpUrls,
        ProcessStepType::InvitationCreateCentralIdpOrgMapper,
        ProcessStepType::InvitationCreateSharedRealmIdpClient,
        ProcessStepType::InvitationEnableCentralIdp,
        ProcessStepType::InvitationCreateDatabaseIdp,
        ProcessStepType::InvitationCreateUser,
        ProcessStepType::InvitationSendMail,
        ProcessStepType::RetriggerInvitationCreateCentralIdp,
        ProcessStepType::RetriggerInvitationCreateSharedIdpServiceAccount,
        ProcessStepType::RetriggerInvitationUpdateCentralIdpUrls,
        ProcessStepType::RetriggerInvitationCreateCentralIdpOrgMapper,
        ProcessStepType::RetriggerInvitationCreateSharedRealmIdpClient,
        ProcessStepType::RetriggerInvitationEnableCentralIdp,
        ProcessStepType::RetriggerInvitationCreateDatabaseIdp,
        ProcessStepType::RetriggerInvitationCreateUser,
        ProcessStepType::RetriggerInvitationSendMail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStepType::VerifyRegistration => "VERIFY_REGISTRATION",
            ProcessStepType::DeclineApplication => "DECLINE_APPLICATION",
            ProcessStepType::CreateBusinessPartnerNumberPush => "CREATE_BUSINESS_PARTNER_NUMBER_PUSH",
            ProcessStepType::CreateBusinessPartnerNumberPull => "CREATE_BUSINESS_PARTNER_NUMBER_PULL",
            ProcessStepType::CreateBusinessPartnerNumberManual => "CREATE_BUSINESS_PARTNER_NUMBER_MANUAL",
            ProcessStepType::RetriggerBusinessPartnerNumberPush => "RETRIGGER_BUSINESS_PARTNER_NUMBER_PUSH",
            ProcessStepType::RetriggerBusinessPartnerNumberPull => "RETRIGGER_BUSINESS_PARTNER_NUMBER_PULL",
            ProcessStepType::CreateIdentityWallet => "CREATE_IDENTITY_WALLET",
            ProcessStepType::RetriggerIdentityWallet => "RETRIGGER_IDENTITY_WALLET",
            ProcessStepType::StartClearingHouse => "START_CLEARING_HOUSE",
            ProcessStepType::RetriggerClearingHouse => "RETRIGGER_CLEARING_HOUSE",
            ProcessStepType::EndClearingHouse => "END_CLEARING_HOUSE",
            ProcessStepType::StartSelfDescriptionLp => "START_SELF_DESCRIPTION_LP",
            ProcessStepType::RetriggerSelfDescriptionLp => "RETRIGGER_SELF_DESCRIPTION_LP",
            ProcessStepType::FinishSelfDescriptionLp => "FINISH_SELF_DESCRIPTION_LP",
            ProcessStepType::ActivateApplication => "ACTIVATE_APPLICATION",
            ProcessStepType::RetriggerActivateApplication => "RETRIGGER_ACTIVATE_APPLICATION",
            ProcessStepType::InvitationCreateCentralIdp => "INVITATION_CREATE_CENTRAL_IDP",
            ProcessStepType::InvitationCreateSharedIdpServiceAccount => "INVITATION_CREATE_SHARED_IDP_SERVICE_ACCOUNT",
            ProcessStepType::InvitationUpdateCentralIdpUrls => "INVITATION_UPDATE_CENTRAL_IDP_URLS",
            ProcessStepType::InvitationCreateCentralIdpOrgMapper => "INVITATION_CREATE_CENTRAL_IDP_ORG_MAPPER",
            ProcessStepType::InvitationCreateSharedRealmIdpClient => "INVITATION_CREATE_SHARED_REALM_IDP_CLIENT",
            ProcessStepType::InvitationEnableCentralIdp => "INVITATION_ENABLE_CENTRAL_IDP",
            ProcessStepType::InvitationCreateDatabaseIdp => "INVITATION_CREATE_DATABASE_IDP",
            ProcessStepType::InvitationCreateUser => "INVITATION_CREATE_USER",
            ProcessStepType::InvitationSendMail => "INVITATION_SEND_MAIL",
            ProcessStepType::RetriggerInvitationCreateCentralIdp => "RETRIGGER_INVITATION_CREATE_CENTRAL_IDP",
            ProcessStepType::RetriggerInvitationCreateSharedIdpServiceAccount => "RETRIGGER_INVITATION_CREATE_SHARED_IDP_SERVICE_ACCOUNT",
            ProcessStepType::RetriggerInvitationUpdateCentralIdpUrls => "RETRIGGER_INVITATION_UPDATE_CENTRAL_IDP_URLS",
            ProcessStepType::RetriggerInvitationCreateCentralIdpOrgMapper => "RETRIGGER_INVITATION_CREATE_CENTRAL_IDP_ORG_MAPPER",
            ProcessStepType::RetriggerInvitationCreateSharedRealmIdpClient => "RETRIGGER_INVITATION_CREATE_SHARED_REALM_IDP_CLIENT",
            ProcessStepType::RetriggerInvitationEnableCentralIdp => "RETRIGGER_INVITATION_ENABLE_CENTRAL_IDP",
            ProcessStepType::RetriggerInvitationCreateDatabaseIdp => "RETRIGGER_INVITATION_CREATE_DATABASE_IDP",
            ProcessStepType::RetriggerInvitationCreateUser => "RETRIGGER_INVITATION_CREATE_USER",
            ProcessStepType::RetriggerInvitationSendMail => "RETRIGGER_INVITATION_SEND_MAIL",
        }
    }

    /// Retrigger step scheduled after a non-recoverable failure of `self`.
    pub fn retrigger_step(&self) -> Option<ProcessStepType> {
        RETRIGGER_PAIRS
            .iter()
            .find(|(step, _)| step == self)
            .map(|(_, retrigger)| *retrigger)
    }

    /// Step that is rescheduled when the retrigger step `self` completes.
    pub fn step_for_retrigger(&self) -> Option<ProcessStepType> {
        RETRIGGER_PAIRS
            .iter()
            .find(|(_, retrigger)| retrigger == self)
            .map(|(step, _)| *step)
    }
}

impl fmt::Display for ProcessStepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessStepType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| UnknownVariant { kind: "process step type", value: s.to_string() })
    }
}

// ============================================================================
// Aggregate Root: Process
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    pub id: ProcessId,
    pub process_type: ProcessType,
    /// Concurrency token compared by the storage layer on every write.
    pub version: Uuid,
    pub lock_expiry_date: Option<DateTime<Utc>>,
}

impl Process {
    pub fn new(process_type: ProcessType) -> Self {
        Self {
            id: ProcessId::new(),
            process_type,
            version: Uuid::new_v4(),
            lock_expiry_date: None,
        }
    }

    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.lock_expiry_date.is_some_and(|expiry| expiry > now)
    }

    pub fn is_locked(&self) -> bool {
        self.is_locked_at(Utc::now())
    }

    pub fn update_version(&mut self) {
        let previous = self.version;
        while self.version == previous {
            self.version = Uuid::new_v4();
        }
    }

    /// Acquire the lock lease. Returns `false` and leaves the process untouched
    /// if a live lease exists.
    pub fn try_lock(&mut self, lock_expiry_date: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if self.is_locked_at(now) {
            return false;
        }
        self.update_version();
        self.lock_expiry_date = Some(lock_expiry_date);
        true
    }

    /// Drop any lease (live or stale). Returns `false` if none was set.
    pub fn release_lock(&mut self) -> bool {
        if self.lock_expiry_date.is_none() {
            return false;
        }
        self.update_version();
        self.lock_expiry_date = None;
        true
    }
}

// ============================================================================
// Entity: ProcessStep
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStep {
    pub id: ProcessStepId,
    pub process_step_type: ProcessStepType,
    pub status: ProcessStepStatus,
    /// Back-reference only; the process owns the step.
    pub process_id: ProcessId,
    pub date_created: DateTime<Utc>,
    pub message: Option<String>,
}

impl ProcessStep {
    pub fn new(process_step_type: ProcessStepType, status: ProcessStepStatus, process_id: ProcessId) -> Self {
        Self {
            id: ProcessStepId::new(),
            process_step_type,
            status,
            process_id,
            date_created: Utc::now(),
            message: None,
        }
    }

    pub fn is_todo(&self) -> bool {
        self.status == ProcessStepStatus::Todo
    }
}

/// Assigns `status` to the first step and `DUPLICATE` to every further step.
///
/// Steps are expected in creation order and to share one step type.
pub fn assign_status_with_duplicates<'a>(
    steps: impl IntoIterator<Item = &'a ProcessStep>,
    status: ProcessStepStatus,
) -> Vec<(ProcessStepId, ProcessStepStatus)> {
    steps
        .into_iter()
        .enumerate()
        .map(|(index, step)| {
            if index == 0 {
                (step.id, status)
            } else {
                (step.id, ProcessStepStatus::Duplicate)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_step_type_round_trips_through_text_form() {
        for step in ProcessStepType::ALL {
            assert_eq!(step.as_str().parse::<ProcessStepType>().unwrap(), step);
            let json = serde_json::to_string(&step).unwrap();
            assert_eq!(json, format!("\"{}\"", step.as_str()));
        }
        assert!("NOT_A_STEP".parse::<ProcessStepType>().is_err());
    }

    #[test]
    fn test_retrigger_mapping_is_symmetric() {
        for (step, retrigger) in RETRIGGER_PAIRS {
            assert_eq!(step.retrigger_step(), Some(retrigger));
            assert_eq!(retrigger.step_for_retrigger(), Some(step));
        }
        assert_eq!(ProcessStepType::VerifyRegistration.retrigger_step(), None);
        assert_eq!(ProcessStepType::InvitationSendMail.step_for_retrigger(), None);
    }

    #[test]
    fn test_terminal_statuses_do_not_transition() {
        assert!(ProcessStepStatus::Todo.can_transition_to(ProcessStepStatus::Done));
        assert!(ProcessStepStatus::Todo.can_transition_to(ProcessStepStatus::Todo));
        for status in ProcessStepStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            assert!(!status.can_transition_to(ProcessStepStatus::Todo));
            assert!(status.can_transition_to(status));
        }
        assert!(!ProcessStepStatus::Done.can_transition_to(ProcessStepStatus::Failed));
    }

    #[test]
    fn test_lock_lifecycle() {
        let now = Utc::now();
        let mut process = Process::new(ProcessType::Invitation);
        let initial_version = process.version;

        assert!(!process.is_locked_at(now));
        assert!(process.try_lock(now + Duration::minutes(5), now));
        assert!(process.is_locked_at(now));
        let locked_version = process.version;
        assert_ne!(locked_version, initial_version);

        // Live lease: untouched
        assert!(!process.try_lock(now + Duration::minutes(10), now));
        assert_eq!(process.version, locked_version);
        assert_eq!(process.lock_expiry_date, Some(now + Duration::minutes(5)));

        // Expired lease can be reclaimed
        let later = now + Duration::minutes(6);
        assert!(!process.is_locked_at(later));
        assert!(process.try_lock(later + Duration::minutes(5), later));
        assert_ne!(process.version, locked_version);

        assert!(process.release_lock());
        assert!(process.lock_expiry_date.is_none());
        assert!(!process.release_lock());
    }

    #[test]
    fn test_assign_status_with_duplicates() {
        let process_id = ProcessId::new();
        let steps: Vec<ProcessStep> = (0..3)
            .map(|_| ProcessStep::new(ProcessStepType::StartClearingHouse, ProcessStepStatus::Todo, process_id))
            .collect();

        let assigned = assign_status_with_duplicates(&steps, ProcessStepStatus::Skipped);
        assert_eq!(assigned.len(), 3);
        assert_eq!(assigned[0], (steps[0].id, ProcessStepStatus::Skipped));
        assert!(assigned[1..].iter().all(|(_, s)| *s == ProcessStepStatus::Duplicate));
        assert!(assign_status_with_duplicates(Vec::<ProcessStep>::new().iter(), ProcessStepStatus::Done).is_empty());
    }
}
