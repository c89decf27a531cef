// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Checklist Domain Model
//!
//! A checklist tracks one (type, status, comment) record per onboarding concern
//! of a subject. The composite identity is `(SubjectId, ChecklistEntryType)`;
//! a complete checklist holds exactly one entry per [`ChecklistEntryType`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::process::UnknownVariant;

/// Opaque id of the workflow subject (an onboarding application, an invitation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectId(pub Uuid);

impl SubjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for SubjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChecklistEntryType {
    RegistrationVerification,
    BusinessPartnerNumber,
    IdentityWallet,
    ClearingHouse,
    SelfDescriptionLp,
    ApplicationActivation,
}

impl ChecklistEntryType {
    /// The closed set of checklist categories.
    pub const ALL: [ChecklistEntryType; 6] = [
        ChecklistEntryType::RegistrationVerification,
        ChecklistEntryType::BusinessPartnerNumber,
        ChecklistEntryType::IdentityWallet,
        ChecklistEntryType::ClearingHouse,
        ChecklistEntryType::SelfDescriptionLp,
        ChecklistEntryType::ApplicationActivation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChecklistEntryType::RegistrationVerification => "REGISTRATION_VERIFICATION",
            ChecklistEntryType::BusinessPartnerNumber => "BUSINESS_PARTNER_NUMBER",
            ChecklistEntryType::IdentityWallet => "IDENTITY_WALLET",
            ChecklistEntryType::ClearingHouse => "CLEARING_HOUSE",
            ChecklistEntryType::SelfDescriptionLp => "SELF_DESCRIPTION_LP",
            ChecklistEntryType::ApplicationActivation => "APPLICATION_ACTIVATION",
        }
    }
}

impl fmt::Display for ChecklistEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecklistEntryType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| UnknownVariant { kind: "checklist entry type", value: s.to_string() })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChecklistEntryStatus {
    ToDo,
    InProgress,
    Done,
    Failed,
    Skipped,
}

impl ChecklistEntryStatus {
    pub const ALL: [ChecklistEntryStatus; 5] = [
        ChecklistEntryStatus::ToDo,
        ChecklistEntryStatus::InProgress,
        ChecklistEntryStatus::Done,
        ChecklistEntryStatus::Failed,
        ChecklistEntryStatus::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChecklistEntryStatus::ToDo => "TO_DO",
            ChecklistEntryStatus::InProgress => "IN_PROGRESS",
            ChecklistEntryStatus::Done => "DONE",
            ChecklistEntryStatus::Failed => "FAILED",
            ChecklistEntryStatus::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for ChecklistEntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecklistEntryStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| UnknownVariant { kind: "checklist entry status", value: s.to_string() })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistEntry {
    pub subject_id: SubjectId,
    pub entry_type: ChecklistEntryType,
    pub status: ChecklistEntryStatus,
    /// Last error recorded against this entry, if any.
    pub comment: Option<String>,
    pub last_modified: DateTime<Utc>,
}

impl ChecklistEntry {
    pub fn new(subject_id: SubjectId, entry_type: ChecklistEntryType, status: ChecklistEntryStatus) -> Self {
        Self {
            subject_id,
            entry_type,
            status,
            comment: None,
            last_modified: Utc::now(),
        }
    }
}

/// Data-only checklist mutation, applied inside an atomic commit.
///
/// `comment: Some(None)` clears the comment; `None` leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecklistEntryModification {
    pub status: Option<ChecklistEntryStatus>,
    pub comment: Option<Option<String>>,
}

impl ChecklistEntryModification {
    pub fn status(status: ChecklistEntryStatus) -> Self {
        Self { status: Some(status), comment: None }
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = Some(comment);
        self
    }

    pub fn apply(&self, entry: &mut ChecklistEntry) {
        if let Some(status) = self.status {
            entry.status = status;
        }
        if let Some(comment) = &self.comment {
            entry.comment = comment.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_types_are_distinct_and_parse() {
        let mut seen = std::collections::HashSet::new();
        for entry_type in ChecklistEntryType::ALL {
            assert!(seen.insert(entry_type));
            assert_eq!(entry_type.as_str().parse::<ChecklistEntryType>().unwrap(), entry_type);
        }
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn test_status_serializes_upper_snake() {
        assert_eq!(serde_json::to_string(&ChecklistEntryStatus::ToDo).unwrap(), "\"TO_DO\"");
        assert_eq!("IN_PROGRESS".parse::<ChecklistEntryStatus>().unwrap(), ChecklistEntryStatus::InProgress);
        assert!("todo".parse::<ChecklistEntryStatus>().is_err());
    }

    #[test]
    fn test_modification_applies_only_set_fields() {
        let mut entry = ChecklistEntry::new(
            SubjectId::new(),
            ChecklistEntryType::ClearingHouse,
            ChecklistEntryStatus::ToDo,
        );
        entry.comment = Some("previous".to_string());

        ChecklistEntryModification::status(ChecklistEntryStatus::InProgress).apply(&mut entry);
        assert_eq!(entry.status, ChecklistEntryStatus::InProgress);
        assert_eq!(entry.comment.as_deref(), Some("previous"));

        ChecklistEntryModification::status(ChecklistEntryStatus::Done)
            .with_comment(None)
            .apply(&mut entry);
        assert_eq!(entry.status, ChecklistEntryStatus::Done);
        assert!(entry.comment.is_none());
    }
}
