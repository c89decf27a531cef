// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::process::{ProcessId, ProcessStepStatus, ProcessStepType, ProcessType};

/// Events published after a change set has been committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProcessEvent {
    ProcessLocked {
        process_id: ProcessId,
        process_type: ProcessType,
        lock_expiry_date: DateTime<Utc>,
        locked_at: DateTime<Utc>,
    },
    ProcessStepExecuted {
        process_id: ProcessId,
        step_type: ProcessStepType,
        status: ProcessStepStatus,
        scheduled: Vec<ProcessStepType>,
        skipped: Vec<ProcessStepType>,
        message: Option<String>,
        executed_at: DateTime<Utc>,
    },
    ProcessStepRetriggered {
        process_id: ProcessId,
        retrigger_step_type: ProcessStepType,
        scheduled: ProcessStepType,
        retriggered_at: DateTime<Utc>,
    },
    ProcessReleased {
        process_id: ProcessId,
        released_at: DateTime<Utc>,
    },
    ConcurrencyConflict {
        process_id: ProcessId,
        detected_at: DateTime<Utc>,
    },
}

impl ProcessEvent {
    pub fn process_id(&self) -> ProcessId {
        match self {
            ProcessEvent::ProcessLocked { process_id, .. }
            | ProcessEvent::ProcessStepExecuted { process_id, .. }
            | ProcessEvent::ProcessStepRetriggered { process_id, .. }
            | ProcessEvent::ProcessReleased { process_id, .. }
            | ProcessEvent::ConcurrencyConflict { process_id, .. } => *process_id,
        }
    }
}
