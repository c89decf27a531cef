// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `processctl retrigger` - resume a step stopped by a non-recoverable failure

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use portal_process_core::application::process_retrigger::ProcessStepRetriggerService;
use portal_process_core::domain::process::{ProcessId, ProcessStepType};
use portal_process_core::domain::worker_config::ProcessWorkerConfigManifest;
use portal_process_core::infrastructure::event_bus::EventBus;

use crate::worker::build_repositories;

#[derive(Args)]
pub struct RetriggerCommand {
    /// Process id
    #[arg(value_name = "PROCESS_ID")]
    process_id: String,

    /// Pending retrigger step, e.g. RETRIGGER_CLEARING_HOUSE
    #[arg(value_name = "STEP_TYPE")]
    step_type: String,
}

pub async fn execute(cmd: RetriggerCommand, config_override: Option<PathBuf>) -> Result<()> {
    let process_id = ProcessId::from_string(&cmd.process_id)
        .with_context(|| format!("Invalid process id '{}'", cmd.process_id))?;
    let step_type: ProcessStepType = cmd.step_type.parse()?;

    let config = ProcessWorkerConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;
    let repositories = build_repositories(&config).await?;
    let service = ProcessStepRetriggerService::new(
        repositories.processes,
        repositories.checklists,
        Arc::new(EventBus::new(16)),
    );

    let scheduled = service.retrigger_step(process_id, step_type).await?;
    println!(
        "{}",
        format!("✓ {} completed, {} scheduled", step_type, scheduled).green()
    );
    Ok(())
}
