// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `processctl checklist` - inspect a subject's checklist

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use portal_process_core::domain::checklist::{ChecklistEntryStatus, SubjectId};
use portal_process_core::domain::worker_config::{DatabaseBackend, ProcessWorkerConfigManifest};

use crate::worker::build_repositories;

#[derive(Subcommand)]
pub enum ChecklistCommand {
    /// Show the checklist of a subject
    Show {
        #[arg(value_name = "SUBJECT_ID")]
        subject_id: String,
    },
}

pub async fn handle_command(command: ChecklistCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ChecklistCommand::Show { subject_id } => show(&subject_id, config_override).await,
    }
}

fn colored_status(status: ChecklistEntryStatus) -> colored::ColoredString {
    match status {
        ChecklistEntryStatus::Done => status.as_str().green(),
        ChecklistEntryStatus::Failed => status.as_str().red(),
        ChecklistEntryStatus::InProgress => status.as_str().yellow(),
        ChecklistEntryStatus::ToDo | ChecklistEntryStatus::Skipped => status.as_str().dimmed(),
    }
}

async fn show(subject_id: &str, config_override: Option<PathBuf>) -> Result<()> {
    let subject_id =
        SubjectId::from_string(subject_id).with_context(|| format!("Invalid subject id '{}'", subject_id))?;

    let config = ProcessWorkerConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;
    if config.spec.database.backend == DatabaseBackend::InMemory {
        eprintln!(
            "{}",
            "Warning: in-memory backend configured, the store starts empty.".yellow()
        );
    }

    let repositories = build_repositories(&config).await?;
    let entries = repositories.checklists.get_checklist(subject_id).await?;

    if entries.is_empty() {
        println!("No checklist entries for subject {}", subject_id);
        return Ok(());
    }

    println!("{}", format!("Checklist of {}", subject_id).bold());
    for entry in entries {
        println!("  {:<28} {}", entry.entry_type.as_str(), colored_status(entry.status));
        if let Some(comment) = &entry.comment {
            println!("    {}", comment.dimmed());
        }
    }
    Ok(())
}
