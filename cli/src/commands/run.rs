// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `processctl run` - start the process step runner
//!
//! Polls the store for processes with due steps until Ctrl-C, or performs a
//! single poll with `--once`.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use portal_process_core::domain::events::ProcessEvent;
use portal_process_core::domain::process::ProcessStepStatus;
use portal_process_core::domain::worker_config::ProcessWorkerConfigManifest;
use portal_process_core::infrastructure::event_bus::{EventBus, EventBusError, EventReceiver};

use crate::worker::{build_repositories, build_runner};

#[derive(Args)]
pub struct RunCommand {
    /// Perform a single poll and exit
    #[arg(long)]
    once: bool,
}

pub async fn execute(cmd: RunCommand, config_override: Option<PathBuf>) -> Result<()> {
    let config = ProcessWorkerConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    let repositories = build_repositories(&config).await?;
    let event_bus = Arc::new(EventBus::with_default_capacity());
    let runner = build_runner(&config, &repositories, event_bus.clone())?;

    let cancel = CancellationToken::new();

    if cmd.once {
        let mut events = event_bus.subscribe();
        let report = runner.run_once(&cancel).await?;
        for event in drain(&mut events) {
            print_event(&event);
        }
        println!(
            "{} processes: {}, steps executed: {}, failed: {}, conflicts: {}, errors: {}",
            "✓".green(),
            report.processes,
            report.steps_executed,
            report.steps_failed,
            report.concurrency_conflicts,
            report.errors
        );
        return Ok(());
    }

    let mut events = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(process_id = %event.process_id(), ?event, "Process event"),
                Err(EventBusError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    });

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, stopping process runner");
                shutdown.cancel();
            }
            Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
        }
    });

    info!(worker = %config.metadata.name, "Process worker started");
    runner.run(cancel).await;
    Ok(())
}

/// Events already published, without waiting for more.
fn drain(events: &mut EventReceiver) -> Vec<ProcessEvent> {
    let mut drained = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => drained.push(event),
            Err(EventBusError::Lagged(_)) => continue,
            Err(_) => return drained,
        }
    }
}

fn print_event(event: &ProcessEvent) {
    match event {
        ProcessEvent::ProcessStepExecuted {
            process_id,
            step_type,
            status,
            message,
            ..
        } => {
            let status = match status {
                ProcessStepStatus::Done => status.as_str().green(),
                ProcessStepStatus::Failed => status.as_str().red(),
                _ => status.as_str().yellow(),
            };
            match message {
                Some(message) => println!("  {} {} {} ({})", process_id, step_type, status, message),
                None => println!("  {} {} {}", process_id, step_type, status),
            }
        }
        ProcessEvent::ConcurrencyConflict { process_id, .. } => {
            println!("  {} {}", process_id, "changed concurrently, retried on next poll".yellow())
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use portal_process_core::domain::process::ProcessId;

    #[test]
    fn test_drain_returns_published_events_without_waiting() {
        let event_bus = EventBus::new(8);
        let mut events = event_bus.subscribe();
        for _ in 0..2 {
            event_bus.publish_process_event(ProcessEvent::ProcessReleased {
                process_id: ProcessId::new(),
                released_at: Utc::now(),
            });
        }

        assert_eq!(drain(&mut events).len(), 2);
        assert!(drain(&mut events).is_empty());
    }
}
