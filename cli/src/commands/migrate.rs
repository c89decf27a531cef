// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Database Migrate Command
//!
//! Implements `processctl migrate`, which applies the process schema
//! migrations to the PostgreSQL store named by the worker config.
//!
//! # Usage
//!
//! ```bash
//! # Apply all pending migrations
//! processctl migrate
//!
//! # Preview migrations without applying
//! processctl migrate --dry-run
//! ```

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;

use portal_process_core::domain::worker_config::ProcessWorkerConfigManifest;

#[derive(Args)]
pub struct MigrateCommand {
    /// Perform a dry run without applying changes
    #[arg(long)]
    dry_run: bool,
}

pub async fn execute(cmd: MigrateCommand, config_override: Option<PathBuf>) -> Result<()> {
    println!("{}", "Process store migration".bold().green());

    let config = ProcessWorkerConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;
    let database_url = config
        .database_url()?
        .context("No database URL configured. Set spec.database.url or PORTAL_PROCESS_DATABASE_URL.")?;

    println!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await
        .context("Failed to connect to database")?;

    static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../orchestrator/core/migrations");

    let applied_count = sqlx::query("SELECT version FROM _sqlx_migrations")
        .fetch_all(&pool)
        .await
        .map(|rows| rows.len())
        .unwrap_or(0);
    let total_migrations = MIGRATOR.iter().count();

    println!("Migration status: {} applied, {} total available.", applied_count, total_migrations);

    if applied_count >= total_migrations {
        println!("{}", "✓ Database is up to date.".green());
        return Ok(());
    }

    if cmd.dry_run {
        println!("Pending migrations found (Dry Run):");
        for migration in MIGRATOR.iter().skip(applied_count) {
            println!(" - {} {}", migration.version, migration.description);
        }
        println!("Skipping application due to --dry-run");
        return Ok(());
    }

    println!("Applying pending migrations...");
    MIGRATOR.run(&pool).await.context("Failed to apply migrations")?;
    println!("{}", "✓ Database updated successfully.".green());

    Ok(())
}
