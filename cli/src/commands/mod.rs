// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for processctl

pub mod checklist;
pub mod config;
pub mod migrate;
pub mod retrigger;
pub mod run;

pub use self::checklist::ChecklistCommand;
pub use self::config::ConfigCommand;
pub use self::migrate::MigrateCommand;
pub use self::retrigger::RetriggerCommand;
pub use self::run::RunCommand;
