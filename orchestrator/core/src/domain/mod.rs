// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Pure process, checklist and unit-of-work types plus the repository
//! contracts the application layer depends on.

pub mod process;
pub mod checklist;
pub mod change_set;
pub mod errors;
pub mod events;
pub mod repository;
pub mod worker_config;
