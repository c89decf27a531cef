// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Portal Process Core
//!
//! Checklist-driven process orchestration engine: persisted multi-step
//! workflows guarded by a per-subject checklist, optimistic locking on the
//! process record, and per-workflow-kind step executors.
//!
//! # Architecture
//!
//! - **domain:** process/step/checklist model, change set, repository traits
//! - **application:** checklist creation, orchestration, executors, step runner
//! - **infrastructure:** event bus, in-memory and PostgreSQL repositories

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
