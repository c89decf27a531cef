// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! processctl library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Wires repositories, executors and the step runner from a
//!   worker config, and implements the `processctl` commands

pub mod commands;
pub mod handlers;
pub mod worker;
