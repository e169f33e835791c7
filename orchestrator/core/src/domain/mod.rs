// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Aggregates, value objects, pure decision functions and the ports
//! (repositories, stage executors, metrics adapters, settings) the
//! application layer drives.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Everything that can be decided without I/O

pub mod cost;
pub mod cycle;
pub mod cycle_graph;
pub mod events;
pub mod learning;
pub mod measurement;
pub mod plan;
pub mod platform;
pub mod quality;
pub mod repository;
pub mod revision;
pub mod settings;
pub mod stage;
pub mod thought_log;
