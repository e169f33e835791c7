// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Reelforge Core
//!
//! Adaptive cycle orchestrator for short-form content: drives each content
//! cycle through its fixed stage graph, keeps learnings calibrated by
//! outcome, governs reasoning and production spend, and polls platforms for
//! post-publication metrics.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, application services and infrastructure
//!   adapters behind the `reelforge` binary

pub mod domain;
pub mod application;
pub mod infrastructure;
