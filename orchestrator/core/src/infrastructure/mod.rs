// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod config;
pub mod db;
pub mod event_bus;
pub mod http_metrics_adapter;
pub mod http_stage_executor;
pub mod human_approval;
pub mod repositories;
pub mod retry;
pub mod settings;

pub use event_bus::EventBus;
pub use human_approval::{HumanApprovalGate, HumanDecision};
