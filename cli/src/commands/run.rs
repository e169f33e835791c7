// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `reelforge run` - the orchestrator daemon
//!
//! Starts the cycle scheduler and one measurement worker per enabled
//! platform, installs the Prometheus exporter and logs operator alerts until
//! SIGINT/SIGTERM. Only one daemon per database may drive cycles; this is
//! enforced with a PostgreSQL advisory lock.

use anyhow::{bail, Context, Result};
use clap::Args;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use reelforge_core::application::CycleScheduler;
use reelforge_core::infrastructure::db::CYCLE_ENGINE_LOCK_KEY;
use reelforge_core::infrastructure::event_bus::EventBusError;
use reelforge_core::infrastructure::EventBus;

use crate::bootstrap::Services;

/// Grace period for in-flight work after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Args)]
pub struct RunArgs {
    /// Apply pending migrations before starting
    #[arg(long)]
    migrate: bool,

    /// Keep all state in memory (development only)
    #[arg(long)]
    in_memory: bool,

    /// Do not start the cycle scheduler (measurement only)
    #[arg(long)]
    no_cycles: bool,
}

pub async fn execute(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config_path)?;
    info!(name = %config.metadata.name, "Reelforge daemon starting");

    if let Some(addr) = config.metrics_listen_addr()? {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(%addr, "Prometheus exporter listening");
    }

    let services = if args.in_memory {
        warn!("Running with in-memory storage; state is lost on exit");
        Services::in_memory()
    } else {
        Services::connect(&config).await?
    };

    if args.migrate {
        if let Some(db) = &services.db {
            db.migrate().await.context("Failed to apply migrations")?;
        }
    }

    let lease = match &services.db {
        Some(db) if !args.no_cycles => match db.try_acquire_lease(CYCLE_ENGINE_LOCK_KEY).await? {
            Some(lease) => Some(lease),
            None => bail!("Another reelforge daemon is already driving cycles on this database"),
        },
        _ => None,
    };

    let alert_task = tokio::spawn(log_alerts(services.event_bus.clone()));

    let measurement = Arc::new(services.measurement_job(&config)?);
    let measurement_token = measurement.shutdown_token();
    let mut handles = measurement.clone().start();
    info!(workers = handles.len(), "Measurement workers started");

    let scheduler_token = if args.no_cycles {
        None
    } else {
        let engine = Arc::new(services.cycle_engine(&config)?);
        let scheduler = Arc::new(CycleScheduler::new(engine, config.spec.cycle.interval));
        let token = scheduler.shutdown_token();
        handles.push(scheduler.start());
        Some(token)
    };

    shutdown_signal().await;
    info!("Shutting down");

    measurement_token.cancel();
    if let Some(token) = scheduler_token {
        token.cancel();
    }

    if tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(handles))
        .await
        .is_err()
    {
        warn!(grace_secs = SHUTDOWN_GRACE.as_secs(), "Workers did not stop in time");
    }
    alert_task.abort();

    if let Some(lease) = lease {
        if let Err(e) = lease.release().await {
            error!(error = %e, "Failed to release cycle engine lease");
        }
    }

    info!("Reelforge daemon stopped");
    Ok(())
}

async fn log_alerts(event_bus: EventBus) {
    let mut alerts = event_bus.subscribe_alerts();
    loop {
        match alerts.recv().await {
            Ok(alert) => warn!(
                kind = alert.kind(),
                alert = %serde_json::to_string(&alert).unwrap_or_default(),
                "Operator alert"
            ),
            Err(EventBusError::Lagged(skipped)) => warn!(skipped, "Alert log fell behind"),
            Err(_) => break,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
