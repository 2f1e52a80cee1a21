/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use rtcgate_core::config::{default_config_path, GatewayConfig};
use rtcgate_core::runtime;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{info, warn};

fn config_path() -> Result<PathBuf> {
    match std::env::args().nth(1) {
        Some(p) if !p.trim().is_empty() => Ok(PathBuf::from(p)),
        _ => default_config_path(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    runtime::init_tracing();
    let cfg_path = config_path()?;
    info!("config: {}", cfg_path.display());
    let cfg = GatewayConfig::load(&cfg_path)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!("ctrl-c handler unavailable: {e}");
                std::future::pending::<()>().await;
            }
        }
    });

    runtime::run(cfg, shutdown_rx).await
}
