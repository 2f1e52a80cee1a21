/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, Context, Result};
use rtcgate_protocol::RelayFrame;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::channel::{ChannelEvent, ClientId, SignalListener, SignalingChannel};
use crate::config::GatewayConfig;
use crate::error::RouteError;
use crate::gnss::{self, LocationProvider};
use crate::relay_ws::WsRelayChannel;
use crate::router::SignalingRouter;
use crate::stats::RouterStats;
use crate::webrtc_peer::WebrtcRegistry;

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match "info".parse() {
        Ok(d) => filter.add_directive(d),
        Err(_) => filter,
    };
    tracing_subscriber::fmt().with_env_filter(filter).try_init().ok();
}

/// Channel listener that queues inbound frames for the router loop.
/// Never blocks: a full queue drops the frame.
pub fn listener_for(tx: mpsc::Sender<RelayFrame>, stats: Arc<RouterStats>) -> SignalListener {
    Arc::new(move |event| match event {
        ChannelEvent::Message(frame) => {
            if let Err(mpsc::error::TrySendError::Full(frame)) = tx.try_send(frame) {
                let err = RouteError::QueueFull {
                    kind: frame.kind.as_str(),
                    client: ClientId::from(frame.client_id),
                };
                warn!("{err}");
                stats.record(&err);
            }
        }
        ChannelEvent::StateChanged(state) => info!(?state, "signaling channel state"),
    })
}

/// Single consumer: frames are handled one at a time, interleaved with the
/// periodic mapping sweep. Ends on shutdown or when every sender is gone.
pub fn spawn_router(
    router: Arc<SignalingRouter>,
    mut rx: mpsc::Receiver<RelayFrame>,
    sweep_every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sweep = tokio::time::interval(sweep_every);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = sweep.tick() => {
                    router.refresh_mapping().await;
                }
                frame = rx.recv() => match frame {
                    Some(frame) => router.dispatch(frame).await,
                    None => break,
                },
            }
        }
        info!("router loop stopped");
    })
}

/// Connects `channel`, runs the router loop until shutdown, then
/// disconnects. A failed connect is counted and returned; nothing is retried.
/// Losing the channel before shutdown is an error too.
pub async fn serve(
    router: Arc<SignalingRouter>,
    channel: Arc<dyn SignalingChannel>,
    queue_depth: usize,
    sweep_every: Duration,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let stats = router.stats().clone();
    let (tx, rx) = mpsc::channel(queue_depth.max(1));
    if let Err(e) = channel.connect(listener_for(tx, stats.clone())).await {
        let err = RouteError::ConnectFailed(format!("{e:#}"));
        error!("{err}");
        stats.record(&err);
        return Err(err.into());
    }

    let stopping = shutdown.clone();
    let loop_task = spawn_router(router, rx, sweep_every, shutdown);
    if let Err(e) = loop_task.await {
        error!("router loop panicked: {e}");
    }
    channel.disconnect().await;
    if !*stopping.borrow() {
        error!("signaling channel closed without shutdown");
        return Err(anyhow!("signaling channel closed"));
    }
    Ok(())
}

pub async fn run(cfg: GatewayConfig, shutdown: watch::Receiver<bool>) -> Result<()> {
    info!(
        channel = %cfg.channel_name,
        region = %cfg.region,
        sweep_secs = cfg.sweep_interval_secs,
        "starting gateway"
    );
    let stats = Arc::new(RouterStats::new());
    let registry = Arc::new(WebrtcRegistry::new(&cfg).context("init webrtc")?);
    let channel: Arc<dyn SignalingChannel> = Arc::new(WsRelayChannel::new(&cfg, stats.clone()));
    let router = Arc::new(SignalingRouter::new(registry.clone(), channel.clone(), stats.clone()));

    let location = Arc::new(LocationProvider::new());
    let gnss_task = match cfg.gnss_port.as_deref() {
        Some(port) => match gnss::open_serial(port).await {
            Ok(reader) => {
                let provider = location.clone();
                let shutdown = shutdown.clone();
                Some(tokio::spawn(async move {
                    provider.run_reader(reader, shutdown).await;
                }))
            }
            Err(e) => {
                error!("gnss disabled: {e:#}");
                None
            }
        },
        None => None,
    };

    let res = serve(
        router,
        channel,
        cfg.queue_depth,
        Duration::from_secs(cfg.sweep_interval_secs),
        shutdown,
    )
    .await;

    if let Some(t) = gnss_task {
        t.abort();
        let fix = location.get_location();
        if fix.has_fix {
            info!(lat = fix.latitude, lon = fix.longitude, "last gnss fix");
        }
    }
    registry.close_all().await;
    info!(stats = %stats.snapshot_json(), "gateway stopped");
    res
}
