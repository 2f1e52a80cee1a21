/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rtcgate_protocol::RelayFrame;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tracing::{error, info, warn};

use crate::channel::{ChannelEvent, ChannelState, SignalListener, SignalingChannel};
use crate::config::GatewayConfig;
use crate::stats::RouterStats;

const OUTBOUND_DEPTH: usize = 128;

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn relay_url(cfg: &GatewayConfig) -> String {
    let mut url = format!(
        "{}/signal/{}?region={}",
        cfg.relay_ws.trim_end_matches('/'),
        urlencoding::encode(&cfg.channel_name),
        urlencoding::encode(&cfg.region),
    );
    if let Some(token) = &cfg.relay_token {
        url.push_str("&token=");
        url.push_str(&urlencoding::encode(token));
    }
    url
}

struct Link {
    out_tx: mpsc::Sender<tungstenite::Message>,
    shutdown_tx: watch::Sender<bool>,
    pump: JoinHandle<()>,
}

/// Signaling channel over a WebSocket relay. Frames are JSON text messages.
/// One connection attempt per `connect`; reconnecting is the caller's call.
pub struct WsRelayChannel {
    url: String,
    stats: Arc<RouterStats>,
    link: Mutex<Option<Link>>,
}

impl WsRelayChannel {
    pub fn new(cfg: &GatewayConfig, stats: Arc<RouterStats>) -> Self {
        Self {
            url: relay_url(cfg),
            stats,
            link: Mutex::new(None),
        }
    }

    fn link(&self) -> std::sync::MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SignalingChannel for WsRelayChannel {
    async fn connect(&self, listener: SignalListener) -> Result<()> {
        listener(ChannelEvent::StateChanged(ChannelState::Connecting));
        info!(url=%redact(&self.url), "connecting signaling relay");
        let (ws, _) = match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok(v) => v,
            Err(e) => {
                self.stats.set_relay_error(e.to_string());
                listener(ChannelEvent::StateChanged(ChannelState::Disconnected));
                return Err(e).context("relay connect");
            }
        };
        self.stats.set_relay_connected(true);
        listener(ChannelEvent::StateChanged(ChannelState::Connected));

        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pump = tokio::spawn(pump(ws, out_rx, shutdown_rx, listener, self.stats.clone()));

        let previous = self.link().replace(Link {
            out_tx,
            shutdown_tx,
            pump,
        });
        if let Some(old) = previous {
            let _ = old.shutdown_tx.send(true);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        let Some(link) = self.link().take() else {
            return;
        };
        let _ = link.shutdown_tx.send(true);
        if let Err(e) = link.pump.await {
            warn!("relay pump ended abnormally: {e}");
        }
        info!("signaling relay disconnected");
    }

    async fn send(&self, frame: RelayFrame) -> Result<()> {
        let json = serde_json::to_string(&frame).context("encode relay frame")?;
        let tx = self
            .link()
            .as_ref()
            .map(|l| l.out_tx.clone())
            .ok_or_else(|| anyhow!("relay not connected"))?;
        tx.send(tungstenite::Message::Text(json))
            .await
            .map_err(|_| anyhow!("relay connection closed"))
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn pump(
    ws: WsStream,
    mut out_rx: mpsc::Receiver<tungstenite::Message>,
    mut shutdown: watch::Receiver<bool>,
    listener: SignalListener,
    stats: Arc<RouterStats>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut ping = tokio::time::interval(Duration::from_secs(5));
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    let _ = ws_tx.send(tungstenite::Message::Close(None)).await;
                    break;
                }
            }
            _ = ping.tick() => {
                let payload = now_ms().to_be_bytes().to_vec();
                if let Err(e) = ws_tx.send(tungstenite::Message::Ping(payload)).await {
                    stats.set_relay_error(e.to_string());
                    break;
                }
            }
            out = out_rx.recv() => {
                let Some(msg) = out else { break };
                if let Err(e) = ws_tx.send(msg).await {
                    error!("relay send failed: {e}");
                    stats.set_relay_error(e.to_string());
                    break;
                }
            }
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        stats.set_relay_error(e.to_string());
                        break;
                    }
                    None => break,
                };
                let text = match msg {
                    tungstenite::Message::Text(t) => t,
                    tungstenite::Message::Pong(p) => {
                        if p.len() == 8 {
                            let mut a = [0u8; 8];
                            a.copy_from_slice(&p);
                            stats.relay_rtt_update(now_ms().saturating_sub(u64::from_be_bytes(a)));
                        }
                        continue;
                    }
                    tungstenite::Message::Ping(p) => {
                        let _ = ws_tx.send(tungstenite::Message::Pong(p)).await;
                        continue;
                    }
                    tungstenite::Message::Close(_) => break,
                    _ => continue,
                };
                match serde_json::from_str::<RelayFrame>(&text) {
                    Ok(frame) => listener(ChannelEvent::Message(frame)),
                    Err(e) => warn!("bad relay frame: {e}"),
                }
            }
        }
    }

    stats.set_relay_connected(false);
    listener(ChannelEvent::StateChanged(ChannelState::Disconnected));
}

fn redact(url: &str) -> String {
    match url.find("&token=") {
        Some(i) => format!("{}&token=***", &url[..i]),
        None => url.to_string(),
    }
}
