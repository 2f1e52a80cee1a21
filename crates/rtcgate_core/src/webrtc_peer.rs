/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use async_trait::async_trait;
use rtcgate_protocol::SdpKind;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::config::GatewayConfig;
use crate::peer::{LocalCandidateFn, LocalDescriptionFn, PeerConnection, PeerId, PeerRegistry};

const LIVE_PENDING: u8 = 0;
const LIVE_CONNECTED: u8 = 1;
const LIVE_GONE: u8 = 2;
const LIVE_INTERRUPTED: u8 = 3;

type Slot<T> = Arc<Mutex<Option<T>>>;
type LocalCandidate = (String, u16, String);

/// Liveness after a connection state change. Failed and closed are final;
/// a disconnected connection may still come back.
fn next_liveness(current: u8, st: RTCPeerConnectionState) -> u8 {
    if current == LIVE_GONE {
        return LIVE_GONE;
    }
    match st {
        RTCPeerConnectionState::Connected => LIVE_CONNECTED,
        RTCPeerConnectionState::Disconnected => LIVE_INTERRUPTED,
        RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => LIVE_GONE,
        _ => current,
    }
}

/// Local candidates are held here until the local answer has been handed out.
#[derive(Default)]
struct CandidateGate {
    open: bool,
    held: Vec<LocalCandidate>,
}

impl CandidateGate {
    /// Returns the candidate when it may go out right away.
    fn admit(&mut self, c: LocalCandidate) -> Option<LocalCandidate> {
        if self.open {
            Some(c)
        } else {
            self.held.push(c);
            None
        }
    }

    fn release(&mut self) -> Vec<LocalCandidate> {
        self.open = true;
        std::mem::take(&mut self.held)
    }
}

fn build_ice_servers(cfg: &GatewayConfig) -> Vec<RTCIceServer> {
    if cfg.ice_urls.is_empty() {
        return Vec::new();
    }
    vec![RTCIceServer {
        urls: cfg.ice_urls.clone(),
        username: cfg.ice_username.clone().unwrap_or_default(),
        credential: cfg.ice_credential.clone().unwrap_or_default(),
        ..Default::default()
    }]
}

/// One local negotiation endpoint on top of `RTCPeerConnection`.
///
/// Liveness: connected, or still negotiating within the connect timeout.
/// A disconnected connection counts as down until it reconnects; failed or
/// closed ones stay down.
pub struct WebrtcPeer {
    id: PeerId,
    pc: Arc<RTCPeerConnection>,
    created_at: Instant,
    connect_timeout: Duration,
    liveness: Arc<AtomicU8>,
    on_desc: Slot<LocalDescriptionFn>,
    on_cand: Slot<LocalCandidateFn>,
    local_gate: Arc<Mutex<CandidateGate>>,
    pending_candidates: tokio::sync::Mutex<Vec<RTCIceCandidateInit>>,
}

impl WebrtcPeer {
    fn wire(id: PeerId, pc: Arc<RTCPeerConnection>, connect_timeout: Duration) -> Self {
        let liveness = Arc::new(AtomicU8::new(LIVE_PENDING));
        let on_desc: Slot<LocalDescriptionFn> = Arc::new(Mutex::new(None));
        let on_cand: Slot<LocalCandidateFn> = Arc::new(Mutex::new(None));
        let local_gate = Arc::new(Mutex::new(CandidateGate::default()));

        {
            let liveness = liveness.clone();
            let id2 = id.clone();
            pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
                let liveness = liveness.clone();
                let id2 = id2.clone();
                Box::pin(async move {
                    debug!(peer=%id2, state=%st, "peer connection state");
                    let _ = liveness.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                        Some(next_liveness(cur, st))
                    });
                })
            }));
        }

        {
            let on_cand = on_cand.clone();
            let local_gate = local_gate.clone();
            let id2 = id.clone();
            pc.on_ice_candidate(Box::new(move |cand| {
                let on_cand = on_cand.clone();
                let local_gate = local_gate.clone();
                let id2 = id2.clone();
                Box::pin(async move {
                    let Some(cand) = cand else { return };
                    let init = match cand.to_json() {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(peer=%id2, "local candidate encode failed: {e:#}");
                            return;
                        }
                    };
                    let local = (
                        init.sdp_mid.unwrap_or_default(),
                        init.sdp_mline_index.unwrap_or(0),
                        init.candidate,
                    );
                    let mut gate = local_gate.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some((mid, index, candidate)) = gate.admit(local) {
                        let guard = on_cand.lock().unwrap_or_else(|e| e.into_inner());
                        if let Some(cb) = guard.as_ref() {
                            cb(mid, index, candidate);
                        }
                    }
                })
            }));
        }

        Self {
            id,
            pc,
            created_at: Instant::now(),
            connect_timeout,
            liveness,
            on_desc,
            on_cand,
            local_gate,
            pending_candidates: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    fn fire_local_description(&self, sdp: String) {
        let guard = self.on_desc.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cb) = guard.as_ref() {
            cb(sdp);
        }
    }

    /// Sends candidates gathered before the answer went out, then lets later
    /// ones through directly.
    fn release_local_candidates(&self) {
        let mut gate = self.local_gate.lock().unwrap_or_else(|e| e.into_inner());
        let held = gate.release();
        let guard = self.on_cand.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cb) = guard.as_ref() {
            for (mid, index, candidate) in held {
                cb(mid, index, candidate);
            }
        }
    }

    async fn flush_pending_candidates(&self) {
        let mut pending = self.pending_candidates.lock().await;
        for c in pending.drain(..) {
            if let Err(e) = self.pc.add_ice_candidate(c).await {
                warn!(peer=%self.id, "buffered candidate rejected: {e:#}");
            }
        }
    }

    async fn close(&self) {
        self.liveness.store(LIVE_GONE, Ordering::SeqCst);
        if let Err(e) = self.pc.close().await {
            warn!(peer=%self.id, "peer close failed: {e:#}");
        }
    }
}

#[async_trait]
impl PeerConnection for WebrtcPeer {
    fn id(&self) -> &PeerId {
        &self.id
    }

    async fn set_remote_description(&self, sdp: &str, kind: SdpKind) -> Result<()> {
        let desc = match kind {
            SdpKind::Offer => RTCSessionDescription::offer(sdp.to_string()),
            SdpKind::Answer => RTCSessionDescription::answer(sdp.to_string()),
        }
        .context("parse remote sdp")?;
        self.pc
            .set_remote_description(desc)
            .await
            .context("set_remote_description")?;
        self.flush_pending_candidates().await;

        if kind == SdpKind::Offer {
            let answer = self.pc.create_answer(None).await.context("create_answer")?;
            self.pc
                .set_local_description(answer.clone())
                .await
                .context("set_local_description")?;
            self.fire_local_description(answer.sdp);
        }
        self.release_local_candidates();
        Ok(())
    }

    async fn set_remote_candidate(&self, mid: &str, index: u16, candidate: &str) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.to_string(),
            sdp_mid: Some(mid.to_string()),
            sdp_mline_index: Some(index),
            ..Default::default()
        };
        // Held across the check so a concurrent flush cannot miss this one.
        let mut pending = self.pending_candidates.lock().await;
        if self.pc.remote_description().await.is_none() {
            pending.push(init);
            return Ok(());
        }
        drop(pending);
        self.pc
            .add_ice_candidate(init)
            .await
            .context("add_ice_candidate")
    }

    fn is_connected(&self) -> bool {
        match self.liveness.load(Ordering::SeqCst) {
            LIVE_CONNECTED => true,
            LIVE_PENDING => self.created_at.elapsed() < self.connect_timeout,
            _ => false,
        }
    }

    fn on_local_description(&self, cb: LocalDescriptionFn) {
        *self.on_desc.lock().unwrap_or_else(|e| e.into_inner()) = Some(cb);
    }

    fn on_local_candidate(&self, cb: LocalCandidateFn) {
        *self.on_cand.lock().unwrap_or_else(|e| e.into_inner()) = Some(cb);
    }
}

pub struct WebrtcRegistry {
    api: API,
    ice_servers: Vec<RTCIceServer>,
    connect_timeout: Duration,
    peers: Mutex<HashMap<PeerId, Arc<WebrtcPeer>>>,
}

impl WebrtcRegistry {
    pub fn new(cfg: &GatewayConfig) -> Result<Self> {
        let mut media = MediaEngine::default();
        media.register_default_codecs().context("register codecs")?;
        let mut interceptors = Registry::new();
        interceptors = register_default_interceptors(interceptors, &mut media)
            .context("register interceptors")?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(interceptors)
            .build();
        Ok(Self {
            api,
            ice_servers: build_ice_servers(cfg),
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            peers: Mutex::new(HashMap::new()),
        })
    }

    fn peers(&self) -> std::sync::MutexGuard<'_, HashMap<PeerId, Arc<WebrtcPeer>>> {
        self.peers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.peers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers().is_empty()
    }

    /// Closes every peer; used on shutdown.
    pub async fn close_all(&self) {
        let all = self.peers().drain().map(|(_, p)| p).collect::<Vec<_>>();
        for p in all {
            p.close().await;
        }
    }
}

#[async_trait]
impl PeerRegistry for WebrtcRegistry {
    async fn create_peer(&self) -> Result<Arc<dyn PeerConnection>> {
        let pc = self
            .api
            .new_peer_connection(RTCConfiguration {
                ice_servers: self.ice_servers.clone(),
                ..Default::default()
            })
            .await
            .context("new peer connection")?;
        let id = PeerId::random();
        let peer = Arc::new(WebrtcPeer::wire(id.clone(), Arc::new(pc), self.connect_timeout));
        self.peers().insert(id.clone(), peer.clone());
        info!(peer=%id, "peer connection created");
        Ok(peer)
    }

    fn get_peer(&self, id: &PeerId) -> Option<Arc<dyn PeerConnection>> {
        self.peers()
            .get(id)
            .cloned()
            .map(|p| p as Arc<dyn PeerConnection>)
    }

    fn peer_ids(&self) -> Vec<PeerId> {
        self.peers().keys().cloned().collect()
    }

    async fn evict(&self, id: &PeerId) -> bool {
        let Some(peer) = self.peers().remove(id) else {
            return false;
        };
        peer.close().await;
        info!(peer=%id, "peer connection evicted");
        true
    }
}
