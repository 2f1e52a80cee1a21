/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Maps relay clients to local peer connections and moves negotiation
//! messages between them.
//!
//! Inbound relay frames and peer callbacks arrive on tasks the router does not
//! own. All mapping state sits behind a single mutex that is never held across
//! an `.await`; relay sends and peer calls happen after the guard is dropped.

use rtcgate_protocol::{CandidatePayload, RelayFrame, SdpKind, SignalKind};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{ClientId, SignalingChannel};
use crate::error::RouteError;
use crate::peer::{PeerConnection, PeerId, PeerRegistry};
use crate::stats::RouterStats;

#[derive(Default)]
struct MappingTable {
    peer_of: HashMap<ClientId, PeerId>,
    client_of: HashMap<PeerId, ClientId>,
}

impl MappingTable {
    /// Installs `client <-> peer` in both directions. Returns the peer that
    /// previously served `client`, whose reverse entry is dropped.
    fn insert(&mut self, client: ClientId, peer: PeerId) -> Option<PeerId> {
        let replaced = self.peer_of.insert(client.clone(), peer.clone());
        if let Some(old) = &replaced {
            self.client_of.remove(old);
        }
        if let Some(prev_client) = self.client_of.insert(peer, client.clone()) {
            if prev_client != client {
                self.peer_of.remove(&prev_client);
            }
        }
        replaced
    }

    fn remove_peer(&mut self, peer: &PeerId) -> Option<ClientId> {
        let client = self.client_of.remove(peer)?;
        if self.peer_of.get(&client) == Some(peer) {
            self.peer_of.remove(&client);
        }
        Some(client)
    }

    fn len(&self) -> usize {
        self.peer_of.len()
    }

    fn is_consistent(&self) -> bool {
        self.peer_of.len() == self.client_of.len()
            && self
                .peer_of
                .iter()
                .all(|(c, p)| self.client_of.get(p) == Some(c))
    }
}

/// Outcome of one [`SignalingRouter::refresh_mapping`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub removed_entries: Vec<(ClientId, PeerId)>,
    pub evicted_peers: Vec<PeerId>,
}

/// Local negotiation output of one peer.
enum LocalEvent {
    Description(String),
    Candidate {
        mid: String,
        index: u16,
        candidate: String,
    },
}

/// Sends locally generated negotiation output back to one relay client.
#[derive(Clone)]
struct Forwarder {
    channel: Arc<dyn SignalingChannel>,
    stats: Arc<RouterStats>,
}

impl Forwarder {
    async fn description(&self, client: &ClientId, sdp: String) {
        let frame = RelayFrame {
            kind: SignalKind::Answer,
            client_id: client.as_str().to_string(),
            payload: sdp,
        };
        debug!(client=%client, "sending local description");
        if self.send(client, frame).await {
            self.stats.forwarded_descriptions.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn candidate(&self, client: &ClientId, mid: String, index: u16, candidate: String) {
        let payload = CandidatePayload {
            candidate,
            sdp_mid: mid,
            sdp_mline_index: index,
        };
        let payload = match serde_json::to_string(&payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(client=%client, "candidate encode failed: {e}");
                return;
            }
        };
        let frame = RelayFrame {
            kind: SignalKind::Candidate,
            client_id: client.as_str().to_string(),
            payload,
        };
        debug!(client=%client, "sending local candidate");
        if self.send(client, frame).await {
            self.stats.forwarded_candidates.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn send(&self, client: &ClientId, frame: RelayFrame) -> bool {
        let kind = frame.kind.as_str();
        let len = frame.payload.len() as u64;
        match self.channel.send(frame).await {
            Ok(()) => {
                self.stats.relay_tx_add(len);
                true
            }
            Err(e) => {
                let err = RouteError::ChannelSend {
                    kind,
                    client: client.clone(),
                    reason: format!("{e:#}"),
                };
                warn!("{err}");
                self.stats.record(&err);
                false
            }
        }
    }

    /// Starts the single task that delivers one client's local events. Events
    /// leave in the order the peer produced them.
    fn ordered_path(&self, client: ClientId) -> Option<mpsc::UnboundedSender<LocalEvent>> {
        let rt = match tokio::runtime::Handle::try_current() {
            Ok(rt) => rt,
            Err(_) => {
                warn!(client=%client, "no runtime for local negotiation events");
                return None;
            }
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fwd = self.clone();
        rt.spawn(async move {
            while let Some(ev) = rx.recv().await {
                match ev {
                    LocalEvent::Description(sdp) => fwd.description(&client, sdp).await,
                    LocalEvent::Candidate {
                        mid,
                        index,
                        candidate,
                    } => fwd.candidate(&client, mid, index, candidate).await,
                }
            }
            debug!(client=%client, "local event path closed");
        });
        Some(tx)
    }
}

pub struct SignalingRouter {
    registry: Arc<dyn PeerRegistry>,
    forwarder: Forwarder,
    table: Mutex<MappingTable>,
    stats: Arc<RouterStats>,
}

impl SignalingRouter {
    pub fn new(
        registry: Arc<dyn PeerRegistry>,
        channel: Arc<dyn SignalingChannel>,
        stats: Arc<RouterStats>,
    ) -> Self {
        Self {
            registry,
            forwarder: Forwarder {
                channel,
                stats: stats.clone(),
            },
            table: Mutex::new(MappingTable::default()),
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<RouterStats> {
        &self.stats
    }

    fn table(&self) -> MutexGuard<'_, MappingTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn drop_with(&self, err: RouteError) {
        warn!("{err}");
        self.stats.record(&err);
    }

    pub fn peer_of(&self, client: &ClientId) -> Option<PeerId> {
        self.table().peer_of.get(client).cloned()
    }

    pub fn client_of(&self, peer: &PeerId) -> Option<ClientId> {
        self.table().client_of.get(peer).cloned()
    }

    pub fn mapping_len(&self) -> usize {
        self.table().len()
    }

    pub fn mapping_is_consistent(&self) -> bool {
        self.table().is_consistent()
    }

    /// Decodes a raw relay frame and hands it to the matching handler.
    pub async fn dispatch(&self, frame: RelayFrame) {
        self.stats.relay_rx_add(frame.payload.len() as u64);
        let client = ClientId::from(frame.client_id);
        match frame.kind {
            SignalKind::Offer => self.handle_offer(&frame.payload, &client).await,
            SignalKind::Answer => self.handle_answer(&frame.payload, &client).await,
            SignalKind::Candidate => {
                match serde_json::from_str::<CandidatePayload>(&frame.payload) {
                    Ok(c) => {
                        self.handle_candidate(&c.candidate, &c.sdp_mid, c.sdp_mline_index, &client)
                            .await
                    }
                    Err(source) => {
                        self.drop_with(RouteError::MalformedCandidatePayload { client, source })
                    }
                }
            }
        }
    }

    /// Always allocates a fresh peer for `client`. A mapping left by an
    /// earlier offer is overwritten and its peer is left to the sweep.
    pub async fn handle_offer(&self, sdp: &str, client: &ClientId) {
        if let Err(e) = self.try_offer(sdp, client).await {
            self.drop_with(e);
        }
    }

    async fn try_offer(&self, sdp: &str, client: &ClientId) -> Result<(), RouteError> {
        if sdp.trim().is_empty() {
            return Err(RouteError::EmptyPayload {
                kind: "offer",
                client: client.clone(),
            });
        }
        self.stats.offers.fetch_add(1, Ordering::Relaxed);
        debug!(client=%client, "offer received");

        let peer = self
            .registry
            .create_peer()
            .await
            .map_err(|e| RouteError::PeerCreate {
                client: client.clone(),
                reason: format!("{e:#}"),
            })?;
        let peer_id = peer.id().clone();

        let replaced = {
            let mut table = self.table();
            let replaced = table.insert(client.clone(), peer_id.clone());
            self.stats.mapping_entries_set(table.len() as u64);
            replaced
        };
        if let Some(old) = replaced {
            warn!(client=%client, old=%old, new=%peer_id, "repeated offer replaced mapping; previous peer left for sweep");
        }

        self.bind_callbacks(peer.as_ref(), client);

        peer.set_remote_description(sdp, SdpKind::Offer)
            .await
            .map_err(|e| RouteError::ApplyFailed {
                kind: "offer",
                peer: peer_id.clone(),
                reason: format!("{e:#}"),
            })?;
        info!(client=%client, peer=%peer_id, "peer created for offer");
        Ok(())
    }

    fn bind_callbacks(&self, peer: &dyn PeerConnection, client: &ClientId) {
        let Some(tx) = self.forwarder.ordered_path(client.clone()) else {
            return;
        };
        let desc_tx = tx.clone();
        peer.on_local_description(Box::new(move |sdp| {
            let _ = desc_tx.send(LocalEvent::Description(sdp));
        }));
        peer.on_local_candidate(Box::new(move |mid, index, candidate| {
            let _ = tx.send(LocalEvent::Candidate {
                mid,
                index,
                candidate,
            });
        }));
    }

    pub async fn handle_answer(&self, sdp: &str, client: &ClientId) {
        if let Err(e) = self.try_answer(sdp, client).await {
            self.drop_with(e);
        }
    }

    async fn try_answer(&self, sdp: &str, client: &ClientId) -> Result<(), RouteError> {
        let peer = self.resolve("answer", client)?;
        self.stats.answers.fetch_add(1, Ordering::Relaxed);
        peer.set_remote_description(sdp, SdpKind::Answer)
            .await
            .map_err(|e| RouteError::ApplyFailed {
                kind: "answer",
                peer: peer.id().clone(),
                reason: format!("{e:#}"),
            })
    }

    pub async fn handle_candidate(
        &self,
        candidate: &str,
        mid: &str,
        mline_index: u16,
        client: &ClientId,
    ) {
        if let Err(e) = self.try_candidate(candidate, mid, mline_index, client).await {
            self.drop_with(e);
        }
    }

    async fn try_candidate(
        &self,
        candidate: &str,
        mid: &str,
        mline_index: u16,
        client: &ClientId,
    ) -> Result<(), RouteError> {
        let peer = self.resolve("candidate", client)?;
        self.stats.candidates.fetch_add(1, Ordering::Relaxed);
        peer.set_remote_candidate(mid, mline_index, candidate)
            .await
            .map_err(|e| RouteError::ApplyFailed {
                kind: "candidate",
                peer: peer.id().clone(),
                reason: format!("{e:#}"),
            })
    }

    fn resolve(
        &self,
        kind: &'static str,
        client: &ClientId,
    ) -> Result<Arc<dyn PeerConnection>, RouteError> {
        let peer_id = self
            .table()
            .peer_of
            .get(client)
            .cloned()
            .ok_or_else(|| RouteError::UnknownClient {
                kind,
                client: client.clone(),
            })?;
        self.registry
            .get_peer(&peer_id)
            .ok_or_else(|| RouteError::StalePeer {
                client: client.clone(),
                peer: peer_id,
            })
    }

    pub async fn forward_local_description(&self, client: &ClientId, sdp: String) {
        self.forwarder.description(client, sdp).await;
    }

    pub async fn forward_local_candidate(
        &self,
        client: &ClientId,
        mid: String,
        index: u16,
        candidate: String,
    ) {
        self.forwarder.candidate(client, mid, index, candidate).await;
    }

    /// Drops every mapping entry and registry peer whose connection reports
    /// not connected right now, and evicts those peers. Connected peers are
    /// never touched. Nothing else frees mapping entries, so this has to run
    /// on a schedule.
    pub async fn refresh_mapping(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let mut stale = Vec::new();
        let registry_ids = self.registry.peer_ids();
        {
            let mut table = self.table();
            let mapped = table
                .client_of
                .iter()
                .map(|(p, c)| (p.clone(), c.clone()))
                .collect::<Vec<_>>();
            for (peer_id, client) in mapped {
                match self.registry.get_peer(&peer_id) {
                    Some(peer) if peer.is_connected() => {}
                    Some(_) => {
                        table.remove_peer(&peer_id);
                        report.removed_entries.push((client, peer_id.clone()));
                        report.evicted_peers.push(peer_id);
                    }
                    None => {
                        table.remove_peer(&peer_id);
                        report.removed_entries.push((client.clone(), peer_id.clone()));
                        stale.push(RouteError::StalePeer {
                            client,
                            peer: peer_id,
                        });
                    }
                }
            }
            // Peers that lost their mapping to a repeated offer.
            for peer_id in registry_ids {
                if table.client_of.contains_key(&peer_id)
                    || report.evicted_peers.contains(&peer_id)
                {
                    continue;
                }
                if let Some(peer) = self.registry.get_peer(&peer_id) {
                    if !peer.is_connected() {
                        report.evicted_peers.push(peer_id);
                    }
                }
            }
            self.stats.mapping_entries_set(table.len() as u64);
        }

        for err in stale {
            self.drop_with(err);
        }
        let mut evicted = Vec::with_capacity(report.evicted_peers.len());
        for peer_id in report.evicted_peers.drain(..) {
            if self.registry.evict(&peer_id).await {
                debug!(peer=%peer_id, "peer evicted by sweep");
                evicted.push(peer_id);
            }
        }
        report.evicted_peers = evicted;

        self.stats
            .swept_entries
            .fetch_add(report.removed_entries.len() as u64, Ordering::Relaxed);
        self.stats
            .evicted_peers
            .fetch_add(report.evicted_peers.len() as u64, Ordering::Relaxed);
        if !report.removed_entries.is_empty() || !report.evicted_peers.is_empty() {
            info!(
                removed = report.removed_entries.len(),
                evicted = report.evicted_peers.len(),
                "mapping refreshed"
            );
        }
        report
    }
}
