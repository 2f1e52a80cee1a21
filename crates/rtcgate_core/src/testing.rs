/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! In-memory registry, peer and channel used by the unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rtcgate_protocol::{RelayFrame, SdpKind};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::channel::{ChannelEvent, SignalListener, SignalingChannel};
use crate::peer::{LocalCandidateFn, LocalDescriptionFn, PeerConnection, PeerId, PeerRegistry};

pub struct FakePeer {
    id: PeerId,
    connected: AtomicBool,
    fail_apply: Arc<AtomicBool>,
    applied: Mutex<Vec<String>>,
    last_candidate: Mutex<Option<(String, u16, String)>>,
    on_desc: Mutex<Option<LocalDescriptionFn>>,
    on_cand: Mutex<Option<LocalCandidateFn>>,
}

impl FakePeer {
    pub fn set_connected(&self, v: bool) {
        self.connected.store(v, Ordering::SeqCst);
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }

    pub fn last_candidate(&self) -> Option<(String, u16, String)> {
        self.last_candidate.lock().unwrap().clone()
    }

    pub fn fire_local_description(&self, sdp: &str) {
        if let Some(cb) = self.on_desc.lock().unwrap().as_ref() {
            cb(sdp.to_string());
        }
    }

    pub fn fire_local_candidate(&self, mid: &str, index: u16, candidate: &str) {
        if let Some(cb) = self.on_cand.lock().unwrap().as_ref() {
            cb(mid.to_string(), index, candidate.to_string());
        }
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    fn id(&self) -> &PeerId {
        &self.id
    }

    async fn set_remote_description(&self, sdp: &str, kind: SdpKind) -> Result<()> {
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(anyhow!("rejected {}", kind.as_str()));
        }
        self.applied
            .lock()
            .unwrap()
            .push(format!("{}:{}", kind.as_str(), sdp));
        Ok(())
    }

    async fn set_remote_candidate(&self, mid: &str, index: u16, candidate: &str) -> Result<()> {
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(anyhow!("rejected candidate"));
        }
        self.applied
            .lock()
            .unwrap()
            .push(format!("candidate:{mid}:{index}:{candidate}"));
        *self.last_candidate.lock().unwrap() =
            Some((mid.to_string(), index, candidate.to_string()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn on_local_description(&self, cb: LocalDescriptionFn) {
        *self.on_desc.lock().unwrap() = Some(cb);
    }

    fn on_local_candidate(&self, cb: LocalCandidateFn) {
        *self.on_cand.lock().unwrap() = Some(cb);
    }
}

#[derive(Default)]
pub struct FakeRegistry {
    seq: AtomicU64,
    fail_create: AtomicBool,
    fail_apply: Arc<AtomicBool>,
    peers: Mutex<BTreeMap<PeerId, Arc<FakePeer>>>,
    created: Mutex<Vec<PeerId>>,
    evicted: Mutex<Vec<PeerId>>,
}

impl FakeRegistry {
    pub fn fail_create(&self, v: bool) {
        self.fail_create.store(v, Ordering::SeqCst);
    }

    pub fn fail_apply(&self, v: bool) {
        self.fail_apply.store(v, Ordering::SeqCst);
    }

    pub fn peer(&self, id: &PeerId) -> Arc<FakePeer> {
        self.peers
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_else(|| panic!("no fake peer {id}"))
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.lock().unwrap().contains_key(id)
    }

    /// Drops a peer without going through `evict`.
    pub fn forget(&self, id: &PeerId) {
        self.peers.lock().unwrap().remove(id);
    }

    pub fn created(&self) -> Vec<PeerId> {
        self.created.lock().unwrap().clone()
    }

    pub fn evicted(&self) -> Vec<PeerId> {
        self.evicted.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerRegistry for FakeRegistry {
    async fn create_peer(&self) -> Result<Arc<dyn PeerConnection>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(anyhow!("no more peers"));
        }
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let peer = Arc::new(FakePeer {
            id: PeerId::new(format!("P{n}")),
            connected: AtomicBool::new(true),
            fail_apply: self.fail_apply.clone(),
            applied: Mutex::new(Vec::new()),
            last_candidate: Mutex::new(None),
            on_desc: Mutex::new(None),
            on_cand: Mutex::new(None),
        });
        self.peers
            .lock()
            .unwrap()
            .insert(peer.id.clone(), peer.clone());
        self.created.lock().unwrap().push(peer.id.clone());
        Ok(peer)
    }

    fn get_peer(&self, id: &PeerId) -> Option<Arc<dyn PeerConnection>> {
        self.peers
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .map(|p| p as Arc<dyn PeerConnection>)
    }

    fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.lock().unwrap().keys().cloned().collect()
    }

    async fn evict(&self, id: &PeerId) -> bool {
        let removed = self.peers.lock().unwrap().remove(id).is_some();
        if removed {
            self.evicted.lock().unwrap().push(id.clone());
        }
        removed
    }
}

pub struct FakeChannel {
    fail_send: AtomicBool,
    fail_connect: AtomicBool,
    attempts: AtomicU64,
    listener: Mutex<Option<SignalListener>>,
    sent_tx: mpsc::UnboundedSender<RelayFrame>,
    sent_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<RelayFrame>>,
}

impl Default for FakeChannel {
    fn default() -> Self {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        Self {
            fail_send: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            attempts: AtomicU64::new(0),
            listener: Mutex::new(None),
            sent_tx,
            sent_rx: tokio::sync::Mutex::new(sent_rx),
        }
    }
}

impl FakeChannel {
    pub fn fail_send(&self, v: bool) {
        self.fail_send.store(v, Ordering::SeqCst);
    }

    pub fn fail_connect(&self, v: bool) {
        self.fail_connect.store(v, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.listener.lock().unwrap().is_some()
    }

    /// Plays the relay side: delivers `event` to whoever connected.
    pub fn emit(&self, event: ChannelEvent) {
        let listener = self.listener.lock().unwrap().clone();
        if let Some(l) = listener {
            l(event);
        }
    }

    pub async fn next_sent(&self, wait: Duration) -> Option<RelayFrame> {
        let mut rx = self.sent_rx.lock().await;
        tokio::time::timeout(wait, rx.recv()).await.ok().flatten()
    }
}

#[async_trait]
impl SignalingChannel for FakeChannel {
    async fn connect(&self, listener: SignalListener) -> Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(anyhow!("relay unreachable"));
        }
        *self.listener.lock().unwrap() = Some(listener);
        Ok(())
    }

    async fn disconnect(&self) {
        self.listener.lock().unwrap().take();
    }

    async fn send(&self, frame: RelayFrame) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(anyhow!("relay send failed"));
        }
        let _ = self.sent_tx.send(frame);
        Ok(())
    }
}
