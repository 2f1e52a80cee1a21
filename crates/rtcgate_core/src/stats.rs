/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::RouteError;

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Default)]
pub struct RouterStats {
    pub offers: AtomicU64,
    pub answers: AtomicU64,
    pub candidates: AtomicU64,
    pub forwarded_descriptions: AtomicU64,
    pub forwarded_candidates: AtomicU64,
    pub mapping_entries: AtomicU64,
    pub swept_entries: AtomicU64,
    pub evicted_peers: AtomicU64,

    pub empty_payloads: AtomicU64,
    pub unknown_clients: AtomicU64,
    pub stale_peers: AtomicU64,
    pub malformed_candidates: AtomicU64,
    pub peer_create_failures: AtomicU64,
    pub apply_failures: AtomicU64,
    pub send_failures: AtomicU64,
    pub connect_failures: AtomicU64,
    pub queue_full: AtomicU64,

    pub relay_connected: AtomicBool,
    pub relay_last_change_ms: AtomicU64,
    pub relay_rx_bytes: AtomicU64,
    pub relay_tx_bytes: AtomicU64,
    pub relay_rtt_ema_ms: AtomicU64,
    relay_last_error: Mutex<Option<String>>,
}

impl RouterStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumps the counter that belongs to `err`.
    pub fn record(&self, err: &RouteError) {
        let counter = match err {
            RouteError::EmptyPayload { .. } => &self.empty_payloads,
            RouteError::UnknownClient { .. } => &self.unknown_clients,
            RouteError::StalePeer { .. } => &self.stale_peers,
            RouteError::MalformedCandidatePayload { .. } => &self.malformed_candidates,
            RouteError::PeerCreate { .. } => &self.peer_create_failures,
            RouteError::ApplyFailed { .. } => &self.apply_failures,
            RouteError::ChannelSend { .. } => &self.send_failures,
            RouteError::ConnectFailed(_) => &self.connect_failures,
            RouteError::QueueFull { .. } => &self.queue_full,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_total(&self) -> u64 {
        [
            &self.empty_payloads,
            &self.unknown_clients,
            &self.stale_peers,
            &self.malformed_candidates,
            &self.peer_create_failures,
            &self.apply_failures,
            &self.send_failures,
            &self.connect_failures,
            &self.queue_full,
        ]
        .iter()
        .map(|c| c.load(Ordering::Relaxed))
        .sum()
    }

    pub fn mapping_entries_set(&self, n: u64) {
        self.mapping_entries.store(n, Ordering::Relaxed);
    }

    pub fn set_relay_connected(&self, v: bool) {
        self.relay_connected.store(v, Ordering::Relaxed);
        self.relay_last_change_ms.store(now_ms(), Ordering::Relaxed);
        if v {
            let mut g = self.relay_last_error.lock().unwrap_or_else(|e| e.into_inner());
            *g = None;
        }
    }

    pub fn set_relay_error(&self, err: String) {
        self.set_relay_connected(false);
        let mut g = self.relay_last_error.lock().unwrap_or_else(|e| e.into_inner());
        *g = Some(err);
    }

    pub fn relay_rx_add(&self, n: u64) {
        self.relay_rx_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn relay_tx_add(&self, n: u64) {
        self.relay_tx_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn relay_rtt_update(&self, ms: u64) {
        if ms == 0 {
            return;
        }
        let prev = self.relay_rtt_ema_ms.load(Ordering::Relaxed);
        let next = if prev == 0 {
            ms
        } else {
            (prev.saturating_mul(7).saturating_add(ms)) / 8
        };
        self.relay_rtt_ema_ms.store(next, Ordering::Relaxed);
    }

    pub fn snapshot_json(&self) -> serde_json::Value {
        let last_error = self
            .relay_last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        serde_json::json!({
            "ts_ms": now_ms(),
            "relay": {
                "connected": self.relay_connected.load(Ordering::Relaxed),
                "last_change_ms": load(&self.relay_last_change_ms),
                "rx_bytes": load(&self.relay_rx_bytes),
                "tx_bytes": load(&self.relay_tx_bytes),
                "rtt_ms": load(&self.relay_rtt_ema_ms),
                "last_error": last_error,
            },
            "routing": {
                "offers": load(&self.offers),
                "answers": load(&self.answers),
                "candidates": load(&self.candidates),
                "forwarded_descriptions": load(&self.forwarded_descriptions),
                "forwarded_candidates": load(&self.forwarded_candidates),
                "mapping_entries": load(&self.mapping_entries),
                "swept_entries": load(&self.swept_entries),
                "evicted_peers": load(&self.evicted_peers),
            },
            "dropped": {
                "empty_payloads": load(&self.empty_payloads),
                "unknown_clients": load(&self.unknown_clients),
                "stale_peers": load(&self.stale_peers),
                "malformed_candidates": load(&self.malformed_candidates),
                "peer_create_failures": load(&self.peer_create_failures),
                "apply_failures": load(&self.apply_failures),
                "send_failures": load(&self.send_failures),
                "connect_failures": load(&self.connect_failures),
                "queue_full": load(&self.queue_full),
            },
        })
    }
}
