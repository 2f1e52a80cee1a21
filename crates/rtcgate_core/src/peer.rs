/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use async_trait::async_trait;
use rtcgate_protocol::SdpKind;
use std::fmt;
use std::sync::Arc;

/// Registry-assigned handle of a local peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        let mut b = [0u8; 16];
        use rand::RngCore as _;
        rand::rngs::OsRng.fill_bytes(&mut b);
        Self(b.iter().map(|v| format!("{v:02x}")).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fired with the SDP of a locally generated session description.
pub type LocalDescriptionFn = Box<dyn Fn(String) + Send + Sync>;
/// Fired with `(mid, m-line index, candidate)` for each local candidate.
pub type LocalCandidateFn = Box<dyn Fn(String, u16, String) + Send + Sync>;

#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn id(&self) -> &PeerId;

    async fn set_remote_description(&self, sdp: &str, kind: SdpKind) -> Result<()>;

    async fn set_remote_candidate(&self, mid: &str, index: u16, candidate: &str) -> Result<()>;

    fn is_connected(&self) -> bool;

    fn on_local_description(&self, cb: LocalDescriptionFn);

    fn on_local_candidate(&self, cb: LocalCandidateFn);
}

/// Owns every live peer connection; everything else holds ids.
#[async_trait]
pub trait PeerRegistry: Send + Sync {
    async fn create_peer(&self) -> Result<Arc<dyn PeerConnection>>;

    fn get_peer(&self, id: &PeerId) -> Option<Arc<dyn PeerConnection>>;

    fn peer_ids(&self) -> Vec<PeerId>;

    /// Removes the peer and releases its resources. Returns false when the id
    /// was not registered.
    async fn evict(&self, id: &PeerId) -> bool;
}
