/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use async_trait::async_trait;
use rtcgate_protocol::RelayFrame;
use std::fmt;
use std::sync::Arc;

/// Relay-assigned identity of a remote client. Never generated locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Message(RelayFrame),
    StateChanged(ChannelState),
}

/// Bound at `connect` time; invoked from whatever task the channel runs on.
pub type SignalListener = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// Connection to the remote signaling relay.
///
/// Delivery is at most once per frame with no ordering between frames of the
/// same client.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn connect(&self, listener: SignalListener) -> Result<()>;

    async fn disconnect(&self);

    /// Sends `frame` to `frame.client_id`. No retry happens at this layer.
    async fn send(&self, frame: RelayFrame) -> Result<()>;
}
