/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::channel::ClientId;
use crate::peer::PeerId;

/// Every condition under which the router drops work. None of these reach a
/// caller: they are logged and counted in [`crate::stats::RouterStats`].
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("empty {kind} payload from {client}")]
    EmptyPayload { kind: &'static str, client: ClientId },

    #[error("{kind} from unknown client {client}")]
    UnknownClient { kind: &'static str, client: ClientId },

    #[error("client {client} maps to {peer} but the registry has no such peer")]
    StalePeer { client: ClientId, peer: PeerId },

    #[error("malformed candidate payload from {client}: {source}")]
    MalformedCandidatePayload {
        client: ClientId,
        #[source]
        source: serde_json::Error,
    },

    #[error("peer creation failed for {client}: {reason}")]
    PeerCreate { client: ClientId, reason: String },

    #[error("applying {kind} to {peer} failed: {reason}")]
    ApplyFailed {
        kind: &'static str,
        peer: PeerId,
        reason: String,
    },

    #[error("sending {kind} to {client} failed: {reason}")]
    ChannelSend {
        kind: &'static str,
        client: ClientId,
        reason: String,
    },

    #[error("relay connect failed: {0}")]
    ConnectFailed(String),

    #[error("router queue full, dropped {kind} from {client}")]
    QueueFull { kind: &'static str, client: ClientId },
}
