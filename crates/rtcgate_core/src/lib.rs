/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod channel;
pub mod config;
pub mod error;
pub mod gnss;
pub mod peer;
pub mod relay_ws;
pub mod router;
pub mod runtime;
pub mod stats;
pub mod webrtc_peer;

#[cfg(test)]
mod testing;
