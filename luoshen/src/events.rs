// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Event payloads broadcast through the client delegates.

use codec::PacketId;

use crate::delegate::Multicast;
use crate::error::Error;
use crate::message::{Message, SubscribeResult, UnsubscribeResult};

/// Result of one connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectEvent {
    /// Whether the broker accepted the connection.
    pub accepted: bool,

    /// Session-present flag from CONNACK.
    pub session_present: bool,

    /// Raw refusal byte, zero when accepted.
    pub code: u8,
}

/// The session ended.
#[derive(Debug, Clone)]
pub struct DisconnectEvent {
    /// Cause of the loss; `None` for a voluntary disconnect.
    pub reason: Option<Error>,

    /// Whether the client will try to reconnect on its own.
    pub reconnecting: bool,
}

/// A QoS 1 or QoS 2 publish flow completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAckEvent {
    pub packet_id: PacketId,
}

/// A subscribe command was acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeAckEvent {
    pub results: Vec<SubscribeResult>,
}

/// An unsubscribe command was acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeAckEvent {
    pub results: Vec<UnsubscribeResult>,
}

/// All client delegates, shared between the reactor and the facade.
#[derive(Debug, Default, Clone)]
pub struct ClientDelegates {
    pub connect: Multicast<ConnectEvent>,
    pub disconnect: Multicast<DisconnectEvent>,
    pub publish_ack: Multicast<PublishAckEvent>,
    pub subscribe_ack: Multicast<SubscribeAckEvent>,
    pub unsubscribe_ack: Multicast<UnsubscribeAckEvent>,
    pub message: Multicast<Message>,
}

impl ClientDelegates {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
