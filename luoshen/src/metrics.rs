// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::sync::atomic::{AtomicU64, Ordering};

/// Engine counters, updated on the reactor thread and readable from any
/// thread.
#[derive(Debug, Default)]
pub struct Metrics {
    malformed_packets: AtomicU64,
    retransmissions: AtomicU64,
    reconnects: AtomicU64,
    callback_panics: AtomicU64,
    messages_dispatched: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

/// Point in time copy of all counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Malformed inbound packets dropped in lenient mode.
    pub malformed_packets: u64,

    /// Packets sent again after a retry deadline passed.
    pub retransmissions: u64,

    /// Reconnect attempts started by the auto-reconnect machinery.
    pub reconnects: u64,

    /// Event callbacks which panicked and were isolated.
    pub callback_panics: u64,

    /// Inbound application messages dispatched to subscribers.
    pub messages_dispatched: u64,

    /// Total bytes handed to the transport.
    pub bytes_sent: u64,

    /// Total packet bytes received from the transport.
    pub bytes_received: u64,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_malformed_packets(&self) {
        self.malformed_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retransmissions(&self) {
        self.retransmissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_callback_panics(&self, count: u64) {
        if count > 0 {
            self.callback_panics.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn inc_messages_dispatched(&self) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Copy all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            malformed_packets: self.malformed_packets.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}
