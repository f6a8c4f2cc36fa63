// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! In-flight packet tracker.
//!
//! Owns the authoritative copy of every acknowledgeable outbound packet,
//! allocates packet identifiers, drives QoS 1/2 flows and retransmits
//! packets whose acknowledgement is overdue, with exponential backoff.

use codec::{PacketId, QoS};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::completion::CompletionSink;
use crate::connect_options::ConnectOptions;
use crate::error::{Error, ErrorKind};
use crate::message::{SubscribeResult, TopicFilter, UnsubscribeResult};

/// Where a tracked packet travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Which acknowledgement advances this entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightPhase {
    /// QoS 1 publish, subscribe or unsubscribe waiting for its single ack.
    AwaitingAck,

    /// QoS 2 publish waiting for PUBREC.
    AwaitingRec,

    /// QoS 2 flow waiting for PUBCOMP; the stored bytes are the PUBREL.
    AwaitingComp,

    /// Inbound QoS 2 publish waiting for PUBREL.
    AwaitingRel,
}

/// Producer completion attached to an entry.
#[derive(Debug)]
pub enum EntrySink {
    None,
    Unit(CompletionSink<()>),
    Subscribe(CompletionSink<Vec<SubscribeResult>>, Vec<TopicFilter>),
    Unsubscribe(CompletionSink<Vec<UnsubscribeResult>>, Vec<String>),
}

impl EntrySink {
    /// Settle the producer with `error`.
    pub fn fail(self, error: &Error) {
        match self {
            Self::None => {}
            Self::Unit(sink) => sink.complete_err(error.clone()),
            Self::Subscribe(sink, _) => sink.complete_err(error.clone()),
            Self::Unsubscribe(sink, _) => sink.complete_err(error.clone()),
        }
    }
}

#[derive(Debug)]
struct InFlightEntry {
    packet_id: PacketId,
    /// Encoded packet kept verbatim for retransmission.
    bytes: Vec<u8>,
    qos: QoS,
    direction: Direction,
    phase: FlightPhase,
    deadline: Instant,
    attempts: u32,
    sink: EntrySink,
}

/// Result of one retransmission scan.
#[derive(Debug, Default)]
pub struct RetryScan {
    /// Packets to put back on the wire, DUP set where applicable.
    pub resend: Vec<Vec<u8>>,

    /// Producers whose packet ran out of attempts.
    pub exhausted: Vec<EntrySink>,
}

/// Tracker of unacknowledged packets, owned by the reactor.
#[derive(Debug)]
pub struct InFlightTracker {
    entries: HashMap<u16, InFlightEntry>,
    cursor: u16,

    retry_interval: Duration,
    retry_multiplier: f64,
    retry_interval_cap: Duration,
    max_packet_retries: u32,
    max_pending: usize,

    /// Receive maximum advertised by an MQTT 5 broker, lowers the
    /// effective pending cap.
    receive_maximum: Option<u16>,
}

impl InFlightTracker {
    #[must_use]
    pub fn new(options: &ConnectOptions) -> Self {
        Self {
            entries: HashMap::new(),
            cursor: 0,
            retry_interval: options.retry_interval(),
            retry_multiplier: options.retry_multiplier(),
            retry_interval_cap: options.retry_interval_cap(),
            max_packet_retries: options.max_packet_retries(),
            max_pending: options.max_pending_commands(),
            receive_maximum: None,
        }
    }

    /// Allocate an unused packet identifier.
    ///
    /// The scan moves forward from a cursor so recently freed ids are not
    /// reused until the id space wraps.
    ///
    /// # Errors
    ///
    /// Returns `IdentifiersExhausted` when all 65535 ids are live.
    pub fn alloc_id(&mut self) -> Result<PacketId, Error> {
        for _ in 0..=u16::MAX {
            self.cursor = if self.cursor == u16::MAX {
                1
            } else {
                self.cursor + 1
            };
            if !self.entries.contains_key(&self.cursor) {
                return Ok(PacketId::new(self.cursor));
            }
        }
        Err(Error::new(
            ErrorKind::IdentifiersExhausted,
            "All packet identifiers are in flight",
        ))
    }

    /// Number of outbound entries awaiting acknowledgement.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.direction == Direction::Outbound)
            .count()
    }

    /// Effective cap on concurrently pending commands.
    #[must_use]
    pub fn effective_cap(&self) -> usize {
        match self.receive_maximum {
            Some(maximum) => self.max_pending.min(maximum as usize),
            None => self.max_pending,
        }
    }

    /// Whether another acknowledgeable command may start now.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.pending_count() < self.effective_cap()
    }

    /// Whether the configured pending-commands cap itself is reached.
    ///
    /// Reaching this cap rejects new acknowledgeable commands with
    /// `QueueFull` before any bytes are written. A broker receive maximum
    /// below the cap only defers them until acknowledgements free a slot.
    #[must_use]
    pub fn at_pending_cap(&self) -> bool {
        self.pending_count() >= self.max_pending
    }

    pub fn set_receive_maximum(&mut self, receive_maximum: Option<u16>) {
        self.receive_maximum = receive_maximum;
    }

    /// Track a committed outbound packet.
    pub fn insert_outbound(
        &mut self,
        packet_id: PacketId,
        bytes: Vec<u8>,
        qos: QoS,
        phase: FlightPhase,
        sink: EntrySink,
        now: Instant,
    ) {
        let entry = InFlightEntry {
            packet_id,
            bytes,
            qos,
            direction: Direction::Outbound,
            phase,
            deadline: now + self.retry_interval,
            attempts: 1,
            sink,
        };
        self.entries.insert(packet_id.value(), entry);
    }

    /// Remove the entry for `packet_id` if it is outbound and in `phase`,
    /// returning its producer sink.
    #[must_use]
    pub fn complete_ack(&mut self, packet_id: PacketId, phase: FlightPhase) -> Option<EntrySink> {
        match self.entries.get(&packet_id.value()) {
            Some(entry) if entry.direction == Direction::Outbound && entry.phase == phase => {
                let entry = self.entries.remove(&packet_id.value())?;
                Some(entry.sink)
            }
            Some(entry) => {
                log::warn!(
                    "inflight: Ack for packet {packet_id} in unexpected phase {:?}",
                    entry.phase
                );
                None
            }
            None => {
                log::warn!("inflight: Ack for unknown packet {packet_id}");
                None
            }
        }
    }

    /// Handle an inbound PUBREC: replace the stored publish bytes with the
    /// encoded PUBREL and restart the retry clock.
    ///
    /// Returns the bytes to send now. Duplicate PUBRECs are idempotent and
    /// trigger one more PUBREL.
    #[must_use]
    pub fn on_publish_received(
        &mut self,
        packet_id: PacketId,
        pubrel_bytes: Vec<u8>,
        now: Instant,
    ) -> Option<Vec<u8>> {
        let entry = self.entries.get_mut(&packet_id.value())?;
        if entry.direction != Direction::Outbound {
            return None;
        }
        match entry.phase {
            FlightPhase::AwaitingRec => {
                entry.bytes = pubrel_bytes;
                entry.phase = FlightPhase::AwaitingComp;
                entry.attempts = 1;
                entry.deadline = now + self.retry_interval;
                Some(entry.bytes.clone())
            }
            // Duplicate PUBREC: answer with the stored PUBREL again.
            FlightPhase::AwaitingComp => Some(entry.bytes.clone()),
            _ => {
                log::warn!(
                    "inflight: PUBREC for packet {packet_id} in phase {:?}",
                    entry.phase
                );
                None
            }
        }
    }

    /// Record the first receipt of an inbound QoS 2 publish.
    ///
    /// Returns true on first receipt; a duplicate returns false and the
    /// message must not be dispatched again.
    pub fn begin_inbound(&mut self, packet_id: PacketId, now: Instant) -> bool {
        if self.entries.contains_key(&packet_id.value()) {
            return false;
        }
        self.entries.insert(
            packet_id.value(),
            InFlightEntry {
                packet_id,
                bytes: Vec::new(),
                qos: QoS::ExactOnce,
                direction: Direction::Inbound,
                phase: FlightPhase::AwaitingRel,
                deadline: now + self.retry_interval,
                attempts: 1,
                sink: EntrySink::None,
            },
        );
        true
    }

    /// Handle an inbound PUBREL, closing the inbound QoS 2 flow.
    ///
    /// Returns true if the id was in the received set.
    pub fn release_inbound(&mut self, packet_id: PacketId) -> bool {
        match self.entries.get(&packet_id.value()) {
            Some(entry) if entry.direction == Direction::Inbound => {
                self.entries.remove(&packet_id.value());
                true
            }
            _ => false,
        }
    }

    fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(30);
        let interval =
            self.retry_interval.as_secs_f64() * self.retry_multiplier.powi(exponent as i32);
        Duration::from_secs_f64(interval.min(self.retry_interval_cap.as_secs_f64()))
    }

    /// Retransmit every outbound entry past its deadline.
    ///
    /// Entries whose attempt count would exceed the retry cap are removed
    /// and their sinks returned for a `RetriesExhausted` completion.
    #[must_use]
    pub fn retry_scan(&mut self, now: Instant) -> RetryScan {
        let mut scan = RetryScan::default();
        let due: Vec<u16> = self
            .entries
            .iter()
            .filter(|(_, e)| e.direction == Direction::Outbound && e.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in due {
            let Some(attempts) = self.entries.get(&id).map(|e| e.attempts) else {
                continue;
            };
            if attempts > self.max_packet_retries {
                if let Some(entry) = self.entries.remove(&id) {
                    log::warn!(
                        "inflight: Packet {} exhausted after {} attempts",
                        entry.packet_id,
                        entry.attempts
                    );
                    scan.exhausted.push(entry.sink);
                }
                continue;
            }

            let deadline = now + self.backoff(attempts + 1);
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.attempts += 1;
                entry.deadline = deadline;
                mark_dup(&mut entry.bytes, entry.qos);
                scan.resend.push(entry.bytes.clone());
            }
        }
        scan
    }

    /// Queue every outbound entry for resending after a reconnect with
    /// session-present, DUP set on publishes.
    #[must_use]
    pub fn resend_pending(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let mut ids: Vec<u16> = self
            .entries
            .iter()
            .filter(|(_, e)| e.direction == Direction::Outbound)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();

        let mut resend = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            entry.deadline = now + self.retry_interval;
            mark_dup(&mut entry.bytes, entry.qos);
            resend.push(entry.bytes.clone());
        }
        resend
    }

    /// Drop every entry, returning the producer sinks so they can be
    /// settled with the session loss error.
    #[must_use]
    pub fn abort_all(&mut self) -> Vec<EntrySink> {
        let mut sinks = Vec::new();
        for (_, entry) in self.entries.drain() {
            if entry.direction == Direction::Outbound {
                sinks.push(entry.sink);
            }
        }
        sinks
    }

    /// Earliest retry deadline over all outbound entries.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .values()
            .filter(|e| e.direction == Direction::Outbound)
            .map(|e| e.deadline)
            .min()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Set the DUP flag on a stored PUBLISH packet. Other packet types are
/// retransmitted verbatim.
fn mark_dup(bytes: &mut [u8], qos: QoS) {
    if qos != QoS::AtMostOnce && !bytes.is_empty() && bytes[0] >> 4 == 3 {
        bytes[0] |= 0b0000_1000;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::completion_pair;
    use crate::connect_options::ConnectOptions;

    fn tracker() -> InFlightTracker {
        let options = ConnectOptions::builder("localhost", 1883)
            .retry_interval(Duration::from_millis(100))
            .retry_multiplier(2.0)
            .retry_interval_cap(Duration::from_millis(400))
            .max_packet_retries(2)
            .build()
            .unwrap();
        InFlightTracker::new(&options)
    }

    #[test]
    fn test_alloc_id_skips_live() {
        let mut tracker = tracker();
        let now = Instant::now();
        let first = tracker.alloc_id().unwrap();
        assert_eq!(first.value(), 1);
        tracker.insert_outbound(
            first,
            vec![0x30, 0x00],
            QoS::AtLeastOnce,
            FlightPhase::AwaitingAck,
            EntrySink::None,
            now,
        );

        let second = tracker.alloc_id().unwrap();
        assert_ne!(second.value(), first.value());
    }

    #[test]
    fn test_no_two_live_entries_share_id() {
        let mut tracker = tracker();
        let now = Instant::now();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let id = tracker.alloc_id().unwrap();
            assert!(seen.insert(id.value()));
            tracker.insert_outbound(
                id,
                vec![0x30, 0x00],
                QoS::AtLeastOnce,
                FlightPhase::AwaitingAck,
                EntrySink::None,
                now,
            );
        }
    }

    #[test]
    fn test_qos1_ack_completes() {
        let mut tracker = tracker();
        let now = Instant::now();
        let id = tracker.alloc_id().unwrap();
        let (sink, handle) = completion_pair::<()>();
        tracker.insert_outbound(
            id,
            vec![0x32, 0x00],
            QoS::AtLeastOnce,
            FlightPhase::AwaitingAck,
            EntrySink::Unit(sink),
            now,
        );

        let sink = tracker.complete_ack(id, FlightPhase::AwaitingAck).unwrap();
        if let EntrySink::Unit(sink) = sink {
            sink.complete_ok(());
        }
        assert!(handle.wait().is_ok());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_retry_backoff_deadlines() {
        let mut tracker = tracker();
        let now = Instant::now();
        assert_eq!(tracker.backoff(1), Duration::from_millis(100));
        assert_eq!(tracker.backoff(2), Duration::from_millis(200));
        assert_eq!(tracker.backoff(3), Duration::from_millis(400));
        // Clamped to the cap.
        assert_eq!(tracker.backoff(4), Duration::from_millis(400));

        let id = tracker.alloc_id().unwrap();
        tracker.insert_outbound(
            id,
            vec![0x32, 0x00],
            QoS::AtLeastOnce,
            FlightPhase::AwaitingAck,
            EntrySink::None,
            now,
        );

        // First deadline passes: one resend with DUP set, attempts becomes 2.
        let scan = tracker.retry_scan(now + Duration::from_millis(150));
        assert_eq!(scan.resend.len(), 1);
        assert_eq!(scan.resend[0][0] & 0b0000_1000, 0b0000_1000);
        assert!(scan.exhausted.is_empty());
    }

    #[test]
    fn test_retries_exhausted() {
        let mut tracker = tracker();
        let mut now = Instant::now();
        let id = tracker.alloc_id().unwrap();
        tracker.insert_outbound(
            id,
            vec![0x32, 0x00],
            QoS::AtLeastOnce,
            FlightPhase::AwaitingAck,
            EntrySink::None,
            now,
        );

        // max_packet_retries = 2: two retransmissions then exhaustion.
        for _ in 0..2 {
            now += Duration::from_secs(1);
            let scan = tracker.retry_scan(now);
            assert_eq!(scan.resend.len(), 1);
            assert!(scan.exhausted.is_empty());
        }
        now += Duration::from_secs(1);
        let scan = tracker.retry_scan(now);
        assert!(scan.resend.is_empty());
        assert_eq!(scan.exhausted.len(), 1);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_qos2_pubrec_swaps_to_pubrel() {
        let mut tracker = tracker();
        let now = Instant::now();
        let id = tracker.alloc_id().unwrap();
        tracker.insert_outbound(
            id,
            vec![0x34, 0x00],
            QoS::ExactOnce,
            FlightPhase::AwaitingRec,
            EntrySink::None,
            now,
        );

        let pubrel = vec![0x62, 0x02, 0x00, 0x01];
        let sent = tracker
            .on_publish_received(id, pubrel.clone(), now)
            .unwrap();
        assert_eq!(sent, pubrel);

        // Duplicate PUBREC answers with the same PUBREL.
        let again = tracker.on_publish_received(id, vec![], now).unwrap();
        assert_eq!(again, pubrel);

        assert!(tracker
            .complete_ack(id, FlightPhase::AwaitingComp)
            .is_some());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_inbound_qos2_dedup() {
        let mut tracker = tracker();
        let now = Instant::now();
        let id = PacketId::new(9);
        assert!(tracker.begin_inbound(id, now));
        assert!(!tracker.begin_inbound(id, now));
        assert!(tracker.release_inbound(id));
        assert!(!tracker.release_inbound(id));
    }

    #[test]
    fn test_receive_maximum_caps_pending() {
        let mut tracker = tracker();
        tracker.set_receive_maximum(Some(1));
        assert_eq!(tracker.effective_cap(), 1);
        assert!(tracker.has_capacity());

        let now = Instant::now();
        let id = tracker.alloc_id().unwrap();
        tracker.insert_outbound(
            id,
            vec![0x32, 0x00],
            QoS::AtLeastOnce,
            FlightPhase::AwaitingAck,
            EntrySink::None,
            now,
        );
        // The narrowed window is full, the configured cap is not.
        assert!(!tracker.has_capacity());
        assert!(!tracker.at_pending_cap());
    }

    #[test]
    fn test_configured_pending_cap_reached() {
        let options = ConnectOptions::builder("localhost", 1883)
            .max_pending_commands(1)
            .build()
            .unwrap();
        let mut tracker = InFlightTracker::new(&options);

        let now = Instant::now();
        let id = tracker.alloc_id().unwrap();
        tracker.insert_outbound(
            id,
            vec![0x32, 0x00],
            QoS::AtLeastOnce,
            FlightPhase::AwaitingAck,
            EntrySink::None,
            now,
        );
        assert!(tracker.at_pending_cap());
        assert!(!tracker.has_capacity());
    }
}
