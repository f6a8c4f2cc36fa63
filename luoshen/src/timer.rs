// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Monotonic timer service of the reactor.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::time::Instant;

/// What a timer firing means to the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerKind {
    /// No CONNACK before this deadline ends the handshake.
    HandshakeTimeout,

    /// Time to check whether a PINGREQ is due.
    KeepAlive,

    /// An unanswered PINGREQ past this deadline loses the session.
    PingTimeout,

    /// Backoff before the next reconnect attempt.
    Reconnect,

    /// Scan the in-flight tracker for packets past their retry deadline.
    RetryScan,
}

/// Identifier of one scheduled timer, used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug, PartialEq, Eq)]
struct TimerEntry {
    deadline: Instant,
    id: u64,
    kind: TimerKind,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Deadline keyed min-heap with lazy cancellation.
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    cancelled: HashSet<u64>,
    next_id: u64,
}

impl TimerQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            cancelled: HashSet::new(),
            next_id: 1,
        }
    }

    /// Schedule a `kind` timer at `deadline`.
    pub fn schedule(&mut self, kind: TimerKind, deadline: Instant) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Reverse(TimerEntry { deadline, id, kind }));
        TimerId(id)
    }

    /// Cancel one timer. Cancelled entries are skipped when they surface.
    pub fn cancel(&mut self, timer_id: TimerId) {
        self.cancelled.insert(timer_id.0);
    }

    /// Pop the next timer whose deadline has passed.
    #[must_use]
    pub fn pop_ready(&mut self, now: Instant) -> Option<(TimerId, TimerKind)> {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.deadline > now {
                return None;
            }
            let Reverse(entry) = self.heap.pop()?;
            if self.cancelled.remove(&entry.id) {
                continue;
            }
            return Some((TimerId(entry.id), entry.kind));
        }
        None
    }

    /// Deadline of the earliest live timer.
    #[must_use]
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if self.cancelled.contains(&entry.id) {
                let Reverse(entry) = self.heap.pop()?;
                self.cancelled.remove(&entry.id);
                continue;
            }
            return Some(entry.deadline);
        }
        None
    }

    /// Drop every scheduled timer.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.cancelled.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pop_in_deadline_order() {
        let mut timers = TimerQueue::new();
        let now = Instant::now();
        timers.schedule(TimerKind::KeepAlive, now + Duration::from_secs(2));
        timers.schedule(TimerKind::RetryScan, now + Duration::from_secs(1));

        let later = now + Duration::from_secs(3);
        assert_eq!(timers.pop_ready(later).unwrap().1, TimerKind::RetryScan);
        assert_eq!(timers.pop_ready(later).unwrap().1, TimerKind::KeepAlive);
        assert!(timers.pop_ready(later).is_none());
    }

    #[test]
    fn test_not_ready_before_deadline() {
        let mut timers = TimerQueue::new();
        let now = Instant::now();
        timers.schedule(TimerKind::KeepAlive, now + Duration::from_secs(60));
        assert!(timers.pop_ready(now).is_none());
    }

    #[test]
    fn test_cancel() {
        let mut timers = TimerQueue::new();
        let now = Instant::now();
        let id = timers.schedule(TimerKind::Reconnect, now);
        timers.cancel(id);
        assert!(timers.pop_ready(now + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_next_deadline_skips_cancelled() {
        let mut timers = TimerQueue::new();
        let now = Instant::now();
        let first = timers.schedule(TimerKind::RetryScan, now + Duration::from_secs(1));
        timers.schedule(TimerKind::KeepAlive, now + Duration::from_secs(5));
        timers.cancel(first);
        assert_eq!(timers.next_deadline(), Some(now + Duration::from_secs(5)));
    }
}
