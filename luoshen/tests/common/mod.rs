// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Scripted transport fixture for session scenario tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use luoshen::{Client, Error, ErrorKind, Transport, TransportEvent};

#[derive(Debug, Default)]
struct Shared {
    connected: bool,
    connect_requests: usize,
    fail_connect: bool,
    max_outbound: Option<usize>,
    events: VecDeque<TransportEvent>,
    sent: Vec<Vec<u8>>,
}

/// Test side handle of a [`MockTransport`] pair.
#[derive(Clone)]
pub struct MockLink {
    shared: Arc<Mutex<Shared>>,
}

pub struct MockTransport {
    shared: Arc<Mutex<Shared>>,
}

impl MockLink {
    /// Create a connected link/transport pair. Connect attempts succeed
    /// immediately.
    pub fn new() -> (Self, Box<dyn Transport>) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            Box::new(MockTransport { shared }),
        )
    }

    /// Deliver one framed broker packet to the client.
    pub fn inject_packet(&self, bytes: Vec<u8>) {
        self.shared
            .lock()
            .unwrap()
            .events
            .push_back(TransportEvent::Packet(bytes));
    }

    /// Sever the link as if the broker dropped the connection.
    pub fn drop_link(&self) {
        let mut shared = self.shared.lock().unwrap();
        shared.connected = false;
        shared.events.push_back(TransportEvent::Disconnected {
            reason: Some(Error::new(ErrorKind::TransportDropped, "link severed")),
        });
    }

    /// Make future connect attempts fail.
    pub fn fail_connects(&self, fail: bool) {
        self.shared.lock().unwrap().fail_connect = fail;
    }

    /// Cap the outbound queue so sends report backpressure.
    pub fn set_max_outbound(&self, bytes: usize) {
        self.shared.lock().unwrap().max_outbound = Some(bytes);
    }

    /// Take every packet the client has written so far.
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.shared.lock().unwrap().sent)
    }

    pub fn sent_count(&self) -> usize {
        self.shared.lock().unwrap().sent.len()
    }

    pub fn connect_requests(&self) -> usize {
        self.shared.lock().unwrap().connect_requests
    }
}

impl Transport for MockTransport {
    fn connect(&mut self) -> Result<(), Error> {
        let mut shared = self.shared.lock().unwrap();
        shared.connect_requests += 1;
        if shared.fail_connect {
            return Err(Error::new(ErrorKind::TransportRefused, "scripted failure"));
        }
        if !shared.connected {
            shared.connected = true;
            shared.events.push_back(TransportEvent::Connected);
        }
        Ok(())
    }

    fn send(&mut self, packet: &[u8]) -> Result<(), Error> {
        let mut shared = self.shared.lock().unwrap();
        if !shared.connected {
            return Err(Error::new(ErrorKind::InvalidState, "not connected"));
        }
        if let Some(max_outbound) = shared.max_outbound {
            if packet.len() > max_outbound {
                return Err(Error::new(
                    ErrorKind::BackpressureExceeded,
                    "outbound queue cap exceeded",
                ));
            }
        }
        shared.sent.push(packet.to_vec());
        Ok(())
    }

    fn close(&mut self, _code: i32, _reason: &str) {
        let mut shared = self.shared.lock().unwrap();
        if shared.connected {
            shared.connected = false;
            shared
                .events
                .push_back(TransportEvent::Disconnected { reason: None });
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.lock().unwrap().connected
    }

    fn tick(&mut self) {}

    fn flush(&mut self) {}

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.shared.lock().unwrap().events.pop_front()
    }

    fn outbound_bytes(&self) -> usize {
        0
    }
}

/// Run `count` reactor rounds.
pub fn ticks(client: &Client, count: usize) {
    for _ in 0..count {
        client.tick();
    }
}

/// Tick until `predicate` holds or `rounds` rounds elapsed, sleeping
/// between rounds.
pub fn tick_until(client: &Client, rounds: usize, predicate: impl Fn() -> bool) -> bool {
    for _ in 0..rounds {
        client.tick();
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}
