// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{ConnectAckPacket, EncodePacket, MqttPacket, PingResponsePacket, ReasonCode, V5};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use luoshen::{Client, ConnectOptions, DisconnectEvent, ErrorKind};

mod common;
use common::{tick_until, ticks, MockLink};

fn connack() -> Vec<u8> {
    let mut ack = ConnectAckPacket::new(false);
    ack.set_reason_code(ReasonCode::Success);
    let mut buf = Vec::new();
    ack.encode::<V5>(&mut buf).unwrap();
    buf
}

fn connect(client: &Client, link: &MockLink) {
    let handle = client.connect(true);
    ticks(client, 3);
    link.inject_packet(connack());
    ticks(client, 2);
    assert!(handle.wait().is_ok());
    link.take_sent();
}

fn keep_alive_options(auto_reconnect: bool) -> ConnectOptions {
    ConnectOptions::builder("broker.test", 1883)
        .client_id("c1")
        .keep_alive(Duration::from_millis(300))
        .auto_reconnect(auto_reconnect)
        .reconnect_delay(Duration::from_millis(50))
        .reconnect_delay_cap(Duration::from_millis(200))
        .build()
        .unwrap()
}

fn is_pingreq(bytes: &[u8]) -> bool {
    matches!(MqttPacket::parse::<V5>(bytes), Ok(MqttPacket::PingRequest(_)))
}

#[test]
fn test_pingreq_after_quiet_window() {
    let (link, transport) = MockLink::new();
    let client = Client::with_transport(keep_alive_options(false), transport);
    connect(&client, &link);

    // Suppress all traffic: a PINGREQ goes out after the keep alive window.
    assert!(tick_until(&client, 200, || link.sent_count() > 0));
    let sent = link.take_sent();
    assert!(is_pingreq(&sent[0]));
}

#[test]
fn test_pingresp_keeps_session_alive() {
    let (link, transport) = MockLink::new();
    let client = Client::with_transport(keep_alive_options(false), transport);
    connect(&client, &link);

    assert!(tick_until(&client, 200, || link.sent_count() > 0));
    assert!(is_pingreq(&link.take_sent()[0]));

    link.inject_packet({
        let mut buf = Vec::new();
        PingResponsePacket::new().encode::<V5>(&mut buf).unwrap();
        buf
    });
    ticks(&client, 2);

    // Stay connected beyond the 1.5x window.
    std::thread::sleep(Duration::from_millis(500));
    ticks(&client, 2);
    assert!(client.is_connected());
}

#[test]
fn test_keep_alive_loss_disconnects() {
    let (link, transport) = MockLink::new();
    let client = Client::with_transport(keep_alive_options(false), transport);
    connect(&client, &link);

    let events: Arc<Mutex<Vec<DisconnectEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&events);
    let _handle = client.on_disconnect().add(move |event| {
        seen.lock().unwrap().push(event.clone());
    });

    // PINGREQ after 300ms, loss after a further 450ms without a PINGRESP.
    assert!(tick_until(&client, 400, || !client.is_connected()));

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    let reason = events[0].reason.as_ref().unwrap();
    assert_eq!(reason.kind(), ErrorKind::KeepAliveLost);
    assert!(!events[0].reconnecting);
}

#[test]
fn test_keep_alive_loss_starts_reconnect() {
    let (link, transport) = MockLink::new();
    let client = Client::with_transport(keep_alive_options(true), transport);
    connect(&client, &link);
    let initial_connects = link.connect_requests();

    let events: Arc<Mutex<Vec<DisconnectEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&events);
    let _handle = client.on_disconnect().add(move |event| {
        seen.lock().unwrap().push(event.clone());
    });

    assert!(tick_until(&client, 400, || !client.is_connected()));
    assert!(events.lock().unwrap()[0].reconnecting);

    // The reconnect timer redials the transport after the backoff.
    assert!(tick_until(&client, 100, || {
        link.connect_requests() > initial_connects
    }));

    // The redial carries a fresh CONNECT once the transport reports up.
    assert!(tick_until(&client, 40, || {
        link.take_sent()
            .iter()
            .any(|bytes| matches!(MqttPacket::parse::<V5>(bytes), Ok(MqttPacket::Connect(_))))
    }));
    link.inject_packet(connack());
    assert!(tick_until(&client, 40, || client.is_connected()));
}
