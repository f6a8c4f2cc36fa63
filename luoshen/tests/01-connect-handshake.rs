// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{
    ConnectAckPacket, ConnectReturnCode, EncodePacket, MqttPacket, ProtocolLevel, ReasonCode,
    V311, V5,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use luoshen::{Client, ConnectOptions, ErrorKind};

mod common;
use common::{ticks, MockLink};

fn test_options(level: ProtocolLevel) -> ConnectOptions {
    ConnectOptions::builder("broker.test", 1883)
        .client_id("c1")
        .protocol_level(level)
        .keep_alive(Duration::from_secs(30))
        .build()
        .unwrap()
}

fn connack_v5(session_present: bool, reason_code: ReasonCode) -> Vec<u8> {
    let mut packet = ConnectAckPacket::new(session_present);
    packet.set_reason_code(reason_code);
    let mut buf = Vec::new();
    packet.encode::<V5>(&mut buf).unwrap();
    buf
}

fn connack_v311(session_present: bool, return_code: ConnectReturnCode) -> Vec<u8> {
    let mut packet = ConnectAckPacket::new(session_present);
    packet.set_return_code(return_code);
    let mut buf = Vec::new();
    packet.encode::<V311>(&mut buf).unwrap();
    buf
}

#[test]
fn test_connect_connack_round_trip_v5() {
    let (link, transport) = MockLink::new();
    let client = Client::with_transport(test_options(ProtocolLevel::V5), transport);

    let handle = client.connect(true);
    ticks(&client, 3);

    // The CONNECT packet went out with the configured identity.
    let sent = link.take_sent();
    assert_eq!(sent.len(), 1);
    let MqttPacket::Connect(connect) = MqttPacket::parse::<V5>(&sent[0]).unwrap() else {
        panic!("expected CONNECT");
    };
    assert_eq!(connect.client_id(), "c1");
    assert!(connect.clean_session());
    assert_eq!(connect.keep_alive(), 30);
    assert!(connect.will().is_none());

    link.inject_packet(connack_v5(false, ReasonCode::Success));
    ticks(&client, 2);

    assert!(client.is_connected());
    assert!(handle.wait().is_ok());
}

#[test]
fn test_connect_event_carries_session_present() {
    let (link, transport) = MockLink::new();
    let client = Client::with_transport(test_options(ProtocolLevel::V5), transport);

    let events = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&events);
    let _handle = client.on_connect().add(move |event| {
        assert!(event.accepted);
        assert!(!event.session_present);
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let connect = client.connect(true);
    ticks(&client, 3);
    link.inject_packet(connack_v5(false, ReasonCode::Success));
    ticks(&client, 2);

    assert!(connect.wait().is_ok());
    assert_eq!(events.load(Ordering::SeqCst), 1);
}

#[test]
fn test_broker_refusal() {
    let (link, transport) = MockLink::new();
    let client = Client::with_transport(test_options(ProtocolLevel::V311), transport);

    let handle = client.connect(true);
    ticks(&client, 3);
    link.inject_packet(connack_v311(false, ConnectReturnCode::NotAuthorized));
    ticks(&client, 2);

    let err = handle.wait().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BrokerRefused(5));
    assert!(!client.is_connected());
}

#[test]
fn test_version_fallback_redial() {
    let (link, transport) = MockLink::new();
    let client = Client::with_transport(test_options(ProtocolLevel::V5), transport);

    let handle = client.connect(true);
    ticks(&client, 3);

    let sent = link.take_sent();
    assert!(MqttPacket::parse::<V5>(&sent[0]).is_ok());

    // Refuse the protocol version: one redial at 3.1.1 is attempted.
    link.inject_packet(connack_v5(false, ReasonCode::UnsupportedProtocolVersion));
    ticks(&client, 4);

    let sent = link.take_sent();
    assert_eq!(sent.len(), 1);
    let MqttPacket::Connect(_connect) = MqttPacket::parse::<V311>(&sent[0]).unwrap() else {
        panic!("expected CONNECT at fallback version");
    };

    link.inject_packet(connack_v311(false, ConnectReturnCode::Accepted));
    ticks(&client, 2);
    assert!(client.is_connected());
    assert!(handle.wait().is_ok());
}

#[test]
fn test_handshake_timeout() {
    let (_link, transport) = MockLink::new();
    let options = ConnectOptions::builder("broker.test", 1883)
        .client_id("c1")
        .connect_timeout(Duration::from_millis(40))
        .handshake_timeout(Duration::from_millis(40))
        .build()
        .unwrap();
    let client = Client::with_transport(options, transport);

    let handle = client.connect(true);
    ticks(&client, 3);
    // No CONNACK ever arrives.
    std::thread::sleep(Duration::from_millis(120));
    ticks(&client, 2);

    let err = handle.wait().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HandshakeTimedOut);
    assert!(!client.is_connected());
}

#[test]
fn test_connect_while_connected_is_rejected() {
    let (link, transport) = MockLink::new();
    let client = Client::with_transport(test_options(ProtocolLevel::V5), transport);

    let first = client.connect(true);
    ticks(&client, 3);
    link.inject_packet(connack_v5(false, ReasonCode::Success));
    ticks(&client, 2);
    assert!(first.wait().is_ok());

    let second = client.connect(true);
    ticks(&client, 2);
    assert_eq!(second.wait().unwrap_err().kind(), ErrorKind::InvalidState);
}
