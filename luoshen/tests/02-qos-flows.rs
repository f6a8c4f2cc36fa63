// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{
    ConnectAckPacket, EncodePacket, MqttPacket, PacketId, Property, PublishAckPacket,
    PublishCompletePacket, PublishPacket, PublishReceivedPacket, PublishReleasePacket, QoS,
    ReasonCode, U16Data, V5,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use luoshen::{Client, ConnectOptions, ErrorKind, Message};

mod common;
use common::{tick_until, ticks, MockLink};

fn connect_with(client: &Client, link: &MockLink, receive_maximum: Option<u16>) {
    let handle = client.connect(true);
    ticks(client, 3);
    let mut ack = ConnectAckPacket::new(false);
    ack.set_reason_code(ReasonCode::Success);
    if let Some(maximum) = receive_maximum {
        ack.properties_mut()
            .push(Property::ReceiveMaximum(U16Data::new(maximum)));
    }
    let mut buf = Vec::new();
    ack.encode::<V5>(&mut buf).unwrap();
    link.inject_packet(buf);
    ticks(client, 2);
    assert!(handle.wait().is_ok());
    link.take_sent();
}

fn connected_client() -> (Client, MockLink) {
    let (link, transport) = MockLink::new();
    let options = ConnectOptions::builder("broker.test", 1883)
        .client_id("c1")
        .retry_interval(Duration::from_millis(60))
        .retry_multiplier(2.0)
        .retry_interval_cap(Duration::from_millis(240))
        .max_packet_retries(3)
        .build()
        .unwrap();
    let client = Client::with_transport(options, transport);
    connect_with(&client, &link, None);
    (client, link)
}

fn encode<P: EncodePacket>(packet: &P) -> Vec<u8> {
    let mut buf = Vec::new();
    packet.encode::<V5>(&mut buf).unwrap();
    buf
}

fn sent_publish(link: &MockLink) -> PublishPacket {
    let sent = link.take_sent();
    assert_eq!(sent.len(), 1);
    let MqttPacket::Publish(publish) = MqttPacket::parse::<V5>(&sent[0]).unwrap() else {
        panic!("expected PUBLISH");
    };
    publish
}

#[test]
fn test_qos0_publish_completes_on_send() {
    let (client, link) = connected_client();

    let message = Message::new("t", QoS::AtMostOnce, &[0x61]).unwrap();
    let handle = client.publish(message);
    ticks(&client, 2);

    assert!(handle.wait().is_ok());
    let publish = sent_publish(&link);
    assert_eq!(publish.topic(), "t");
    assert_eq!(publish.message(), &[0x61]);
    assert_eq!(publish.qos(), QoS::AtMostOnce);
}

#[test]
fn test_qos1_publish_immediate_ack() {
    let (client, link) = connected_client();

    let message = Message::new("t", QoS::AtLeastOnce, &[0x61]).unwrap();
    let handle = client.publish(message);
    ticks(&client, 2);

    let publish = sent_publish(&link);
    assert_eq!(publish.qos(), QoS::AtLeastOnce);
    assert!(!publish.dup());

    link.inject_packet(encode(&PublishAckPacket::new(publish.packet_id())));
    ticks(&client, 2);
    assert!(handle.wait().is_ok());

    // The entry is gone: the retry deadline passes without a retransmission.
    std::thread::sleep(Duration::from_millis(100));
    ticks(&client, 2);
    assert_eq!(link.sent_count(), 0);
}

#[test]
fn test_qos2_retransmission_then_completion() {
    let (client, link) = connected_client();

    let message = Message::new("t", QoS::ExactOnce, &[0x62]).unwrap();
    let handle = client.publish(message);
    ticks(&client, 2);

    let first = sent_publish(&link);
    assert_eq!(first.qos(), QoS::ExactOnce);
    assert!(!first.dup());

    // Drop the first PUBREC silently; after the retry interval the PUBLISH
    // is retransmitted with DUP set.
    assert!(tick_until(&client, 60, || link.sent_count() > 0));
    let second = sent_publish(&link);
    assert_eq!(second.packet_id(), first.packet_id());
    assert!(second.dup());

    link.inject_packet(encode(&PublishReceivedPacket::new(first.packet_id())));
    ticks(&client, 2);
    let sent = link.take_sent();
    assert_eq!(sent.len(), 1);
    let MqttPacket::PublishRelease(release) = MqttPacket::parse::<V5>(&sent[0]).unwrap() else {
        panic!("expected PUBREL");
    };
    assert_eq!(release.packet_id(), first.packet_id());

    link.inject_packet(encode(&PublishCompletePacket::new(first.packet_id())));
    ticks(&client, 2);
    assert!(handle.wait().is_ok());
}

#[test]
fn test_duplicate_pubrec_is_idempotent() {
    let (client, link) = connected_client();

    let message = Message::new("t", QoS::ExactOnce, &[0x62]).unwrap();
    let handle = client.publish(message);
    ticks(&client, 2);
    let publish = sent_publish(&link);

    link.inject_packet(encode(&PublishReceivedPacket::new(publish.packet_id())));
    link.inject_packet(encode(&PublishReceivedPacket::new(publish.packet_id())));
    ticks(&client, 2);

    // Both PUBRECs are answered with the same PUBREL.
    let sent = link.take_sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], sent[1]);

    link.inject_packet(encode(&PublishCompletePacket::new(publish.packet_id())));
    ticks(&client, 2);
    assert!(handle.wait().is_ok());
}

#[test]
fn test_retries_exhausted() {
    let (client, link) = connected_client();

    let message = Message::new("t", QoS::AtLeastOnce, &[0x61]).unwrap();
    let handle = client.publish(message);
    ticks(&client, 2);
    assert_eq!(link.take_sent().len(), 1);

    // Never acknowledge: 3 retries, then the producer fails.
    let failed = tick_until(&client, 400, || handle.is_done());
    assert!(failed);
    assert_eq!(handle.wait().unwrap_err().kind(), ErrorKind::RetriesExhausted);
    assert_eq!(link.sent_count(), 3);
}

#[test]
fn test_inbound_qos1_publish_is_acked() {
    let (client, link) = connected_client();

    let received = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&received);
    let _handle = client.on_message().add(move |message| {
        assert_eq!(message.topic(), "news");
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let mut publish = PublishPacket::new("news", QoS::AtLeastOnce, b"x").unwrap();
    publish.set_packet_id(PacketId::new(7));
    link.inject_packet(encode(&publish));
    ticks(&client, 2);

    assert_eq!(received.load(Ordering::SeqCst), 1);
    let sent = link.take_sent();
    assert_eq!(sent.len(), 1);
    let MqttPacket::PublishAck(ack) = MqttPacket::parse::<V5>(&sent[0]).unwrap() else {
        panic!("expected PUBACK");
    };
    assert_eq!(ack.packet_id(), PacketId::new(7));
}

#[test]
fn test_inbound_qos2_duplicate_not_dispatched_twice() {
    let (client, link) = connected_client();

    let received = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&received);
    let _handle = client.on_message().add(move |_message| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let mut publish = PublishPacket::new("news", QoS::ExactOnce, b"x").unwrap();
    publish.set_packet_id(PacketId::new(9));
    link.inject_packet(encode(&publish));
    ticks(&client, 2);

    let mut duplicate = PublishPacket::new("news", QoS::ExactOnce, b"x").unwrap();
    duplicate.set_packet_id(PacketId::new(9));
    duplicate.set_dup(true).unwrap();
    link.inject_packet(encode(&duplicate));
    ticks(&client, 2);

    // One dispatch, two PUBRECs.
    assert_eq!(received.load(Ordering::SeqCst), 1);
    let pubrecs = link
        .take_sent()
        .iter()
        .filter(|bytes| matches!(MqttPacket::parse::<V5>(bytes), Ok(MqttPacket::PublishReceived(_))))
        .count();
    assert_eq!(pubrecs, 2);

    link.inject_packet(encode(&PublishReleasePacket::new(PacketId::new(9))));
    ticks(&client, 2);
    let sent = link.take_sent();
    assert!(matches!(
        MqttPacket::parse::<V5>(&sent[0]),
        Ok(MqttPacket::PublishComplete(_))
    ));
}

#[test]
fn test_backpressure_surfaces_to_producer() {
    let (client, link) = connected_client();
    link.set_max_outbound(8);

    let message = Message::new("t", QoS::AtMostOnce, &[0u8; 64]).unwrap();
    let handle = client.publish(message);
    ticks(&client, 2);

    assert_eq!(
        handle.wait().unwrap_err().kind(),
        ErrorKind::BackpressureExceeded
    );
}

#[test]
fn test_pending_cap_rejects_with_queue_full() {
    let (link, transport) = MockLink::new();
    let options = ConnectOptions::builder("broker.test", 1883)
        .client_id("c1")
        .max_pending_commands(1)
        .build()
        .unwrap();
    let client = Client::with_transport(options, transport);
    connect_with(&client, &link, None);

    let first = client.publish(Message::new("t", QoS::AtLeastOnce, b"a").unwrap());
    ticks(&client, 2);
    assert_eq!(link.take_sent().len(), 1);

    // The configured cap is hit while the first publish is unacknowledged:
    // the producer is rejected, nothing reaches the wire.
    let second = client.publish(Message::new("t", QoS::AtLeastOnce, b"b").unwrap());
    ticks(&client, 2);
    assert_eq!(second.wait().unwrap_err().kind(), ErrorKind::QueueFull);
    assert_eq!(link.sent_count(), 0);
    assert!(!first.is_done());
}

#[test]
fn test_receive_maximum_defers_commands() {
    let (link, transport) = MockLink::new();
    let options = ConnectOptions::builder("broker.test", 1883)
        .client_id("c1")
        .build()
        .unwrap();
    let client = Client::with_transport(options, transport);
    connect_with(&client, &link, Some(1));

    let first = client.publish(Message::new("t", QoS::AtLeastOnce, b"a").unwrap());
    ticks(&client, 2);
    let publish = sent_publish(&link);

    // The broker window is full: the second publish waits in the queue,
    // it is not rejected.
    let second = client.publish(Message::new("t", QoS::AtLeastOnce, b"b").unwrap());
    ticks(&client, 3);
    assert!(!second.is_done());
    assert_eq!(link.sent_count(), 0);

    // An acknowledgement frees the window and the deferred publish flows.
    link.inject_packet(encode(&PublishAckPacket::new(publish.packet_id())));
    ticks(&client, 2);
    assert!(first.wait().is_ok());
    let next = sent_publish(&link);
    link.inject_packet(encode(&PublishAckPacket::new(next.packet_id())));
    ticks(&client, 2);
    assert!(second.wait().is_ok());
}

#[test]
fn test_session_loss_settles_pending_publishes() {
    let (client, link) = connected_client();

    let message = Message::new("t", QoS::AtLeastOnce, &[0x61]).unwrap();
    let handle = client.publish(message);
    ticks(&client, 2);
    assert_eq!(link.take_sent().len(), 1);

    link.drop_link();
    ticks(&client, 2);

    assert_eq!(handle.wait().unwrap_err().kind(), ErrorKind::SessionLost);
    assert!(!client.is_connected());
}
