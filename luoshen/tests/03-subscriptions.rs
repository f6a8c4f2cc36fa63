// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{
    ConnectAckPacket, EncodePacket, MqttPacket, PacketId, PublishPacket, QoS, ReasonCode,
    SubscribeAck, SubscribeAckPacket, UnsubscribeAckPacket, V5,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use luoshen::{Client, ConnectOptions, ErrorKind, Message, TopicFilter};

mod common;
use common::{ticks, MockLink};

fn connected_client() -> (Client, MockLink) {
    let (link, transport) = MockLink::new();
    let options = ConnectOptions::builder("broker.test", 1883)
        .client_id("c1")
        .build()
        .unwrap();
    let client = Client::with_transport(options, transport);

    let handle = client.connect(true);
    ticks(&client, 3);
    let mut ack = ConnectAckPacket::new(false);
    ack.set_reason_code(ReasonCode::Success);
    let mut buf = Vec::new();
    ack.encode::<V5>(&mut buf).unwrap();
    link.inject_packet(buf);
    ticks(&client, 2);
    assert!(handle.wait().is_ok());
    link.take_sent();
    (client, link)
}

fn encode<P: EncodePacket>(packet: &P) -> Vec<u8> {
    let mut buf = Vec::new();
    packet.encode::<V5>(&mut buf).unwrap();
    buf
}

fn sent_subscribe_id(link: &MockLink) -> PacketId {
    let sent = link.take_sent();
    assert_eq!(sent.len(), 1);
    let MqttPacket::Subscribe(subscribe) = MqttPacket::parse::<V5>(&sent[0]).unwrap() else {
        panic!("expected SUBSCRIBE");
    };
    subscribe.packet_id()
}

#[test]
fn test_subscribe_with_mixed_results() {
    let (client, link) = connected_client();

    let sink_calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&sink_calls);
    let filters = vec![
        TopicFilter::new("a/b", QoS::AtLeastOnce)
            .unwrap()
            .with_sink(move |_msg| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        TopicFilter::new("$SYS/#", QoS::AtMostOnce).unwrap(),
    ];
    let handle = client.subscribe(filters);
    ticks(&client, 2);

    let packet_id = sent_subscribe_id(&link);
    let suback = SubscribeAckPacket::with_acks(
        packet_id,
        vec![
            SubscribeAck::GrantedQoS(QoS::AtLeastOnce),
            SubscribeAck::Failed(0x80),
        ],
    );
    link.inject_packet(encode(&suback));
    ticks(&client, 2);

    let results = handle.wait().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].filter, "a/b");
    assert_eq!(results[0].granted_qos, Some(QoS::AtLeastOnce));
    assert!(results[0].is_granted());
    assert_eq!(results[1].filter, "$SYS/#");
    assert_eq!(results[1].granted_qos, None);
    assert_eq!(results[1].code, 0x80);

    // Only the granted filter is live: a publish on a/b reaches the sink.
    link.inject_packet(encode(
        &PublishPacket::new("a/b", QoS::AtMostOnce, b"x").unwrap(),
    ));
    ticks(&client, 2);
    assert_eq!(sink_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_wildcard_dispatch_exactly_once() {
    let (client, link) = connected_client();

    let sink_calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&sink_calls);
    let filter = TopicFilter::new("home/+/temp", QoS::AtMostOnce)
        .unwrap()
        .with_sink(move |message| {
            assert_eq!(message.topic(), "home/kitchen/temp");
            seen.fetch_add(1, Ordering::SeqCst);
        });
    let handle = client.subscribe_filter(filter);
    ticks(&client, 2);

    let packet_id = sent_subscribe_id(&link);
    let suback =
        SubscribeAckPacket::with_acks(packet_id, vec![SubscribeAck::GrantedQoS(QoS::AtMostOnce)]);
    link.inject_packet(encode(&suback));
    ticks(&client, 2);
    assert!(handle.wait().is_ok());

    link.inject_packet(encode(
        &PublishPacket::new("home/kitchen/temp", QoS::AtMostOnce, b"21").unwrap(),
    ));
    ticks(&client, 2);
    assert_eq!(sink_calls.load(Ordering::SeqCst), 1);

    // One level too deep: no dispatch.
    link.inject_packet(encode(
        &PublishPacket::new("home/kitchen/living/temp", QoS::AtMostOnce, b"21").unwrap(),
    ));
    ticks(&client, 2);
    assert_eq!(sink_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unsubscribe_removes_subscription() {
    let (client, link) = connected_client();

    let sink_calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&sink_calls);
    let filter = TopicFilter::new("news", QoS::AtMostOnce)
        .unwrap()
        .with_sink(move |_msg| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
    let subscribe = client.subscribe_filter(filter);
    ticks(&client, 2);
    let packet_id = sent_subscribe_id(&link);
    link.inject_packet(encode(&SubscribeAckPacket::with_acks(
        packet_id,
        vec![SubscribeAck::GrantedQoS(QoS::AtMostOnce)],
    )));
    ticks(&client, 2);
    assert!(subscribe.wait().is_ok());

    let unsubscribe = client.unsubscribe(vec!["news".to_string()]);
    ticks(&client, 2);
    let sent = link.take_sent();
    let MqttPacket::Unsubscribe(packet) = MqttPacket::parse::<V5>(&sent[0]).unwrap() else {
        panic!("expected UNSUBSCRIBE");
    };
    link.inject_packet(encode(&UnsubscribeAckPacket::with_codes(
        packet.packet_id(),
        vec![ReasonCode::Success],
    )));
    ticks(&client, 2);

    let results = unsubscribe.wait().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].accepted);

    // Messages on the removed filter are no longer dispatched to its sink.
    link.inject_packet(encode(
        &PublishPacket::new("news", QoS::AtMostOnce, b"x").unwrap(),
    ));
    ticks(&client, 2);
    assert_eq!(sink_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_subscribe_while_disconnected() {
    let (_link, transport) = MockLink::new();
    let options = ConnectOptions::builder("broker.test", 1883).build().unwrap();
    let client = Client::with_transport(options, transport);

    let handle = client.subscribe_filter(TopicFilter::new("a", QoS::AtMostOnce).unwrap());
    ticks(&client, 2);
    assert_eq!(handle.wait().unwrap_err().kind(), ErrorKind::InvalidState);
}

#[test]
fn test_queue_full_rejects_immediately() {
    let (_link, transport) = MockLink::new();
    let options = ConnectOptions::builder("broker.test", 1883)
        .max_pending_commands(1)
        .build()
        .unwrap();
    let client = Client::with_transport(options, transport);

    // Without ticking, the queue holds at most one command.
    let _first = client.connect(true);
    let second = client.publish(Message::new("t", QoS::AtMostOnce, b"x").unwrap());
    assert_eq!(second.wait().unwrap_err().kind(), ErrorKind::QueueFull);
}
