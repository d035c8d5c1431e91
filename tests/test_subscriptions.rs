//! Integration tests for queue subscriptions and message delivery

mod test_helpers;

use bytes::Bytes;
use fleetmq::testing::{MockTransport, TestPacket};
use fleetmq::{
    ConnectionEvent, ExchangeSpec, QueueSpec, Received, ReceiveFilters, SubscribeOptions,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use test_helpers::{settle, test_client, test_serializer};

fn filters() -> ReceiveFilters {
    let mut filters = ReceiveFilters::new();
    filters.insert(TestPacket::KIND, None);
    filters
}

#[tokio::test]
async fn test_subscription_spans_every_usable_broker() {
    let transport = Arc::new(MockTransport::new().auto_connect());
    let client = test_client(&transport, "first,second").await;
    settle().await;

    let (sink, _rx) = mpsc::unbounded_channel();
    let subscribed = client
        .subscribe(
            &QueueSpec::new("input"),
            Some(&ExchangeSpec::direct("input")),
            filters(),
            SubscribeOptions::default(),
            sink,
        )
        .await;
    assert_eq!(
        subscribed,
        vec!["rs-broker-first-5672", "rs-broker-second-5672"]
    );
}

#[tokio::test]
async fn test_deliveries_arrive_tagged_with_broker_identity() {
    let transport = Arc::new(MockTransport::new().auto_connect());
    let client = test_client(&transport, "first,second").await;
    settle().await;

    let (sink, mut rx) = mpsc::unbounded_channel();
    client
        .subscribe(
            &QueueSpec::new("input"),
            Some(&ExchangeSpec::direct("input")),
            filters(),
            SubscribeOptions::default(),
            sink,
        )
        .await;

    let raw = test_serializer().dump(&TestPacket::new("from-second")).unwrap();
    transport.channel("second", 5672).unwrap().deliver(1, raw);

    let (identity, received) = rx.recv().await.unwrap();
    assert_eq!(identity, "rs-broker-second-5672");
    match received {
        Received::Packet(packet) => assert!(packet.display(None).contains("from-second")),
        other => panic!("expected a packet, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ack_mode_acknowledges_each_delivery() {
    let transport = Arc::new(MockTransport::new().auto_connect());
    let client = test_client(&transport, "first").await;
    settle().await;

    let (sink, mut rx) = mpsc::unbounded_channel();
    client
        .subscribe(
            &QueueSpec::new("input"),
            None,
            filters(),
            SubscribeOptions {
                ack: true,
                ..Default::default()
            },
            sink,
        )
        .await;

    let channel = transport.channel("first", 5672).unwrap();
    let raw = test_serializer().dump(&TestPacket::new("token")).unwrap();
    channel.deliver(42, raw);
    rx.recv().await.unwrap();
    assert_eq!(channel.acked(), vec![42]);
}

#[tokio::test]
async fn test_unrecognized_packet_kind_is_surfaced_not_dropped() {
    let transport = Arc::new(MockTransport::new().auto_connect());
    let client = test_client(&transport, "first").await;
    settle().await;

    let (sink, mut rx) = mpsc::unbounded_channel();
    client
        .subscribe(
            &QueueSpec::new("input"),
            None,
            ReceiveFilters::new(), // nothing expected on this queue
            SubscribeOptions::default(),
            sink,
        )
        .await;

    let raw = test_serializer().dump(&TestPacket::new("token")).unwrap();
    transport.channel("first", 5672).unwrap().deliver(1, raw);

    let (_, received) = rx.recv().await.unwrap();
    assert!(matches!(received, Received::Unrecognized));
}

#[tokio::test]
async fn test_undeserializable_payload_is_skipped() {
    let transport = Arc::new(MockTransport::new().auto_connect());
    let client = test_client(&transport, "first").await;
    settle().await;

    let (sink, mut rx) = mpsc::unbounded_channel();
    client
        .subscribe(
            &QueueSpec::new("input"),
            None,
            filters(),
            SubscribeOptions::default(),
            sink,
        )
        .await;

    let channel = transport.channel("first", 5672).unwrap();
    channel.deliver(1, Bytes::from_static(b"garbage"));
    let raw = test_serializer().dump(&TestPacket::new("good")).unwrap();
    channel.deliver(2, raw);

    // only the well-formed message comes through
    let (_, received) = rx.recv().await.unwrap();
    match received {
        Received::Packet(packet) => assert!(packet.display(None).contains("good")),
        other => panic!("expected a packet, got {other:?}"),
    }
}

#[tokio::test]
async fn test_raw_mode_delivers_undeserialized_payloads() {
    let transport = Arc::new(MockTransport::new().auto_connect());
    let client = test_client(&transport, "first").await;
    settle().await;

    let (sink, mut rx) = mpsc::unbounded_channel();
    client
        .subscribe(
            &QueueSpec::new("input"),
            None,
            ReceiveFilters::new(),
            SubscribeOptions {
                no_unserialize: true,
                ..Default::default()
            },
            sink,
        )
        .await;

    transport
        .channel("first", 5672)
        .unwrap()
        .deliver(1, Bytes::from_static(b"opaque"));
    let (_, received) = rx.recv().await.unwrap();
    match received {
        Received::Raw(payload) => assert_eq!(&payload[..], b"opaque"),
        other => panic!("expected raw bytes, got {other:?}"),
    }
}

#[tokio::test]
async fn test_disconnected_broker_excluded_from_new_subscriptions() {
    let transport = Arc::new(MockTransport::new().auto_connect());
    let client = test_client(&transport, "first,second").await;
    settle().await;

    transport.emit(
        "first",
        5672,
        ConnectionEvent::Disconnected("socket reset".to_string()),
    );
    settle().await;

    let (sink, _rx) = mpsc::unbounded_channel();
    let subscribed = client
        .subscribe(
            &QueueSpec::new("input"),
            None,
            filters(),
            SubscribeOptions::default(),
            sink,
        )
        .await;
    assert_eq!(subscribed, vec!["rs-broker-second-5672"]);
}

#[tokio::test]
async fn test_delete_queue_on_every_usable_broker() {
    let transport = Arc::new(MockTransport::new().auto_connect());
    transport.refuse("down", 5672);
    let client = test_client(&transport, "first,down,second").await;
    settle().await;

    let deleted = client.delete("input").await;
    assert_eq!(
        deleted,
        vec!["rs-broker-first-5672", "rs-broker-second-5672"]
    );
    assert_eq!(transport.channel("first", 5672).unwrap().deleted(), vec!["input"]);
}
