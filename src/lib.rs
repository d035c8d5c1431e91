//! FleetMQ - High-availability message-queue client
//!
//! Client-side high availability over a prioritized set of message brokers,
//! as used by fleet-management agents that must keep publishing and consuming
//! while individual brokers come and go.
//!
//! # Overview
//!
//! This crate provides:
//! - Broker identity encoding and host/port address-list parsing
//! - A per-broker connection state machine with exponential retry backoff
//! - Publish routing with priority, random, and fanout selection
//! - Subscriptions fanned out over every usable broker
//! - Aggregate connectivity callbacks with one-shot timeout support
//!
//! The wire protocol itself is external: implement [`Transport`] and
//! [`BrokerChannel`] over your messaging library, or use
//! [`testing::MockTransport`] in tests.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use fleetmq::{ClientConfig, HaBrokerClient, JsonSerializer};
//! use fleetmq::testing::MockTransport;
//!
//! async fn connect_fleet() -> fleetmq::Result<HaBrokerClient> {
//!     let transport = Arc::new(MockTransport::new().auto_connect());
//!     let serializer = Arc::new(JsonSerializer::new());
//!     let config = ClientConfig {
//!         host: Some("primary, secondary:2".to_string()),
//!         ..Default::default()
//!     };
//!     HaBrokerClient::new(transport, serializer, &config).await
//! }
//! ```

pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod observability;
pub mod router;
pub mod serialize;
pub mod status;
pub mod testing;
pub mod transport;

pub use broker::{BrokerRef, BrokerSnapshot, BrokerStatus};
pub use client::HaBrokerClient;
pub use config::{ClientConfig, ConfigError, SelectionMode};
pub use error::{FleetMqError, Result};
pub use router::{
    MessageSink, Outbound, PublishOptions, Received, ReceiveFilters, ReceiveOptions,
    SubscribeOptions,
};
pub use serialize::{JsonSerializer, Packet, SerializeError, Serializer};
pub use status::{Boundary, CallbackId, ConnectivityChange, StatusCallback, StatusOptions};
pub use transport::{
    BrokerChannel, ConnectionEvent, Delivery, ExchangeKind, ExchangeSpec, QueueSpec, Transport,
    TransportError, TransportHandle,
};
