//! Mock implementations for testing
//!
//! Provides a mock Transport and broker channel that record every operation
//! and allow scripted failures and connection-event injection, so the whole
//! client can be exercised without a real messaging backend.

use crate::serialize::Packet;
use crate::transport::{
    BrokerChannel, ConnectionEvent, Delivery, ExchangeSpec, QueueSpec, Transport, TransportError,
    TransportHandle,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Which channel operations should fail
#[derive(Debug, Default, Clone, Copy)]
pub struct MockFailures {
    pub publish: bool,
    pub subscribe: bool,
    pub delete: bool,
    pub close: bool,
}

/// Recorded publish: exchange name, payload, persistent flag
pub type PublishedMessage = (String, Bytes, bool);

/// Mock broker channel recording all operations
#[derive(Default)]
pub struct MockChannel {
    pub failures: MockFailures,
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<(String, Option<String>)>>,
    acked: Mutex<Vec<u64>>,
    deleted: Mutex<Vec<String>>,
    prefetches: Mutex<Vec<u16>>,
    closed: AtomicBool,
    delivery_tx: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failures(failures: MockFailures) -> Self {
        Self {
            failures,
            ..Default::default()
        }
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }

    pub fn subscriptions(&self) -> Vec<(String, Option<String>)> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn acked(&self) -> Vec<u64> {
        self.acked.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn prefetches(&self) -> Vec<u16> {
        self.prefetches.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Inject a delivery into the active subscription
    pub fn deliver(&self, tag: u64, payload: Bytes) {
        let guard = self.delivery_tx.lock().unwrap();
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(Delivery { tag, payload });
        }
    }
}

#[async_trait::async_trait]
impl BrokerChannel for MockChannel {
    async fn publish(
        &self,
        exchange: &ExchangeSpec,
        payload: Bytes,
        persistent: bool,
    ) -> Result<(), TransportError> {
        if self.failures.publish {
            return Err(TransportError::new("mock publish failure"));
        }
        self.published
            .lock()
            .unwrap()
            .push((exchange.name.clone(), payload, persistent));
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &QueueSpec,
        exchange: Option<&ExchangeSpec>,
        deliveries: mpsc::UnboundedSender<Delivery>,
    ) -> Result<(), TransportError> {
        if self.failures.subscribe {
            return Err(TransportError::new("mock subscribe failure"));
        }
        self.subscriptions
            .lock()
            .unwrap()
            .push((queue.name.clone(), exchange.map(|e| e.name.clone())));
        *self.delivery_tx.lock().unwrap() = Some(deliveries);
        Ok(())
    }

    async fn ack(&self, tag: u64) -> Result<(), TransportError> {
        self.acked.lock().unwrap().push(tag);
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> Result<(), TransportError> {
        if self.failures.delete {
            return Err(TransportError::new("mock delete failure"));
        }
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn prefetch(&self, count: u16) -> Result<(), TransportError> {
        self.prefetches.lock().unwrap().push(count);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        if self.failures.close {
            return Err(TransportError::new("mock close failure"));
        }
        Ok(())
    }
}

struct Endpoint {
    channel: Arc<MockChannel>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

/// Mock transport: hands out [`MockChannel`]s per endpoint and lets tests
/// inject connection lifecycle events
#[derive(Default)]
pub struct MockTransport {
    connects: Mutex<Vec<(String, u16)>>,
    refused: Mutex<Vec<(String, u16)>>,
    channel_failures: Mutex<HashMap<(String, u16), MockFailures>>,
    endpoints: Mutex<HashMap<(String, u16), Endpoint>>,
    auto_connect: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a `Connected` event immediately on every future connect
    pub fn auto_connect(self) -> Self {
        self.auto_connect.store(true, Ordering::SeqCst);
        self
    }

    /// Make connect attempts against this endpoint fail outright
    pub fn refuse(&self, host: &str, port: u16) {
        self.refused.lock().unwrap().push((host.to_string(), port));
    }

    /// Script channel-level failures for this endpoint
    pub fn fail_operations(&self, host: &str, port: u16, failures: MockFailures) {
        self.channel_failures
            .lock()
            .unwrap()
            .insert((host.to_string(), port), failures);
    }

    /// Endpoints connect was called for, in order
    pub fn connects(&self) -> Vec<(String, u16)> {
        self.connects.lock().unwrap().clone()
    }

    /// The channel handed out for an endpoint
    pub fn channel(&self, host: &str, port: u16) -> Option<Arc<MockChannel>> {
        self.endpoints
            .lock()
            .unwrap()
            .get(&(host.to_string(), port))
            .map(|e| Arc::clone(&e.channel))
    }

    /// Inject a connection lifecycle event for an endpoint
    pub fn emit(&self, host: &str, port: u16, event: ConnectionEvent) {
        let guard = self.endpoints.lock().unwrap();
        if let Some(endpoint) = guard.get(&(host.to_string(), port)) {
            let _ = endpoint.events.send(event);
        }
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn connect(&self, host: &str, port: u16) -> Result<TransportHandle, TransportError> {
        self.connects.lock().unwrap().push((host.to_string(), port));
        if self
            .refused
            .lock()
            .unwrap()
            .contains(&(host.to_string(), port))
        {
            return Err(TransportError::new(format!(
                "connection refused: {host}:{port}"
            )));
        }

        let failures = self
            .channel_failures
            .lock()
            .unwrap()
            .get(&(host.to_string(), port))
            .copied()
            .unwrap_or_default();
        let channel = Arc::new(MockChannel::with_failures(failures));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        if self.auto_connect.load(Ordering::SeqCst) {
            let _ = events_tx.send(ConnectionEvent::Connected);
        }
        self.endpoints.lock().unwrap().insert(
            (host.to_string(), port),
            Endpoint {
                channel: Arc::clone(&channel),
                events: events_tx,
            },
        );

        Ok(TransportHandle {
            channel,
            events: events_rx,
        })
    }
}

/// Simple packet type for exercising the serializer and router in tests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPacket {
    pub token: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub tries: usize,
}

impl TestPacket {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self {
            token: token.into(),
            target: None,
            tries: 0,
        }
    }

    pub const KIND: &'static str = "test";
}

impl Packet for TestPacket {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn display(&self, filter: Option<&[String]>) -> String {
        match filter {
            Some(fields) => {
                let shown: Vec<String> = fields
                    .iter()
                    .filter_map(|f| match f.as_str() {
                        "token" => Some(format!("token={}", self.token)),
                        "target" => self.target.as_ref().map(|t| format!("target={t}")),
                        _ => None,
                    })
                    .collect();
                format!("TestPacket[{}]", shown.join(", "))
            }
            None => format!("{self:?}"),
        }
    }

    fn delivery_attempts(&self) -> usize {
        self.tries
    }
}
