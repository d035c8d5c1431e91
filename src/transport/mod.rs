//! Transport seam for broker connections
//!
//! The queue/exchange wire protocol is an external dependency: this module
//! defines the interface the client drives it through and nothing else. A
//! [`Transport`] opens one asynchronous connection per broker endpoint and
//! hands back a [`TransportHandle`] carrying the operation channel plus a
//! stream of connection lifecycle events. The client never observes transport
//! internals beyond these traits.

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error surfaced by the underlying transport for one broker
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self(message.into())
    }
}

/// Lifecycle events delivered asynchronously for one broker connection.
/// Connection establishment is fire-and-forget; success or failure arrives
/// here after `connect` has already returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Connection handshake completed
    Connected,
    /// Established connection was lost
    Disconnected(String),
    /// Connection attempt failed
    Failed(String),
}

/// Exchange types recognized by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Direct,
    Fanout,
    Topic,
}

/// Destination exchange for a publish or queue binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub kind: ExchangeKind,
    pub name: String,
    pub durable: bool,
}

impl ExchangeSpec {
    pub fn direct<S: Into<String>>(name: S) -> Self {
        Self {
            kind: ExchangeKind::Direct,
            name: name.into(),
            durable: false,
        }
    }

    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }
}

/// Queue to consume from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
}

impl QueueSpec {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            durable: false,
        }
    }
}

/// One message delivered on a subscription
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Transport-assigned tag used to acknowledge this delivery
    pub tag: u64,
    pub payload: Bytes,
}

/// Operations available on one established broker connection.
///
/// The handle is exclusively owned by its broker record; subscription
/// deliveries flow out through the sender supplied to `subscribe`.
#[async_trait::async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Publish a payload to an exchange
    async fn publish(
        &self,
        exchange: &ExchangeSpec,
        payload: Bytes,
        persistent: bool,
    ) -> Result<(), TransportError>;

    /// Bind a queue to an exchange (or consume directly when no exchange is
    /// given) and start delivering messages into `deliveries`
    async fn subscribe(
        &self,
        queue: &QueueSpec,
        exchange: Option<&ExchangeSpec>,
        deliveries: mpsc::UnboundedSender<Delivery>,
    ) -> Result<(), TransportError>;

    /// Acknowledge one delivery
    async fn ack(&self, tag: u64) -> Result<(), TransportError>;

    /// Delete a queue
    async fn delete_queue(&self, name: &str) -> Result<(), TransportError>;

    /// Set the per-connection prefetch window
    async fn prefetch(&self, count: u16) -> Result<(), TransportError>;

    /// Close the connection. Resolves once the transport has confirmed the
    /// close; the event stream ends afterwards.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Channel stand-in for a broker endpoint with no live connection, as after a
/// failed dial. Every operation reports the broker as unreachable; closing it
/// is a no-op.
pub struct NullChannel;

#[async_trait::async_trait]
impl BrokerChannel for NullChannel {
    async fn publish(
        &self,
        _exchange: &ExchangeSpec,
        _payload: Bytes,
        _persistent: bool,
    ) -> Result<(), TransportError> {
        Err(TransportError::new("broker is not connected"))
    }

    async fn subscribe(
        &self,
        _queue: &QueueSpec,
        _exchange: Option<&ExchangeSpec>,
        _deliveries: mpsc::UnboundedSender<Delivery>,
    ) -> Result<(), TransportError> {
        Err(TransportError::new("broker is not connected"))
    }

    async fn ack(&self, _tag: u64) -> Result<(), TransportError> {
        Err(TransportError::new("broker is not connected"))
    }

    async fn delete_queue(&self, _name: &str) -> Result<(), TransportError> {
        Err(TransportError::new("broker is not connected"))
    }

    async fn prefetch(&self, _count: u16) -> Result<(), TransportError> {
        Err(TransportError::new("broker is not connected"))
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// An opened (but not yet necessarily established) broker connection
pub struct TransportHandle {
    pub channel: std::sync::Arc<dyn BrokerChannel>,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

/// Factory for broker connections, the single entry point into the underlying
/// messaging library. Implemented by transport bindings and by
/// [`crate::testing::MockTransport`].
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Begin connecting to one broker endpoint. An `Ok` return means the
    /// attempt was started, not that the broker is reachable; the outcome
    /// arrives on the handle's event stream.
    async fn connect(&self, host: &str, port: u16) -> Result<TransportHandle, TransportError>;
}
