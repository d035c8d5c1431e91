//! Packet serialization seam
//!
//! The wire format of packets is an external concern: the client only needs to
//! turn packets into bytes and back, and to render them for SEND/RECV logging.
//! [`JsonSerializer`] is the stock implementation, wrapping each packet in a
//! `{kind, data}` JSON envelope with a decoder registry keyed by packet kind.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Serialization failures. Deserialization failure on receive is fatal to the
/// caller; everything else about a message is recoverable.
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unknown packet kind: {0}")]
    UnknownKind(String),
}

/// A message exchanged over the queue transport.
///
/// Implementations provide their wire value and a log rendering that can be
/// filtered down to a subset of fields for info-level logging.
pub trait Packet: fmt::Debug + Send + Sync {
    /// Stable name of this packet type, used for envelope dispatch and for
    /// matching receive-side log filters
    fn kind(&self) -> &'static str;

    /// Wire value of the packet body
    fn to_value(&self) -> Result<Value, serde_json::Error>;

    /// Render for logging; `filter` restricts the rendering to the named
    /// fields, `None` renders everything
    fn display(&self, filter: Option<&[String]>) -> String;

    /// Number of prior delivery attempts; non-zero publishes log RESEND
    fn delivery_attempts(&self) -> usize {
        0
    }
}

/// Packet encoder/decoder used by the router
pub trait Serializer: Send + Sync {
    fn dump(&self, packet: &dyn Packet) -> Result<Bytes, SerializeError>;
    fn load(&self, raw: &[u8]) -> Result<Box<dyn Packet>, SerializeError>;
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    kind: String,
    data: Value,
}

type DecodeFn = Box<dyn Fn(Value) -> Result<Box<dyn Packet>, SerializeError> + Send + Sync>;

/// JSON `{kind, data}` envelope serializer with a registry of decodable
/// packet kinds
#[derive(Default)]
pub struct JsonSerializer {
    decoders: HashMap<&'static str, DecodeFn>,
}

impl JsonSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a packet type so that [`Serializer::load`] can decode it
    pub fn register<P>(&mut self, kind: &'static str)
    where
        P: Packet + DeserializeOwned + 'static,
    {
        self.decoders.insert(
            kind,
            Box::new(|value| {
                let packet: P = serde_json::from_value(value)?;
                Ok(Box::new(packet) as Box<dyn Packet>)
            }),
        );
    }
}

impl Serializer for JsonSerializer {
    fn dump(&self, packet: &dyn Packet) -> Result<Bytes, SerializeError> {
        let envelope = Envelope {
            kind: packet.kind().to_string(),
            data: packet.to_value()?,
        };
        Ok(Bytes::from(serde_json::to_vec(&envelope)?))
    }

    fn load(&self, raw: &[u8]) -> Result<Box<dyn Packet>, SerializeError> {
        let envelope: Envelope = serde_json::from_slice(raw)?;
        let decode = self
            .decoders
            .get(envelope.kind.as_str())
            .ok_or_else(|| SerializeError::UnknownKind(envelope.kind.clone()))?;
        decode(envelope.data)
    }
}
