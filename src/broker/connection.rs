//! Per-broker connection record and state machine
//!
//! One [`Broker`] exists per configured endpoint. It owns the transport
//! channel for that endpoint exclusively and tracks the connection status,
//! the consecutive failure count, and the backoff countdown that throttles
//! reconnection storms.

use crate::identity;
use crate::transport::BrokerChannel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Retry gap cap, in `failed(backoff)` polls
const MAX_RETRY_BACKOFF: u32 = 20;

/// Connection status of one broker.
///
/// Transitions: `Connecting -> Connected | Failed`,
/// `Connected -> Disconnected`, `Disconnected | Failed -> Connecting` on a
/// reconnect attempt, and any status `-> Closed` via explicit close. `Closed`
/// is terminal; closed brokers are never retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerStatus {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl BrokerStatus {
    /// A broker is usable while it is connected or still establishing its
    /// connection; usable brokers take subscribe fan-out optimistically
    pub fn usable(self) -> bool {
        matches!(self, BrokerStatus::Connecting | BrokerStatus::Connected)
    }
}

impl fmt::Display for BrokerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BrokerStatus::Connecting => "connecting",
            BrokerStatus::Connected => "connected",
            BrokerStatus::Disconnected => "disconnected",
            BrokerStatus::Failed => "failed",
            BrokerStatus::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One broker endpoint and its exclusively-owned connection
pub struct Broker {
    /// Positional id embedded in the alias
    pub id: u32,
    /// Short stable identifier, `b<id>`
    pub alias: String,
    /// Canonical identity string derived from host and port
    pub identity: String,
    pub host: String,
    pub port: u16,
    pub status: BrokerStatus,
    /// Consecutive failed connection attempts since the last success
    pub tries: u32,
    /// Remaining polls before the next backoff-gated retry slot
    pub backoff: u32,
    pub(crate) channel: Arc<dyn BrokerChannel>,
}

impl Broker {
    pub fn new(host: &str, port: u16, id: u32, channel: Arc<dyn BrokerChannel>) -> Self {
        Self {
            id,
            alias: format!("b{id}"),
            identity: identity::identity(host, port),
            host: host.to_string(),
            port,
            status: BrokerStatus::Connecting,
            tries: 0,
            backoff: 0,
            channel,
        }
    }

    pub fn usable(&self) -> bool {
        self.status.usable()
    }

    pub fn is_connected(&self) -> bool {
        self.status == BrokerStatus::Connected
    }

    /// Apply a status transition, returning the previous status. A successful
    /// connection resets the failure counter and the backoff countdown.
    pub fn update_status(&mut self, status: BrokerStatus) -> BrokerStatus {
        let previous = self.status;
        self.status = status;
        if status == BrokerStatus::Connected {
            self.tries = 0;
            self.backoff = 0;
        }
        previous
    }

    /// Record one failed connection attempt
    pub fn record_failure(&mut self) {
        self.tries += 1;
    }

    /// Backoff gate for reconnection. Returns true only when the broker has
    /// reached its next scheduled retry slot; each miss counts down toward it.
    /// The gap to the next slot doubles with every failed attempt, capped at
    /// [`MAX_RETRY_BACKOFF`], yielding retry slots at polls 0, 2, 6, 14, 30,
    /// 50, 70, ... for a continuously failing broker.
    pub fn retry_due(&mut self) -> bool {
        if self.backoff > 0 {
            self.backoff -= 1;
            false
        } else {
            self.backoff = (1u32 << (self.tries + 1).min(31)).min(MAX_RETRY_BACKOFF) - 1;
            true
        }
    }

    /// Replace the underlying connection, as on a forced reconnect
    pub(crate) fn reset_channel(&mut self, channel: Arc<dyn BrokerChannel>) {
        self.channel = channel;
        self.status = BrokerStatus::Connecting;
    }

    pub(crate) fn channel(&self) -> Arc<dyn BrokerChannel> {
        Arc::clone(&self.channel)
    }

    pub fn snapshot(&self) -> BrokerSnapshot {
        BrokerSnapshot {
            alias: self.alias.clone(),
            identity: self.identity.clone(),
            host: self.host.clone(),
            port: self.port,
            status: self.status,
            tries: self.tries,
        }
    }
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("alias", &self.alias)
            .field("identity", &self.identity)
            .field("status", &self.status)
            .field("tries", &self.tries)
            .field("backoff", &self.backoff)
            .finish()
    }
}

/// Point-in-time view of one broker, safe to hand out of the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerSnapshot {
    pub alias: String,
    pub identity: String,
    pub host: String,
    pub port: u16,
    pub status: BrokerStatus,
    pub tries: u32,
}
