//! Ordered broker collection
//!
//! The set preserves insertion/priority order: position encodes publish
//! priority for default selection and drives round-robin id assignment.
//! Within one set both the alias and the identity of every broker are unique.

use super::connection::{Broker, BrokerStatus};
use crate::error::{FleetMqError, Result};
use crate::identity;

/// Ways of naming a broker within a set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerRef<'a> {
    /// Alias string, `b<id>`
    Alias(&'a str),
    /// Positional id embedded in the alias
    Id(u32),
    /// Identity string, optionally carrying a legacy transport prefix
    Identity(&'a str),
}

impl<'a> BrokerRef<'a> {
    /// Classify a bare string key: aliases look like `b<digits>`, anything
    /// containing the canonical identity substring is an identity, and
    /// everything else matches nothing.
    pub fn parse(key: &'a str) -> Option<Self> {
        if let Some(digits) = key.strip_prefix('b') {
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                return Some(BrokerRef::Alias(key));
            }
        }
        identity::canonical(key).map(BrokerRef::Identity)
    }
}

/// Ordered collection of brokers indexed by alias and identity
#[derive(Debug, Default)]
pub struct BrokerSet {
    brokers: Vec<Broker>,
}

impl BrokerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.brokers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brokers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Broker> {
        self.brokers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Broker> {
        self.brokers.iter_mut()
    }

    /// Append a broker, or insert it at `priority` shifting later entries
    /// down. `priority` must address an existing slot or the position
    /// immediately after the end; a larger gap is a configuration error.
    pub fn insert(&mut self, broker: Broker, priority: Option<usize>) -> Result<()> {
        if self.find_identity(&broker.identity).is_some() {
            return Err(FleetMqError::configuration(format!(
                "Broker {} already exists",
                broker.identity
            )));
        }
        match priority {
            Some(position) if position > self.brokers.len() => {
                Err(FleetMqError::configuration(format!(
                    "Requested priority position {position} exceeds current set size {}",
                    self.brokers.len()
                )))
            }
            Some(position) => {
                self.brokers.insert(position, broker);
                Ok(())
            }
            None => {
                self.brokers.push(broker);
                Ok(())
            }
        }
    }

    /// Remove the broker at the given endpoint, returning it
    pub fn remove(&mut self, host: &str, port: u16) -> Option<Broker> {
        let position = self
            .brokers
            .iter()
            .position(|b| b.host == host && b.port == port)?;
        Some(self.brokers.remove(position))
    }

    pub fn get(&self, broker: &BrokerRef<'_>) -> Option<&Broker> {
        self.position(broker).map(|i| &self.brokers[i])
    }

    pub fn get_mut(&mut self, broker: &BrokerRef<'_>) -> Option<&mut Broker> {
        self.position(broker).map(move |i| &mut self.brokers[i])
    }

    fn position(&self, broker: &BrokerRef<'_>) -> Option<usize> {
        match broker {
            BrokerRef::Alias(alias) => self.brokers.iter().position(|b| b.alias == *alias),
            BrokerRef::Id(id) => self.brokers.iter().position(|b| b.id == *id),
            BrokerRef::Identity(raw) => {
                let canonical = identity::canonical(raw)?;
                self.find_identity(canonical)
            }
        }
    }

    fn find_identity(&self, canonical: &str) -> Option<usize> {
        self.brokers.iter().position(|b| b.identity == canonical)
    }

    pub fn find_endpoint(&self, host: &str, port: u16) -> Option<&Broker> {
        self.brokers.iter().find(|b| b.host == host && b.port == port)
    }

    /// Brokers that are potentially usable (connecting or connected), in
    /// sequence order
    pub fn usable(&self) -> Vec<&Broker> {
        self.brokers.iter().filter(|b| b.usable()).collect()
    }

    /// Identities of brokers with status exactly connected, in sequence order
    pub fn connected(&self) -> Vec<String> {
        self.brokers
            .iter()
            .filter(|b| b.is_connected())
            .map(|b| b.identity.clone())
            .collect()
    }

    /// Identities of failed brokers. With `backoff`, only brokers whose
    /// attempt counter has reached the next scheduled retry slot are
    /// included, throttling reconnection storms.
    pub fn failed(&mut self, backoff: bool) -> Vec<String> {
        self.brokers
            .iter_mut()
            .filter_map(|b| {
                if b.status != BrokerStatus::Failed {
                    return None;
                }
                if backoff && !b.retry_due() {
                    return None;
                }
                Some(b.identity.clone())
            })
            .collect()
    }

    /// Map identities to aliases; unknown identities map to None
    pub fn aliases(&self, identities: &[Option<String>]) -> Vec<Option<String>> {
        identities
            .iter()
            .map(|identity| {
                identity
                    .as_deref()
                    .and_then(|i| self.alias_of(i))
            })
            .collect()
    }

    pub fn alias_of(&self, identity: &str) -> Option<String> {
        self.get(&BrokerRef::Identity(identity))
            .map(|b| b.alias.clone())
    }

    pub fn id_of(&self, identity: &str) -> Option<u32> {
        self.get(&BrokerRef::Identity(identity)).map(|b| b.id)
    }

    /// Render the current hosts as a `host:id` CSV, suitable for handing this
    /// set's configuration to a peer
    pub fn hosts(&self) -> String {
        self.brokers
            .iter()
            .map(|b| format!("{}:{}", b.host, b.id))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Render the current ports as a `port:id` CSV
    pub fn ports(&self) -> String {
        self.brokers
            .iter()
            .map(|b| format!("{}:{}", b.port, b.id))
            .collect::<Vec<_>>()
            .join(",")
    }
}
