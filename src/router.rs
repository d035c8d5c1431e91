//! Publish/subscribe routing over the broker set
//!
//! Publishing selects among connected candidates: deterministic first-match
//! in priority order by default, uniform random when requested, or fanout to
//! every connected candidate. Subscribing binds the queue on every usable
//! broker, optimistically including brokers still connecting so the
//! subscription activates the moment the connection completes.
//!
//! Per-broker failures are soft: they are logged and the operation continues
//! over the remaining brokers, failing only when nothing succeeds.

use crate::broker::{BrokerRef, BrokerSet};
use crate::config::SelectionMode;
use crate::error::{FleetMqError, Result};
use crate::serialize::{Packet, Serializer};
use crate::transport::{BrokerChannel, ExchangeSpec, QueueSpec};
use bytes::Bytes;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Level};

/// Message handed to publish: either a packet to serialize, or bytes that are
/// already on-the-wire
pub enum Outbound<'a> {
    Packet(&'a dyn Packet),
    Raw(&'a [u8]),
}

/// Per-call publish options
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Ask the transport to persist the message
    pub persistent: bool,
    /// Publish to every connected candidate instead of selecting one
    pub fanout: bool,
    /// Restrict candidates to these identities, in this order
    pub brokers: Option<Vec<String>>,
    /// Override the construction-time selection order for this call
    pub order: Option<SelectionMode>,
    /// Suppress the SEND log line
    pub no_log: bool,
    /// Restrict the logged packet rendering to these fields
    pub log_filter: Option<Vec<String>>,
    /// Additional data appended to the log line
    pub log_data: Option<String>,
}

/// Per-call subscribe options
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Acknowledge each message before processing it
    pub ack: bool,
    /// Deliver raw payloads without deserializing
    pub no_unserialize: bool,
    /// Suppress RECV log lines
    pub no_log: bool,
    /// Category decoration for unrecognized-packet warnings
    pub category: Option<String>,
}

/// Options for the standalone receive helper
#[derive(Debug, Clone, Default)]
pub struct ReceiveOptions {
    pub no_log: bool,
    pub log_data: Option<String>,
    pub category: Option<String>,
}

impl From<&SubscribeOptions> for ReceiveOptions {
    fn from(options: &SubscribeOptions) -> Self {
        Self {
            no_log: options.no_log,
            log_data: None,
            category: options.category.clone(),
        }
    }
}

/// Expected packet kinds mapped to the field list their RECV log line is
/// filtered to (`None` renders the whole packet)
pub type ReceiveFilters = HashMap<&'static str, Option<Vec<String>>>;

/// One message delivered to a subscription sink
#[derive(Debug)]
pub enum Received {
    /// Deserialized packet of a recognized kind
    Packet(Box<dyn Packet>),
    /// Raw payload, delivered when deserialization was not requested
    Raw(Bytes),
    /// Payload deserialized to a kind absent from the receive filters
    Unrecognized,
}

/// Sink for subscription deliveries: (broker identity, received message)
pub type MessageSink = mpsc::UnboundedSender<(String, Received)>;

/// Routing engine over a broker set
pub struct Router {
    serializer: Arc<dyn Serializer>,
    default_order: SelectionMode,
}

impl Router {
    pub fn new(serializer: Arc<dyn Serializer>, default_order: SelectionMode) -> Self {
        Self {
            serializer,
            default_order,
        }
    }

    pub fn serializer(&self) -> Arc<dyn Serializer> {
        Arc::clone(&self.serializer)
    }

    /// Publish a message, returning the identities actually published to.
    ///
    /// A per-call `order` always overrides the construction default; a
    /// per-call broker restriction without a per-call `order` forces
    /// deterministic first-match in the restricted list's order.
    pub async fn publish(
        &self,
        set: &BrokerSet,
        exchange: &ExchangeSpec,
        message: Outbound<'_>,
        options: &PublishOptions,
    ) -> Result<Vec<String>> {
        let payload = match &message {
            Outbound::Packet(packet) => self.serializer.dump(*packet)?,
            Outbound::Raw(raw) => Bytes::copy_from_slice(raw),
        };

        let candidate = |b: &crate::broker::Broker| {
            (b.alias.clone(), b.identity.clone(), b.channel())
        };
        let candidates: Vec<(String, String, Arc<dyn BrokerChannel>)> = match &options.brokers {
            Some(identities) => identities
                .iter()
                .filter_map(|i| set.get(&BrokerRef::Identity(i.as_str())))
                .filter(|b| b.is_connected())
                .map(candidate)
                .collect(),
            None => set
                .iter()
                .filter(|b| b.is_connected())
                .map(candidate)
                .collect(),
        };

        if candidates.is_empty() {
            return Err(FleetMqError::io(format!(
                "None of the brokers selected for publishing to exchange {} are connected",
                exchange.name
            )));
        }

        let order = options.order.unwrap_or(if options.brokers.is_some() {
            SelectionMode::Priority
        } else {
            self.default_order
        });

        let targets: Vec<&(String, String, Arc<dyn BrokerChannel>)> = if options.fanout {
            candidates.iter().collect()
        } else {
            match order {
                SelectionMode::Priority => vec![&candidates[0]],
                SelectionMode::Random => candidates
                    .choose(&mut rand::thread_rng())
                    .into_iter()
                    .collect(),
            }
        };

        let mut published = Vec::new();
        for (alias, identity, channel) in targets {
            match channel
                .publish(exchange, payload.clone(), options.persistent)
                .await
            {
                Ok(()) => {
                    if !options.no_log {
                        log_send(alias, exchange, &message, options);
                    }
                    published.push(identity.clone());
                }
                Err(e) => {
                    error!(
                        "Failed publishing to exchange {} on broker {alias}: {e}",
                        exchange.name
                    );
                }
            }
        }

        if published.is_empty() {
            return Err(FleetMqError::io(format!(
                "Failed to publish to exchange {} on any broker",
                exchange.name
            )));
        }
        Ok(published)
    }

    /// Subscribe the queue on every usable broker, pumping deliveries into
    /// `sink` as `(identity, received)` pairs. Returns the identities
    /// subscribed on; per-broker failures are logged and skipped.
    pub async fn subscribe(
        &self,
        set: &BrokerSet,
        queue: &QueueSpec,
        exchange: Option<&ExchangeSpec>,
        filters: ReceiveFilters,
        options: SubscribeOptions,
        sink: MessageSink,
    ) -> Vec<String> {
        let mut subscribed = Vec::new();
        for broker in set.usable() {
            info!(
                "Subscribing queue {} on broker {}",
                queue.name, broker.alias
            );
            let (tx, rx) = mpsc::unbounded_channel();
            match broker.channel().subscribe(queue, exchange, tx).await {
                Ok(()) => {
                    spawn_delivery_pump(
                        rx,
                        broker.channel(),
                        broker.alias.clone(),
                        broker.identity.clone(),
                        queue.name.clone(),
                        self.serializer(),
                        filters.clone(),
                        options.clone(),
                        sink.clone(),
                    );
                    subscribed.push(broker.identity.clone());
                }
                Err(e) => {
                    error!(
                        "Failed subscribing queue {} on broker {}: {e}",
                        queue.name, broker.alias
                    );
                }
            }
        }
        subscribed
    }

    /// Deserialize, classify, and log one received message.
    ///
    /// A deserialization failure is fatal: it is logged as an error and
    /// returned. A packet whose kind is absent from `filters` is recovered as
    /// a warning and `Ok(None)`.
    pub fn receive(
        &self,
        alias: &str,
        queue: &str,
        raw: &[u8],
        filters: &ReceiveFilters,
        options: &ReceiveOptions,
    ) -> Result<Option<Box<dyn Packet>>> {
        receive_with(self.serializer.as_ref(), alias, queue, raw, filters, options)
    }

    /// Delete the queue on every usable broker, returning the identities it
    /// was deleted on. Never fails; per-broker errors are logged and the
    /// broker is excluded from the result.
    pub async fn delete(&self, set: &BrokerSet, queue: &str) -> Vec<String> {
        let mut deleted = Vec::new();
        for broker in set.usable() {
            match broker.channel().delete_queue(queue).await {
                Ok(()) => deleted.push(broker.identity.clone()),
                Err(e) => {
                    error!(
                        "Failed deleting queue {queue} on broker {}: {e}",
                        broker.alias
                    );
                }
            }
        }
        deleted
    }
}

fn log_send(alias: &str, exchange: &ExchangeSpec, message: &Outbound<'_>, options: &PublishOptions) {
    let (verb, rendering) = match message {
        Outbound::Packet(packet) => {
            let verb = if packet.delivery_attempts() > 0 {
                "RESEND"
            } else {
                "SEND"
            };
            // debug level logs the whole packet, info level the filtered view
            let rendering = if tracing::enabled!(Level::DEBUG) {
                packet.display(None)
            } else {
                packet.display(options.log_filter.as_deref())
            };
            (verb, rendering)
        }
        Outbound::Raw(raw) => ("SEND", format!("<{} bytes>", raw.len())),
    };
    let extra = options.log_data.as_deref().unwrap_or("");
    if tracing::enabled!(Level::DEBUG) {
        debug!("{verb} {alias} {rendering} to exchange {} {extra}", exchange.name);
    } else {
        info!("{verb} {alias} {rendering} to exchange {} {extra}", exchange.name);
    }
}

/// Shared implementation of receive used by the router and the subscription
/// delivery pumps
pub(crate) fn receive_with(
    serializer: &dyn Serializer,
    alias: &str,
    queue: &str,
    raw: &[u8],
    filters: &ReceiveFilters,
    options: &ReceiveOptions,
) -> Result<Option<Box<dyn Packet>>> {
    let packet = match serializer.load(raw) {
        Ok(packet) => packet,
        Err(e) => {
            error!("RECV {alias} - Failed to load packet from queue {queue}: {e}");
            return Err(e.into());
        }
    };

    match filters.get(packet.kind()) {
        Some(filter) => {
            if !options.no_log {
                let extra = options.log_data.as_deref().unwrap_or("");
                if tracing::enabled!(Level::DEBUG) {
                    debug!("RECV {alias} {} {extra}", packet.display(None));
                } else {
                    info!("RECV {alias} {} {extra}", packet.display(filter.as_deref()));
                }
            }
            Ok(Some(packet))
        }
        None => {
            let category = options
                .category
                .as_deref()
                .map(|c| format!(" {c}"))
                .unwrap_or_default();
            warn!(
                "RECV {alias} - Packet type {} unrecognized for queue {queue}{category}",
                packet.kind()
            );
            Ok(None)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_delivery_pump(
    mut deliveries: mpsc::UnboundedReceiver<crate::transport::Delivery>,
    channel: Arc<dyn BrokerChannel>,
    alias: String,
    identity: String,
    queue: String,
    serializer: Arc<dyn Serializer>,
    filters: ReceiveFilters,
    options: SubscribeOptions,
    sink: MessageSink,
) {
    tokio::spawn(async move {
        while let Some(delivery) = deliveries.recv().await {
            if options.ack {
                if let Err(e) = channel.ack(delivery.tag).await {
                    warn!("Failed to ack delivery on broker {alias}: {e}");
                }
            }

            let received = if options.no_unserialize {
                Received::Raw(delivery.payload)
            } else {
                let receive_options = ReceiveOptions::from(&options);
                match receive_with(
                    serializer.as_ref(),
                    &alias,
                    &queue,
                    &delivery.payload,
                    &filters,
                    &receive_options,
                ) {
                    Ok(Some(packet)) => Received::Packet(packet),
                    Ok(None) => Received::Unrecognized,
                    // already logged; nothing sane to forward
                    Err(_) => continue,
                }
            };

            if sink.send((identity.clone(), received)).is_err() {
                break;
            }
        }
    });
}
