//! High-availability broker client facade
//!
//! [`HaBrokerClient`] ties the broker set, the router, and the status
//! aggregator together behind one shared handle. Every configured endpoint
//! gets its own connection and event-pump task; lifecycle events from the
//! transport drive the per-broker state machine, which in turn drives the
//! aggregate status callbacks.
//!
//! State lives in an `Arc<Mutex<Inner>>` shared with the pump and timer
//! tasks, so the client handle itself is cheap to clone and pass around.

use crate::broker::{Broker, BrokerRef, BrokerSet, BrokerSnapshot, BrokerStatus};
use crate::config::ClientConfig;
use crate::error::{FleetMqError, Result};
use crate::identity;
use crate::observability::broker_span;
use crate::router::{
    MessageSink, Outbound, PublishOptions, ReceiveFilters, ReceiveOptions, Router,
    SubscribeOptions,
};
use crate::serialize::{Packet, Serializer};
use crate::status::{CallbackId, StatusAggregator, StatusCallback, StatusOptions};
use crate::transport::{
    BrokerChannel, ConnectionEvent, ExchangeSpec, NullChannel, QueueSpec, Transport,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn, Instrument};

struct Inner {
    set: BrokerSet,
    router: Router,
    aggregator: StatusAggregator,
    prefetch: Option<u16>,
    /// Per-identity connection generation. Event pumps carry the generation
    /// they were spawned for; events from a superseded connection are ignored.
    generations: HashMap<String, u64>,
}

impl Inner {
    fn bump_generation(&mut self, identity: &str) -> u64 {
        let counter = self.generations.entry(identity.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Apply a status transition to one broker and run the aggregate
    /// callbacks against the resulting set
    fn apply_status(&mut self, identity: &str, status: BrokerStatus, failed_attempt: bool) {
        let Some(broker) = self.set.get_mut(&BrokerRef::Identity(identity)) else {
            return;
        };
        if failed_attempt {
            broker.record_failure();
        }
        let old = broker.update_status(status);
        let alias = broker.alias.clone();
        let canonical = broker.identity.clone();
        if old == status {
            return;
        }
        if status == BrokerStatus::Failed {
            error!("Broker {alias} has failed");
        } else {
            info!("Broker {alias} is now {status}");
        }
        self.aggregator.notify(&self.set, &canonical, old, status);
    }

    /// Close one broker's connection and mark it closed. A failed broker has
    /// no live connection to close and is only marked. With `propagate` a
    /// close failure is returned instead of swallowed.
    async fn close_broker(&mut self, identity: &str, propagate: bool) -> Result<()> {
        let Some(broker) = self.set.get(&BrokerRef::Identity(identity)) else {
            return Err(FleetMqError::configuration(format!(
                "Cannot close unknown broker {identity}"
            )));
        };
        if broker.status == BrokerStatus::Closed {
            return Ok(());
        }
        let alias = broker.alias.clone();
        let canonical = broker.identity.clone();
        let channel = (broker.status != BrokerStatus::Failed).then(|| broker.channel());

        // stop the event pump so the close is not observed as a disconnect
        self.generations.remove(&canonical);
        if let Some(channel) = channel {
            if let Err(e) = channel.close().await {
                if propagate {
                    return Err(FleetMqError::io(format!(
                        "Failed to close broker {alias}: {e}"
                    )));
                }
                error!("Failed to close broker {alias}: {e}");
            }
        }
        self.apply_status(&canonical, BrokerStatus::Closed, false);
        Ok(())
    }
}

/// Client for a prioritized set of message brokers.
///
/// Publishes fail over across the set, subscriptions fan out over every
/// usable broker, and aggregate connectivity is observable through
/// [`connection_status`](Self::connection_status) callbacks.
pub struct HaBrokerClient {
    transport: Arc<dyn Transport>,
    inner: Arc<Mutex<Inner>>,
}

impl HaBrokerClient {
    /// Connect to every configured endpoint. An endpoint that cannot be
    /// dialed leaves a failed broker record behind rather than aborting
    /// construction; it is retried through the normal failure path.
    pub async fn new(
        transport: Arc<dyn Transport>,
        serializer: Arc<dyn Serializer>,
        config: &ClientConfig,
    ) -> Result<Self> {
        let addresses = identity::addresses(config.host.as_deref(), config.port.as_deref())?;
        let inner = Arc::new(Mutex::new(Inner {
            set: BrokerSet::new(),
            router: Router::new(serializer, config.order),
            aggregator: StatusAggregator::new(),
            prefetch: config.prefetch,
            generations: HashMap::new(),
        }));
        let client = Self { transport, inner };

        let mut guard = client.inner.lock().await;
        for address in &addresses {
            let identity = identity::identity(&address.host, address.port);
            info!(
                "Connecting to broker {identity} at {}:{}",
                address.host, address.port
            );
            match client
                .start_connection(&mut guard, &address.host, address.port)
                .await
            {
                Ok(channel) => {
                    guard
                        .set
                        .insert(Broker::new(&address.host, address.port, address.id, channel), None)?;
                }
                Err(e) => {
                    error!("Failed connecting to broker {identity}: {e}");
                    let mut broker =
                        Broker::new(&address.host, address.port, address.id, Arc::new(NullChannel));
                    broker.record_failure();
                    broker.update_status(BrokerStatus::Failed);
                    guard.set.insert(broker, None)?;
                }
            }
        }
        drop(guard);
        Ok(client)
    }

    /// Dial one endpoint and spawn the event pump for the new connection.
    /// Applies the configured prefetch window before handing the channel back.
    async fn start_connection(
        &self,
        inner: &mut Inner,
        host: &str,
        port: u16,
    ) -> std::result::Result<Arc<dyn BrokerChannel>, crate::transport::TransportError> {
        let identity = identity::identity(host, port);
        let handle = self.transport.connect(host, port).await?;
        if let Some(count) = inner.prefetch {
            if let Err(e) = handle.channel.prefetch(count).await {
                warn!("Failed to set prefetch on broker {identity}: {e}");
            }
        }
        let generation = inner.bump_generation(&identity);
        spawn_event_pump(Arc::clone(&self.inner), identity, generation, handle.events);
        Ok(handle.channel)
    }

    /// Connect an additional broker, or reconnect an existing one.
    ///
    /// A usable broker at the same endpoint is left alone unless `force` is
    /// given; the request is logged and `None` returned. The endpoint of an
    /// existing broker id is immutable. `priority` inserts the new broker at
    /// that position in the set; a position beyond the end of the set is a
    /// configuration error and the freshly-dialed connection is closed again.
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        id: u32,
        priority: Option<usize>,
        force: bool,
    ) -> Result<Option<BrokerSnapshot>> {
        let mut inner = self.inner.lock().await;
        let identity = identity::identity(host, port);

        if let Some(existing) = inner.set.get(&BrokerRef::Id(id)) {
            if existing.identity != identity {
                return Err(FleetMqError::configuration(format!(
                    "Not allowed to change host or port of existing broker {}, requested {host}:{port}",
                    existing.identity
                )));
            }
        }

        if let Some(existing) = inner.set.get(&BrokerRef::Identity(identity.as_str())) {
            if existing.usable() && !force {
                info!(
                    "Ignored request to reconnect usable broker {}",
                    existing.alias
                );
                return Ok(None);
            }
            let old_channel = existing.channel();
            let _ = old_channel.close().await;
            let snapshot = self.reconnect(&mut inner, &identity, host, port).await?;
            return Ok(Some(snapshot));
        }

        info!("Connecting to broker {identity} at {host}:{port}");
        match self.start_connection(&mut inner, host, port).await {
            Ok(channel) => {
                let broker = Broker::new(host, port, id, Arc::clone(&channel));
                let snapshot = broker.snapshot();
                if let Err(e) = inner.set.insert(broker, priority) {
                    let _ = channel.close().await;
                    inner.generations.remove(&identity);
                    return Err(e);
                }
                Ok(Some(snapshot))
            }
            Err(e) => {
                error!("Failed connecting to broker {identity}: {e}");
                let mut broker = Broker::new(host, port, id, Arc::new(NullChannel));
                broker.record_failure();
                broker.update_status(BrokerStatus::Failed);
                let snapshot = broker.snapshot();
                inner.set.insert(broker, priority)?;
                Ok(Some(snapshot))
            }
        }
    }

    /// Replace the connection of an existing broker. A dial failure keeps the
    /// broker's record with its failure counted.
    async fn reconnect(
        &self,
        inner: &mut Inner,
        identity: &str,
        host: &str,
        port: u16,
    ) -> Result<BrokerSnapshot> {
        info!("Reconnecting to broker {identity} at {host}:{port}");
        match self.start_connection(inner, host, port).await {
            Ok(channel) => {
                let (old, snapshot) = {
                    let Some(broker) = inner.set.get_mut(&BrokerRef::Identity(identity)) else {
                        return Err(FleetMqError::configuration(format!(
                            "Cannot reconnect unknown broker {identity}"
                        )));
                    };
                    let old = broker.status;
                    broker.reset_channel(channel);
                    (old, broker.snapshot())
                };
                inner
                    .aggregator
                    .notify(&inner.set, identity, old, BrokerStatus::Connecting);
                Ok(snapshot)
            }
            Err(e) => {
                error!("Failed connecting to broker {identity}: {e}");
                inner.apply_status(identity, BrokerStatus::Failed, true);
                inner
                    .set
                    .get(&BrokerRef::Identity(identity))
                    .map(|b| b.snapshot())
                    .ok_or_else(|| {
                        FleetMqError::configuration(format!(
                            "Cannot reconnect unknown broker {identity}"
                        ))
                    })
            }
        }
    }

    /// Remove a broker from the set, closing its connection. Returns the
    /// removed identity, or `None` when no broker has this endpoint.
    pub async fn remove(&self, host: &str, port: u16) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let identity = inner.set.find_endpoint(host, port)?.identity.clone();
        if let Err(e) = inner.close_broker(&identity, false).await {
            error!("{e}");
        }
        let removed = inner.set.remove(host, port)?;
        inner.generations.remove(&removed.identity);
        info!("Removed broker {} from the set", removed.alias);
        Some(identity)
    }

    /// Force the listed brokers out of use: their connections are closed and
    /// they are marked failed, so they rejoin only through the retry path.
    /// Unknown or already-unusable identities are skipped.
    pub async fn not_usable(&self, identities: &[String]) {
        let mut inner = self.inner.lock().await;
        for identity in identities {
            let Some(broker) = inner.set.get(&BrokerRef::Identity(identity)) else {
                continue;
            };
            if !broker.usable() {
                continue;
            }
            let canonical = broker.identity.clone();
            let channel = broker.channel();
            inner.generations.remove(&canonical);
            let _ = channel.close().await;
            inner.apply_status(&canonical, BrokerStatus::Failed, false);
        }
    }

    /// Publish a message per the given options, returning the identities
    /// published to
    pub async fn publish(
        &self,
        exchange: &ExchangeSpec,
        message: Outbound<'_>,
        options: &PublishOptions,
    ) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        inner.router.publish(&inner.set, exchange, message, options).await
    }

    /// Subscribe the queue on every usable broker; deliveries arrive on
    /// `sink` as `(identity, received)` pairs
    pub async fn subscribe(
        &self,
        queue: &QueueSpec,
        exchange: Option<&ExchangeSpec>,
        filters: ReceiveFilters,
        options: SubscribeOptions,
        sink: MessageSink,
    ) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .router
            .subscribe(&inner.set, queue, exchange, filters, options, sink)
            .await
    }

    /// Deserialize and classify one raw payload received outside a
    /// subscription pump
    pub async fn receive(
        &self,
        alias: &str,
        queue: &str,
        raw: &[u8],
        filters: &ReceiveFilters,
        options: &ReceiveOptions,
    ) -> Result<Option<Box<dyn Packet>>> {
        let inner = self.inner.lock().await;
        inner.router.receive(alias, queue, raw, filters, options)
    }

    /// Delete the queue on every usable broker, returning the identities it
    /// was deleted on
    pub async fn delete(&self, queue: &str) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.router.delete(&inner.set, queue).await
    }

    /// Apply a status transition reported out-of-band for one broker
    pub async fn update_status(&self, identity: &str, status: BrokerStatus) {
        let mut inner = self.inner.lock().await;
        inner.apply_status(identity, status, false);
    }

    /// Register a callback for aggregate connectivity boundary crossings.
    /// With `one_off` the callback fires at most once and reports a timeout
    /// if nothing qualifies within the given duration.
    pub async fn connection_status(
        &self,
        options: StatusOptions,
        callback: StatusCallback,
    ) -> CallbackId {
        let one_off = options.one_off;
        let mut inner = self.inner.lock().await;
        let id = inner.aggregator.register(options, callback);
        if let Some(timeout) = one_off {
            let shared = Arc::clone(&self.inner);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                shared.lock().await.aggregator.timeout(id);
            });
            inner.aggregator.attach_timer(id, timer);
        }
        id
    }

    /// Deregister a status callback; true when it was still registered
    pub async fn remove_connection_status(&self, id: CallbackId) -> bool {
        let mut inner = self.inner.lock().await;
        inner.aggregator.deregister(id)
    }

    /// Set the prefetch window, applying it to every usable broker now and to
    /// every connection made later
    pub async fn prefetch(&self, count: u16) {
        let mut inner = self.inner.lock().await;
        inner.prefetch = Some(count);
        for broker in inner.set.usable() {
            if let Err(e) = broker.channel().prefetch(count).await {
                warn!("Failed to set prefetch on broker {}: {e}", broker.alias);
            }
        }
    }

    /// Close every broker connection. Per-broker close failures are logged
    /// and swallowed; all brokers end up closed.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        let identities: Vec<String> = inner.set.iter().map(|b| b.identity.clone()).collect();
        for identity in identities {
            if let Err(e) = inner.close_broker(&identity, false).await {
                error!("{e}");
            }
        }
    }

    /// Close one broker. An unknown identity is a configuration error; with
    /// `propagate` a close failure is returned instead of swallowed.
    pub async fn close_one(&self, identity: &str, propagate: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.close_broker(identity, propagate).await
    }

    /// Identities of usable (connecting or connected) brokers, in sequence
    /// order
    pub async fn usable(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.set.usable().iter().map(|b| b.identity.clone()).collect()
    }

    /// Identities of connected brokers, in sequence order
    pub async fn connected(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.set.connected()
    }

    /// Identities of failed brokers; with `backoff`, only those due a retry
    pub async fn failed(&self, backoff: bool) -> Vec<String> {
        let mut inner = self.inner.lock().await;
        inner.set.failed(backoff)
    }

    /// Identities of every broker in the set, in sequence order
    pub async fn brokers(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.set.iter().map(|b| b.identity.clone()).collect()
    }

    /// Point-in-time snapshot of every broker, in sequence order
    pub async fn status(&self) -> Vec<BrokerSnapshot> {
        let inner = self.inner.lock().await;
        inner.set.iter().map(|b| b.snapshot()).collect()
    }

    /// Map identities to aliases; unknown identities map to `None`
    pub async fn aliases(&self, identities: &[Option<String>]) -> Vec<Option<String>> {
        let inner = self.inner.lock().await;
        inner.set.aliases(identities)
    }

    pub async fn alias_of(&self, identity: &str) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.set.alias_of(identity)
    }

    pub async fn id_of(&self, identity: &str) -> Option<u32> {
        let inner = self.inner.lock().await;
        inner.set.id_of(identity)
    }

    /// Current hosts as a `host:id` CSV, for handing this set's configuration
    /// to a peer
    pub async fn hosts(&self) -> String {
        let inner = self.inner.lock().await;
        inner.set.hosts()
    }

    /// Current ports as a `port:id` CSV
    pub async fn ports(&self) -> String {
        let inner = self.inner.lock().await;
        inner.set.ports()
    }

    /// Look up one broker by alias or identity string
    pub async fn get(&self, key: &str) -> Option<BrokerSnapshot> {
        let inner = self.inner.lock().await;
        let broker = BrokerRef::parse(key)?;
        inner.set.get(&broker).map(|b| b.snapshot())
    }
}

/// Forward connection lifecycle events from the transport into status
/// transitions. The pump exits when its connection is superseded or the
/// event stream ends.
fn spawn_event_pump(
    inner: Arc<Mutex<Inner>>,
    identity: String,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
) {
    let span = broker_span!(broker = %identity);
    tokio::spawn(
        async move {
            while let Some(event) = events.recv().await {
                let mut guard = inner.lock().await;
                if guard.generations.get(&identity).copied() != Some(generation) {
                    break;
                }
                match event {
                    ConnectionEvent::Connected => {
                        guard.apply_status(&identity, BrokerStatus::Connected, false);
                    }
                    ConnectionEvent::Disconnected(reason) => {
                        warn!("Lost connection to broker {identity}: {reason}");
                        guard.apply_status(&identity, BrokerStatus::Disconnected, false);
                    }
                    ConnectionEvent::Failed(reason) => {
                        error!("Failed connecting to broker {identity}: {reason}");
                        guard.apply_status(&identity, BrokerStatus::Failed, true);
                    }
                }
            }
        }
        .instrument(span),
    );
}
