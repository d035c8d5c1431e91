//! Aggregate connection-status notification
//!
//! Callers register interest in connectivity boundary crossings over the
//! broker set (or a restricted subset of it). On every individual broker
//! status update the aggregator recomputes each registration's connected
//! count and fires its callback when the configured boundary is crossed.
//! One-shot registrations are backed by a timeout timer that reports
//! `Timeout` if no qualifying transition arrives in time.

use crate::broker::{BrokerSet, BrokerStatus};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Aggregate connectivity transition reported to a status callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityChange {
    /// The watched subset crossed into connectivity
    Connected,
    /// The watched subset crossed out of connectivity
    Disconnected,
    /// A one-shot registration expired before any qualifying transition
    Timeout,
}

/// Which aggregate boundary triggers the callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Boundary {
    /// Fire when the connected count crosses the 0/1 boundary in either
    /// direction
    #[default]
    Any,
    /// Fire when the connected count crosses the n-1/n boundary, i.e. on
    /// gaining or losing full coverage of the subset
    All,
}

/// Options for one status registration
#[derive(Debug, Clone, Default)]
pub struct StatusOptions {
    /// Restrict the watched subset to these identities; None watches all
    /// brokers in the set
    pub brokers: Option<Vec<String>>,
    pub boundary: Boundary,
    /// Fire at most once, reporting `Timeout` if nothing qualifies within
    /// the given duration
    pub one_off: Option<Duration>,
}

/// Token identifying one registered status callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(Uuid);

/// Registered status interest
pub type StatusCallback = Box<dyn FnMut(ConnectivityChange) + Send>;

struct Registration {
    id: CallbackId,
    callback: StatusCallback,
    brokers: Option<Vec<String>>,
    boundary: Boundary,
    one_off: bool,
    timer: Option<JoinHandle<()>>,
}

impl Registration {
    fn watches(&self, identity: &str) -> bool {
        match &self.brokers {
            Some(subset) => subset.iter().any(|i| i == identity),
            None => true,
        }
    }

    /// Connected count and subset size over the given set
    fn coverage(&self, set: &BrokerSet) -> (usize, usize) {
        let mut connected = 0;
        let mut total = 0;
        for broker in set.iter() {
            if self.watches(&broker.identity) {
                total += 1;
                if broker.is_connected() {
                    connected += 1;
                }
            }
        }
        (connected, total)
    }
}

/// Tracks aggregate connected/disconnected boundary crossings and dispatches
/// registered callbacks
#[derive(Default)]
pub struct StatusAggregator {
    registrations: Vec<Registration>,
}

impl StatusAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback; the caller is responsible for attaching the
    /// one-shot timer task when `options.one_off` was set
    pub fn register(&mut self, options: StatusOptions, callback: StatusCallback) -> CallbackId {
        let id = CallbackId(Uuid::new_v4());
        self.registrations.push(Registration {
            id,
            callback,
            brokers: options.brokers,
            boundary: options.boundary,
            one_off: options.one_off.is_some(),
            timer: None,
        });
        id
    }

    /// Attach the timeout timer backing a one-shot registration
    pub fn attach_timer(&mut self, id: CallbackId, timer: JoinHandle<()>) {
        if let Some(registration) = self.registrations.iter_mut().find(|r| r.id == id) {
            registration.timer = Some(timer);
        } else {
            // already fired before the timer could be attached
            timer.abort();
        }
    }

    /// Remove a registration, cancelling its timer
    pub fn deregister(&mut self, id: CallbackId) -> bool {
        let Some(position) = self.registrations.iter().position(|r| r.id == id) else {
            return false;
        };
        let registration = self.registrations.remove(position);
        if let Some(timer) = registration.timer {
            timer.abort();
        }
        true
    }

    /// Fire the timeout path of a one-shot registration, if still registered
    pub fn timeout(&mut self, id: CallbackId) {
        let Some(position) = self.registrations.iter().position(|r| r.id == id) else {
            return;
        };
        let mut registration = self.registrations.remove(position);
        (registration.callback)(ConnectivityChange::Timeout);
    }

    /// Evaluate every registration against one broker's status transition.
    /// `set` reflects the state after the transition has been applied.
    pub fn notify(
        &mut self,
        set: &BrokerSet,
        identity: &str,
        old_status: BrokerStatus,
        new_status: BrokerStatus,
    ) {
        let delta = (new_status == BrokerStatus::Connected) as isize
            - (old_status == BrokerStatus::Connected) as isize;
        if delta == 0 {
            return;
        }

        let mut fired_one_offs = Vec::new();
        for registration in &mut self.registrations {
            if !registration.watches(identity) {
                continue;
            }
            let (after, total) = registration.coverage(set);
            let before = (after as isize - delta).max(0) as usize;

            let change = match registration.boundary {
                Boundary::Any if before == 0 && after > 0 => Some(ConnectivityChange::Connected),
                Boundary::Any if before > 0 && after == 0 => Some(ConnectivityChange::Disconnected),
                Boundary::All if before < total && after == total => {
                    Some(ConnectivityChange::Connected)
                }
                Boundary::All if before == total && after < total => {
                    Some(ConnectivityChange::Disconnected)
                }
                _ => None,
            };

            if let Some(change) = change {
                (registration.callback)(change);
                if registration.one_off {
                    fired_one_offs.push(registration.id);
                }
            }
        }

        for id in fired_one_offs {
            self.deregister(id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.registrations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, BrokerRef};
    use crate::testing::MockChannel;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn set_of(hosts: &[&str]) -> BrokerSet {
        let mut set = BrokerSet::new();
        for (i, host) in hosts.iter().enumerate() {
            let broker = Broker::new(host, 5672, i as u32, Arc::new(MockChannel::default()));
            set.insert(broker, None).unwrap();
        }
        set
    }

    /// Apply a status to one broker and notify the aggregator, the way the
    /// client's update path does
    fn update(
        aggregator: &mut StatusAggregator,
        set: &mut BrokerSet,
        identity: &str,
        status: BrokerStatus,
    ) {
        let old = set
            .get_mut(&BrokerRef::Identity(identity))
            .unwrap()
            .update_status(status);
        aggregator.notify(set, identity, old, status);
    }

    fn counters() -> (Arc<AtomicUsize>, Arc<AtomicUsize>, StatusCallback) {
        let connected = Arc::new(AtomicUsize::new(0));
        let disconnected = Arc::new(AtomicUsize::new(0));
        let (c, d) = (connected.clone(), disconnected.clone());
        let callback: StatusCallback = Box::new(move |change| match change {
            ConnectivityChange::Connected => {
                c.fetch_add(1, Ordering::SeqCst);
            }
            ConnectivityChange::Disconnected => {
                d.fetch_add(1, Ordering::SeqCst);
            }
            ConnectivityChange::Timeout => {}
        });
        (connected, disconnected, callback)
    }

    #[test]
    fn test_any_boundary_fires_on_zero_one_crossings() {
        let mut set = set_of(&["first", "second"]);
        let mut aggregator = StatusAggregator::new();
        let (connected, disconnected, callback) = counters();
        aggregator.register(StatusOptions::default(), callback);

        let (a, b) = ("rs-broker-first-5672", "rs-broker-second-5672");
        update(&mut aggregator, &mut set, a, BrokerStatus::Connected);
        assert_eq!((connected.load(Ordering::SeqCst), disconnected.load(Ordering::SeqCst)), (1, 0));
        update(&mut aggregator, &mut set, b, BrokerStatus::Connected);
        assert_eq!((connected.load(Ordering::SeqCst), disconnected.load(Ordering::SeqCst)), (1, 0));
        update(&mut aggregator, &mut set, a, BrokerStatus::Disconnected);
        assert_eq!((connected.load(Ordering::SeqCst), disconnected.load(Ordering::SeqCst)), (1, 0));
        update(&mut aggregator, &mut set, b, BrokerStatus::Disconnected);
        assert_eq!((connected.load(Ordering::SeqCst), disconnected.load(Ordering::SeqCst)), (1, 1));
        update(&mut aggregator, &mut set, a, BrokerStatus::Connected);
        assert_eq!((connected.load(Ordering::SeqCst), disconnected.load(Ordering::SeqCst)), (2, 1));
        update(&mut aggregator, &mut set, b, BrokerStatus::Connected);
        assert_eq!((connected.load(Ordering::SeqCst), disconnected.load(Ordering::SeqCst)), (2, 1));
    }

    #[test]
    fn test_all_boundary_fires_on_full_coverage_crossings() {
        let mut set = set_of(&["first", "second"]);
        let mut aggregator = StatusAggregator::new();
        let (connected, disconnected, callback) = counters();
        aggregator.register(
            StatusOptions {
                boundary: Boundary::All,
                ..Default::default()
            },
            callback,
        );

        let (a, b) = ("rs-broker-first-5672", "rs-broker-second-5672");
        update(&mut aggregator, &mut set, a, BrokerStatus::Connected);
        assert_eq!((connected.load(Ordering::SeqCst), disconnected.load(Ordering::SeqCst)), (0, 0));
        update(&mut aggregator, &mut set, b, BrokerStatus::Connected);
        assert_eq!((connected.load(Ordering::SeqCst), disconnected.load(Ordering::SeqCst)), (1, 0));
        update(&mut aggregator, &mut set, a, BrokerStatus::Disconnected);
        assert_eq!((connected.load(Ordering::SeqCst), disconnected.load(Ordering::SeqCst)), (1, 1));
        update(&mut aggregator, &mut set, b, BrokerStatus::Disconnected);
        assert_eq!((connected.load(Ordering::SeqCst), disconnected.load(Ordering::SeqCst)), (1, 1));
        update(&mut aggregator, &mut set, a, BrokerStatus::Connected);
        assert_eq!((connected.load(Ordering::SeqCst), disconnected.load(Ordering::SeqCst)), (1, 1));
        update(&mut aggregator, &mut set, b, BrokerStatus::Connected);
        assert_eq!((connected.load(Ordering::SeqCst), disconnected.load(Ordering::SeqCst)), (2, 1));
    }

    #[test]
    fn test_restricted_subset_ignores_other_brokers() {
        let mut set = set_of(&["first", "second", "third"]);
        let mut aggregator = StatusAggregator::new();
        let (connected, disconnected, callback) = counters();
        aggregator.register(
            StatusOptions {
                brokers: Some(vec![
                    "rs-broker-first-5672".to_string(),
                    "rs-broker-third-5672".to_string(),
                ]),
                ..Default::default()
            },
            callback,
        );

        update(&mut aggregator, &mut set, "rs-broker-second-5672", BrokerStatus::Connected);
        assert_eq!((connected.load(Ordering::SeqCst), disconnected.load(Ordering::SeqCst)), (0, 0));
        update(&mut aggregator, &mut set, "rs-broker-first-5672", BrokerStatus::Connected);
        assert_eq!((connected.load(Ordering::SeqCst), disconnected.load(Ordering::SeqCst)), (1, 0));
        update(&mut aggregator, &mut set, "rs-broker-third-5672", BrokerStatus::Connected);
        assert_eq!((connected.load(Ordering::SeqCst), disconnected.load(Ordering::SeqCst)), (1, 0));
        update(&mut aggregator, &mut set, "rs-broker-first-5672", BrokerStatus::Disconnected);
        assert_eq!((connected.load(Ordering::SeqCst), disconnected.load(Ordering::SeqCst)), (1, 0));
        update(&mut aggregator, &mut set, "rs-broker-second-5672", BrokerStatus::Disconnected);
        assert_eq!((connected.load(Ordering::SeqCst), disconnected.load(Ordering::SeqCst)), (1, 0));
        update(&mut aggregator, &mut set, "rs-broker-third-5672", BrokerStatus::Disconnected);
        assert_eq!((connected.load(Ordering::SeqCst), disconnected.load(Ordering::SeqCst)), (1, 1));
        update(&mut aggregator, &mut set, "rs-broker-third-5672", BrokerStatus::Connected);
        assert_eq!((connected.load(Ordering::SeqCst), disconnected.load(Ordering::SeqCst)), (2, 1));
    }

    #[test]
    fn test_one_off_fires_once_and_deregisters() {
        let mut set = set_of(&["first"]);
        let mut aggregator = StatusAggregator::new();
        let (connected, disconnected, callback) = counters();
        aggregator.register(
            StatusOptions {
                one_off: Some(Duration::from_millis(10)),
                ..Default::default()
            },
            callback,
        );

        update(&mut aggregator, &mut set, "rs-broker-first-5672", BrokerStatus::Connected);
        update(&mut aggregator, &mut set, "rs-broker-first-5672", BrokerStatus::Disconnected);
        assert_eq!(connected.load(Ordering::SeqCst) + disconnected.load(Ordering::SeqCst), 1);
        assert_eq!(aggregator.len(), 0);
    }

    #[test]
    fn test_timeout_fires_and_deregisters() {
        let mut aggregator = StatusAggregator::new();
        let timed_out = Arc::new(AtomicUsize::new(0));
        let t = timed_out.clone();
        let id = aggregator.register(
            StatusOptions {
                one_off: Some(Duration::from_millis(10)),
                ..Default::default()
            },
            Box::new(move |change| {
                assert_eq!(change, ConnectivityChange::Timeout);
                t.fetch_add(1, Ordering::SeqCst);
            }),
        );

        aggregator.timeout(id);
        assert_eq!(timed_out.load(Ordering::SeqCst), 1);
        // a second timeout for the same id is a no-op
        aggregator.timeout(id);
        assert_eq!(timed_out.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_multiple_independent_callbacks() {
        let mut set = set_of(&["first"]);
        let mut aggregator = StatusAggregator::new();

        let one_off_calls = Arc::new(AtomicUsize::new(0));
        let repeating_calls = Arc::new(AtomicUsize::new(0));
        let (o, r) = (one_off_calls.clone(), repeating_calls.clone());
        aggregator.register(
            StatusOptions {
                one_off: Some(Duration::from_millis(10)),
                ..Default::default()
            },
            Box::new(move |_| {
                o.fetch_add(1, Ordering::SeqCst);
            }),
        );
        aggregator.register(
            StatusOptions {
                boundary: Boundary::All,
                ..Default::default()
            },
            Box::new(move |_| {
                r.fetch_add(1, Ordering::SeqCst);
            }),
        );

        update(&mut aggregator, &mut set, "rs-broker-first-5672", BrokerStatus::Connected);
        update(&mut aggregator, &mut set, "rs-broker-first-5672", BrokerStatus::Disconnected);
        assert_eq!(one_off_calls.load(Ordering::SeqCst), 1);
        assert_eq!(repeating_calls.load(Ordering::SeqCst), 2);
    }
}
