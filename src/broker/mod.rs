//! Broker records and the ordered broker set

pub mod connection;
pub mod set;

pub use connection::{Broker, BrokerSnapshot, BrokerStatus};
pub use set::{BrokerRef, BrokerSet};
