//! Test support utilities
//!
//! Mock transport implementations and packet types used by unit and
//! integration tests. Nothing here is intended for production use.

pub mod mocks;

pub use mocks::{MockChannel, MockFailures, MockTransport, TestPacket};
