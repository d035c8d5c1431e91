//! Observability for the HA broker client
//!
//! Structured logging initialization used by embedding processes. Every log
//! line in the crate goes through `tracing`; this module only configures how
//! those lines are rendered.

pub mod logging;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::broker_span;
