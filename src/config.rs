//! Client construction options
//!
//! The broker set is configured from comma-separated host and port lists,
//! each entry optionally pinned to a positional id with a trailing `:<id>`.
//! Configuration can be built in code or loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Default broker selection order for publishing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Deterministic failover: first connected broker in sequence order wins
    #[default]
    Priority,
    /// Uniform random pick among the connected candidates
    Random,
}

/// Options recognized at client construction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Comma-separated broker hosts, each optionally suffixed `:<id>`
    pub host: Option<String>,
    /// Comma-separated broker ports, each optionally suffixed `:<id>`
    pub port: Option<String>,
    /// Default publish selection order
    #[serde(default)]
    pub order: SelectionMode,
    /// Prefetch window applied to every usable broker
    pub prefetch: Option<u16>,
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}
