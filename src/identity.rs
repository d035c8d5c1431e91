//! Broker identity encoding and address-list parsing
//!
//! A broker's (host, port) pair is encoded into an opaque, human-readable
//! identity string of the form `rs-broker-<host>-<port>`. Because the identity
//! is single-`-` delimited, any `-` in the host is replaced with `~` on the way
//! in and reversed on the way out.
//!
//! Host and port configuration arrives as comma-separated lists where each
//! entry may carry a pinned positional id as a trailing `:<id>`.

use crate::error::{FleetMqError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Prefix of every broker identity string
pub const IDENTITY_PREFIX: &str = "rs-broker-";

/// Default broker endpoint when no host/port configuration is supplied
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5672;

/// One configured broker endpoint with its positional id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub id: u32,
}

/// Form the unique identity of the broker at the given host and port
pub fn identity(host: &str, port: u16) -> String {
    format!("{IDENTITY_PREFIX}{}-{port}", host.replace('-', "~"))
}

/// Recover the host from a broker identity
pub fn host_of(identity: &str) -> Result<String> {
    let (host, _) = split_identity(identity)?;
    Ok(host)
}

/// Recover the port from a broker identity
pub fn port_of(identity: &str) -> Result<u16> {
    let (_, port) = split_identity(identity)?;
    Ok(port)
}

/// Strip any legacy routing-system prefix from an identity, yielding the
/// canonical `rs-broker-...` substring. Returns None when the input does not
/// contain a broker identity at all.
pub fn canonical(identity: &str) -> Option<&str> {
    identity.find(IDENTITY_PREFIX).map(|i| &identity[i..])
}

fn split_identity(identity: &str) -> Result<(String, u16)> {
    let canonical = canonical(identity)
        .ok_or_else(|| FleetMqError::configuration(format!("Invalid broker identity {identity}")))?;
    let rest = &canonical[IDENTITY_PREFIX.len()..];
    let (host, port) = rest.rsplit_once('-').ok_or_else(|| {
        FleetMqError::configuration(format!("Invalid broker identity {identity}"))
    })?;
    let port = port.parse::<u16>().map_err(|_| {
        FleetMqError::configuration(format!("Invalid port in broker identity {identity}"))
    })?;
    Ok((host.replace('~', "-"), port))
}

/// List broker identities for the given host and port lists
pub fn identities(hosts: Option<&str>, ports: Option<&str>) -> Result<Vec<String>> {
    Ok(addresses(hosts, ports)?
        .iter()
        .map(|a| identity(&a.host, a.port))
        .collect())
}

/// Parse host and port CSV lists into an ordered address list.
///
/// Each entry may be suffixed with `:<id>` to pin its positional id; entries
/// without an explicit id receive the lowest unused non-negative id in
/// left-to-right order. A single-element list is broadcast to match the other
/// list's length; any other cardinality mismatch is a configuration error.
pub fn addresses(hosts: Option<&str>, ports: Option<&str>) -> Result<Vec<BrokerAddress>> {
    let hosts = split_entries(hosts, DEFAULT_HOST);
    let ports = split_entries(ports, &DEFAULT_PORT.to_string());

    let (hosts, ports) = broadcast(hosts, ports)?;

    let mut used: HashSet<u32> = hosts
        .iter()
        .zip(ports.iter())
        .filter_map(|((_, hid), (_, pid))| hid.or(*pid))
        .collect();
    let mut next = 0u32;

    hosts
        .into_iter()
        .zip(ports)
        .map(|((host, host_id), (port, port_id))| {
            let port = port.parse::<u16>().map_err(|_| {
                FleetMqError::configuration(format!("Invalid broker port {port}"))
            })?;
            let id = host_id.or(port_id).unwrap_or_else(|| {
                while used.contains(&next) {
                    next += 1;
                }
                used.insert(next);
                next
            });
            Ok(BrokerAddress { host, port, id })
        })
        .collect()
}

/// Split a CSV list into (value, pinned id) entries, applying the default when
/// the input is absent or blank.
fn split_entries(list: Option<&str>, default: &str) -> Vec<(String, Option<u32>)> {
    let list = match list {
        Some(l) if !l.trim().is_empty() => l,
        _ => default,
    };
    list.split(',')
        .map(|entry| {
            let entry = entry.trim();
            match entry.rsplit_once(':') {
                Some((value, id)) => match id.parse::<u32>() {
                    Ok(id) => (value.trim().to_string(), Some(id)),
                    Err(_) => (entry.to_string(), None),
                },
                None => (entry.to_string(), None),
            }
        })
        .collect()
}

type Entries = Vec<(String, Option<u32>)>;

fn broadcast(mut hosts: Entries, mut ports: Entries) -> Result<(Entries, Entries)> {
    if hosts.len() == 1 && ports.len() > 1 {
        hosts = vec![hosts[0].clone(); ports.len()];
    } else if ports.len() == 1 && hosts.len() > 1 {
        ports = vec![ports[0].clone(); hosts.len()];
    }
    if hosts.len() != ports.len() {
        return Err(FleetMqError::configuration(format!(
            "Mismatched number of hosts ({}) and ports ({})",
            hosts.len(),
            ports.len()
        )));
    }
    Ok((hosts, ports))
}
