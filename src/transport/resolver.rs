//! Endpoint resolution.
//!
//! Turns a hostname-or-IP string plus a port into a concrete socket address.
//! The seam is a trait so deployments can plug in alternative resolution
//! strategies and tests can substitute a fixed address.

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use rand::Rng;
use tokio::net::lookup_host;
use tracing::debug;

use crate::error::{NetError, Result};

/// Pluggable resolution of a host-or-IP string to a socket address.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    /// Resolve `host_or_ip` and `port` to a concrete socket address.
    async fn resolve(&self, host_or_ip: &str, port: u16) -> Result<SocketAddr>;

    /// Combine an already-concrete IP address with a port. No resolution is
    /// required for this form.
    fn resolve_ip(&self, address: IpAddr, port: u16) -> SocketAddr {
        SocketAddr::new(address, port)
    }
}

/// Resolver with a literal-IP fast path and a DNS fallback.
///
/// A string that parses as an IP address is used directly. Otherwise it is
/// treated as a machine name and resolved through DNS; when the name resolves
/// to multiple addresses one is selected uniformly at random.
#[derive(Debug, Clone, Default)]
pub struct DnsEndpointResolver;

impl DnsEndpointResolver {
    /// Create a DNS-backed resolver.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EndpointResolver for DnsEndpointResolver {
    async fn resolve(&self, host_or_ip: &str, port: u16) -> Result<SocketAddr> {
        if host_or_ip.trim().is_empty() {
            return Err(NetError::InvalidArgument(
                "empty or whitespace hostname/IP address provided".to_string(),
            ));
        }

        let parse_err = match host_or_ip.parse::<IpAddr>() {
            Ok(address) => return Ok(SocketAddr::new(address, port)),
            Err(err) => err,
        };

        // Not an IP literal; try DNS instead.
        let addresses: Vec<SocketAddr> = match lookup_host((host_or_ip, port)).await {
            Ok(found) => found.collect(),
            Err(dns_err) => {
                return Err(NetError::InvalidArgument(format!(
                    "unable to parse [{host_or_ip}] as an IP address ({parse_err}) \
                     or resolve it as a hostname ({dns_err})"
                )))
            }
        };

        if addresses.is_empty() {
            return Err(NetError::InvalidArgument(format!(
                "hostname [{host_or_ip}] did not resolve to any address"
            )));
        }

        let chosen = addresses[rand::rng().random_range(0..addresses.len())];
        debug!(host = host_or_ip, resolved = %chosen, candidates = addresses.len(), "resolved endpoint");
        Ok(chosen)
    }
}

/// Resolver that always returns one fixed address. Intended for tests.
#[derive(Debug, Clone)]
pub struct FixedResolver {
    address: SocketAddr,
}

impl FixedResolver {
    /// Create a resolver pinned to `address`.
    pub fn new(address: SocketAddr) -> Self {
        Self { address }
    }
}

#[async_trait]
impl EndpointResolver for FixedResolver {
    async fn resolve(&self, _host_or_ip: &str, _port: u16) -> Result<SocketAddr> {
        Ok(self.address)
    }
}
