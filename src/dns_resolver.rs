use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("[*] Unable to resolve {0} as an ip address")]
    Unresolved(String),
    #[error("[*] Unable to resolve the external IP via {url}: {reason}")]
    External { url: String, reason: String },
}

/// IPv4-only name lookup.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve_ipv4(&self, host: &str) -> Result<Ipv4Addr, ResolveError>;
}

/// Resolver backed by the system's getaddrinfo.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve_ipv4(&self, host: &str) -> Result<Ipv4Addr, ResolveError> {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Ok(ip);
        }
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|_| ResolveError::Unresolved(host.to_string()))?;
        first_ipv4(addrs).ok_or_else(|| ResolveError::Unresolved(host.to_string()))
    }
}

fn first_ipv4(addrs: impl IntoIterator<Item = SocketAddr>) -> Option<Ipv4Addr> {
    addrs.into_iter().find_map(|addr| match addr.ip() {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(_) => None,
    })
}

/// Fixed host table. Names not in the table fail to resolve.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    hosts: HashMap<String, Ipv4Addr>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: &str, ip: Ipv4Addr) -> Self {
        self.hosts.insert(host.to_ascii_lowercase(), ip);
        self
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve_ipv4(&self, host: &str) -> Result<Ipv4Addr, ResolveError> {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Ok(ip);
        }
        self.hosts
            .get(&host.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| ResolveError::Unresolved(host.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn ipv6_results_are_skipped() {
        let addrs = [
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 0),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)), 0),
        ];
        assert_eq!(first_ipv4(addrs), Some(Ipv4Addr::new(10, 0, 0, 9)));
        assert_eq!(first_ipv4([SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 0)]), None);
    }

    #[tokio::test]
    async fn system_resolver_passes_literals_through() {
        let ip = SystemResolver.resolve_ipv4("192.0.2.7").await.unwrap();
        assert_eq!(ip, Ipv4Addr::new(192, 0, 2, 7));
    }

    #[tokio::test]
    async fn static_resolver_is_case_insensitive() {
        let resolver = StaticResolver::new().with_host("Internal.Example", Ipv4Addr::new(10, 1, 1, 1));
        assert_eq!(
            resolver.resolve_ipv4("internal.example").await,
            Ok(Ipv4Addr::new(10, 1, 1, 1))
        );
        assert_eq!(
            resolver.resolve_ipv4("missing.example").await,
            Err(ResolveError::Unresolved("missing.example".to_string()))
        );
    }
}
