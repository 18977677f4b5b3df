use std::net::{Ipv4Addr, SocketAddrV4};

use rand::RngCore;
use thiserror::Error;
use tracing::debug;

use crate::access::{self, AccessDescriptor, AccessError};
use crate::config::ClientOptions;
use crate::dns_resolver::{HostResolver, ResolveError};

pub const MAX_PORT_STR_LEN: usize = 5;
pub const MIN_HIGH_PORT: u16 = 10000;
pub const MAX_PORT: u16 = 65535;
pub const HOSTNAME_MAX_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NatError {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("[*] NAT hostname '{0}' is too long to resolve")]
    HostnameTooLong(String),
}

/// Translated target handed to the engine, plus the line the operator must
/// see when the external port was drawn at random.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatAccess {
    pub value: String,
    pub announcement: Option<String>,
}

/// Random port in `[MIN_HIGH_PORT, MAX_PORT)` from five random digits.
pub fn random_port(rng: &mut dyn RngCore) -> u16 {
    let digits = rng.next_u32() % 100_000;
    let span = u32::from(MAX_PORT - MIN_HIGH_PORT);
    MIN_HIGH_PORT + (digits % span) as u16
}

/// IPv6 literals are not classified; every string is treated as non-IPv6.
pub fn is_ipv6_str(_s: &str) -> bool {
    false
}

/// `a.b.c.d:port` or `a.b.c.d,port` with a port in `1..=65535`.
pub fn parse_ipv4_with_port(s: &str) -> Option<SocketAddrV4> {
    let (ip, port) = s.split_once(|c| c == ':' || c == ',')?;
    let ip = ip.trim().parse::<Ipv4Addr>().ok()?;
    let port = parse_port(port)?;
    Some(SocketAddrV4::new(ip, port))
}

/// `hostname,port` or `hostname:port` where the host is not an address literal.
pub fn parse_host_with_port(s: &str) -> Option<(&str, u16)> {
    let (host, port) = s.split_once(|c| c == ',' || c == ':')?;
    if host.is_empty() || host.parse::<Ipv4Addr>().is_ok() || is_ipv6_str(host) {
        return None;
    }
    Some((host, parse_port(port)?))
}

fn parse_port(raw: &str) -> Option<u16> {
    raw.trim().parse::<u16>().ok().filter(|p| *p > 0)
}

/// Derives the NAT access string. `Ok(None)` when no NAT mode is active.
pub async fn build(
    opts: &ClientOptions,
    access_desc: &AccessDescriptor,
    resolver: &dyn HostResolver,
) -> Result<Option<NatAccess>, NatError> {
    if !opts.nat_local && opts.nat_access.is_none() {
        return Ok(None);
    }

    let spec = opts.access.as_deref().ok_or(AccessError::MissingSlash)?;
    let access_port = access::access_port(spec)?;

    // An explicit target wins over --nat-local.
    let candidate = match opts.nat_access.as_deref().map(str::trim) {
        Some(target) => match parse_ipv4_with_port(target) {
            Some(addr) => format!("{},{}", addr.ip(), addr.port()),
            None if target.contains([',', ':']) => target.replacen(':', ",", 1),
            None => format!("{target},{access_port}"),
        },
        None => format!("{},{access_port}", opts.spa_server),
    };

    let value = match parse_host_with_port(&candidate) {
        Some((host, port)) => {
            if host.len() > HOSTNAME_MAX_LEN {
                return Err(NatError::HostnameTooLong(host.to_string()));
            }
            let ip = resolver.resolve_ipv4(host).await?;
            debug!("Resolved NAT host {host} to {ip}");
            format!("{ip},{port}")
        }
        None => candidate,
    };

    let announcement = match access_desc.nat_port() {
        Some(port) if opts.nat_rand_port => Some(format!(
            "[+] Randomly assigned port '{port}' on: '{access_desc}' will grant access to: '{value}'"
        )),
        _ => None,
    };

    Ok(Some(NatAccess {
        value,
        announcement,
    }))
}
