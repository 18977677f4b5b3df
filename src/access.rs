use std::fmt;
use std::net::Ipv4Addr;

use rand::RngCore;
use thiserror::Error;

use crate::config::ClientOptions;
use crate::nat;

/// Body sent when no access spec is given: no port restriction.
pub const NO_PORT_ACCESS: &str = "none/0";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("[*] Expecting <proto>/<port> for -A arg.")]
    MissingSlash,
    #[error("[*] NAT for multiple ports/protocols not yet supported.")]
    MultiplePorts,
    #[error("[*] Invalid port value '{0}' for -A arg.")]
    InvalidPort(String),
}

/// `allow_ip,body` message carried by the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDescriptor {
    message: String,
    nat_port: Option<u16>,
}

impl AccessDescriptor {
    pub fn as_str(&self) -> &str {
        &self.message
    }

    /// Translated port advertised in place of the requested one, if any.
    pub fn nat_port(&self) -> Option<u16> {
        self.nat_port
    }
}

impl fmt::Display for AccessDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Builds the access message. A random NAT port, when requested, is drawn
/// here and reported back through [`AccessDescriptor::nat_port`].
pub fn build(
    opts: &ClientOptions,
    allow_ip: Ipv4Addr,
    rng: &mut dyn RngCore,
) -> Result<AccessDescriptor, AccessError> {
    if let Some(cmd) = opts.server_command.as_deref() {
        return Ok(AccessDescriptor {
            message: format!("{allow_ip},{cmd}"),
            nat_port: None,
        });
    }

    let Some(spec) = opts.access.as_deref().map(str::trim) else {
        return Ok(AccessDescriptor {
            message: format!("{allow_ip},{NO_PORT_ACCESS}"),
            nat_port: None,
        });
    };

    let nat_port = if opts.nat_rand_port {
        Some(nat::random_port(rng))
    } else {
        opts.nat_port
    };

    let message = match nat_port {
        Some(port) => {
            let slash = spec.find('/').ok_or(AccessError::MissingSlash)?;
            if spec[slash + 1..].contains('/') {
                return Err(AccessError::MultiplePorts);
            }
            format!("{allow_ip},{}{port}", &spec[..=slash])
        }
        None => {
            if spec.is_empty() || spec.split(',').any(|entry| !entry.contains('/')) {
                return Err(AccessError::MissingSlash);
            }
            format!("{allow_ip},{spec}")
        }
    };

    Ok(AccessDescriptor { message, nat_port })
}

/// Port digits following the first `/` of an access spec.
pub fn access_port(spec: &str) -> Result<u16, AccessError> {
    let slash = spec.find('/').ok_or(AccessError::MissingSlash)?;
    let digits: String = spec[slash + 1..]
        .chars()
        .take_while(char::is_ascii_digit)
        .take(nat::MAX_PORT_STR_LEN)
        .collect();
    match digits.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(AccessError::InvalidPort(digits)),
    }
}
