//! Delivery of the finalized SPA data to the server.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};

use rand::RngCore;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpSocket, UdpSocket};
use tracing::{debug, info};

use crate::cli::SpaProtocol;
use crate::config::ClientOptions;
use crate::dns_resolver::{HostResolver, ResolveError};
use crate::nat;

#[derive(Debug, Error)]
pub enum TransmitError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("[*] Could not set up {proto} socket: {source}")]
    Socket { proto: &'static str, source: io::Error },
    #[error("[*] Could not send SPA packet to {dest}: {source}")]
    Send { dest: SocketAddrV4, source: io::Error },
    #[error("[*] Only sent {sent} of {expected} bytes to {dest}")]
    Short {
        dest: SocketAddrV4,
        sent: usize,
        expected: usize,
    },
    #[error("[*] Could not write SPA packet to {}: {source}", .path.display())]
    SavePacket { path: PathBuf, source: io::Error },
}

fn socket_err(proto: &'static str) -> impl FnOnce(io::Error) -> TransmitError {
    move |source| TransmitError::Socket { proto, source }
}

/// Resolves the server and picks the destination port. `--rand-port` swaps
/// the configured port for a random high one.
pub async fn destination(
    opts: &ClientOptions,
    resolver: &dyn HostResolver,
    rng: &mut dyn RngCore,
) -> Result<SocketAddrV4, TransmitError> {
    let ip = resolver.resolve_ipv4(&opts.spa_server).await?;
    let port = if opts.rand_port {
        let port = nat::random_port(rng);
        info!("[+] Randomly assigned destination port: {port}");
        port
    } else {
        opts.spa_port
    };
    Ok(SocketAddrV4::new(ip, port))
}

/// Sends `spa_data` as a single datagram (or one TCP write). Returns the
/// number of bytes sent.
pub async fn send_spa_packet(
    opts: &ClientOptions,
    spa_data: &str,
    resolver: &dyn HostResolver,
    rng: &mut dyn RngCore,
) -> Result<usize, TransmitError> {
    let dest = destination(opts, resolver, rng).await?;
    debug!(
        "Sending {} bytes to {dest} over {:?}",
        spa_data.len(),
        opts.protocol
    );
    let sent = match opts.protocol {
        SpaProtocol::Udp => send_udp(dest, opts.source_port, spa_data.as_bytes()).await?,
        SpaProtocol::Tcp => send_tcp(dest, opts.source_port, spa_data.as_bytes()).await?,
    };
    if sent != spa_data.len() {
        return Err(TransmitError::Short {
            dest,
            sent,
            expected: spa_data.len(),
        });
    }
    Ok(sent)
}

async fn send_udp(
    dest: SocketAddrV4,
    source_port: Option<u16>,
    payload: &[u8],
) -> Result<usize, TransmitError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(socket_err("UDP"))?;
    let local = SocketAddr::from((Ipv4Addr::UNSPECIFIED, source_port.unwrap_or(0)));
    socket
        .bind(&SockAddr::from(local))
        .map_err(socket_err("UDP"))?;
    socket.set_nonblocking(true).map_err(socket_err("UDP"))?;

    let socket = UdpSocket::from_std(socket.into()).map_err(socket_err("UDP"))?;
    socket
        .send_to(payload, dest)
        .await
        .map_err(|source| TransmitError::Send { dest, source })
}

async fn send_tcp(
    dest: SocketAddrV4,
    source_port: Option<u16>,
    payload: &[u8],
) -> Result<usize, TransmitError> {
    let socket = TcpSocket::new_v4().map_err(socket_err("TCP"))?;
    if let Some(port) = source_port {
        socket.set_reuseaddr(true).map_err(socket_err("TCP"))?;
        socket
            .bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
            .map_err(socket_err("TCP"))?;
    }
    let send_err = |source| TransmitError::Send { dest, source };
    let mut stream = socket.connect(dest.into()).await.map_err(send_err)?;
    stream.write_all(payload).await.map_err(send_err)?;
    stream.shutdown().await.map_err(send_err)?;
    Ok(payload.len())
}

/// Writes the SPA data followed by a newline, replacing any previous file.
pub fn save_packet(path: &Path, spa_data: &str) -> Result<(), TransmitError> {
    let save_err = |source| TransmitError::SavePacket {
        path: path.to_path_buf(),
        source,
    };
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(save_err)?;
    writeln!(file, "{spa_data}").map_err(save_err)?;
    Ok(())
}
