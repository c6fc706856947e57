//! TCP Transport
//!
//! Rendezvous is asymmetric: the lower rank of the pair listens on its
//! configured address and accepts exactly one connection, the higher rank
//! connects to it, retrying until the listener is up or the connect timeout
//! expires. Both sides then exchange rank hellos before any data flows.
//! `TCP_NODELAY` is on by default since headers are small and latency bound.

use super::stream::{exchange_hello, is_transient_connect_error, retry_until, StreamTransport};
use super::TransportType;
use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;
use tracing::{info, warn};

/// TCP backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Listen address per rank, keyed by the rank's decimal string
    pub addresses: BTreeMap<String, SocketAddr>,
    pub connect_timeout_ms: u64,
    pub retry_interval_ms: u64,
    pub nodelay: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            addresses: BTreeMap::new(),
            connect_timeout_ms: 10_000,
            retry_interval_ms: 50,
            nodelay: true,
        }
    }
}

impl TcpConfig {
    /// Register the listen address for `rank`
    pub fn with_address(mut self, rank: u32, address: SocketAddr) -> Self {
        self.addresses.insert(rank.to_string(), address);
        self
    }

    pub fn address_of(&self, rank: u32) -> Option<SocketAddr> {
        self.addresses.get(&rank.to_string()).copied()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms.max(1))
    }

    pub fn validate(&self, local_rank: u32, peer_rank: u32) -> Result<(), TransportError> {
        if let Some(key) = self.addresses.keys().find(|k| k.parse::<u32>().is_err()) {
            return Err(TransportError::configuration(
                format!("address key {key:?} is not a rank"),
                Some("backend.addresses"),
            ));
        }
        let listener = local_rank.min(peer_rank);
        if self.address_of(listener).is_none() {
            return Err(TransportError::configuration(
                format!("no address for rank {listener}, which listens for the pair ({local_rank}, {peer_rank})"),
                Some("backend.addresses"),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(TransportError::configuration(
                "connect timeout must be positive",
                Some("backend.connect_timeout_ms"),
            ));
        }
        Ok(())
    }
}

/// Stream transport over a TCP connection
pub type TcpTransport = StreamTransport<TcpStream>;

impl StreamTransport<TcpStream> {
    /// Establish the pair connection described by `config`
    pub fn rendezvous(
        config: &TcpConfig,
        local_rank: u32,
        peer_rank: u32,
    ) -> Result<Self, TransportError> {
        config.validate(local_rank, peer_rank)?;
        let listener_rank = local_rank.min(peer_rank);
        let address = config.address_of(listener_rank).ok_or_else(|| {
            TransportError::configuration("listener address missing", Some("backend.addresses"))
        })?;
        let timeout = config.connect_timeout();
        let interval = config.retry_interval();

        let mut stream = if local_rank == listener_rank {
            accept_peer(address, timeout, interval)?
        } else {
            connect_peer(address, timeout, interval)?
        };

        if config.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                warn!(error = %e, "Failed to set TCP_NODELAY");
            }
        }

        exchange_hello(&mut stream, local_rank, peer_rank, timeout)?;
        info!(local_rank, peer_rank, %address, "TCP pipe connected");
        Self::from_stream(stream, TransportType::Tcp)
    }

    /// Wrap an already connected socket, e.g. one half of a test pair
    pub fn from_tcp_stream(stream: TcpStream) -> Result<Self, TransportError> {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "Failed to set TCP_NODELAY");
        }
        Self::from_stream(stream, TransportType::Tcp)
    }
}

fn accept_peer(
    address: SocketAddr,
    timeout: Duration,
    interval: Duration,
) -> Result<TcpStream, TransportError> {
    let listener = TcpListener::bind(address).map_err(|e| {
        TransportError::connection_with_source(
            format!("Failed to bind TCP listener on {address}"),
            None,
            e,
        )
    })?;
    listener
        .set_nonblocking(true)
        .map_err(|e| TransportError::io("Failed to configure TCP listener", e))?;
    info!(%address, "Waiting for peer connection");

    let (stream, from) = retry_until("tcp accept", timeout, interval, || {
        match listener.accept() {
            Ok(pair) => Ok(Some(pair)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    })?;
    stream
        .set_nonblocking(false)
        .map_err(|e| TransportError::io("Failed to configure accepted TCP stream", e))?;
    info!(%address, peer = %from, "Accepted peer connection");
    Ok(stream)
}

fn connect_peer(
    address: SocketAddr,
    timeout: Duration,
    interval: Duration,
) -> Result<TcpStream, TransportError> {
    let attempt_timeout = interval.max(Duration::from_millis(100));
    info!(%address, "Connecting to peer");
    retry_until("tcp connect", timeout, interval, || {
        match TcpStream::connect_timeout(&address, attempt_timeout) {
            Ok(stream) => Ok(Some(stream)),
            Err(e) if is_transient_connect_error(&e) => Ok(None),
            Err(e) => Err(e),
        }
    })
}
