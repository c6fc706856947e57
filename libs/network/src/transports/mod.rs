//! Point-to-Point Transports
//!
//! A [`Transport`] is a reliable, ordered, full-duplex byte channel between
//! exactly two endpoints. Every call transfers an exact number of bytes:
//! `send(data)` delivers all of `data`, `recv_into(buf)` fills all of `buf`.
//! The pipe on top frames values as a fixed header transmission followed by a
//! payload transmission, so the transport never needs its own framing.
//!
//! ```text
//!   TensorPipe ──send──► Transport ══ bytes ══► Transport ──recv_into──► TensorPipe
//!                         ├─ TcpTransport         (loopback or network)
//!                         ├─ UnixSocketTransport  (same host)
//!                         └─ MemoryTransport      (same process, tests)
//! ```
//!
//! Send and receive may run concurrently on different threads; two concurrent
//! sends (or two concurrent receives) are serialized by the endpoint.

use crate::error::TransportError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

pub mod memory;
pub mod metrics;
pub mod stream;
pub mod tcp;
#[cfg(unix)]
pub mod unix;

pub use memory::{MemoryConfig, MemoryTransport};
pub use metrics::MetricsTracker;
pub use stream::{DuplexStream, StreamTransport};
pub use tcp::{TcpConfig, TcpTransport};
#[cfg(unix)]
pub use unix::{UnixSocketConfig, UnixSocketTransport};

/// Blocking byte channel to a single peer
pub trait Transport: Send + Sync {
    /// Transmit all of `data`, blocking until the backend has accepted it
    fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Fill all of `buf` with the next bytes from the peer
    fn recv_into(&self, buf: &mut [u8]) -> Result<(), TransportError>;

    /// Receive exactly `len` bytes into a fresh buffer
    fn recv(&self, len: usize) -> Result<Bytes, TransportError> {
        let mut buf = vec![0u8; len];
        self.recv_into(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// False once a send or receive has failed or the endpoint was shut down
    fn is_healthy(&self) -> bool;

    fn transport_info(&self) -> TransportInfo;

    fn metrics(&self) -> TransportMetrics;

    /// Stop the endpoint, failing any blocked or future operation on it
    fn shutdown(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    Tcp,
    Unix,
    Memory,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportType::Tcp => "tcp",
            TransportType::Unix => "unix",
            TransportType::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// Backend selection and its parameters
///
/// ```toml
/// [backend]
/// type = "tcp"
/// connect_timeout_ms = 10000
///
/// [backend.addresses]
/// 0 = "127.0.0.1:29500"
/// 1 = "127.0.0.1:29501"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Tcp(TcpConfig),
    #[cfg(unix)]
    Unix(UnixSocketConfig),
    /// In-process channel; must be injected with `TensorPipe::with_transport`
    Memory,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Memory
    }
}

impl TransportConfig {
    pub fn transport_type(&self) -> TransportType {
        match self {
            TransportConfig::Tcp(_) => TransportType::Tcp,
            #[cfg(unix)]
            TransportConfig::Unix(_) => TransportType::Unix,
            TransportConfig::Memory => TransportType::Memory,
        }
    }

    /// Check that the backend can reach both ranks of a pair
    pub fn validate(&self, local_rank: u32, peer_rank: u32) -> Result<(), TransportError> {
        match self {
            TransportConfig::Tcp(tcp) => tcp.validate(local_rank, peer_rank),
            #[cfg(unix)]
            TransportConfig::Unix(unix) => unix.validate(),
            TransportConfig::Memory => Ok(()),
        }
    }
}

/// Endpoint description for monitoring
#[derive(Debug, Clone)]
pub struct TransportInfo {
    pub transport_type: TransportType,
    pub local_address: Option<String>,
    pub remote_address: Option<String>,
    pub healthy: bool,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Transport performance counters
#[derive(Debug, Clone, Default)]
pub struct TransportMetrics {
    pub transmissions_sent: u64,
    pub transmissions_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub errors: u64,
    pub last_send_latency_ns: u64,
    pub avg_send_latency_ns: u64,
    pub p95_send_latency_ns: u64,
    pub p99_send_latency_ns: u64,
    pub avg_recv_latency_ns: u64,
    pub p99_recv_latency_ns: u64,
    pub last_activity: Option<Instant>,
}

/// Builds connected endpoints from configuration
pub struct TransportFactory;

impl TransportFactory {
    /// Rendezvous with `peer_rank` and return the connected endpoint
    ///
    /// Blocks until both sides have connected and exchanged ranks, or the
    /// backend's connect timeout expires.
    pub fn connect(
        config: &TransportConfig,
        local_rank: u32,
        peer_rank: u32,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        config.validate(local_rank, peer_rank)?;
        match config {
            TransportConfig::Tcp(tcp) => {
                let transport = TcpTransport::rendezvous(tcp, local_rank, peer_rank)?;
                Ok(Arc::new(transport))
            }
            #[cfg(unix)]
            TransportConfig::Unix(unix) => {
                let transport = UnixSocketTransport::rendezvous(unix, local_rank, peer_rank)?;
                Ok(Arc::new(transport))
            }
            TransportConfig::Memory => Err(TransportError::configuration(
                "memory backend has no rendezvous; build a MemoryTransport pair and inject it",
                Some("backend.type"),
            )),
        }
    }
}
