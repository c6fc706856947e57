//! Unix Domain Socket Transport
//!
//! Same-host backend. The pair meets at `<socket_dir>/pipe-<low>-<high>.sock`:
//! the lower rank binds it (replacing a stale file), accepts one connection
//! and unlinks the path; the higher rank connects with retry. Rank hellos
//! follow, as for TCP.

use super::stream::{exchange_hello, is_transient_connect_error, retry_until, StreamTransport};
use super::TransportType;
use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Unix socket backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnixSocketConfig {
    /// Directory holding the rendezvous socket files
    pub socket_dir: PathBuf,
    pub connect_timeout_ms: u64,
    pub retry_interval_ms: u64,
}

impl Default for UnixSocketConfig {
    fn default() -> Self {
        Self {
            socket_dir: std::env::temp_dir(),
            connect_timeout_ms: 10_000,
            retry_interval_ms: 20,
        }
    }
}

impl UnixSocketConfig {
    pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
            ..Self::default()
        }
    }

    /// Rendezvous path for the pair, independent of argument order
    pub fn socket_path(&self, a: u32, b: u32) -> PathBuf {
        let (low, high) = (a.min(b), a.max(b));
        self.socket_dir.join(format!("pipe-{low}-{high}.sock"))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms.max(1))
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        if self.socket_dir.as_os_str().is_empty() {
            return Err(TransportError::configuration(
                "socket directory must not be empty",
                Some("backend.socket_dir"),
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

/// Stream transport over a Unix domain socket
pub type UnixSocketTransport = StreamTransport<UnixStream>;

impl StreamTransport<UnixStream> {
    /// Establish the pair connection described by `config`
    pub fn rendezvous(
        config: &UnixSocketConfig,
        local_rank: u32,
        peer_rank: u32,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        let path = config.socket_path(local_rank, peer_rank);
        let timeout = config.connect_timeout();
        let interval = config.retry_interval();

        let mut stream = if local_rank < peer_rank {
            accept_peer(&config.socket_dir, &path, timeout, interval)?
        } else {
            info!(path = %path.display(), "Connecting to peer socket");
            retry_until("unix connect", timeout, interval, || {
                match UnixStream::connect(&path) {
                    Ok(stream) => Ok(Some(stream)),
                    Err(e) if is_transient_connect_error(&e) => Ok(None),
                    Err(e) => Err(e),
                }
            })?
        };

        exchange_hello(&mut stream, local_rank, peer_rank, timeout)?;
        info!(local_rank, peer_rank, path = %path.display(), "Unix socket pipe connected");
        Self::from_stream(stream, TransportType::Unix)
    }
}

fn accept_peer(
    dir: &Path,
    path: &Path,
    timeout: Duration,
    interval: Duration,
) -> Result<UnixStream, TransportError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| TransportError::io("Failed to create socket directory", e))?;
    if path.exists() {
        debug!(path = %path.display(), "Removing stale socket file");
        std::fs::remove_file(path)
            .map_err(|e| TransportError::io("Failed to remove existing socket", e))?;
    }

    let listener = UnixListener::bind(path).map_err(|e| {
        TransportError::connection_with_source(
            format!("Failed to bind Unix socket {}", path.display()),
            None,
            e,
        )
    })?;
    listener
        .set_nonblocking(true)
        .map_err(|e| TransportError::io("Failed to configure Unix listener", e))?;
    info!(path = %path.display(), "Waiting for peer connection");

    let accepted = retry_until("unix accept", timeout, interval, || match listener.accept() {
        Ok((stream, _)) => Ok(Some(stream)),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(e),
    });

    // The path is only needed for the rendezvous itself
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "Failed to unlink socket file");
    }

    let stream = accepted?;
    stream
        .set_nonblocking(false)
        .map_err(|e| TransportError::io("Failed to configure accepted Unix stream", e))?;
    Ok(stream)
}
