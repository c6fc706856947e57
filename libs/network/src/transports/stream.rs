//! Stream-Socket Transport
//!
//! Shared implementation for connected stream sockets (TCP, Unix domain).
//! The socket is cloned into a read half and a write half, each behind its
//! own lock, so the send worker and a receiving caller never wait on each
//! other. A third handle is kept for `shutdown`, which must not take either
//! lock because an operation may be blocked inside it.
//!
//! Rendezvous helpers live here too: bounded accept/connect retry loops and
//! the rank hello exchanged right after a connection is established.

use super::{MetricsTracker, Transport, TransportInfo, TransportMetrics, TransportType};
use crate::error::TransportError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Connected socket that can be split into independent halves
pub trait DuplexStream: Read + Write + Send + Sync + Sized + 'static {
    fn try_clone_stream(&self) -> io::Result<Self>;

    fn shutdown_stream(&self) -> io::Result<()>;

    fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    fn local_description(&self) -> Option<String>;

    fn peer_description(&self) -> Option<String>;
}

impl DuplexStream for std::net::TcpStream {
    fn try_clone_stream(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn shutdown_stream(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }

    fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }

    fn local_description(&self) -> Option<String> {
        self.local_addr().ok().map(|a| a.to_string())
    }

    fn peer_description(&self) -> Option<String> {
        self.peer_addr().ok().map(|a| a.to_string())
    }
}

#[cfg(unix)]
impl DuplexStream for std::os::unix::net::UnixStream {
    fn try_clone_stream(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn shutdown_stream(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }

    fn set_io_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }

    fn local_description(&self) -> Option<String> {
        let addr = self.local_addr().ok()?;
        addr.as_pathname().map(|p| p.display().to_string())
    }

    fn peer_description(&self) -> Option<String> {
        let addr = self.peer_addr().ok()?;
        addr.as_pathname().map(|p| p.display().to_string())
    }
}

/// Transport over a connected stream socket
pub struct StreamTransport<S: DuplexStream> {
    transport_type: TransportType,
    reader: Mutex<S>,
    writer: Mutex<S>,
    control: S,
    healthy: AtomicBool,
    shut_down: AtomicBool,
    local: Option<String>,
    peer: String,
    metrics: MetricsTracker,
}

impl<S: DuplexStream> StreamTransport<S> {
    /// Wrap an established, already-handshaken stream
    pub fn from_stream(stream: S, transport_type: TransportType) -> Result<Self, TransportError> {
        let local = stream.local_description();
        let peer = stream
            .peer_description()
            .unwrap_or_else(|| format!("{transport_type} peer"));

        let clone = |stream: &S| {
            stream
                .try_clone_stream()
                .map_err(|e| TransportError::io("Failed to clone stream handle", e))
        };
        let writer = clone(&stream)?;
        let control = clone(&stream)?;

        debug!(transport = %transport_type, peer = %peer, "Stream transport ready");

        Ok(Self {
            transport_type,
            reader: Mutex::new(stream),
            writer: Mutex::new(writer),
            control,
            healthy: AtomicBool::new(true),
            shut_down: AtomicBool::new(false),
            local,
            peer,
            metrics: MetricsTracker::new(),
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn ensure_open(&self, operation: &'static str) -> Result<(), TransportError> {
        if self.healthy.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::closed(format!(
                "{operation} on {} transport to {} after shutdown or failure",
                self.transport_type, self.peer
            )))
        }
    }

    fn fail(&self, operation: &'static str, error: io::Error) -> TransportError {
        self.healthy.store(false, Ordering::Release);
        self.metrics.record_error(operation);
        TransportError::from_stream_io(operation, &self.peer, error)
    }
}

impl<S: DuplexStream> Transport for StreamTransport<S> {
    fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        self.ensure_open("send")?;
        let start = Instant::now();
        {
            let mut writer = self.writer.lock();
            writer
                .write_all(data)
                .and_then(|()| writer.flush())
                .map_err(|e| self.fail("send", e))?;
        }
        self.metrics
            .record_send(data.len(), start.elapsed().as_nanos() as u64);
        trace!(peer = %self.peer, bytes = data.len(), "Stream send complete");
        Ok(())
    }

    fn recv_into(&self, buf: &mut [u8]) -> Result<(), TransportError> {
        self.ensure_open("recv")?;
        let start = Instant::now();
        self.reader
            .lock()
            .read_exact(buf)
            .map_err(|e| self.fail("recv", e))?;
        self.metrics
            .record_receive(buf.len(), start.elapsed().as_nanos() as u64);
        trace!(peer = %self.peer, bytes = buf.len(), "Stream receive complete");
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    fn transport_info(&self) -> TransportInfo {
        let metrics = self.metrics.snapshot();
        TransportInfo {
            transport_type: self.transport_type,
            local_address: self.local.clone(),
            remote_address: Some(self.peer.clone()),
            healthy: self.is_healthy(),
            bytes_sent: metrics.bytes_sent,
            bytes_received: metrics.bytes_received,
        }
    }

    fn metrics(&self) -> TransportMetrics {
        self.metrics.snapshot()
    }

    fn shutdown(&self) {
        self.healthy.store(false, Ordering::Release);
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.control.shutdown_stream() {
            Ok(()) => debug!(peer = %self.peer, "Stream transport shut down"),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => warn!(peer = %self.peer, error = %e, "Error shutting down stream"),
        }
    }
}

impl<S: DuplexStream> Drop for StreamTransport<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Exchange rank hellos on a fresh connection
///
/// Each side writes its own rank as a little-endian u32 and reads the other's.
/// A mismatch means the socket reached the wrong process.
pub(crate) fn exchange_hello<S: DuplexStream>(
    stream: &mut S,
    local_rank: u32,
    expected_peer: u32,
    timeout: Duration,
) -> Result<(), TransportError> {
    let peer = stream.peer_description();
    let io_err = |e: io::Error| match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            TransportError::timeout("rank handshake", timeout.as_millis() as u64)
        }
        _ => TransportError::connection_with_source("Rank handshake failed", peer.clone(), e),
    };

    stream
        .set_io_timeout(Some(timeout))
        .map_err(|e| TransportError::io("Failed to set handshake timeout", e))?;
    stream.write_u32::<LittleEndian>(local_rank).map_err(io_err)?;
    stream.flush().map_err(io_err)?;
    let announced = stream.read_u32::<LittleEndian>().map_err(io_err)?;
    stream
        .set_io_timeout(None)
        .map_err(|e| TransportError::io("Failed to clear handshake timeout", e))?;

    if announced != expected_peer {
        return Err(TransportError::Handshake {
            expected: expected_peer,
            actual: announced,
        });
    }
    debug!(local_rank, peer_rank = announced, "Rank handshake complete");
    Ok(())
}

/// Repeat `attempt` until it yields a value or `timeout` elapses
///
/// `attempt` returns `Ok(None)` for transient conditions (peer not listening
/// yet, no pending connection) and `Err` for anything that will not resolve
/// by waiting.
pub(crate) fn retry_until<T>(
    operation: &str,
    timeout: Duration,
    interval: Duration,
    mut attempt: impl FnMut() -> io::Result<Option<T>>,
) -> Result<T, TransportError> {
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match attempt() {
            Ok(Some(value)) => {
                debug!(operation, attempts, "Rendezvous step succeeded");
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) => return Err(TransportError::io(format!("{operation} failed"), e)),
        }

        let now = Instant::now();
        if now >= deadline {
            warn!(
                operation,
                attempts,
                timeout_ms = timeout.as_millis() as u64,
                "Rendezvous timed out"
            );
            return Err(TransportError::timeout(operation, timeout.as_millis() as u64));
        }
        thread::sleep(interval.min(deadline - now));
    }
}

/// Errors a connecting side should treat as "peer not ready yet"
pub(crate) fn is_transient_connect_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::NotFound
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}
