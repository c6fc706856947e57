//! In-Process Memory Transport
//!
//! A pair of crossbeam channels joining two endpoints in the same process.
//! Every `send` becomes one frame; `recv_into` reassembles exact byte counts
//! across frame boundaries. Frames already queued stay readable after the
//! sender shuts down, matching a socket whose peer closed after writing.
//!
//! Two test knobs model real links: a bounded capacity (in frames) that makes
//! a slow reader stall the writer, and a fixed per-send latency. `sever` cuts
//! the link for both endpoints at once to simulate a backend failure.

use super::{MetricsTracker, Transport, TransportInfo, TransportMetrics, TransportType};
use crate::error::TransportError;
use bytes::Bytes;
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Link parameters for a memory pair
#[derive(Debug, Clone, Default)]
pub struct MemoryConfig {
    /// Frames buffered per direction before `send` blocks; unbounded if `None`
    pub capacity: Option<usize>,
    /// Delay applied to every send
    pub latency: Option<Duration>,
}

/// Shared kill switch for both endpoints of a pair
struct Link {
    severed: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl Link {
    fn new() -> Self {
        let (trigger, signal) = bounded(0);
        Self {
            severed: AtomicBool::new(false),
            trigger: Mutex::new(Some(trigger)),
            signal,
        }
    }

    /// Disconnecting the trigger wakes every `select!` watching `signal`
    fn fire(&self) -> bool {
        self.severed.store(true, Ordering::Release);
        self.trigger.lock().take().is_some()
    }
}

pub struct MemoryTransport {
    name: String,
    outbound: Sender<Bytes>,
    inbound: Receiver<Bytes>,
    /// Unconsumed tail of the current inbound frame
    pending: Mutex<Bytes>,
    link: Arc<Link>,
    local: Link,
    latency: Option<Duration>,
    metrics: MetricsTracker,
}

impl MemoryTransport {
    /// Unbounded, zero-latency pair
    pub fn pair() -> (Self, Self) {
        Self::pair_with_config(MemoryConfig::default())
    }

    pub fn pair_with_config(config: MemoryConfig) -> (Self, Self) {
        let channel = || match config.capacity {
            Some(cap) => bounded::<Bytes>(cap),
            None => unbounded::<Bytes>(),
        };
        let (a_tx, b_rx) = channel();
        let (b_tx, a_rx) = channel();
        let link = Arc::new(Link::new());

        let endpoint = |name: &str, outbound: Sender<Bytes>, inbound: Receiver<Bytes>| Self {
            name: name.to_string(),
            outbound,
            inbound,
            pending: Mutex::new(Bytes::new()),
            link: Arc::clone(&link),
            local: Link::new(),
            latency: config.latency,
            metrics: MetricsTracker::new(),
        };
        (endpoint("memory:a", a_tx, a_rx), endpoint("memory:b", b_tx, b_rx))
    }

    /// Fail the link for both endpoints, including blocked operations
    pub fn sever(&self) {
        if self.link.fire() {
            warn!(endpoint = %self.name, "Memory link severed");
        }
    }

    pub fn is_severed(&self) -> bool {
        self.link.severed.load(Ordering::Acquire)
    }

    fn check_open(&self, operation: &'static str) -> Result<(), TransportError> {
        if self.is_severed() {
            self.metrics.record_error(operation);
            return Err(TransportError::connection(
                "memory link severed",
                Some(self.name.clone()),
            ));
        }
        if self.local.severed.load(Ordering::Acquire) {
            return Err(TransportError::closed(format!("{} shut down", self.name)));
        }
        Ok(())
    }

    fn interrupted(&self, operation: &'static str) -> TransportError {
        self.metrics.record_error(operation);
        if self.is_severed() {
            TransportError::connection("memory link severed", Some(self.name.clone()))
        } else {
            TransportError::closed(format!("{} shut down during {operation}", self.name))
        }
    }

    fn peer_gone(&self, operation: &'static str) -> TransportError {
        self.metrics.record_error(operation);
        TransportError::connection("peer endpoint dropped", Some(self.name.clone()))
    }

    /// Block for the next inbound frame
    fn next_frame(&self) -> Result<Bytes, TransportError> {
        select! {
            recv(self.inbound) -> frame => frame.map_err(|_| self.peer_gone("recv")),
            recv(self.link.signal) -> _ => Err(self.interrupted("recv")),
            recv(self.local.signal) -> _ => Err(self.interrupted("recv")),
        }
    }
}

impl Transport for MemoryTransport {
    fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        self.check_open("send")?;
        let start = Instant::now();
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }

        let frame = Bytes::copy_from_slice(data);
        select! {
            send(self.outbound, frame) -> sent => sent.map_err(|_| self.peer_gone("send"))?,
            recv(self.link.signal) -> _ => return Err(self.interrupted("send")),
            recv(self.local.signal) -> _ => return Err(self.interrupted("send")),
        }

        self.metrics
            .record_send(data.len(), start.elapsed().as_nanos() as u64);
        Ok(())
    }

    fn recv_into(&self, buf: &mut [u8]) -> Result<(), TransportError> {
        self.check_open("recv")?;
        let start = Instant::now();
        let mut pending = self.pending.lock();
        let mut filled = 0;
        while filled < buf.len() {
            if pending.is_empty() {
                *pending = self.next_frame()?;
                continue;
            }
            let take = pending.len().min(buf.len() - filled);
            let chunk = pending.split_to(take);
            buf[filled..filled + take].copy_from_slice(&chunk);
            filled += take;
        }
        self.metrics
            .record_receive(buf.len(), start.elapsed().as_nanos() as u64);
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        !self.is_severed() && !self.local.severed.load(Ordering::Acquire)
    }

    fn transport_info(&self) -> TransportInfo {
        let metrics = self.metrics.snapshot();
        TransportInfo {
            transport_type: TransportType::Memory,
            local_address: Some(self.name.clone()),
            remote_address: None,
            healthy: self.is_healthy(),
            bytes_sent: metrics.bytes_sent,
            bytes_received: metrics.bytes_received,
        }
    }

    fn metrics(&self) -> TransportMetrics {
        self.metrics.snapshot()
    }

    fn shutdown(&self) {
        if self.local.fire() {
            debug!(endpoint = %self.name, "Memory endpoint shut down");
        }
    }
}
