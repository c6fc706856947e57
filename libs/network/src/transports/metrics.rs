//! Transport Metrics
//!
//! Counters and latency percentiles for a single endpoint. Counters are
//! lock-free; the latency reservoir is only updated when its lock is free so
//! a slow snapshot never stalls a transmission.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::TransportMetrics;

/// Metrics tracker shared by the send and receive paths of an endpoint
#[derive(Clone)]
pub struct MetricsTracker {
    transmissions_sent: Arc<AtomicU64>,
    transmissions_received: Arc<AtomicU64>,
    bytes_sent: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,

    error_types: Arc<RwLock<HashMap<&'static str, u64>>>,

    send_latency: Arc<RwLock<LatencyTracker>>,
    recv_latency: Arc<RwLock<LatencyTracker>>,

    last_send: Arc<RwLock<Option<Instant>>>,
    last_receive: Arc<RwLock<Option<Instant>>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            transmissions_sent: Arc::new(AtomicU64::new(0)),
            transmissions_received: Arc::new(AtomicU64::new(0)),
            bytes_sent: Arc::new(AtomicU64::new(0)),
            bytes_received: Arc::new(AtomicU64::new(0)),
            errors: Arc::new(AtomicU64::new(0)),
            error_types: Arc::new(RwLock::new(HashMap::new())),
            send_latency: Arc::new(RwLock::new(LatencyTracker::new())),
            recv_latency: Arc::new(RwLock::new(LatencyTracker::new())),
            last_send: Arc::new(RwLock::new(None)),
            last_receive: Arc::new(RwLock::new(None)),
        }
    }

    /// Record a completed transmission of `bytes`
    #[inline]
    pub fn record_send(&self, bytes: usize, latency_ns: u64) {
        self.transmissions_sent.fetch_add(1, Ordering::Release);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Release);

        if let Some(mut tracker) = self.send_latency.try_write() {
            tracker.record(latency_ns);
        }

        *self.last_send.write() = Some(Instant::now());
    }

    /// Record a completed receive of `bytes`; latency includes time spent
    /// waiting for the peer
    #[inline]
    pub fn record_receive(&self, bytes: usize, latency_ns: u64) {
        self.transmissions_received.fetch_add(1, Ordering::Release);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Release);

        if let Some(mut tracker) = self.recv_latency.try_write() {
            tracker.record(latency_ns);
        }

        *self.last_receive.write() = Some(Instant::now());
    }

    /// Record a failure, bucketed by operation
    #[inline]
    pub fn record_error(&self, operation: &'static str) {
        self.errors.fetch_add(1, Ordering::Release);
        if let Some(mut types) = self.error_types.try_write() {
            *types.entry(operation).or_insert(0) += 1;
        }
    }

    /// Failures recorded for `operation`
    pub fn errors_for(&self, operation: &str) -> u64 {
        self.error_types.read().get(operation).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> TransportMetrics {
        let send = self.send_latency.read();
        let recv = self.recv_latency.read();

        TransportMetrics {
            transmissions_sent: self.transmissions_sent.load(Ordering::Acquire),
            transmissions_received: self.transmissions_received.load(Ordering::Acquire),
            bytes_sent: self.bytes_sent.load(Ordering::Acquire),
            bytes_received: self.bytes_received.load(Ordering::Acquire),
            errors: self.errors.load(Ordering::Acquire),
            last_send_latency_ns: send.last(),
            avg_send_latency_ns: send.average(),
            p95_send_latency_ns: send.percentile(95),
            p99_send_latency_ns: send.percentile(99),
            avg_recv_latency_ns: recv.average(),
            p99_recv_latency_ns: recv.percentile(99),
            last_activity: self.last_activity(),
        }
    }

    fn last_activity(&self) -> Option<Instant> {
        let last_send = *self.last_send.read();
        let last_recv = *self.last_receive.read();
        last_send.max(last_recv)
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Ring of recent latency samples
struct LatencyTracker {
    samples: Vec<u64>,
    position: usize,
    total_samples: u64,
    sum: u64,
    last: u64,
}

impl LatencyTracker {
    const SAMPLE_SIZE: usize = 1000;

    fn new() -> Self {
        Self {
            samples: Vec::with_capacity(Self::SAMPLE_SIZE),
            position: 0,
            total_samples: 0,
            sum: 0,
            last: 0,
        }
    }

    fn record(&mut self, latency_ns: u64) {
        self.last = latency_ns;
        self.sum = self.sum.saturating_add(latency_ns);
        self.total_samples += 1;

        if self.samples.len() < Self::SAMPLE_SIZE {
            self.samples.push(latency_ns);
        } else {
            self.samples[self.position] = latency_ns;
            self.position = (self.position + 1) % Self::SAMPLE_SIZE;
        }
    }

    fn last(&self) -> u64 {
        self.last
    }

    fn average(&self) -> u64 {
        if self.total_samples > 0 {
            self.sum / self.total_samples
        } else {
            0
        }
    }

    fn percentile(&self, p: usize) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let index = ((sorted.len() - 1) * p) / 100;
        sorted[index]
    }
}
