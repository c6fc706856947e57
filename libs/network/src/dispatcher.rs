//! # Send Dispatcher
//!
//! ## Purpose
//!
//! Runs every send of a pipe on one dedicated worker thread, in submission
//! order, so callers get a handle back immediately while the wire sees one
//! header/payload unit at a time.
//!
//! ## Architecture Role
//!
//! ```text
//!   send(value) ─► admission ─► queue (FIFO) ─► worker thread
//!                  │                              ├─ encode header
//!                  │ blocks while over             ├─ stage non-host payload
//!                  │ max sends / max bytes         ├─ transport.send(header)
//!                  └───────────◄── release ────────┴─ transport.send(payload)
//! ```
//!
//! Admission counts sends and payload bytes that are queued or in flight. A
//! single value larger than the byte budget is still admitted when nothing
//! else is outstanding, so oversize values make progress one at a time.
//!
//! A failed transmission poisons the channel: the worker keeps draining the
//! queue but marks every later job `Failed` without touching the transport.
//! A send that fails before its header reaches the wire, such as a staging
//! buffer refused by a fail-fast pool, fails alone and leaves the channel
//! usable. Either way the cause is kept on the send's handle.

use crate::error::{PipeError, Result, TransportError};
use crate::health::ChannelHealth;
use crate::pool::{BufferPool, PooledBuffer};
use crate::transports::Transport;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use kvpipe_codec::{encode_header, HEADER_SIZE};
use kvpipe_types::{Tensor, ValueDescriptor};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub max_outstanding_sends: usize,
    pub max_outstanding_bytes: usize,
    /// Bound on how long `close` waits for in-flight sends
    ///
    /// Applied twice on the timeout path: once to drain, and once more to let
    /// the worker exit after the transport is shut down under it. `close` can
    /// therefore block for up to twice this value before detaching the worker.
    pub drain_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_outstanding_sends: 64,
            max_outstanding_bytes: 1_000_000_000,
            drain_timeout_ms: 5_000,
        }
    }
}

impl DispatcherConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), TransportError> {
        if self.max_outstanding_sends == 0 {
            return Err(TransportError::configuration(
                "max_outstanding_sends must be at least 1",
                Some("dispatcher.max_outstanding_sends"),
            ));
        }
        if self.max_outstanding_bytes == 0 {
            return Err(TransportError::configuration(
                "max_outstanding_bytes must be positive",
                Some("dispatcher.max_outstanding_bytes"),
            ));
        }
        Ok(())
    }
}

/// Lifecycle of a submitted send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendState {
    Queued,
    Encoding,
    Transmitting,
    Completed,
    Failed,
    /// Discarded by `close` before transmission started
    Cancelled,
}

impl SendState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SendState::Completed | SendState::Failed | SendState::Cancelled
        )
    }
}

impl fmt::Display for SendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SendState::Queued => "queued",
            SendState::Encoding => "encoding",
            SendState::Transmitting => "transmitting",
            SendState::Completed => "completed",
            SendState::Failed => "failed",
            SendState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

struct SendSlot {
    state: Mutex<SendState>,
    error: Mutex<Option<Arc<PipeError>>>,
    changed: Condvar,
}

impl SendSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SendState::Queued),
            error: Mutex::new(None),
            changed: Condvar::new(),
        }
    }

    fn set(&self, next: SendState) {
        *self.state.lock() = next;
        self.changed.notify_all();
    }

    /// Record the cause before the state turns `Failed`
    fn fail(&self, error: PipeError) {
        *self.error.lock() = Some(Arc::new(error));
        self.set(SendState::Failed);
    }
}

/// Completion handle for one submitted send
#[derive(Clone)]
pub struct SendHandle {
    sequence: u64,
    slot: Arc<SendSlot>,
}

impl SendHandle {
    /// Position of this send in the pipe's send order, starting at 0
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn state(&self) -> SendState {
        *self.slot.state.lock()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Why the send failed; `None` unless the state is `Failed`
    pub fn error(&self) -> Option<Arc<PipeError>> {
        self.slot.error.lock().clone()
    }

    /// Block until the send reaches a terminal state
    pub fn wait(&self) -> SendState {
        let mut state = self.slot.state.lock();
        while !state.is_terminal() {
            self.slot.changed.wait(&mut state);
        }
        *state
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Option<SendState> {
        let deadline = Instant::now() + timeout;
        let mut state = self.slot.state.lock();
        while !state.is_terminal() {
            if self.slot.changed.wait_until(&mut state, deadline).timed_out() {
                return state.is_terminal().then_some(*state);
            }
        }
        Some(*state)
    }
}

impl fmt::Debug for SendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendHandle")
            .field("sequence", &self.sequence)
            .field("state", &self.state())
            .finish()
    }
}

struct SendJob {
    sequence: u64,
    value: Option<Tensor>,
    payload_bytes: usize,
    slot: Arc<SendSlot>,
}

/// Header and staged payload, ready for the wire
struct Staged {
    header: [u8; HEADER_SIZE],
    buffer: Option<PooledBuffer>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Outstanding {
    sends: usize,
    bytes: usize,
}

/// Submission side of the queue; the sequence counter lives with the sender
/// so numbering and enqueue order always agree
struct Lane {
    sender: Option<Sender<SendJob>>,
    next_sequence: u64,
}

/// State shared with the worker thread
struct DispatchShared {
    local_rank: u32,
    peer_rank: u32,
    config: DispatcherConfig,
    transport: Arc<dyn Transport>,
    pool: BufferPool,
    health: Arc<ChannelHealth>,
    outstanding: Mutex<Outstanding>,
    released: Condvar,
    cancelling: AtomicBool,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    nulls_sent: AtomicU64,
}

/// Counters for sends that have left the queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub nulls_sent: u64,
    pub outstanding_sends: usize,
    pub outstanding_bytes: usize,
}

pub struct SendDispatcher {
    shared: Arc<DispatchShared>,
    lane: Mutex<Lane>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Disconnects when the worker exits
    exited: Receiver<()>,
}

impl SendDispatcher {
    /// Start the worker thread for a pipe
    pub(crate) fn start(
        config: DispatcherConfig,
        transport: Arc<dyn Transport>,
        pool: BufferPool,
        health: Arc<ChannelHealth>,
        local_rank: u32,
        peer_rank: u32,
    ) -> Result<Self> {
        let (sender, jobs) = unbounded::<SendJob>();
        let (exit_guard, exited) = bounded::<()>(0);
        let shared = Arc::new(DispatchShared {
            local_rank,
            peer_rank,
            config,
            transport,
            pool,
            health,
            outstanding: Mutex::new(Outstanding::default()),
            released: Condvar::new(),
            cancelling: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            nulls_sent: AtomicU64::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(format!("pipe-send-{local_rank}-{peer_rank}"))
            .spawn(move || {
                let _exit_guard = exit_guard;
                worker_shared.run(jobs);
            })
            .map_err(|e| TransportError::io("Failed to spawn send worker", e))?;

        Ok(Self {
            shared,
            lane: Mutex::new(Lane {
                sender: Some(sender),
                next_sequence: 0,
            }),
            worker: Mutex::new(Some(worker)),
            exited,
        })
    }

    /// Queue `value` for transmission, blocking while the outstanding budget
    /// is exhausted
    pub fn submit(&self, value: Option<Tensor>) -> Result<SendHandle> {
        let payload_bytes = value.as_ref().map_or(0, Tensor::nbytes);
        self.admit(payload_bytes)?;

        let slot = Arc::new(SendSlot::new());
        let mut lane = self.lane.lock();
        let Some(sender) = lane.sender.as_ref() else {
            drop(lane);
            self.shared.release(payload_bytes);
            return Err(PipeError::Closed);
        };
        let sequence = lane.next_sequence;
        let job = SendJob {
            sequence,
            value,
            payload_bytes,
            slot: Arc::clone(&slot),
        };
        if sender.send(job).is_err() {
            drop(lane);
            self.shared.release(payload_bytes);
            return Err(PipeError::Closed);
        }
        lane.next_sequence += 1;
        drop(lane);

        trace!(sequence, payload_bytes, "Send queued");
        Ok(SendHandle { sequence, slot })
    }

    fn admit(&self, payload_bytes: usize) -> Result<()> {
        let shared = &self.shared;
        let max_sends = shared.config.max_outstanding_sends;
        let max_bytes = shared.config.max_outstanding_bytes;
        let mut outstanding = shared.outstanding.lock();
        let mut blocked = false;
        loop {
            if shared.cancelling.load(Ordering::Acquire) {
                return Err(PipeError::Closed);
            }
            shared.health.check()?;

            let fits_count = outstanding.sends < max_sends;
            let fits_bytes = outstanding.sends == 0
                || outstanding.bytes.saturating_add(payload_bytes) <= max_bytes;
            if fits_count && fits_bytes {
                outstanding.sends += 1;
                outstanding.bytes += payload_bytes;
                if blocked {
                    debug!(payload_bytes, "Send admitted after backpressure");
                }
                return Ok(());
            }

            if !blocked {
                blocked = true;
                debug!(
                    outstanding_sends = outstanding.sends,
                    outstanding_bytes = outstanding.bytes,
                    payload_bytes,
                    "Send blocked by backpressure"
                );
            }
            shared.released.wait(&mut outstanding);
        }
    }

    /// Wait until nothing is queued or in flight; `None` waits indefinitely
    ///
    /// Returns false if the timeout expired first.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut outstanding = self.shared.outstanding.lock();
        while outstanding.sends > 0 {
            match deadline {
                Some(deadline) => {
                    if self
                        .shared
                        .released
                        .wait_until(&mut outstanding, deadline)
                        .timed_out()
                    {
                        return outstanding.sends == 0;
                    }
                }
                None => self.shared.released.wait(&mut outstanding),
            }
        }
        true
    }

    /// Make every queued job finish as `Cancelled` and refuse new submissions
    ///
    /// A transmission already underway is not interrupted.
    pub fn cancel_pending(&self) {
        if !self.shared.cancelling.swap(true, Ordering::AcqRel) {
            debug!(
                outstanding_sends = self.outstanding_sends(),
                "Cancelling queued sends"
            );
        }
        // Wake submitters blocked on admission
        let _guard = self.shared.outstanding.lock();
        self.shared.released.notify_all();
    }

    /// Stop the worker: cancel queued work, wait up to `drain_timeout` for the
    /// in-flight send, then join
    ///
    /// On timeout the transport is shut down to unblock the worker and
    /// `DrainTimeout` is returned. The join then gets its own `drain_timeout`,
    /// so the whole call is bounded by twice that; a worker still stuck after
    /// both waits is detached.
    pub fn shutdown(&self, drain_timeout: Duration) -> Result<()> {
        self.cancel_pending();
        let drained = self.wait_idle(Some(drain_timeout));
        self.lane.lock().sender.take();

        let mut outcome = Ok(());
        if !drained {
            let pending = self.outstanding_sends();
            warn!(
                pending,
                timeout_ms = drain_timeout.as_millis() as u64,
                "Sends still in flight at drain deadline, shutting transport down"
            );
            self.shared.transport.shutdown();
            outcome = Err(PipeError::DrainTimeout {
                pending,
                timeout_ms: drain_timeout.as_millis() as u64,
            });
        }

        match self.exited.recv_timeout(drain_timeout) {
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(worker) = self.worker.lock().take() {
                    if worker.join().is_err() {
                        error!("Send worker panicked");
                    }
                }
            }
            Ok(()) | Err(RecvTimeoutError::Timeout) => {
                warn!("Send worker did not exit in time, detaching");
            }
        }
        outcome
    }

    pub fn outstanding_sends(&self) -> usize {
        self.shared.outstanding.lock().sends
    }

    pub fn outstanding_bytes(&self) -> usize {
        self.shared.outstanding.lock().bytes
    }

    /// Number of sends accepted so far
    pub fn submitted(&self) -> u64 {
        self.lane.lock().next_sequence
    }

    pub fn stats(&self) -> DispatchStats {
        let outstanding = *self.shared.outstanding.lock();
        DispatchStats {
            submitted: self.submitted(),
            completed: self.shared.completed.load(Ordering::Acquire),
            failed: self.shared.failed.load(Ordering::Acquire),
            cancelled: self.shared.cancelled.load(Ordering::Acquire),
            nulls_sent: self.shared.nulls_sent.load(Ordering::Acquire),
            outstanding_sends: outstanding.sends,
            outstanding_bytes: outstanding.bytes,
        }
    }
}

impl DispatchShared {
    fn run(&self, jobs: Receiver<SendJob>) {
        info!(
            local_rank = self.local_rank,
            peer_rank = self.peer_rank,
            "Send worker started"
        );
        for job in jobs.iter() {
            self.process(job);
        }
        debug!(
            local_rank = self.local_rank,
            peer_rank = self.peer_rank,
            "Send worker stopped"
        );
    }

    fn process(&self, job: SendJob) {
        let outcome = if self.cancelling.load(Ordering::Acquire) {
            self.cancelled.fetch_add(1, Ordering::Relaxed);
            Ok(SendState::Cancelled)
        } else if let Err(e) = self.health.check() {
            Err(e)
        } else {
            match self.stage(&job) {
                Err(e) => {
                    // Nothing reached the wire, so the stream is still in step
                    warn!(sequence = job.sequence, error = %e, "Send failed before transmission");
                    Err(e)
                }
                Ok(staged) => match self.transmit(&job, staged) {
                    Ok(()) => {
                        self.completed.fetch_add(1, Ordering::Relaxed);
                        if job.value.is_none() {
                            self.nulls_sent.fetch_add(1, Ordering::Relaxed);
                        }
                        trace!(sequence = job.sequence, "Send completed");
                        Ok(SendState::Completed)
                    }
                    Err(e) => {
                        warn!(sequence = job.sequence, error = %e, "Send failed");
                        self.health.poison(&e, self.local_rank, self.peer_rank);
                        Err(e)
                    }
                },
            }
        };

        let SendJob {
            value,
            payload_bytes,
            slot,
            ..
        } = job;
        // The value is released before the job counts as finished
        drop(value);
        match outcome {
            Ok(state) => slot.set(state),
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                slot.fail(e);
            }
        }
        self.release(payload_bytes);
    }

    /// Encode the header and copy non-host payloads into a pool buffer
    fn stage(&self, job: &SendJob) -> Result<Staged> {
        job.slot.set(SendState::Encoding);
        let descriptor = ValueDescriptor::for_value(job.value.as_ref());
        let header = encode_header(&descriptor)?;

        let buffer = match &job.value {
            Some(tensor) if !tensor.device().is_host() && tensor.nbytes() > 0 => {
                let mut buffer = self.pool.acquire(tensor.nbytes())?;
                buffer.copy_from_slice(tensor.as_bytes());
                Some(buffer)
            }
            _ => None,
        };
        Ok(Staged { header, buffer })
    }

    /// One header transmission, then one payload transmission for non-empty values
    fn transmit(&self, job: &SendJob, staged: Staged) -> Result<()> {
        job.slot.set(SendState::Transmitting);
        self.transport.send(&staged.header)?;

        if let Some(tensor) = &job.value {
            let payload = staged.buffer.as_deref().unwrap_or_else(|| tensor.as_bytes());
            if !payload.is_empty() {
                self.transport.send(payload)?;
            }
        }
        Ok(())
    }

    fn release(&self, payload_bytes: usize) {
        let mut outstanding = self.outstanding.lock();
        outstanding.sends -= 1;
        outstanding.bytes -= payload_bytes;
        drop(outstanding);
        self.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BufferPoolConfig;
    use crate::transports::{MemoryConfig, MemoryTransport};
    use kvpipe_codec::{decode_header, HEADER_SIZE};

    fn dispatcher(
        config: DispatcherConfig,
        memory: MemoryConfig,
    ) -> (SendDispatcher, MemoryTransport, Arc<ChannelHealth>) {
        let (local, peer) = MemoryTransport::pair_with_config(memory);
        let health = Arc::new(ChannelHealth::new());
        let dispatcher = SendDispatcher::start(
            config,
            Arc::new(local),
            BufferPool::new(BufferPoolConfig::default()),
            Arc::clone(&health),
            0,
            1,
        )
        .unwrap();
        (dispatcher, peer, health)
    }

    #[test]
    fn test_sequences_and_wire_order() {
        let (dispatcher, peer, _) = dispatcher(DispatcherConfig::default(), MemoryConfig::default());
        let first = dispatcher.submit(Some(Tensor::vector(&[1.0f32, 2.0]))).unwrap();
        let second = dispatcher.submit(None).unwrap();
        assert_eq!((first.sequence(), second.sequence()), (0, 1));
        assert_eq!(first.wait(), SendState::Completed);
        assert_eq!(second.wait(), SendState::Completed);

        let header = decode_header(&peer.recv(HEADER_SIZE).unwrap()).unwrap();
        assert_eq!(header.dims, vec![2]);
        assert_eq!(peer.recv(8).unwrap().len(), 8);
        assert!(decode_header(&peer.recv(HEADER_SIZE).unwrap()).unwrap().is_null);

        let stats = dispatcher.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.nulls_sent, 1);
        assert_eq!(stats.outstanding_sends, 0);
    }

    #[test]
    fn test_oversized_value_admitted_alone() {
        let config = DispatcherConfig {
            max_outstanding_bytes: 16,
            ..DispatcherConfig::default()
        };
        let (dispatcher, peer, _) = dispatcher(config, MemoryConfig::default());
        let big = Tensor::zeros(kvpipe_types::ElementKind::U8, &[64]).unwrap();
        let handle = dispatcher.submit(Some(big)).unwrap();
        assert_eq!(handle.wait(), SendState::Completed);
        assert_eq!(peer.recv(HEADER_SIZE + 64).unwrap().len(), HEADER_SIZE + 64);
    }

    #[test]
    fn test_failure_poisons_later_sends() {
        let (dispatcher, peer, health) = dispatcher(DispatcherConfig::default(), MemoryConfig::default());
        peer.sever();

        let handle = dispatcher.submit(Some(Tensor::scalar(1i32))).unwrap();
        assert_eq!(handle.wait(), SendState::Failed);
        assert!(handle.error().unwrap().is_transport());
        assert!(health.is_failed());
        assert!(matches!(
            dispatcher.submit(None).unwrap_err(),
            PipeError::Transport(TransportError::Poisoned { .. })
        ));
    }

    #[test]
    fn test_shutdown_cancels_queued_sends() {
        let memory = MemoryConfig {
            capacity: Some(1),
            latency: None,
        };
        let (dispatcher, _peer, _) = dispatcher(DispatcherConfig::default(), memory);
        let handles: Vec<_> = (0..4)
            .map(|i| dispatcher.submit(Some(Tensor::scalar(i as i64))).unwrap())
            .collect();
        while handles[0].state() == SendState::Queued {
            thread::sleep(Duration::from_millis(1));
        }

        let err = dispatcher.shutdown(Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, PipeError::DrainTimeout { .. }));
        assert_eq!(dispatcher.outstanding_sends(), 0);

        let states: Vec<_> = handles.iter().map(SendHandle::wait).collect();
        assert!(states.contains(&SendState::Cancelled));
        assert!(states.iter().all(|s| s.is_terminal()));
        assert!(matches!(dispatcher.submit(None).unwrap_err(), PipeError::Closed));
    }

    #[test]
    fn test_staging_refusal_fails_only_that_send() {
        let (local, peer) = MemoryTransport::pair();
        let health = Arc::new(ChannelHealth::new());
        let pool = BufferPool::new(BufferPoolConfig {
            max_buffers_per_class: 1,
            allow_growth: false,
            fail_fast: true,
            ..BufferPoolConfig::default()
        });
        let held = pool.acquire(16).unwrap();
        let dispatcher = SendDispatcher::start(
            DispatcherConfig::default(),
            Arc::new(local),
            pool,
            Arc::clone(&health),
            0,
            1,
        )
        .unwrap();

        let staged = Tensor::scalar(7i64).to_device(kvpipe_types::Device::Accelerator(0));
        let refused = dispatcher.submit(Some(staged.clone())).unwrap();
        assert_eq!(refused.wait(), SendState::Failed);
        assert!(matches!(
            refused.error().as_deref(),
            Some(PipeError::BufferExhausted { size_class: 4096, limit: 1 })
        ));
        assert!(!health.is_failed());

        drop(held);
        let retried = dispatcher.submit(Some(staged)).unwrap();
        assert_eq!(retried.wait(), SendState::Completed);
        assert!(retried.error().is_none());
        let header = decode_header(&peer.recv(HEADER_SIZE).unwrap()).unwrap();
        assert_eq!(header.dims, Vec::<usize>::new());
        assert_eq!(dispatcher.stats().failed, 1);
    }

    /// Transport whose sends block until released and ignore shutdown
    struct StuckTransport {
        release: Receiver<()>,
    }

    impl Transport for StuckTransport {
        fn send(&self, _data: &[u8]) -> std::result::Result<(), TransportError> {
            let _ = self.release.recv();
            Err(TransportError::closed("released"))
        }

        fn recv_into(&self, _buf: &mut [u8]) -> std::result::Result<(), TransportError> {
            Err(TransportError::closed("send only"))
        }

        fn is_healthy(&self) -> bool {
            true
        }

        fn transport_info(&self) -> crate::transports::TransportInfo {
            crate::transports::TransportInfo {
                transport_type: crate::transports::TransportType::Memory,
                local_address: None,
                remote_address: None,
                healthy: true,
                bytes_sent: 0,
                bytes_received: 0,
            }
        }

        fn metrics(&self) -> crate::transports::TransportMetrics {
            crate::transports::TransportMetrics::default()
        }

        fn shutdown(&self) {}
    }

    #[test]
    fn test_shutdown_bounded_when_worker_cannot_exit() {
        let (release_tx, release) = bounded::<()>(0);
        let dispatcher = SendDispatcher::start(
            DispatcherConfig::default(),
            Arc::new(StuckTransport { release }),
            BufferPool::new(BufferPoolConfig::default()),
            Arc::new(ChannelHealth::new()),
            0,
            1,
        )
        .unwrap();
        let handle = dispatcher.submit(None).unwrap();
        while handle.state() != SendState::Transmitting {
            thread::sleep(Duration::from_millis(1));
        }

        let drain = Duration::from_millis(100);
        let started = Instant::now();
        let err = dispatcher.shutdown(drain).unwrap_err();
        let elapsed = started.elapsed();
        assert!(matches!(err, PipeError::DrainTimeout { pending: 1, timeout_ms: 100 }));
        assert!(elapsed >= 2 * drain, "returned after {elapsed:?}");
        assert!(elapsed < 2 * drain + Duration::from_millis(500), "returned after {elapsed:?}");

        // Once released, the detached worker still settles the send
        drop(release_tx);
        assert_eq!(handle.wait(), SendState::Failed);
    }

    #[test]
    fn test_wait_timeout_on_stalled_send() {
        let memory = MemoryConfig {
            capacity: Some(0),
            latency: None,
        };
        let (dispatcher, peer, _) = dispatcher(DispatcherConfig::default(), memory);
        let handle = dispatcher.submit(None).unwrap();
        assert_eq!(handle.wait_timeout(Duration::from_millis(50)), None);

        peer.recv(HEADER_SIZE).unwrap();
        assert_eq!(handle.wait(), SendState::Completed);
    }
}
