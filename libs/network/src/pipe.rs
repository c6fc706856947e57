//! # Tensor Pipe
//!
//! ## Purpose
//!
//! Ordered, point-to-point delivery of optional tensors between two ranks.
//! Each value crosses the wire as one fixed-size header transmission followed
//! by one payload transmission, or by the header alone for "no value" and for
//! empty tensors.
//!
//! ## Architecture Role
//!
//! ```text
//!        rank A                                         rank B
//!   ┌──────────────┐   header ─┐                  ┌──────────────┐
//!   │ send(value)  │──► worker ├── Transport ────►│ receive()    │
//!   │   → handle   │   payload ┘                  │   → value    │
//!   │ receive()    │◄───────────── Transport ─────│ send(value)  │
//!   └──────────────┘                              └──────────────┘
//! ```
//!
//! Both directions are independent: sends run on the dispatcher's worker
//! thread, receives run on the calling thread. The k-th value received on one
//! side is the k-th value sent by the other.
//!
//! ## Failure Model
//!
//! Any protocol or transport failure poisons the pipe. The first failure is
//! reported as-is; every later `send`, `receive` or `flush` reports
//! `TransportError::Poisoned` carrying the first cause. There is no retry
//! or resynchronization.

use crate::config::PipeConfig;
use crate::dispatcher::{SendDispatcher, SendHandle};
use crate::error::{PipeError, Result};
use crate::health::ChannelHealth;
use crate::pool::{BufferPool, PoolStats};
use crate::topology::PipeTopology;
use crate::transports::{Transport, TransportFactory, TransportInfo, TransportMetrics};
use bytes::Bytes;
use kvpipe_codec::{decode_header_with_limit, HEADER_SIZE};
use kvpipe_types::{Device, Tensor};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Where the receive side is within the current unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceivePhase {
    Idle,
    AwaitingHeader,
    AwaitingPayload,
}

struct ReceiveLane {
    sequence: u64,
    phase: ReceivePhase,
}

/// Snapshot of pipe counters
#[derive(Debug, Clone)]
pub struct PipeStats {
    pub local_rank: u32,
    pub peer_rank: u32,
    pub sends_submitted: u64,
    pub sends_completed: u64,
    pub sends_failed: u64,
    pub sends_cancelled: u64,
    pub nulls_sent: u64,
    pub receives_completed: u64,
    pub nulls_received: u64,
    pub outstanding_sends: usize,
    pub outstanding_bytes: usize,
    pub failure: Option<String>,
    pub transport: TransportMetrics,
    pub pool: PoolStats,
}

pub struct TensorPipe {
    config: PipeConfig,
    topology: PipeTopology,
    transport: Arc<dyn Transport>,
    pool: BufferPool,
    dispatcher: SendDispatcher,
    health: Arc<ChannelHealth>,
    receiver: Mutex<ReceiveLane>,
    nulls_received: AtomicU64,
    closed: AtomicBool,
}

impl TensorPipe {
    /// Validate `config`, rendezvous with the peer over the configured
    /// backend and start the send worker
    pub fn new(config: PipeConfig) -> Result<Self> {
        let topology = config.validate()?;
        info!(
            local_rank = config.local_rank,
            peer_rank = topology.peer_rank(),
            backend = %config.backend.transport_type(),
            "Connecting pipe"
        );
        let transport =
            TransportFactory::connect(&config.backend, config.local_rank, topology.peer_rank())?;
        Self::assemble(config, topology, transport)
    }

    /// Build a pipe over an already connected transport
    ///
    /// The backend section of `config` is not used.
    pub fn with_transport(config: PipeConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let topology = PipeTopology::resolve(&config.group_ranks, config.local_rank)?;
        config.dispatcher.validate()?;
        config.pool.validate()?;
        Self::assemble(config, topology, transport)
    }

    fn assemble(
        config: PipeConfig,
        topology: PipeTopology,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let pool = BufferPool::new(config.pool.clone());
        let health = Arc::new(ChannelHealth::new());
        let dispatcher = SendDispatcher::start(
            config.dispatcher.clone(),
            Arc::clone(&transport),
            pool.clone(),
            Arc::clone(&health),
            config.local_rank,
            topology.peer_rank(),
        )?;

        info!(
            local_rank = config.local_rank,
            peer_rank = topology.peer_rank(),
            device = %config.device,
            transport = %transport.transport_info().transport_type,
            "Pipe ready"
        );

        Ok(Self {
            config,
            topology,
            transport,
            pool,
            dispatcher,
            health,
            receiver: Mutex::new(ReceiveLane {
                sequence: 0,
                phase: ReceivePhase::Idle,
            }),
            nulls_received: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Queue `value` for delivery to the peer
    ///
    /// Returns once the value is queued; blocks only while the outstanding
    /// send budget is exhausted. The value is delivered after every value
    /// submitted before it.
    pub fn send(&self, value: Option<Tensor>) -> Result<SendHandle> {
        self.ensure_open()?;
        self.health.check()?;
        let handle = self.dispatcher.submit(value)?;
        trace!(sequence = handle.sequence(), "Pipe send submitted");
        Ok(handle)
    }

    /// Block until the peer's next value arrives
    ///
    /// Receives are serialized; concurrent callers take values in turn.
    pub fn receive(&self) -> Result<Option<Tensor>> {
        self.ensure_open()?;
        self.health.check()?;

        let mut lane = self.receiver.lock();
        // Another receiver may have failed while this one waited for the lane
        self.health.check()?;

        match self.receive_unit(&mut lane) {
            Ok(value) => {
                trace!(
                    sequence = lane.sequence,
                    is_null = value.is_none(),
                    "Pipe receive complete"
                );
                lane.sequence += 1;
                lane.phase = ReceivePhase::Idle;
                Ok(value)
            }
            Err(e) => {
                warn!(
                    sequence = lane.sequence,
                    phase = ?lane.phase,
                    error = %e,
                    "Pipe receive failed"
                );
                self.health
                    .poison(&e, self.config.local_rank, self.topology.peer_rank());
                lane.phase = ReceivePhase::Idle;
                Err(e)
            }
        }
    }

    fn receive_unit(&self, lane: &mut ReceiveLane) -> Result<Option<Tensor>> {
        lane.phase = ReceivePhase::AwaitingHeader;
        let mut header = [0u8; HEADER_SIZE];
        self.transport.recv_into(&mut header)?;
        let descriptor = decode_header_with_limit(&header, self.config.pool.max_payload_bytes)?;

        if descriptor.is_null {
            self.nulls_received.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let len = descriptor.payload_len();
        let data = if len == 0 {
            Bytes::new()
        } else {
            lane.phase = ReceivePhase::AwaitingPayload;
            let mut buffer = self.pool.acquire(len)?;
            self.transport.recv_into(&mut buffer)?;
            Bytes::copy_from_slice(&buffer)
        };

        let tensor = Tensor::from_bytes(descriptor.element_kind, &descriptor.dims, data)?;
        Ok(Some(tensor.to_device(self.config.device)))
    }

    /// Block until every submitted send has finished
    ///
    /// Errs if the pipe failed. A send refused before reaching the wire, such
    /// as one denied a staging buffer, fails only its own handle.
    pub fn flush(&self) -> Result<()> {
        self.dispatcher.wait_idle(None);
        self.health.check()
    }

    /// Shut the pipe down
    ///
    /// Queued sends that have not started are cancelled. A send already on
    /// the wire gets up to `drain_timeout_ms` to finish; past that the
    /// transport is shut down under it and `DrainTimeout` is returned. The
    /// worker then gets up to another `drain_timeout_ms` to exit, so the call
    /// blocks for at most twice that. The transport and pool are released
    /// either way. Calling again is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(
            local_rank = self.config.local_rank,
            peer_rank = self.topology.peer_rank(),
            outstanding_sends = self.dispatcher.outstanding_sends(),
            "Closing pipe"
        );

        let outcome = self.dispatcher.shutdown(self.config.dispatcher.drain_timeout());
        self.transport.shutdown();
        self.pool.close();

        let stats = self.dispatcher.stats();
        debug!(
            submitted = stats.submitted,
            completed = stats.completed,
            failed = stats.failed,
            cancelled = stats.cancelled,
            "Pipe closed"
        );
        outcome
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// True until the first protocol or transport failure
    pub fn is_healthy(&self) -> bool {
        !self.health.is_failed()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(PipeError::Closed)
        } else {
            Ok(())
        }
    }

    pub fn local_rank(&self) -> u32 {
        self.config.local_rank
    }

    pub fn peer_rank(&self) -> u32 {
        self.topology.peer_rank()
    }

    pub fn topology(&self) -> &PipeTopology {
        &self.topology
    }

    pub fn device(&self) -> Device {
        self.config.device
    }

    pub fn config(&self) -> &PipeConfig {
        &self.config
    }

    /// Number of sends submitted so far; the next send gets this sequence
    pub fn send_sequence(&self) -> u64 {
        self.dispatcher.submitted()
    }

    /// Number of values received so far
    pub fn recv_sequence(&self) -> u64 {
        self.receiver.lock().sequence
    }

    pub fn outstanding_sends(&self) -> usize {
        self.dispatcher.outstanding_sends()
    }

    pub fn transport_info(&self) -> TransportInfo {
        self.transport.transport_info()
    }

    pub fn stats(&self) -> PipeStats {
        let dispatch = self.dispatcher.stats();
        PipeStats {
            local_rank: self.config.local_rank,
            peer_rank: self.topology.peer_rank(),
            sends_submitted: dispatch.submitted,
            sends_completed: dispatch.completed,
            sends_failed: dispatch.failed,
            sends_cancelled: dispatch.cancelled,
            nulls_sent: dispatch.nulls_sent,
            receives_completed: self.recv_sequence(),
            nulls_received: self.nulls_received.load(Ordering::Relaxed),
            outstanding_sends: dispatch.outstanding_sends,
            outstanding_bytes: dispatch.outstanding_bytes,
            failure: self.health.cause(),
            transport: self.transport.metrics(),
            pool: self.pool.stats(),
        }
    }
}

impl Drop for TensorPipe {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Pipe close on drop did not complete cleanly");
        }
    }
}

impl fmt::Debug for TensorPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorPipe")
            .field("local_rank", &self.config.local_rank)
            .field("peer_rank", &self.topology.peer_rank())
            .field("device", &self.config.device)
            .field("closed", &self.is_closed())
            .field("healthy", &self.is_healthy())
            .finish()
    }
}
