//! # kvpipe Network
//!
//! Point-to-point pipe carrying optional tensors between two ranks.
//!
//! ## Architecture Role
//!
//! ```text
//!   TensorPipe ── send ──► SendDispatcher ──► Transport (tcp | unix | memory)
//!       │                      │                  ▲
//!       └──── receive ─────────┼──────────────────┘
//!                              ▼
//!                         BufferPool (receive staging, non-host send staging)
//! ```
//!
//! ## What This Crate Contains
//! - [`TensorPipe`]: ordered send/receive with null pass-through and teardown
//! - [`SendDispatcher`]: single-worker send queue with backpressure
//! - [`BufferPool`]: size-classed reusable staging buffers
//! - [`transports`]: blocking byte channels and their rendezvous
//! - [`PipeConfig`]: TOML configuration and validation
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kvpipe_network::{MemoryTransport, PipeConfig, TensorPipe};
//! use kvpipe_types::Tensor;
//!
//! # fn main() -> kvpipe_network::Result<()> {
//! let (a, b) = MemoryTransport::pair();
//! let left = TensorPipe::with_transport(PipeConfig::new(vec![vec![0, 1]], 0), Arc::new(a))?;
//! let right = TensorPipe::with_transport(PipeConfig::new(vec![vec![0, 1]], 1), Arc::new(b))?;
//!
//! left.send(Some(Tensor::vector(&[1.0f32])))?;
//! left.send(None)?;
//! assert!(right.receive()?.is_some());
//! assert!(right.receive()?.is_none());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
mod health;
pub mod pipe;
pub mod pool;
pub mod topology;
pub mod transports;

pub use config::PipeConfig;
pub use dispatcher::{DispatchStats, DispatcherConfig, SendDispatcher, SendHandle, SendState};
pub use error::{PipeError, Result, TransportError};
pub use pipe::{PipeStats, ReceivePhase, TensorPipe};
pub use pool::{BufferPool, BufferPoolConfig, PoolStats, PooledBuffer};
pub use topology::PipeTopology;
pub use transports::{
    MemoryConfig, MemoryTransport, TcpConfig, TcpTransport, Transport, TransportConfig,
    TransportFactory, TransportInfo, TransportMetrics, TransportType,
};
#[cfg(unix)]
pub use transports::{UnixSocketConfig, UnixSocketTransport};
