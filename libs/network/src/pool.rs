//! Staging Buffer Pool
//!
//! Reusable byte buffers bucketed by power-of-two size class. The receive
//! path sizes a destination buffer from each header; the send path stages
//! values that do not live in host memory. Both borrow from here instead of
//! allocating per message.
//!
//! ```text
//!   acquire(len) ──► class = max(next_pow2(len), min_size_class)
//!                      ├─ free buffer in class?     reuse it
//!                      ├─ under limit or growth on? allocate
//!                      ├─ fail_fast?                BufferExhausted
//!                      └─ otherwise                 wait for a release
//!   drop(PooledBuffer) ──► back to its class (or freed past the limit)
//! ```
//!
//! With `allow_growth` the per-class limit only caps how many idle buffers
//! are retained; without it, the limit caps buffers in existence.

use crate::error::{PipeError, Result, TransportError};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{debug, trace};

use kvpipe_codec::DEFAULT_MAX_PAYLOAD_BYTES;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPoolConfig {
    /// Smallest size class in bytes; must be a power of two
    pub min_size_class: usize,
    pub max_buffers_per_class: usize,
    pub allow_growth: bool,
    /// Return `BufferExhausted` instead of waiting when a class is at its limit
    pub fail_fast: bool,
    /// Largest payload a receiver accepts from a header
    pub max_payload_bytes: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            min_size_class: 4096,
            max_buffers_per_class: 8,
            allow_growth: true,
            fail_fast: false,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

impl BufferPoolConfig {
    pub fn validate(&self) -> std::result::Result<(), TransportError> {
        if self.min_size_class == 0 || !self.min_size_class.is_power_of_two() {
            return Err(TransportError::configuration(
                format!("min_size_class {} is not a power of two", self.min_size_class),
                Some("pool.min_size_class"),
            ));
        }
        if self.max_buffers_per_class == 0 {
            return Err(TransportError::configuration(
                "max_buffers_per_class must be at least 1",
                Some("pool.max_buffers_per_class"),
            ));
        }
        if self.max_payload_bytes == 0 {
            return Err(TransportError::configuration(
                "max_payload_bytes must be positive",
                Some("pool.max_payload_bytes"),
            ));
        }
        Ok(())
    }
}

/// Point-in-time pool occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub size_classes: usize,
    /// Buffers currently in existence, idle or lent out
    pub allocated: usize,
    pub in_use: usize,
    pub idle: usize,
    pub allocated_bytes: usize,
    /// Requests that had to wait for a release
    pub waits: u64,
}

#[derive(Default)]
struct SizeClass {
    idle: Vec<Vec<u8>>,
    allocated: usize,
    in_use: usize,
}

#[derive(Default)]
struct PoolState {
    classes: BTreeMap<usize, SizeClass>,
    closed: bool,
    waits: u64,
}

struct PoolShared {
    config: BufferPoolConfig,
    state: Mutex<PoolState>,
    released: Condvar,
}

/// Shared handle to a buffer pool
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

enum Grant {
    Reuse(Vec<u8>),
    Allocate,
}

impl BufferPool {
    pub fn new(config: BufferPoolConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                config,
                state: Mutex::new(PoolState::default()),
                released: Condvar::new(),
            }),
        }
    }

    pub fn config(&self) -> &BufferPoolConfig {
        &self.shared.config
    }

    /// Size class serving a request of `len` bytes
    pub fn size_class(&self, len: usize) -> usize {
        let min = self.shared.config.min_size_class;
        len.checked_next_power_of_two().unwrap_or(len).max(min)
    }

    /// Borrow a buffer of exactly `len` bytes
    ///
    /// Contents are unspecified; callers overwrite the whole buffer.
    pub fn acquire(&self, len: usize) -> Result<PooledBuffer> {
        let class = self.size_class(len);
        let config = &self.shared.config;
        let mut state = self.shared.state.lock();
        let mut waited = false;

        let grant = loop {
            if state.closed {
                return Err(PipeError::Closed);
            }
            let entry = state.classes.entry(class).or_default();
            if let Some(storage) = entry.idle.pop() {
                entry.in_use += 1;
                break Grant::Reuse(storage);
            }
            if config.allow_growth || entry.allocated < config.max_buffers_per_class {
                entry.allocated += 1;
                entry.in_use += 1;
                break Grant::Allocate;
            }
            if config.fail_fast {
                debug!(
                    size_class = class,
                    limit = config.max_buffers_per_class,
                    "Buffer pool exhausted"
                );
                return Err(PipeError::BufferExhausted {
                    size_class: class,
                    limit: config.max_buffers_per_class,
                });
            }
            if !waited {
                waited = true;
                state.waits += 1;
                debug!(size_class = class, "Waiting for buffer release");
            }
            self.shared.released.wait(&mut state);
        };
        drop(state);

        let storage = match grant {
            Grant::Reuse(storage) => storage,
            Grant::Allocate => {
                trace!(size_class = class, "Allocating staging buffer");
                vec![0u8; class]
            }
        };

        Ok(PooledBuffer {
            storage,
            len,
            size_class: class,
            pool: Arc::clone(&self.shared),
        })
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        let mut stats = PoolStats {
            size_classes: state.classes.len(),
            waits: state.waits,
            ..PoolStats::default()
        };
        for (&class, entry) in &state.classes {
            stats.allocated += entry.allocated;
            stats.in_use += entry.in_use;
            stats.idle += entry.idle.len();
            stats.allocated_bytes += entry.allocated * class;
        }
        stats
    }

    /// Release idle buffers and refuse further requests
    ///
    /// Outstanding buffers stay valid and are freed when dropped.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let mut freed = 0;
        for entry in state.classes.values_mut() {
            freed += entry.idle.len();
            entry.allocated -= entry.idle.len();
            entry.idle.clear();
        }
        drop(state);
        self.shared.released.notify_all();
        debug!(freed, "Buffer pool closed");
    }
}

impl PoolShared {
    fn release(&self, size_class: usize, storage: Vec<u8>) {
        let mut state = self.state.lock();
        let closed = state.closed;
        let limit = self.config.max_buffers_per_class;
        if let Some(entry) = state.classes.get_mut(&size_class) {
            entry.in_use -= 1;
            if closed || entry.idle.len() >= limit {
                entry.allocated -= 1;
            } else {
                entry.idle.push(storage);
            }
        }
        drop(state);
        self.released.notify_all();
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Buffer on loan from a [`BufferPool`], returned on drop
pub struct PooledBuffer {
    storage: Vec<u8>,
    len: usize,
    size_class: usize,
    pool: Arc<PoolShared>,
}

impl PooledBuffer {
    pub fn size_class(&self) -> usize {
        self.size_class
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.storage[..self.len]
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.storage[..self.len]
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let storage = std::mem::take(&mut self.storage);
        self.pool.release(self.size_class, storage);
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len)
            .field("size_class", &self.size_class)
            .finish()
    }
}
