//! Pipe configuration
//!
//! Loaded from TOML. Every section is optional and falls back to defaults:
//!
//! ```toml
//! group_ranks = [[0, 1]]
//! local_rank = 0
//! device = "cpu"
//!
//! [backend]
//! type = "tcp"
//! connect_timeout_ms = 10000
//!
//! [backend.addresses]
//! 0 = "127.0.0.1:29500"
//!
//! [dispatcher]
//! max_outstanding_sends = 64
//! max_outstanding_bytes = 1000000000
//! drain_timeout_ms = 5000
//!
//! [pool]
//! min_size_class = 4096
//! max_buffers_per_class = 8
//! allow_growth = true
//! fail_fast = false
//! ```

use crate::dispatcher::DispatcherConfig;
use crate::error::TransportError;
use crate::pool::BufferPoolConfig;
use crate::topology::PipeTopology;
use crate::transports::TransportConfig;
use kvpipe_types::Device;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// Pipe groups as rank lists; each group must have exactly two ranks
    pub group_ranks: Vec<Vec<u32>>,
    pub local_rank: u32,
    /// Device received tensors are placed on
    pub device: Device,
    pub backend: TransportConfig,
    pub dispatcher: DispatcherConfig,
    pub pool: BufferPoolConfig,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            group_ranks: vec![vec![0, 1]],
            local_rank: 0,
            device: Device::Cpu,
            backend: TransportConfig::default(),
            dispatcher: DispatcherConfig::default(),
            pool: BufferPoolConfig::default(),
        }
    }
}

impl PipeConfig {
    pub fn new(group_ranks: Vec<Vec<u32>>, local_rank: u32) -> Self {
        Self {
            group_ranks,
            local_rank,
            ..Self::default()
        }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_backend(mut self, backend: TransportConfig) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: DispatcherConfig) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_pool(mut self, pool: BufferPoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self, TransportError> {
        let config: Self = toml::from_str(contents).map_err(|e| {
            TransportError::configuration(format!("Failed to parse config: {e}"), None)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TransportError::io(format!("Failed to read config file {}", path.display()), e)
        })?;
        let config = Self::from_toml_str(&contents)?;
        debug!(
            path = %path.display(),
            backend = %config.backend.transport_type(),
            "Loaded pipe config"
        );
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, TransportError> {
        toml::to_string_pretty(self).map_err(|e| {
            TransportError::configuration(format!("Failed to serialize config: {e}"), None)
        })
    }

    /// Check every section and resolve the local rank's peer
    pub fn validate(&self) -> Result<PipeTopology, TransportError> {
        let topology = PipeTopology::resolve(&self.group_ranks, self.local_rank)?;
        self.backend
            .validate(self.local_rank, topology.peer_rank())?;
        self.dispatcher.validate()?;
        self.pool.validate()?;
        Ok(topology)
    }
}
