//! Transport and Pipe Error Types
//!
//! Two layers of errors:
//! - [`TransportError`] is what a backend reports: connection loss, I/O
//!   failure, handshake mismatch, bad configuration.
//! - [`PipeError`] is what a pipe caller sees: protocol violations, transport
//!   failures, pool exhaustion, drain timeouts.
//!
//! Protocol and transport failures are fatal to a pipe. After the first one,
//! every later operation reports [`TransportError::Poisoned`] naming the
//! first failure.

use kvpipe_codec::ProtocolError;
use kvpipe_types::TensorError;
use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection lost or refused
    #[error("Connection error: {message} (peer: {peer:?})")]
    Connection {
        message: String,
        peer: Option<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },

    /// Endpoint was shut down locally
    #[error("Transport closed: {reason}")]
    Closed { reason: String },

    /// Channel is unusable after an earlier fatal failure
    #[error("Channel poisoned by earlier failure: {cause}")]
    Poisoned { cause: String },

    /// Rendezvous reached the wrong endpoint
    #[error("Handshake failed: expected rank {expected}, peer announced rank {actual}")]
    Handshake { expected: u32, actual: u32 },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Transport timeout errors
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

impl TransportError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>, peer: Option<String>) -> Self {
        Self::Connection {
            message: message.into(),
            peer,
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        peer: Option<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            peer,
            source: Some(Box::new(source)),
        }
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Classify an I/O failure on an established stream
    ///
    /// EOF, resets and broken pipes mean the peer is gone; anything else is
    /// reported as plain I/O.
    pub fn from_stream_io(context: &str, peer: &str, error: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match error.kind() {
            ErrorKind::UnexpectedEof => Self::connection_with_source(
                format!("{context}: peer closed the connection"),
                Some(peer.to_string()),
                error,
            ),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected => {
                Self::connection_with_source(context.to_string(), Some(peer.to_string()), error)
            }
            _ => Self::io(context.to_string(), error),
        }
    }

    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: reason.into(),
        }
    }

    pub fn poisoned(cause: impl Into<String>) -> Self {
        Self::Poisoned {
            cause: cause.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }
}

/// Errors surfaced by pipe operations
#[derive(Error, Debug)]
pub enum PipeError {
    /// Malformed or out-of-range header; the stream is desynchronized
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Backend failure or channel already dead
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Pool cannot satisfy a request and is configured to fail fast
    #[error("Buffer pool exhausted: size class {size_class} bytes has all {limit} buffers in use")]
    BufferExhausted { size_class: usize, limit: usize },

    /// `close` could not confirm in-flight sends within its bound
    #[error("Drain timeout: {pending} sends still outstanding after {timeout_ms}ms")]
    DrainTimeout { pending: usize, timeout_ms: u64 },

    /// Received bytes do not form a valid tensor
    #[error("Invalid tensor: {0}")]
    Tensor(#[from] TensorError),

    /// Operation issued after `close`
    #[error("Pipe closed")]
    Closed,
}

impl PipeError {
    /// True for failures that terminate the channel
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipeError::Protocol(_) | PipeError::Transport(_) | PipeError::Tensor(_)
        )
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, PipeError::Transport(_))
    }
}

/// Result type alias for pipe operations
pub type Result<T> = std::result::Result<T, PipeError>;
