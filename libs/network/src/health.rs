//! Channel poison state shared by the send worker and the receive path

use crate::error::{PipeError, TransportError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::error;

#[derive(Default)]
pub(crate) struct ChannelHealth {
    failed: AtomicBool,
    cause: Mutex<Option<String>>,
}

impl ChannelHealth {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Err with the recorded cause once the channel has failed
    pub(crate) fn check(&self) -> Result<(), PipeError> {
        if !self.is_failed() {
            return Ok(());
        }
        let cause = self
            .cause
            .lock()
            .clone()
            .unwrap_or_else(|| "unknown failure".to_string());
        Err(PipeError::Transport(TransportError::poisoned(cause)))
    }

    /// Record the first fatal failure; later ones are ignored
    pub(crate) fn poison(&self, failure: &PipeError, local_rank: u32, peer_rank: u32) {
        let mut cause = self.cause.lock();
        if cause.is_some() {
            return;
        }
        error!(local_rank, peer_rank, error = %failure, "Pipe channel failed");
        *cause = Some(failure.to_string());
        self.failed.store(true, Ordering::Release);
    }

    pub(crate) fn cause(&self) -> Option<String> {
        self.cause.lock().clone()
    }
}
