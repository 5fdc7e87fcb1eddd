// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::DetectError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cooperative cancellation flag.
///
/// Clones observe the same flag, so a caller can hand one clone to a worker and
/// cancel from another thread.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns [`DetectError::Cancelled`] once cancellation has been requested.
    pub fn check(&self) -> Result<(), DetectError> {
        if self.is_cancelled() {
            return Err(DetectError::cancelled());
        }
        Ok(())
    }
}
