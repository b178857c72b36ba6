//! Cancellation support.
//!
//! A [`CancellationFlag`] is threaded through every call that performs I/O.
//! The engine checks it before each transport operation; the transport is
//! expected to honor it during reads. On cancellation, resources are released
//! exactly as on any other error and partial negotiation state is discarded.

use std::sync::atomic::{AtomicBool, Ordering};

/// A thread-safe cancellation flag shared between the caller and the engine.
///
/// The flag starts in the non-cancelled state and can only move to cancelled.
#[derive(Debug, Default)]
pub struct CancellationFlag(AtomicBool);

impl CancellationFlag {
    /// Create a flag in the non-cancelled state.
    pub fn new() -> Self {
        CancellationFlag(AtomicBool::new(false))
    }

    /// Signal cancellation. Irreversible.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Fail with [`Error::Cancelled`](crate::Error::Cancelled) once the flag
    /// has fired.
    pub fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(crate::Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
