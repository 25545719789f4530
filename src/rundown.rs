//! Rundown gate: tracks whether the initial module inventory is complete
//!
//! The image-load provider never emits an "inventory finished" marker. The
//! first unload record is taken as that marker instead: by the time any image
//! unloads, every image that was already resident has been enumerated.
//!
//! The gate is split in two halves. [`RundownGate`] is owned by the ingestion
//! thread and flips the state; [`RundownWaiter`] is held by the controlling
//! thread, which blocks on it before enabling secure-mode transitions.

use crate::error::{MonitorError, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;

/// Two-state, one-directional latch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RundownState {
    Pending,
    Complete,
}

/// Ingestion-side half of the gate
#[derive(Debug)]
pub struct RundownGate {
    state: RundownState,
    signal: Sender<()>,
}

/// Controller-side half of the gate
#[derive(Debug)]
pub struct RundownWaiter {
    signal: Receiver<()>,
}

impl RundownGate {
    /// Create a pending gate and the waiter it releases
    pub fn new() -> (Self, RundownWaiter) {
        // Capacity one: a single pending release, consumed by a single wait
        let (tx, rx) = channel::bounded(1);
        (
            Self {
                state: RundownState::Pending,
                signal: tx,
            },
            RundownWaiter { signal: rx },
        )
    }

    pub fn state(&self) -> RundownState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == RundownState::Complete
    }

    /// Record an unload observation. Returns `true` only for the observation
    /// that completed the rundown; later calls are no-ops.
    pub fn observe_unload(&mut self) -> bool {
        if self.is_complete() {
            return false;
        }

        self.state = RundownState::Complete;
        match self.signal.try_send(()) {
            Ok(()) => {}
            // The waiter already went away; the state change still stands
            Err(TrySendError::Disconnected(())) => {
                tracing::debug!("rundown completed with no waiter attached");
            }
            Err(TrySendError::Full(())) => {}
        }
        true
    }
}

impl RundownWaiter {
    /// Block until the rundown completes
    ///
    /// Fails if the ingestion side was dropped without ever completing.
    pub fn wait(&self) -> Result<()> {
        self.signal
            .recv()
            .map_err(|_| MonitorError::RundownIncomplete)
    }

    /// Block for at most `timeout`. `Ok(false)` means the timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        match self.signal.recv_timeout(timeout) {
            Ok(()) => Ok(true),
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(MonitorError::RundownIncomplete),
        }
    }
}
