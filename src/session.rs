//! Session control: the ingestion thread, the rundown handshake and shutdown
//!
//! Two threads are involved. The ingestion thread runs an [`EventPump`] that
//! feeds records one at a time into the [`EventDispatcher`]. The controlling
//! thread starts the session, blocks until the image rundown completes, then
//! enables secure-mode transitions, and later drives shutdown.
//!
//! ```text
//! controller                         ingestion thread
//! ----------                         ----------------
//! session.start()
//! spawn ─────────────────────────▶   pump ─▶ dispatch(record) ...
//! waiter.wait()  ◀──── first unload ─┘
//! session.enable_secure_transitions()
//!        ...                         dispatch(enter) / dispatch(stack walk) ...
//! flags.stop_tracing()  ───────────▶ pump returns at next buffer
//! session.stop()
//! flags.revoke_write()
//! join ◀──────────────────────────── dispatcher.finish()
//! ```
//!
//! Shutdown is cooperative. A record already being dispatched always
//! completes; there is a narrow window in which it may still write a row
//! after `revoke_write`, which is accepted.

use crate::dispatcher::{EventDispatcher, IngestionReport};
use crate::error::{MonitorError, Result};
use crate::event::RawEvent;
use crate::rundown::RundownWaiter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Control surface of the underlying kernel trace session
pub trait TraceSession {
    /// Start collecting image-load records and stack walks. Secure-mode
    /// transitions stay disabled.
    fn start(&mut self) -> Result<()>;

    /// Enable the secure-mode transition provider. Called only after the
    /// image rundown has completed.
    fn enable_secure_transitions(&mut self) -> Result<()>;

    /// Stop the session; the pump returns once it observes the stop
    fn stop(&mut self) -> Result<SessionSummary>;
}

/// Statistics reported by the session when it stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Records the session dropped before delivery
    pub events_lost: u64,
}

/// Blocking delivery of raw records
pub trait EventPump: Send {
    /// Deliver records serially until the source is exhausted or
    /// `keep_going` returns false. `keep_going` is consulted once per
    /// delivered buffer.
    fn pump(
        &mut self,
        keep_going: &dyn Fn() -> bool,
        deliver: &mut dyn FnMut(&RawEvent<'_>),
    ) -> Result<()>;
}

/// The two flags shared between the controller and the ingestion thread
#[derive(Debug, Clone)]
pub struct ShutdownFlags {
    continue_tracing: Arc<AtomicBool>,
    can_write: Arc<AtomicBool>,
}

impl ShutdownFlags {
    pub fn new() -> Self {
        Self {
            continue_tracing: Arc::new(AtomicBool::new(true)),
            can_write: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn should_continue(&self) -> bool {
        self.continue_tracing.load(Ordering::SeqCst)
    }

    pub fn stop_tracing(&self) {
        self.continue_tracing.store(false, Ordering::SeqCst);
    }

    /// Handle given to the publisher
    pub fn write_permission(&self) -> Arc<AtomicBool> {
        self.can_write.clone()
    }

    pub fn revoke_write(&self) {
        self.can_write.store(false, Ordering::SeqCst);
    }
}

impl Default for ShutdownFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything known at the end of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorReport {
    pub ingestion: IngestionReport,
    pub events_lost: u64,
}

impl MonitorReport {
    pub fn log_summary(&self) {
        let d = &self.ingestion.dispatch;
        let p = &self.ingestion.publisher;
        tracing::info!(
            "session statistics: events lost {}, records seen {}, modules {}",
            self.events_lost,
            d.records_seen,
            self.ingestion.modules
        );
        tracing::info!(
            "secure entries {} (collisions {}), stacks joined {}, unmatched {}, still pending {}",
            d.transitions_recorded,
            d.transition_collisions,
            d.stacks_joined,
            d.stacks_unmatched,
            self.ingestion.pending_entries
        );
        tracing::info!(
            "rows written {}, suppressed {}, write errors {}",
            p.rows_written,
            p.rows_suppressed,
            p.write_errors
        );
    }
}

type IngestionHandle = JoinHandle<Result<IngestionReport>>;

/// A running monitor: session, ingestion thread and shutdown flags
pub struct Monitor<S: TraceSession> {
    session: S,
    flags: ShutdownFlags,
    ingestion: Option<IngestionHandle>,
    finished: Option<Result<IngestionReport>>,
}

impl<S: TraceSession> Monitor<S> {
    /// Start the session, spawn ingestion, wait for the rundown, then enable
    /// secure-mode transitions
    ///
    /// Blocks until the rundown gate releases. If ingestion ends first, the
    /// session is stopped and the failure returned.
    pub fn start<P>(
        mut session: S,
        mut pump: P,
        mut dispatcher: EventDispatcher,
        waiter: RundownWaiter,
        flags: ShutdownFlags,
    ) -> Result<Self>
    where
        P: EventPump + 'static,
    {
        session.start()?;

        let pump_flags = flags.clone();
        let handle = thread::Builder::new()
            .name("vtl1mon-ingest".to_string())
            .spawn(move || {
                let pumped = pump.pump(
                    &|| pump_flags.should_continue(),
                    &mut |event: &RawEvent<'_>| dispatcher.dispatch(event),
                );
                let report = dispatcher.finish();
                pumped.and(report)
            })?;

        let mut monitor = Self {
            session,
            flags,
            ingestion: Some(handle),
            finished: None,
        };

        if let Err(e) = waiter.wait() {
            // Surface the pump's own failure when it has one
            let err = match monitor.shutdown() {
                Err(pump_err) => pump_err,
                Ok(_) => e,
            };
            return Err(err);
        }

        tracing::info!("image rundown complete; enabling secure-mode transitions");
        if let Err(e) = monitor.session.enable_secure_transitions() {
            let _ = monitor.shutdown();
            return Err(e);
        }

        Ok(monitor)
    }

    pub fn flags(&self) -> &ShutdownFlags {
        &self.flags
    }

    /// Whether the pump has returned on its own (source exhausted)
    pub fn ingestion_finished(&self) -> bool {
        match &self.ingestion {
            Some(handle) => handle.is_finished(),
            None => true,
        }
    }

    /// Block until the pump drains its source
    pub fn wait_for_ingestion(&mut self) {
        if let Some(handle) = self.ingestion.take() {
            self.finished = Some(Self::join(handle));
        }
    }

    fn join(handle: IngestionHandle) -> Result<IngestionReport> {
        handle.join().map_err(|_| MonitorError::IngestionPanicked)?
    }

    /// Stop ingestion, stop the session, revoke writes and collect the report
    pub fn shutdown(mut self) -> Result<MonitorReport> {
        self.flags.stop_tracing();
        let summary = self.session.stop();
        self.flags.revoke_write();

        let ingestion = match (self.ingestion.take(), self.finished.take()) {
            (Some(handle), _) => Self::join(handle),
            (None, Some(done)) => done,
            (None, None) => Err(MonitorError::Session("ingestion never started".to_string())),
        }?;

        Ok(MonitorReport {
            ingestion,
            events_lost: summary?.events_lost,
        })
    }
}
