//! Single entry point for every raw record
//!
//! Records are classified by provider identity into one of three lanes:
//!
//! - **secure transition**: enter records become pending entries
//! - **stack walk**: joins a pending entry, resolves the frames and publishes
//! - **image load**: load/rundown records populate the image registry; the
//!   first unload record completes the rundown gate
//!
//! The dispatcher is called strictly serially from the ingestion thread and
//! owns all state it touches. Nothing a single record does can fail the
//! dispatcher: foreign, malformed and unmatched records are counted and dropped.

use crate::correlation::CorrelationStore;
use crate::error::Result;
use crate::event::{opcode, ProviderKind, RawEvent};
use crate::image_registry::{ImageRegistry, InsertOutcome};
use crate::payload::{ImageLoadPayload, SecureCallPayload, StackWalkPayload};
use crate::publisher::{PublisherStats, RecordPublisher};
use crate::resolver::FrameResolver;
use crate::rundown::{RundownGate, RundownState};
use crate::symbols::SymbolSession;

/// Per-class record counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub records_seen: u64,
    pub unknown_provider: u64,
    /// Records originating from this process
    pub self_noise: u64,
    /// Payload did not match the expected layout
    pub malformed: u64,
    pub ignored_opcodes: u64,
    pub transitions_recorded: u64,
    /// Entries displaced by a later entry with the same timestamp
    pub transition_collisions: u64,
    pub exit_transitions: u64,
    pub empty_stacks: u64,
    pub stacks_joined: u64,
    pub stacks_unmatched: u64,
    pub modules_registered: u64,
    pub duplicate_modules: u64,
    pub symbol_captures: u64,
    pub symbol_capture_failures: u64,
    pub unload_records: u64,
}

/// Final state handed back when ingestion ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionReport {
    pub dispatch: DispatchStats,
    pub publisher: PublisherStats,
    pub modules: usize,
    /// Entries that never saw a stack walk
    pub pending_entries: usize,
    pub rundown: RundownState,
}

pub struct EventDispatcher {
    self_pid: u32,
    registry: ImageRegistry,
    store: CorrelationStore,
    gate: RundownGate,
    symbols: SymbolSession,
    publisher: RecordPublisher,
    stats: DispatchStats,
}

impl EventDispatcher {
    /// `self_pid` identifies this tool's own process; its records are noise
    pub fn new(
        self_pid: u32,
        gate: RundownGate,
        symbols: SymbolSession,
        publisher: RecordPublisher,
    ) -> Self {
        Self {
            self_pid,
            registry: ImageRegistry::new(),
            store: CorrelationStore::new(),
            gate,
            symbols,
            publisher,
            stats: DispatchStats::default(),
        }
    }

    /// Route one record to its lane
    pub fn dispatch(&mut self, event: &RawEvent<'_>) {
        self.stats.records_seen += 1;

        match ProviderKind::classify(event.provider) {
            Some(ProviderKind::SecureTransition) => self.handle_secure_transition(event),
            Some(ProviderKind::StackWalk) => self.handle_stack_walk(event),
            Some(ProviderKind::ImageLoad) => self.handle_image_load(event),
            None => self.stats.unknown_provider += 1,
        }
    }

    fn handle_secure_transition(&mut self, event: &RawEvent<'_>) {
        if event.process_id == self.self_pid {
            self.stats.self_noise += 1;
            return;
        }

        let Some(call) = SecureCallPayload::parse(event.payload) else {
            self.stats.malformed += 1;
            return;
        };

        match event.opcode {
            opcode::SECURE_ENTER => {}
            // Exits carry no stack join yet
            opcode::SECURE_EXIT => {
                self.stats.exit_transitions += 1;
                return;
            }
            _ => {
                self.stats.ignored_opcodes += 1;
                return;
            }
        }

        self.stats.transitions_recorded += 1;
        let displaced = self.store.record_entry(
            event.timestamp,
            event.process_id,
            event.thread_id,
            call.call_number,
        );
        if let Some(previous) = displaced {
            self.stats.transition_collisions += 1;
            tracing::debug!(
                "timestamp {} reused; dropped pending entry pid={} tid={} call={}",
                previous.timestamp,
                previous.process_id,
                previous.thread_id,
                previous.call_number
            );
        }
    }

    fn handle_stack_walk(&mut self, event: &RawEvent<'_>) {
        let walk = match StackWalkPayload::parse(event.payload, event.pointer_width) {
            Some(walk) if walk.frame_count() > 0 => walk,
            _ => {
                self.stats.empty_stacks += 1;
                return;
            }
        };

        if walk.process_id == self.self_pid {
            self.stats.self_noise += 1;
            return;
        }

        let Some(entry) = self.store.take_matching(walk.event_timestamp) else {
            self.stats.stacks_unmatched += 1;
            return;
        };

        self.stats.stacks_joined += 1;
        let stack = FrameResolver::new(&self.registry, &self.symbols).format_stack(walk.addresses());
        self.publisher.publish(&entry, stack, &mut self.symbols);
    }

    fn handle_image_load(&mut self, event: &RawEvent<'_>) {
        match event.opcode {
            opcode::IMAGE_LOAD | opcode::IMAGE_RUNDOWN => {}
            opcode::IMAGE_UNLOAD => {
                self.stats.unload_records += 1;
                if self.gate.observe_unload() {
                    tracing::info!(
                        "image rundown complete ({} modules registered)",
                        self.registry.len()
                    );
                }
                return;
            }
            _ => {
                self.stats.ignored_opcodes += 1;
                return;
            }
        }

        let Some(image) = ImageLoadPayload::parse(event.payload, event.pointer_width) else {
            self.stats.malformed += 1;
            return;
        };

        if self.registry.insert(image.image_base, image.image_size, &image.file_name)
            == InsertOutcome::Duplicate
        {
            self.stats.duplicate_modules += 1;
            return;
        }
        self.stats.modules_registered += 1;

        if self
            .symbols
            .capture_module(image.image_base, image.image_size, &image.file_name)
        {
            self.stats.symbol_captures += 1;
        } else {
            self.stats.symbol_capture_failures += 1;
        }
    }

    pub fn registry(&self) -> &ImageRegistry {
        &self.registry
    }

    pub fn store(&self) -> &CorrelationStore {
        &self.store
    }

    pub fn rundown_state(&self) -> RundownState {
        self.gate.state()
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Close the output sink and summarize the session
    pub fn finish(self) -> Result<IngestionReport> {
        let modules = self.registry.len();
        let pending_entries = self.store.len();
        let rundown = self.gate.state();
        let publisher = self.publisher.close()?;

        Ok(IngestionReport {
            dispatch: self.stats,
            publisher,
            modules,
            pending_entries,
            rundown,
        })
    }
}
