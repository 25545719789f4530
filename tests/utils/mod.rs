// Integration test utilities
//
// Scripted symbol backend, in-memory sinks, payload builders and a channel
// backed pump for driving the monitor without a kernel session.
#![allow(dead_code)]

use crossbeam::channel::{Receiver, RecvTimeoutError};
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vtl1mon::config::MonitorConfig;
use vtl1mon::dispatcher::EventDispatcher;
use vtl1mon::error::{MonitorError, Result};
use vtl1mon::event::{opcode, Guid, OwnedEvent, RawEvent, IMAGE_LOAD_PROVIDER, STACK_WALK_PROVIDER, THREAD_PROVIDER};
use vtl1mon::payload::{ImageLoadPayload, PointerWidth};
use vtl1mon::publisher::RecordPublisher;
use vtl1mon::rundown::{RundownGate, RundownWaiter};
use vtl1mon::session::{EventPump, SessionSummary, TraceSession};
use vtl1mon::symbols::{ResolvedSymbol, SymbolBackend, SymbolSession};

/// Process id the dispatcher treats as its own
pub const SELF_PID: u32 = 4242;

pub const KERNEL_BASE: u64 = 0xfffff800_00000000;
pub const KERNEL_NT_PATH: &str = "\\SystemRoot\\system32\\ntoskrnl.exe";

/// Symbol backend with a fixed call-name table and optional named ranges
#[derive(Default)]
pub struct ScriptedSymbols {
    pub call_names: Vec<(u32, String)>,
    /// `(start, end_exclusive, name)`
    pub ranges: Vec<(u64, u64, String)>,
    pub registered: Arc<Mutex<Vec<String>>>,
    pub reject: Vec<String>,
}

impl ScriptedSymbols {
    pub fn with_call_name(number: u32, name: &str) -> Self {
        Self {
            call_names: vec![(number, name.to_string())],
            ..Self::default()
        }
    }
}

impl SymbolBackend for ScriptedSymbols {
    fn register_module(&mut self, _base: u64, _size: u64, path: &str) -> Result<()> {
        if self.reject.iter().any(|r| path.ends_with(r.as_str())) {
            return Err(MonitorError::Symbols(format!("no image for {}", path)));
        }
        self.registered.lock().unwrap().push(path.to_string());
        Ok(())
    }

    fn resolve_address(&self, address: u64) -> Option<ResolvedSymbol> {
        self.ranges
            .iter()
            .find(|(start, end, _)| (*start..*end).contains(&address))
            .map(|(start, _, name)| ResolvedSymbol {
                name: name.clone(),
                displacement: address - start,
            })
    }

    fn enumerate_constants(&self, module_base: u64, _type_name: &str) -> Result<Vec<(u32, String)>> {
        if module_base != KERNEL_BASE {
            return Err(MonitorError::Symbols("not the kernel".to_string()));
        }
        Ok(self.call_names.clone())
    }
}

/// In-memory output sink shared with the test body
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuffer {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    /// Data rows, header excluded
    pub fn rows(&self) -> Vec<String> {
        self.text().lines().skip(1).map(str::to_string).collect()
    }
}

/// Everything needed to drive a dispatcher directly
pub struct Harness {
    pub dispatcher: EventDispatcher,
    pub waiter: RundownWaiter,
    pub output: SharedBuffer,
    pub can_write: Arc<AtomicBool>,
}

pub fn harness(backend: ScriptedSymbols) -> Harness {
    let output = SharedBuffer::default();
    let can_write = Arc::new(AtomicBool::new(true));
    let publisher = RecordPublisher::new(Box::new(output.clone()), can_write.clone()).unwrap();
    let symbols = SymbolSession::new(Box::new(backend), MonitorConfig::default());
    let (gate, waiter) = RundownGate::new();
    Harness {
        dispatcher: EventDispatcher::new(SELF_PID, gate, symbols, publisher),
        waiter,
        output,
        can_write,
    }
}

impl Harness {
    pub fn feed(&mut self, events: &[OwnedEvent]) {
        for event in events {
            self.dispatcher.dispatch(&event.as_raw());
        }
    }

    pub fn revoke_write(&self) {
        self.can_write.store(false, Ordering::SeqCst);
    }
}

fn wide(name: &str) -> Vec<u8> {
    name.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(|unit| unit.to_le_bytes())
        .collect()
}

fn push_pointer(bytes: &mut Vec<u8>, value: u64, width: PointerWidth) {
    match width {
        PointerWidth::Four => bytes.extend_from_slice(&(value as u32).to_le_bytes()),
        PointerWidth::Eight => bytes.extend_from_slice(&value.to_le_bytes()),
    }
}

pub fn secure_call_payload(operation: u16, call_number: u16) -> Vec<u8> {
    let mut bytes = operation.to_le_bytes().to_vec();
    bytes.extend_from_slice(&call_number.to_le_bytes());
    bytes
}

pub fn stack_walk_payload(
    timestamp: i64,
    pid: u32,
    tid: u32,
    frames: &[u64],
    width: PointerWidth,
) -> Vec<u8> {
    let mut bytes = timestamp.to_le_bytes().to_vec();
    bytes.extend_from_slice(&pid.to_le_bytes());
    bytes.extend_from_slice(&tid.to_le_bytes());
    for &frame in frames {
        push_pointer(&mut bytes, frame, width);
    }
    bytes
}

pub fn image_load_payload(base: u64, size: u64, pid: u32, name: &str, width: PointerWidth) -> Vec<u8> {
    let mut bytes = Vec::new();
    push_pointer(&mut bytes, base, width);
    push_pointer(&mut bytes, size, width);
    bytes.extend_from_slice(&pid.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes()); // checksum
    bytes.extend_from_slice(&0u32.to_le_bytes()); // time date stamp
    bytes.extend_from_slice(&0u32.to_le_bytes());
    push_pointer(&mut bytes, base, width); // default base
    bytes.extend_from_slice(&[0u8; 16]);
    assert_eq!(bytes.len(), ImageLoadPayload::name_offset(width));
    bytes.extend(wide(name));
    bytes
}

fn event(provider: Guid, op: u8, pid: u32, tid: u32, timestamp: i64, payload: Vec<u8>) -> OwnedEvent {
    OwnedEvent {
        provider,
        opcode: op,
        process_id: pid,
        thread_id: tid,
        timestamp,
        pointer_width: PointerWidth::Eight,
        payload,
    }
}

pub fn secure_enter(timestamp: i64, pid: u32, tid: u32, call_number: u16) -> OwnedEvent {
    event(
        THREAD_PROVIDER,
        opcode::SECURE_ENTER,
        pid,
        tid,
        timestamp,
        secure_call_payload(1, call_number),
    )
}

pub fn secure_exit(timestamp: i64, pid: u32, tid: u32, call_number: u16) -> OwnedEvent {
    event(
        THREAD_PROVIDER,
        opcode::SECURE_EXIT,
        pid,
        tid,
        timestamp,
        secure_call_payload(1, call_number),
    )
}

pub fn stack_walk(timestamp: i64, pid: u32, tid: u32, frames: &[u64]) -> OwnedEvent {
    event(
        STACK_WALK_PROVIDER,
        opcode::STACK_WALK,
        pid,
        tid,
        timestamp + 1,
        stack_walk_payload(timestamp, pid, tid, frames, PointerWidth::Eight),
    )
}

pub fn image_rundown(base: u64, size: u64, name: &str) -> OwnedEvent {
    event(
        IMAGE_LOAD_PROVIDER,
        opcode::IMAGE_RUNDOWN,
        4,
        8,
        0,
        image_load_payload(base, size, 4, name, PointerWidth::Eight),
    )
}

pub fn image_load(base: u64, size: u64, name: &str) -> OwnedEvent {
    OwnedEvent {
        opcode: opcode::IMAGE_LOAD,
        ..image_rundown(base, size, name)
    }
}

pub fn image_unload() -> OwnedEvent {
    event(IMAGE_LOAD_PROVIDER, opcode::IMAGE_UNLOAD, 4, 8, 0, Vec::new())
}

/// Pump fed from a channel, standing in for a live session
pub struct ChannelPump {
    pub records: Receiver<OwnedEvent>,
}

impl EventPump for ChannelPump {
    fn pump(
        &mut self,
        keep_going: &dyn Fn() -> bool,
        deliver: &mut dyn FnMut(&RawEvent<'_>),
    ) -> Result<()> {
        while keep_going() {
            match self.records.recv_timeout(Duration::from_millis(5)) {
                Ok(record) => deliver(&record.as_raw()),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(())
    }
}

/// Session that records the controller's calls
#[derive(Clone, Default)]
pub struct MockSession {
    pub calls: Arc<Mutex<Vec<&'static str>>>,
    pub events_lost: u64,
}

impl MockSession {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

impl TraceSession for MockSession {
    fn start(&mut self) -> Result<()> {
        self.calls.lock().unwrap().push("start");
        Ok(())
    }

    fn enable_secure_transitions(&mut self) -> Result<()> {
        self.calls.lock().unwrap().push("enable");
        Ok(())
    }

    fn stop(&mut self) -> Result<SessionSummary> {
        self.calls.lock().unwrap().push("stop");
        Ok(SessionSummary {
            events_lost: self.events_lost,
        })
    }
}

/// Module names keyed by base, for assertions
pub fn module_names(dispatcher: &EventDispatcher) -> HashMap<u64, String> {
    dispatcher
        .registry()
        .iter()
        .map(|m| (m.base, m.name.clone()))
        .collect()
}
