//! Replay of captured raw records
//!
//! A capture is a JSON-lines file with one raw record per line:
//!
//! ```text
//! {"provider":"2cb15d1d-5fc1-11d2-abe1-00a0c911f518","opcode":3,"pid":4,"tid":8,"timestamp":10,"payload":"0010..."}
//! ```
//!
//! `pointer_size` (4 or 8) defaults to 8. Blank lines and lines starting with
//! `#` are skipped.
//!
//! Replay honours the same ordering contract as a live session. Records from
//! the secure-transition provider that precede the first image unload are
//! dropped, since a live session would not have had that provider enabled yet.
//! Later ones are held back until the controller enables the provider.

use crate::error::{MonitorError, Result};
use crate::event::{opcode, Guid, OwnedEvent, ProviderKind, RawEvent};
use crate::payload::PointerWidth;
use crate::session::{EventPump, SessionSummary, TraceSession};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};

fn default_pointer_size() -> u8 {
    8
}

/// Wire form of one capture line
#[derive(Debug, Serialize, Deserialize)]
struct CaptureLine {
    provider: String,
    opcode: u8,
    pid: u32,
    tid: u32,
    timestamp: i64,
    #[serde(default = "default_pointer_size")]
    pointer_size: u8,
    #[serde(default)]
    payload: String,
}

/// Parse a whole capture; errors name the offending line
pub fn parse_capture(text: &str) -> Result<Vec<OwnedEvent>> {
    let mut events = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let fail = |reason: String| MonitorError::Capture {
            line: index + 1,
            reason,
        };

        let wire: CaptureLine = serde_json::from_str(trimmed).map_err(|e| fail(e.to_string()))?;
        let provider = Guid::parse(&wire.provider)
            .ok_or_else(|| fail(format!("invalid provider GUID {:?}", wire.provider)))?;
        let pointer_width = PointerWidth::try_from(wire.pointer_size).map_err(fail)?;
        let payload = hex::decode(&wire.payload).map_err(|e| fail(e.to_string()))?;

        events.push(OwnedEvent {
            provider,
            opcode: wire.opcode,
            process_id: wire.pid,
            thread_id: wire.tid,
            timestamp: wire.timestamp,
            pointer_width,
            payload,
        });
    }

    Ok(events)
}

/// Encode one record as a capture line (without newline)
pub fn encode_event(event: &OwnedEvent) -> String {
    let wire = CaptureLine {
        provider: event.provider.to_string(),
        opcode: event.opcode,
        pid: event.process_id,
        tid: event.thread_id,
        timestamp: event.timestamp,
        pointer_size: u8::from(event.pointer_width),
        payload: hex::encode(&event.payload),
    };
    // A struct of strings and integers always serializes
    serde_json::to_string(&wire).unwrap_or_default()
}

#[derive(Debug, Default)]
struct SwitchState {
    transitions_enabled: bool,
    stopped: bool,
}

/// Shared between the replay session (controller) and pump (ingestion)
#[derive(Debug, Default)]
struct ProviderSwitch {
    state: Mutex<SwitchState>,
    changed: Condvar,
}

impl ProviderSwitch {
    fn update(&self, apply: impl FnOnce(&mut SwitchState)) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        apply(&mut state);
        self.changed.notify_all();
    }

    /// Block until transitions are enabled; `false` if the session stopped first
    fn wait_for_transitions(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while !state.transitions_enabled && !state.stopped {
            state = self.changed.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        state.transitions_enabled
    }

    fn is_stopped(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).stopped
    }
}

/// Controller half of a replay
#[derive(Debug)]
pub struct ReplaySession {
    switch: Arc<ProviderSwitch>,
    started: bool,
}

/// Ingestion half of a replay
#[derive(Debug)]
pub struct ReplayPump {
    events: Vec<OwnedEvent>,
    switch: Arc<ProviderSwitch>,
}

/// Build a replay over already-parsed records
pub fn from_events(events: Vec<OwnedEvent>) -> (ReplaySession, ReplayPump) {
    let switch = Arc::new(ProviderSwitch::default());
    (
        ReplaySession {
            switch: switch.clone(),
            started: false,
        },
        ReplayPump { events, switch },
    )
}

/// Read and parse a capture file
pub fn open<P: AsRef<Path>>(path: P) -> Result<(ReplaySession, ReplayPump)> {
    let text = fs::read_to_string(path.as_ref())?;
    let events = parse_capture(&text)?;
    tracing::info!(
        "loaded {} records from {}",
        events.len(),
        path.as_ref().display()
    );
    Ok(from_events(events))
}

impl TraceSession for ReplaySession {
    fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(MonitorError::Session("replay already started".to_string()));
        }
        self.started = true;
        Ok(())
    }

    fn enable_secure_transitions(&mut self) -> Result<()> {
        self.switch.update(|state| state.transitions_enabled = true);
        Ok(())
    }

    fn stop(&mut self) -> Result<SessionSummary> {
        self.switch.update(|state| state.stopped = true);
        Ok(SessionSummary::default())
    }
}

impl EventPump for ReplayPump {
    fn pump(
        &mut self,
        keep_going: &dyn Fn() -> bool,
        deliver: &mut dyn FnMut(&RawEvent<'_>),
    ) -> Result<()> {
        let mut rundown_delivered = false;
        let mut transitions_open = false;
        let mut dropped = 0u64;

        for event in &self.events {
            if !keep_going() || self.switch.is_stopped() {
                break;
            }

            match ProviderKind::classify(event.provider) {
                Some(ProviderKind::SecureTransition) if !transitions_open => {
                    if !rundown_delivered {
                        dropped += 1;
                        continue;
                    }
                    if !self.switch.wait_for_transitions() {
                        break;
                    }
                    transitions_open = true;
                }
                Some(ProviderKind::ImageLoad) if event.opcode == opcode::IMAGE_UNLOAD => {
                    rundown_delivered = true;
                }
                _ => {}
            }

            deliver(&event.as_raw());
        }

        if dropped > 0 {
            tracing::debug!("dropped {} transition records captured before the rundown", dropped);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{opcode, IMAGE_LOAD_PROVIDER, THREAD_PROVIDER};
    use std::thread;
    use std::time::Duration;

    fn owned(provider: Guid, opcode: u8, timestamp: i64) -> OwnedEvent {
        OwnedEvent {
            provider,
            opcode,
            process_id: 10,
            thread_id: 11,
            timestamp,
            pointer_width: PointerWidth::Eight,
            payload: vec![0, 0, 7, 0],
        }
    }

    #[test]
    fn test_encode_then_parse_preserves_record() {
        let event = owned(THREAD_PROVIDER, opcode::SECURE_ENTER, 5000);
        let line = encode_event(&event);
        assert!(line.contains("\"payload\":\"00000700\""));
        let parsed = parse_capture(&line).unwrap();
        assert_eq!(parsed, vec![event]);
    }

    #[test]
    fn test_parse_skips_comments_and_defaults_pointer_size() {
        let text = format!(
            "# captured on test host\n\n{{\"provider\":\"{}\",\"opcode\":2,\"pid\":4,\"tid\":8,\"timestamp\":1}}\n",
            IMAGE_LOAD_PROVIDER
        );
        let events = parse_capture(&text).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pointer_width, PointerWidth::Eight);
        assert!(events[0].payload.is_empty());
    }

    #[test]
    fn test_parse_reports_line_numbers() {
        let text = format!(
            "{}\n{{\"provider\":\"bogus\",\"opcode\":1,\"pid\":1,\"tid\":1,\"timestamp\":1}}\n",
            encode_event(&owned(THREAD_PROVIDER, 1, 1))
        );
        match parse_capture(&text) {
            Err(MonitorError::Capture { line, reason }) => {
                assert_eq!(line, 2);
                assert!(reason.contains("bogus"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_bad_pointer_size_and_hex() {
        let base = format!("\"provider\":\"{}\",\"opcode\":1,\"pid\":1,\"tid\":1,\"timestamp\":1", THREAD_PROVIDER);
        assert!(parse_capture(&format!("{{{},\"pointer_size\":3}}", base)).is_err());
        assert!(parse_capture(&format!("{{{},\"payload\":\"zz\"}}", base)).is_err());
        assert!(parse_capture("{not json").is_err());
    }

    #[test]
    fn test_pump_holds_transitions_until_enabled() {
        let events = vec![
            owned(IMAGE_LOAD_PROVIDER, opcode::IMAGE_UNLOAD, 1),
            owned(THREAD_PROVIDER, opcode::SECURE_ENTER, 2),
        ];
        let (mut session, mut pump) = from_events(events);
        session.start().unwrap();

        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();
        let worker = thread::spawn(move || {
            pump.pump(&|| true, &mut |event: &RawEvent<'_>| {
                sink.lock().unwrap().push(event.timestamp)
            })
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(*delivered.lock().unwrap(), vec![1]);

        session.enable_secure_transitions().unwrap();
        worker.join().unwrap().unwrap();
        assert_eq!(*delivered.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_stop_releases_held_pump() {
        let events = vec![
            owned(IMAGE_LOAD_PROVIDER, opcode::IMAGE_UNLOAD, 1),
            owned(THREAD_PROVIDER, opcode::SECURE_ENTER, 2),
        ];
        let (mut session, mut pump) = from_events(events);
        session.start().unwrap();

        let worker = thread::spawn(move || {
            let mut count = 0;
            let pumped = pump.pump(&|| true, &mut |_: &RawEvent<'_>| count += 1);
            pumped.map(|()| count)
        });

        thread::sleep(Duration::from_millis(20));
        session.stop().unwrap();
        assert_eq!(worker.join().unwrap().unwrap(), 1);
    }

    #[test]
    fn test_transitions_before_rundown_are_dropped() {
        let events = vec![
            owned(THREAD_PROVIDER, opcode::SECURE_ENTER, 1),
            owned(IMAGE_LOAD_PROVIDER, opcode::IMAGE_RUNDOWN, 2),
        ];
        let (_session, mut pump) = from_events(events);
        let mut seen = Vec::new();
        pump.pump(&|| true, &mut |event: &RawEvent<'_>| seen.push(event.timestamp))
            .unwrap();
        assert_eq!(seen, vec![2]);
    }

    #[test]
    fn test_pump_stops_when_told() {
        let events = vec![
            owned(IMAGE_LOAD_PROVIDER, opcode::IMAGE_UNLOAD, 1),
            owned(IMAGE_LOAD_PROVIDER, opcode::IMAGE_UNLOAD, 2),
        ];
        let (_session, mut pump) = from_events(events);
        let mut count = 0;
        pump.pump(&|| false, &mut |_: &RawEvent<'_>| count += 1).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_session_starts_once() {
        let (mut session, _pump) = from_events(Vec::new());
        session.start().unwrap();
        assert!(session.start().is_err());
    }

    #[test]
    fn test_open_missing_file() {
        assert!(matches!(
            open("/no/such/capture.jsonl"),
            Err(MonitorError::Io(_))
        ));
    }
}
