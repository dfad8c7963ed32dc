// =============================================================================
// Event Log — append-only audit trail of every engine decision
// =============================================================================
//
// One record per event: schema version, timestamp, cycle id, kind,
// correlation id, subject, and a JSON payload. The correlation id ties the
// whole signal → order → fill chain together and doubles as the dedup key
// under at-least-once delivery.
//
// Two sinks ship with the engine: a bounded in-memory ring feeding the ops
// API, and an append-only JSONL file that survives restarts and is scanned
// on startup to recover the risk ledger's peak equity and the last phase.
// =============================================================================

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::risk::phase::AccountPhase;
use crate::types::Position;

pub const EVENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Event record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SignalGenerated,
    SignalEnhanced,
    SignalBlocked,
    OrderSubmitted,
    OrderFilled,
    OrderRejected,
    PositionAdopted,
    PositionReconciled,
    PositionClosed,
    ExitTriggered,
    PhaseChanged,
    DrawdownStateChanged,
    InvariantViolation,
    CycleAborted,
    DegradedModeEntered,
    DegradedModeExited,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_default();
        write!(f, "{}", s.trim_matches('"'))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub schema_version: u32,
    pub ts: DateTime<Utc>,
    pub cycle_id: u64,
    pub kind: EventKind,
    pub correlation_id: String,
    pub subject: String,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(
        cycle_id: u64,
        kind: EventKind,
        correlation_id: impl Into<String>,
        subject: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            schema_version: EVENT_SCHEMA_VERSION,
            ts: Utc::now(),
            cycle_id,
            kind,
            correlation_id: correlation_id.into(),
            subject: subject.into(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// Sink contract
// ---------------------------------------------------------------------------

/// Write-mostly persistence interface. Appends are at-least-once; consumers
/// dedup on `(kind, correlation_id)`. A failing sink logs and drops — nothing
/// below the supervisor may take the loop down.
pub trait EventSink: Send + Sync {
    fn append_event(&self, event: &Event);

    /// Periodic open-positions snapshot for crash recovery.
    fn snapshot_positions(&self, _positions: &[Position]) {}
}

/// Broadcast to several sinks.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn append_event(&self, event: &Event) {
        for sink in &self.sinks {
            sink.append_event(event);
        }
    }

    fn snapshot_positions(&self, positions: &[Position]) {
        for sink in &self.sinks {
            sink.snapshot_positions(positions);
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory ring
// ---------------------------------------------------------------------------

pub struct MemoryEventLog {
    ring: Mutex<VecDeque<Event>>,
    cap: usize,
}

impl MemoryEventLog {
    pub fn new(cap: usize) -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(cap)),
            cap,
        }
    }

    /// Most recent `count` events, newest last.
    pub fn recent(&self, count: usize) -> Vec<Event> {
        let ring = self.ring.lock();
        let skip = ring.len().saturating_sub(count);
        ring.iter().skip(skip).cloned().collect()
    }

    pub fn count_by_kind(&self, kind: EventKind) -> usize {
        self.ring.lock().iter().filter(|e| e.kind == kind).count()
    }

    /// All events for a correlation id, in append order.
    pub fn chain(&self, correlation_id: &str) -> Vec<Event> {
        self.ring
            .lock()
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect()
    }
}

impl EventSink for MemoryEventLog {
    fn append_event(&self, event: &Event) {
        let mut ring = self.ring.lock();
        ring.push_back(event.clone());
        while ring.len() > self.cap {
            ring.pop_front();
        }
    }
}

// ---------------------------------------------------------------------------
// JSONL store
// ---------------------------------------------------------------------------

pub struct JsonlEventStore {
    path: PathBuf,
    file: Mutex<Option<std::fs::File>>,
}

impl JsonlEventStore {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    fn positions_path(&self) -> PathBuf {
        self.path.with_extension("positions.json")
    }
}

impl EventSink for JsonlEventStore {
    fn append_event(&self, event: &Event) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "event serialisation failed — dropping");
                return;
            }
        };
        let mut guard = self.file.lock();
        if let Some(file) = guard.as_mut() {
            if let Err(e) = writeln!(file, "{line}") {
                warn!(error = %e, path = %self.path.display(), "event append failed — dropping");
            }
        }
    }

    fn snapshot_positions(&self, positions: &[Position]) {
        // Atomic tmp + rename, same pattern as the config save.
        let target = self.positions_path();
        let tmp = target.with_extension("json.tmp");
        let body = match serde_json::to_string_pretty(positions) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "positions snapshot serialisation failed");
                return;
            }
        };
        if let Err(e) = std::fs::write(&tmp, body).and_then(|_| std::fs::rename(&tmp, &target)) {
            warn!(error = %e, path = %target.display(), "positions snapshot write failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Startup recovery
// ---------------------------------------------------------------------------

/// State recovered from the event log tail on startup.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RecoveredState {
    pub peak_equity: Option<f64>,
    pub last_phase: Option<AccountPhase>,
    pub last_cycle_id: u64,
}

/// Scan an event log for the risk ledger anchor and the last phase. Replayed
/// duplicates (at-least-once delivery) are harmless here because both
/// recovered values are last-writer-wins and the peak is monotone.
pub fn recover_from_log(path: &Path) -> RecoveredState {
    let mut recovered = RecoveredState::default();
    let Ok(content) = std::fs::read_to_string(path) else {
        debug!(path = %path.display(), "no event log to recover from");
        return recovered;
    };

    for line in content.lines() {
        let Ok(event) = serde_json::from_str::<Event>(line) else {
            warn!("skipping malformed event line during recovery");
            continue;
        };
        recovered.last_cycle_id = recovered.last_cycle_id.max(event.cycle_id);
        match event.kind {
            EventKind::DrawdownStateChanged => {
                if let Some(peak) = event.payload.get("peak_equity").and_then(|v| v.as_f64()) {
                    recovered.peak_equity =
                        Some(recovered.peak_equity.map_or(peak, |p: f64| p.max(peak)));
                }
            }
            EventKind::PhaseChanged => {
                if let Some(to) = event.payload.get("to") {
                    if let Ok(phase) = serde_json::from_value::<AccountPhase>(to.clone()) {
                        recovered.last_phase = Some(phase);
                    }
                }
            }
            _ => {}
        }
    }
    recovered
}
