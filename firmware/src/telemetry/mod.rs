//! Telemetry ring buffer and logging helpers.
//!
//! Keeps a fixed-capacity history of session lifecycle events with timestamps
//! so the last few runs can be inspected over RTT after the fact, and mirrors
//! each event to defmt / stdout.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use embassy_time::Duration;
use heapless::{HistoryBuf, OldestOrdered};
use tester_core::session::SessionReport;

use crate::clock::FirmwareInstant;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 32;

pub type EventId = u32;

pub type TelemetryRing = HistoryBuf<TelemetryRecord, TELEMETRY_RING_CAPACITY>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    StartRequested,
    StartRejected,
    Armed,
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    None,
    Report(SessionSummary),
}

/// Condensed [`SessionReport`] stored alongside the `Finished` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    pub refreshes: u32,
    pub max_resistance_milliohm: Option<u32>,
    pub open_circuit_seen: bool,
    pub phase_recoveries: u32,
    pub elapsed_since_armed: Option<Duration>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub timestamp: FirmwareInstant,
    pub event: SessionEvent,
    pub details: TelemetryPayload,
}

pub struct TelemetryRecorder {
    ring: TelemetryRing,
    armed_at: Option<FirmwareInstant>,
    next_event_id: EventId,
}

impl TelemetryRecorder {
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            armed_at: None,
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn record_start_request(&mut self, accepted: bool, timestamp: FirmwareInstant) -> EventId {
        let event = if accepted {
            SessionEvent::StartRequested
        } else {
            SessionEvent::StartRejected
        };
        let id = self.record(event, TelemetryPayload::None, timestamp);
        emit_log(event_label(event), timestamp.as_micros());
        id
    }

    pub fn record_armed(&mut self, timestamp: FirmwareInstant) -> EventId {
        self.armed_at = Some(timestamp);
        let id = self.record(SessionEvent::Armed, TelemetryPayload::None, timestamp);
        emit_log(event_label(SessionEvent::Armed), timestamp.as_micros());
        id
    }

    /// Records the end of a session, with the time elapsed since it was armed.
    pub fn record_finished(&mut self, report: &SessionReport, timestamp: FirmwareInstant) -> EventId {
        let elapsed = self
            .armed_at
            .take()
            .map(|armed| timestamp.saturating_duration_since(armed));

        let summary = SessionSummary {
            refreshes: report.refreshes,
            max_resistance_milliohm: report.max_resistance_milliohm,
            open_circuit_seen: report.open_circuit_seen,
            phase_recoveries: report.phase_recoveries,
            elapsed_since_armed: elapsed,
        };

        let id = self.record(
            SessionEvent::Finished,
            TelemetryPayload::Report(summary),
            timestamp,
        );
        emit_finished_log(&summary, timestamp.as_micros());
        id
    }

    pub fn record(
        &mut self,
        event: SessionEvent,
        payload: TelemetryPayload,
        timestamp: FirmwareInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

const fn event_label(event: SessionEvent) -> &'static str {
    match event {
        SessionEvent::StartRequested => "start-requested",
        SessionEvent::StartRejected => "start-rejected",
        SessionEvent::Armed => "armed",
        SessionEvent::Finished => "finished",
    }
}

#[cfg(target_os = "none")]
fn emit_log(event: &'static str, timestamp_us: u64) {
    defmt::info!("telemetry:session {} t={}us", event, timestamp_us);
}

#[cfg(not(target_os = "none"))]
fn emit_log(event: &'static str, timestamp_us: u64) {
    println!("telemetry:session {event} t={timestamp_us}us");
}

#[cfg(target_os = "none")]
fn emit_finished_log(summary: &SessionSummary, timestamp_us: u64) {
    let elapsed_ms = summary.elapsed_since_armed.map(|value| value.as_millis());
    defmt::info!(
        "telemetry:session finished t={}us refreshes={} max={} mOhm open={} elapsed={} ms",
        timestamp_us,
        summary.refreshes,
        summary.max_resistance_milliohm,
        summary.open_circuit_seen,
        elapsed_ms
    );
    if summary.phase_recoveries > 0 {
        defmt::error!(
            "phase controller recovered {} times during session",
            summary.phase_recoveries
        );
    }
}

#[cfg(not(target_os = "none"))]
fn emit_finished_log(summary: &SessionSummary, timestamp_us: u64) {
    let elapsed_ms = summary.elapsed_since_armed.map(|value| value.as_millis());
    println!(
        "telemetry:session finished t={}us refreshes={} max={:?} mOhm open={} elapsed={:?} ms",
        timestamp_us,
        summary.refreshes,
        summary.max_resistance_milliohm,
        summary.open_circuit_seen,
        elapsed_ms
    );
    if summary.phase_recoveries > 0 {
        println!(
            "phase controller recovered {} times during session",
            summary.phase_recoveries
        );
    }
}
