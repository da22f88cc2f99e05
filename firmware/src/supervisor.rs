//! Session start requests and the supervised session run.
//!
//! A start request claims the global [`SessionSlot`] and hands the resulting
//! handle to the session task through a one-deep queue. The session task owns
//! the session for its whole lifetime; dropping the run future mid-session
//! still tears the hardware down.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use embassy_sync::channel::{Channel, Receiver, Sender, TrySendError};
use embassy_time::Timer;
use tester_core::display::DisplaySink;
use tester_core::phase::PhaseControl;
use tester_core::sampling::SamplingControl;
use tester_core::session::{
    SessionConfig, SessionHandle, SessionPoll, SessionReport, SessionSlot, TestRig, TestSession,
};

use crate::clock::{FirmwareInstant, core_duration_to_embassy};

#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;

#[cfg(target_os = "none")]
type SupervisorMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
type SupervisorMutex = NoopRawMutex;

pub const START_QUEUE_DEPTH: usize = 1;

pub type StartQueue = Channel<SupervisorMutex, SessionHandle<'static>, START_QUEUE_DEPTH>;
pub type StartSender<'a> = Sender<'a, SupervisorMutex, SessionHandle<'static>, START_QUEUE_DEPTH>;
pub type StartReceiver<'a> =
    Receiver<'a, SupervisorMutex, SessionHandle<'static>, START_QUEUE_DEPTH>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartRequest {
    Accepted,
    AlreadyRunning,
}

/// Queues a new session unless one is already active.
pub fn request_start(slot: &'static SessionSlot, sender: &StartSender<'_>) -> StartRequest {
    let Some(handle) = slot.try_acquire() else {
        log_start_rejected();
        return StartRequest::AlreadyRunning;
    };

    match sender.try_send(handle) {
        Ok(()) => {
            log_start_accepted();
            StartRequest::Accepted
        }
        Err(TrySendError::Full(handle)) => {
            drop(handle);
            log_start_rejected();
            StartRequest::AlreadyRunning
        }
    }
}

/// Runs one session to completion, sleeping between display refreshes.
pub async fn run_session<P, S, R, D>(
    handle: SessionHandle<'_>,
    phase: P,
    sampling: S,
    rig: R,
    display: D,
    config: SessionConfig,
) -> SessionReport
where
    P: PhaseControl,
    S: SamplingControl,
    R: TestRig,
    D: DisplaySink,
{
    let mut session = TestSession::new(handle, phase, sampling, rig, display, config);
    let armed_at = FirmwareInstant::now();
    session.arm(armed_at);
    log_session_armed(config.initial_power_percent, armed_at);

    loop {
        match session.poll(FirmwareInstant::now()) {
            SessionPoll::Sleep(period) => Timer::after(core_duration_to_embassy(period)).await,
            SessionPoll::Finished(report) => {
                log_session_torn_down(&report, FirmwareInstant::now());
                return report;
            }
        }
    }
}

#[cfg(target_os = "none")]
fn log_start_accepted() {
    defmt::info!("ground-bond session requested");
}

#[cfg(not(target_os = "none"))]
fn log_start_accepted() {
    println!("ground-bond session requested");
}

#[cfg(target_os = "none")]
fn log_start_rejected() {
    defmt::warn!("ground-bond session already running; start ignored");
}

#[cfg(not(target_os = "none"))]
fn log_start_rejected() {
    println!("ground-bond session already running; start ignored");
}

#[cfg(target_os = "none")]
fn log_session_armed(power_percent: u8, timestamp: FirmwareInstant) {
    defmt::info!(
        "ground-bond session armed at {}% t={}us",
        power_percent,
        timestamp.as_micros()
    );
}

#[cfg(not(target_os = "none"))]
fn log_session_armed(power_percent: u8, timestamp: FirmwareInstant) {
    println!(
        "ground-bond session armed at {}% t={}us",
        power_percent,
        timestamp.as_micros()
    );
}

#[cfg(target_os = "none")]
fn log_session_torn_down(report: &SessionReport, timestamp: FirmwareInstant) {
    match report.last_reading.resistance() {
        Some(milliohm) => defmt::info!(
            "ground-bond session torn down t={}us refreshes={} last={} mOhm",
            timestamp.as_micros(),
            report.refreshes,
            milliohm
        ),
        None => defmt::info!(
            "ground-bond session torn down t={}us refreshes={} last=OPEN",
            timestamp.as_micros(),
            report.refreshes
        ),
    }
}

#[cfg(not(target_os = "none"))]
fn log_session_torn_down(report: &SessionReport, timestamp: FirmwareInstant) {
    match report.last_reading.resistance() {
        Some(milliohm) => println!(
            "ground-bond session torn down t={}us refreshes={} last={} mOhm",
            timestamp.as_micros(),
            report.refreshes,
            milliohm
        ),
        None => println!(
            "ground-bond session torn down t={}us refreshes={} last=OPEN",
            timestamp.as_micros(),
            report.refreshes
        ),
    }
}
