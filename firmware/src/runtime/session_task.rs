use tester_core::session::SessionConfig;

use super::{DISPLAY_QUEUE, PHASE, SAMPLING, START_QUEUE, SharedTelemetry};
use crate::clock::FirmwareInstant;
use crate::display::DisplayMailbox;
use crate::hw::BondRig;
use crate::supervisor::run_session;

#[embassy_executor::task]
pub async fn run(mut rig: BondRig, telemetry: &'static SharedTelemetry) -> ! {
    let receiver = START_QUEUE.receiver();
    let mut display = DisplayMailbox::new(&DISPLAY_QUEUE);

    loop {
        let handle = receiver.receive().await;
        telemetry.lock(|recorder| {
            recorder.borrow_mut().record_armed(FirmwareInstant::now());
        });

        let report = run_session(
            handle,
            &PHASE,
            &SAMPLING,
            &mut rig,
            &mut display,
            SessionConfig::GROUND_BOND,
        )
        .await;

        telemetry.lock(|recorder| {
            recorder
                .borrow_mut()
                .record_finished(&report, FirmwareInstant::now());
        });
    }
}
