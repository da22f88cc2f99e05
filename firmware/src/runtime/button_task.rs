use embassy_stm32::gpio::Input;
use embassy_time::{Duration, Timer};

use super::{SESSION_SLOT, START_QUEUE, SharedTelemetry};
use crate::clock::FirmwareInstant;
use crate::supervisor::{StartRequest, request_start};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Ignore the button this long after a press so contact bounce is one press.
const REARM_DELAY: Duration = Duration::from_millis(250);

#[embassy_executor::task]
pub async fn run(button: Input<'static>, telemetry: &'static SharedTelemetry) -> ! {
    let sender = START_QUEUE.sender();
    let mut was_pressed = false;

    loop {
        let pressed = button.is_low();
        if pressed && !was_pressed {
            let outcome = request_start(&SESSION_SLOT, &sender);
            telemetry.lock(|recorder| {
                recorder.borrow_mut().record_start_request(
                    outcome == StartRequest::Accepted,
                    FirmwareInstant::now(),
                );
            });
            Timer::after(REARM_DELAY).await;
        }
        was_pressed = pressed;
        Timer::after(POLL_INTERVAL).await;
    }
}
