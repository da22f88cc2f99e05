use super::DISPLAY_QUEUE;
use crate::display::{DisplayEvent, Screen};

#[embassy_executor::task]
pub async fn run() -> ! {
    let receiver = DISPLAY_QUEUE.receiver();
    render(&DisplayEvent::Idle);

    loop {
        let event = receiver.receive().await;
        render(&event);
    }
}

// The LCD driver sits outside this firmware; rows go to RTT.
fn render(event: &DisplayEvent) {
    let screen = Screen::render(event);
    for (row, line) in screen.rows.iter().enumerate() {
        defmt::debug!("lcd[{}] {}", row, line.as_str());
    }
}
