//! Session-to-LCD hand-off.
//!
//! The session pushes [`DisplayEvent`]s into a small queue and never waits on
//! the display; when the queue is full a reading is dropped, while the idle
//! event displaces whatever readings are still pending. The display task
//! drains the queue and renders each event into a four-row [`Screen`].

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use embassy_sync::channel::{Channel, Receiver, TrySendError};
use heapless::String;
use tester_core::display::{DisplayLine, DisplaySink, ReadingView};
use tester_core::measurement::MeasurementResult;

#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;

#[cfg(target_os = "none")]
type DisplayMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
type DisplayMutex = NoopRawMutex;

/// Pending display updates; at 100 ms refresh this covers a slow LCD write.
pub const DISPLAY_QUEUE_DEPTH: usize = 4;

/// Rows on the character LCD.
pub const SCREEN_ROWS: usize = 4;

pub type DisplayQueue = Channel<DisplayMutex, DisplayEvent, DISPLAY_QUEUE_DEPTH>;
pub type DisplayReceiver<'a> = Receiver<'a, DisplayMutex, DisplayEvent, DISPLAY_QUEUE_DEPTH>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayEvent {
    Reading(MeasurementResult),
    Idle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayDelivery {
    Delivered,
    Dropped,
}

/// [`DisplaySink`] that forwards to the display task without blocking.
pub struct DisplayMailbox<'a> {
    queue: &'a DisplayQueue,
    dropped: u32,
}

impl<'a> DisplayMailbox<'a> {
    pub fn new(queue: &'a DisplayQueue) -> Self {
        Self { queue, dropped: 0 }
    }

    pub fn post(&mut self, event: DisplayEvent) -> DisplayDelivery {
        match self.queue.try_send(event) {
            Ok(()) => DisplayDelivery::Delivered,
            Err(TrySendError::Full(_)) => {
                self.dropped = self.dropped.saturating_add(1);
                log_event_dropped(self.dropped);
                DisplayDelivery::Dropped
            }
        }
    }

    /// Queues [`DisplayEvent::Idle`], discarding stale readings if the queue
    /// is full so the screen always returns to idle.
    pub fn post_idle(&mut self) -> DisplayDelivery {
        if self.queue.is_full() {
            let stale = u32::try_from(self.queue.len()).unwrap_or(u32::MAX);
            self.queue.clear();
            self.dropped = self.dropped.saturating_add(stale);
            log_event_dropped(self.dropped);
        }
        self.post(DisplayEvent::Idle)
    }

    /// Events discarded because the queue was full.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

impl DisplaySink for DisplayMailbox<'_> {
    fn show_reading(&mut self, reading: &MeasurementResult) {
        self.post(DisplayEvent::Reading(*reading));
    }

    fn show_idle(&mut self) {
        self.post_idle();
    }
}

/// Four rendered LCD rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Screen {
    pub rows: [DisplayLine; SCREEN_ROWS],
}

impl Screen {
    pub fn render(event: &DisplayEvent) -> Self {
        match event {
            DisplayEvent::Reading(reading) => {
                let view = ReadingView::new(*reading);
                Self {
                    rows: [
                        fixed("GROUND BOND TEST"),
                        view.resistance_line(),
                        view.current_line(),
                        view.voltage_line(),
                    ],
                }
            }
            DisplayEvent::Idle => Self {
                rows: [
                    fixed("GROUND BOND TEST"),
                    String::new(),
                    fixed("Press START"),
                    String::new(),
                ],
            },
        }
    }
}

fn fixed(text: &str) -> DisplayLine {
    let mut line = String::new();
    for ch in text.chars() {
        if line.push(ch).is_err() {
            break;
        }
    }
    line
}

#[cfg(target_os = "none")]
fn log_event_dropped(total: u32) {
    defmt::warn!("display queue full; dropped update (total {})", total);
}

#[cfg(not(target_os = "none"))]
fn log_event_dropped(total: u32) {
    println!("display queue full; dropped update (total {total})");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tester_core::sampling::OPEN_CIRCUIT;

    const BOND: MeasurementResult = MeasurementResult {
        resistance_milliohm: 985,
        current_deci_amp: 11,
        voltage_raw: 496,
    };

    #[test]
    fn mailbox_drops_when_queue_is_full() {
        let queue = DisplayQueue::new();
        let mut mailbox = DisplayMailbox::new(&queue);

        for _ in 0..DISPLAY_QUEUE_DEPTH {
            assert_eq!(
                mailbox.post(DisplayEvent::Reading(BOND)),
                DisplayDelivery::Delivered
            );
        }
        assert_eq!(mailbox.post(DisplayEvent::Idle), DisplayDelivery::Dropped);
        assert_eq!(mailbox.dropped(), 1);

        let receiver = queue.receiver();
        assert_eq!(receiver.try_receive(), Ok(DisplayEvent::Reading(BOND)));
        mailbox.show_idle();
        assert_eq!(mailbox.dropped(), 1);
    }

    #[test]
    fn idle_displaces_pending_readings() {
        let queue = DisplayQueue::new();
        let mut mailbox = DisplayMailbox::new(&queue);

        for _ in 0..DISPLAY_QUEUE_DEPTH {
            mailbox.show_reading(&BOND);
        }
        mailbox.show_reading(&BOND);
        assert_eq!(mailbox.dropped(), 1);

        mailbox.show_idle();

        let receiver = queue.receiver();
        assert_eq!(receiver.try_receive(), Ok(DisplayEvent::Idle));
        assert!(receiver.try_receive().is_err());
        let expected = u32::try_from(DISPLAY_QUEUE_DEPTH + 1).expect("queue depth fits u32");
        assert_eq!(mailbox.dropped(), expected);
    }

    #[test]
    fn sink_calls_become_events() {
        let queue = DisplayQueue::new();
        let mut mailbox = DisplayMailbox::new(&queue);

        mailbox.show_reading(&BOND);
        mailbox.show_idle();

        let receiver = queue.receiver();
        assert_eq!(receiver.try_receive(), Ok(DisplayEvent::Reading(BOND)));
        assert_eq!(receiver.try_receive(), Ok(DisplayEvent::Idle));
        assert!(receiver.try_receive().is_err());
    }

    #[test]
    fn renders_reading_screen() {
        let screen = Screen::render(&DisplayEvent::Reading(BOND));
        let rows: [&str; SCREEN_ROWS] = screen.rows.each_ref().map(|row| row.as_str());
        assert_eq!(
            rows,
            ["GROUND BOND TEST", "R: 985 mOhm", "I: 1.1 A", "V: 496 raw"]
        );
    }

    #[test]
    fn renders_open_circuit_and_idle() {
        let open = MeasurementResult {
            resistance_milliohm: OPEN_CIRCUIT,
            ..MeasurementResult::EMPTY
        };
        let screen = Screen::render(&DisplayEvent::Reading(open));
        assert_eq!(screen.rows[1].as_str(), "R: OPEN");

        let idle = Screen::render(&DisplayEvent::Idle);
        assert_eq!(idle.rows[2].as_str(), "Press START");
        assert!(idle.rows[1].is_empty());
    }
}
