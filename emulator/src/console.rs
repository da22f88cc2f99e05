use core::time::Duration;

use tester_core::display::ReadingView;
use tester_core::hardware::MuxPath;
use tester_core::measurement::MeasurementResult;
use tester_core::session::SessionReport;

use crate::command::{self, Command, HELP_TOPICS};
use crate::simulation::{BenchSnapshot, Load, Simulator, StartOutcome};

/// Longest single `run`, to keep a typo from spinning for hours.
pub const MAX_RUN: Duration = Duration::from_secs(60);

pub struct Console {
    simulator: Simulator,
}

impl Console {
    #[must_use]
    pub fn new() -> Self {
        Self {
            simulator: Simulator::new(),
        }
    }

    pub fn handle_command(&mut self, line: &str) -> Vec<String> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        match command::parse(trimmed) {
            Ok(Command::Load { milliohm }) => {
                self.simulator.set_load(Load::Resistive { milliohm });
                vec![format!("OK load {milliohm} mOhm")]
            }
            Ok(Command::Open) => {
                self.simulator.set_load(Load::Open);
                vec!["OK load open".to_string()]
            }
            Ok(Command::Start) => match self.simulator.start() {
                StartOutcome::Armed => vec!["OK start armed".to_string()],
                StartOutcome::AlreadyRunning => {
                    vec!["ERR busy test already running; start ignored".to_string()]
                }
            },
            Ok(Command::Run { duration }) => self.handle_run(duration),
            Ok(Command::Status) => {
                let mut lines = describe_status(&self.simulator.snapshot());
                if let Some(report) = self.simulator.last_report() {
                    lines.extend(describe_report(&report));
                }
                lines
            }
            Ok(Command::Help) => help_lines(),
            Err(_) => vec![format!("ERR syntax `{trimmed}` (type `help`)")],
        }
    }

    fn handle_run(&mut self, duration: Duration) -> Vec<String> {
        if duration > MAX_RUN {
            return vec![format!(
                "ERR range run is limited to {} ms",
                MAX_RUN.as_millis()
            )];
        }

        let mut lines = Vec::new();
        if let Some(report) = self.simulator.run_for(duration) {
            lines.extend(describe_report(&report));
        }

        let snapshot = self.simulator.snapshot();
        lines.push(format!("t=+{}ms", snapshot.elapsed.as_millis()));
        lines.extend(screen_lines(snapshot.display.reading));
        lines
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

fn help_lines() -> Vec<String> {
    let mut lines = vec!["Available commands:".to_string()];
    lines.extend(HELP_TOPICS.iter().map(|topic| format!("  {topic}")));
    lines
}

fn screen_lines(reading: Option<MeasurementResult>) -> Vec<String> {
    match reading {
        Some(reading) => {
            let view = ReadingView::new(reading);
            vec![
                format!("  | {}", view.resistance_line()),
                format!("  | {}", view.current_line()),
                format!("  | {}", view.voltage_line()),
            ]
        }
        None => vec!["  | Press START".to_string()],
    }
}

fn describe_report(report: &SessionReport) -> Vec<String> {
    let max = report
        .max_resistance_milliohm
        .map_or_else(|| "none".to_string(), |value| format!("{value} mOhm"));
    vec![format!(
        "DONE refreshes={} max={max} open-seen={} recoveries={}",
        report.refreshes,
        report.open_circuit_seen,
        report.phase_recoveries
    )]
}

fn describe_status(snapshot: &BenchSnapshot) -> Vec<String> {
    let load = match snapshot.load {
        Load::Resistive { milliohm } => format!("{milliohm} mOhm"),
        Load::Open => "open".to_string(),
    };
    let mux = match snapshot.mux {
        MuxPath::Idle => "idle",
        MuxPath::GroundBond => "ground-bond",
    };

    let mut lines = vec![
        format!(
            "t=+{}ms test={} load={load}",
            snapshot.elapsed.as_millis(),
            if snapshot.session_active {
                "running"
            } else {
                "idle"
            }
        ),
        format!(
            "relay={} mux={mux} sampling={} gate={} pulses={} conversions={}",
            on_off(snapshot.relay_energized),
            on_off(snapshot.sampling),
            on_off(snapshot.gate_high),
            snapshot.gate_pulses,
            snapshot.conversions
        ),
        format!("screen refreshes={}", snapshot.display.refreshes),
    ];
    lines.extend(screen_lines(snapshot.display.reading));
    lines
}

const fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_test_through_the_console() {
        let mut console = Console::new();

        assert_eq!(console.handle_command("load 100"), ["OK load 100 mOhm"]);
        assert_eq!(console.handle_command("start"), ["OK start armed"]);
        assert_eq!(
            console.handle_command("start"),
            ["ERR busy test already running; start ignored"]
        );

        let progress = console.handle_command("run 1000");
        assert_eq!(progress[0], "t=+1000ms");
        assert!(progress[1].starts_with("  | R: "));
        assert!(progress[1].ends_with(" mOhm"));

        let finished = console.handle_command("run 4500");
        assert!(finished[0].starts_with("DONE refreshes=50 "));
        assert_eq!(finished[1], "t=+5500ms");
        assert_eq!(finished[2], "  | Press START");

        let status = console.handle_command("status");
        assert_eq!(status[0], "t=+5500ms test=idle load=100 mOhm");
        assert!(status[1].starts_with("relay=off mux=idle sampling=off gate=off"));
        assert_eq!(status[2], "screen refreshes=50");
        assert_eq!(status[3], "  | Press START");
        assert!(status[4].starts_with("DONE refreshes=50 "));
    }

    #[test]
    fn open_load_shows_open_on_screen() {
        let mut console = Console::new();
        console.handle_command("open");
        console.handle_command("start");

        let lines = console.handle_command("run 500");
        assert_eq!(lines[1], "  | R: OPEN");
        assert_eq!(lines[2], "  | I: 0.0 A");
    }

    #[test]
    fn rejects_bad_input() {
        let mut console = Console::new();
        assert_eq!(
            console.handle_command("load ten"),
            ["ERR syntax `load ten` (type `help`)"]
        );
        assert_eq!(
            console.handle_command("run 3600000"),
            ["ERR range run is limited to 60000 ms"]
        );
        assert!(console.handle_command("   ").is_empty());
    }

    #[test]
    fn help_lists_every_topic() {
        let mut console = Console::new();
        let lines = console.handle_command("help");
        assert_eq!(lines.len(), HELP_TOPICS.len() + 1);
        assert!(lines.iter().any(|line| line.contains("load <milliohm>")));
    }
}
