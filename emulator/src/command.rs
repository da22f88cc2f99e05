//! Console command grammar.

use core::time::Duration;

use winnow::ascii::{Caseless, dec_uint, multispace0, multispace1};
use winnow::combinator::{alt, delimited, preceded};
use winnow::error::ContextError;
use winnow::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Connect a resistive load of the given value.
    Load { milliohm: u32 },
    /// Disconnect the load.
    Open,
    Start,
    /// Advance simulated time.
    Run { duration: Duration },
    Status,
    Help,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandError {
    Syntax,
}

pub const HELP_TOPICS: &[&str] = &[
    "load <milliohm>  - connect a resistive load",
    "open             - disconnect the load",
    "start            - press START (ignored while a test runs)",
    "run <ms>         - advance simulated time",
    "status           - show bench and display state",
    "help             - show this list",
    "exit             - leave the emulator",
];

pub fn parse(line: &str) -> Result<Command, CommandError> {
    command().parse(line).map_err(|_| CommandError::Syntax)
}

fn command<'a>() -> impl Parser<&'a str, Command, ContextError> {
    delimited(
        multispace0,
        alt((
            preceded((Caseless("load"), multispace1), dec_uint)
                .map(|milliohm| Command::Load { milliohm }),
            Caseless("open").value(Command::Open),
            Caseless("start").value(Command::Start),
            preceded((Caseless("run"), multispace1), dec_uint).map(|millis: u64| Command::Run {
                duration: Duration::from_millis(millis),
            }),
            Caseless("status").value(Command::Status),
            Caseless("help").value(Command::Help),
        )),
        multispace0,
    )
}
