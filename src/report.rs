//! The text surfaces: the `key: value` report and the control command parser.
//!
//! The report looks like this, one line per field in a fixed order:
//!
//! ```text
//! instructions: 1204
//! l1i_references: 310
//! l1i_misses: 3
//! l1d_references: 402
//! l1d_misses: 17
//! llc_misses: 2
//! cycles: 2988
//! state: running
//! ```
//!
//! Clients parse this text, so key spelling and order must not change.

use std::fmt;
use std::str::FromStr;

use crate::aggregate::{AggregateReport, CounterSnapshot};
use crate::error::{new_error, new_error_with_cause, Error, ErrorKind};
use crate::program::Event;
use crate::state::{CollectionState, Command};

/// Size of the control command buffer; longer writes are truncated to one
/// byte less than this before they are matched.
pub const COMMAND_BUFFER: usize = 16;

impl fmt::Display for AggregateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &event in Event::ALL.iter() {
            writeln!(f, "{}: {}", event.key(), self.totals.get(event))?;
        }
        writeln!(f, "cycles: {}", self.totals.cycles)?;
        writeln!(f, "state: {}", self.state)
    }
}

impl FromStr for AggregateReport {
    type Err = Error;

    /// Parse the text produced by the `Display` implementation.
    ///
    /// Every line must be present, in order.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lines = s.lines().map(|line| {
            let mut kv = line.splitn(2, ':');
            match (kv.next(), kv.next()) {
                (Some(k), Some(v)) => Ok((k.trim(), v.trim())),
                _ => Err(new_error(ErrorKind::Parse)),
            }
        });

        let mut field = |key: &str| match lines.next() {
            Some(Ok((k, v))) if k == key => Ok(v),
            Some(Err(e)) => Err(e),
            _ => Err(new_error(ErrorKind::Parse)),
        };

        let mut totals = CounterSnapshot::default();
        for &event in Event::ALL.iter() {
            *totals.get_mut(event) = parse_u64(field(event.key())?)?;
        }
        totals.cycles = parse_u64(field("cycles")?)?;
        let state: CollectionState = field("state")?.parse()?;

        if lines.next().is_some() {
            return Err(new_error(ErrorKind::Parse));
        }

        Ok(AggregateReport { totals, state })
    }
}

fn parse_u64(v: &str) -> Result<u64, Error> {
    v.parse::<u64>()
        .map_err(|e| new_error_with_cause(ErrorKind::Parse, e))
}

/// Decode a raw control write into a [`Command`].
///
/// At most `buffer - 1` bytes of `input` are considered. The command word
/// starts at the first byte and ends at whitespace or a NUL byte; it must
/// match a command exactly.
pub fn parse_command(input: &[u8], buffer: usize) -> Result<Command, Error> {
    let len = input.len().min(buffer.saturating_sub(1));
    let input = &input[..len];
    let input = match input.iter().position(|&b| b == 0) {
        Some(nul) => &input[..nul],
        None => input,
    };

    let text = String::from_utf8_lossy(input);
    let word = text.split(char::is_whitespace).next().unwrap_or("");
    word.parse()
}
