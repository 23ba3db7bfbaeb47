use std::{
    fs::File,
    io::{BufRead, BufReader, Read},
    path::Path,
};

use crate::{
    error::ConvertError,
    events::{Event, UserIndex},
};

/// What a pass over an event log found.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LogStats {
    pub events: usize,
    pub users: usize,
    pub successes: usize,
    pub first: Option<i64>,
    pub last: Option<i64>,
    /// Events whose timestamp is lower than the one before.
    pub out_of_order: usize,
}

pub fn verify_log<P: AsRef<Path>>(path: P) -> Result<LogStats, ConvertError> {
    let file = File::open(path)?;
    verify_events(file)
}

/// Parses every line of an event log, failing on the first one that does
/// not follow the `@<int> attempt(...)` notation.
pub fn verify_events<R: Read>(source: R) -> Result<LogStats, ConvertError> {
    let mut stats = LogStats::default();
    let mut users = UserIndex::new();

    for (number, line) in BufReader::new(source).lines().enumerate() {
        let line = line?;
        let event = Event::from_line(&line).map_err(|err| match err {
            ConvertError::MalformedLine { reason } => {
                ConvertError::malformed(format!("line {}: {reason}", number + 1))
            }
            other => other,
        })?;

        if stats.last.is_some_and(|last| event.timestamp < last) {
            stats.out_of_order += 1;
        }
        if event.success == "True" {
            stats.successes += 1;
        }
        users.index_of(&event.user);

        stats.first.get_or_insert(event.timestamp);
        stats.last = Some(event.timestamp);
        stats.events += 1;
    }

    stats.users = users.len();
    Ok(stats)
}
