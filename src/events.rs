use std::{collections::HashMap, fmt, str::FromStr};

use crate::error::ConvertError;

/// One login attempt as it appears in the event log:
/// `@<timestamp> attempt("<user>","<ip>",<success>)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub timestamp: i64,
    pub user: String,
    pub ip: String,
    pub success: String,
}

impl Event {
    pub fn from_line(line: &str) -> Result<Self, ConvertError> {
        let line = line.trim_end_matches(['\r', '\n']);

        let rest = line
            .strip_prefix('@')
            .ok_or_else(|| ConvertError::malformed("missing '@' prefix"))?;
        let (timestamp, rest) = rest
            .split_once(' ')
            .ok_or_else(|| ConvertError::malformed("missing space after timestamp"))?;
        let timestamp = timestamp.parse::<i64>().map_err(|err| {
            ConvertError::malformed(format!("invalid timestamp '{timestamp}': {err}"))
        })?;

        let args = rest
            .strip_prefix("attempt(")
            .and_then(|args| args.strip_suffix(')'))
            .ok_or_else(|| ConvertError::malformed("expected attempt(...)"))?;

        let (user, args) = take_quoted(args)?;
        let args = expect_comma(args)?;
        let (ip, args) = take_quoted(args)?;
        let success = expect_comma(args)?;

        if success.is_empty() || success.contains(['"', ',', ' ']) {
            return Err(ConvertError::malformed(format!(
                "invalid success token '{success}'"
            )));
        }

        Ok(Event {
            timestamp,
            user,
            ip,
            success: success.to_string(),
        })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{} attempt(", self.timestamp)?;
        write_quoted(f, &self.user)?;
        f.write_str(",")?;
        write_quoted(f, &self.ip)?;
        write!(f, ",{})", self.success)
    }
}

impl FromStr for Event {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Event::from_line(s)
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in value.chars() {
        match c {
            '"' | '\\' => write!(f, "\\{c}")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            _ => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

/// Reads a double-quoted string off the front of `input`, returning the
/// unescaped value and whatever follows the closing quote.
fn take_quoted(input: &str) -> Result<(String, &str), ConvertError> {
    let body = input
        .strip_prefix('"')
        .ok_or_else(|| ConvertError::malformed("expected opening quote"))?;

    let mut value = String::new();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 'r')) => value.push('\r'),
                Some((_, escaped)) => value.push(escaped),
                None => return Err(ConvertError::malformed("dangling escape")),
            },
            '"' => return Ok((value, &body[i + 1..])),
            _ => value.push(c),
        }
    }

    Err(ConvertError::malformed("unterminated string"))
}

fn expect_comma(input: &str) -> Result<&str, ConvertError> {
    input
        .strip_prefix(',')
        .ok_or_else(|| ConvertError::malformed("expected ','"))
}

/// Dense user numbering in order of first appearance. Lives for one run.
#[derive(Debug, Default)]
pub struct UserIndex {
    indices: HashMap<String, usize>,
}

impl UserIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_of(&mut self, user: &str) -> usize {
        if let Some(&index) = self.indices.get(user) {
            return index;
        }

        let index = self.indices.len();
        self.indices.insert(user.to_owned(), index);
        index
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
