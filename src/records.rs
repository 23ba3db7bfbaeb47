use chrono::NaiveDateTime;
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Deserialize;
use std::{fs::File, io::Read, path::Path};

use crate::error::ConvertError;

pub const TIMESTAMP_COLUMN: usize = 1;
pub const USER_COLUMN: usize = 2;
pub const IP_COLUMN: usize = 4;
pub const SUCCESS_COLUMN: usize = 13;

const LOGIN_COLUMNS: [usize; 4] = [TIMESTAMP_COLUMN, USER_COLUMN, IP_COLUMN, SUCCESS_COLUMN];

/// `YYYY-MM-DD HH:MM:SS` with an optional fractional second.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// The columns of a dataset row that end up in the event log, in
/// `LOGIN_COLUMNS` order.
#[derive(Debug, Deserialize)]
struct RawLogin {
    timestamp: String,
    user: String,
    ip: String,
    success: String,
}

#[derive(Debug, PartialEq, Clone)]
pub struct LoginRecord {
    /// Line of the input file the record started on.
    pub line: u64,
    pub timestamp: NaiveDateTime,
    pub user: String,
    pub ip: String,
    /// Kept verbatim, e.g. `True` or `False`.
    pub success: String,
}

impl LoginRecord {
    pub fn from_row(row: &StringRecord) -> Result<Self, ConvertError> {
        let line = row.position().map_or(0, |position| position.line());

        let picked = LOGIN_COLUMNS
            .iter()
            .map(|&column| {
                row.get(column)
                    .ok_or(ConvertError::MissingColumn { line, column })
            })
            .collect::<Result<StringRecord, _>>()?;
        let raw: RawLogin = picked.deserialize(None)?;

        let timestamp = parse_login_timestamp(&raw.timestamp).map_err(|source| {
            ConvertError::Timestamp {
                line,
                value: raw.timestamp.clone(),
                source,
            }
        })?;

        // Written unquoted, so it has to survive as a bare token.
        if raw.success.is_empty()
            || raw
                .success
                .contains(|c: char| c == '"' || c == ',' || c.is_whitespace())
        {
            return Err(ConvertError::SuccessToken {
                line,
                value: raw.success,
            });
        }

        Ok(LoginRecord {
            line,
            timestamp,
            user: raw.user,
            ip: raw.ip,
            success: raw.success,
        })
    }
}

pub fn parse_login_timestamp(value: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
}

/// Streams login records out of a dataset one row at a time.
pub struct LoginRecords<R> {
    reader: csv::Reader<R>,
    row: StringRecord,
}

impl LoginRecords<File> {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConvertError> {
        let file = File::open(path)?;
        Ok(Self::from_reader(file))
    }
}

impl<R: Read> LoginRecords<R> {
    pub fn from_reader(source: R) -> Self {
        // The CSV reader is buffered internally. Rows are allowed to vary in
        // length so that short rows surface as `MissingColumn`.
        let reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(source);

        LoginRecords {
            reader,
            row: StringRecord::new(),
        }
    }
}

impl<R: Read> Iterator for LoginRecords<R> {
    type Item = Result<LoginRecord, ConvertError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.row) {
            Ok(true) => Some(LoginRecord::from_row(&self.row)),
            Ok(false) => None,
            Err(err) => Some(Err(err.into())),
        }
    }
}

pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Vec<LoginRecord>, ConvertError> {
    LoginRecords::from_path(path)?.collect()
}
