use chrono::NaiveDateTime;
use clap::ValueEnum;
use std::{
    fs::{self, File},
    io,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, trace};

use crate::{
    error::ConvertError,
    events::{Event, UserIndex},
    records::{read_csv, LoginRecord, LoginRecords},
};

pub const LOG_EXTENSION: &str = "log";

/// Origin the emitted timestamps are counted from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum TimeBase {
    /// 1970-01-01T00:00:00, input treated as UTC.
    #[default]
    Epoch,
    /// The first emitted record.
    First,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum TimeUnit {
    #[default]
    Seconds,
    Millis,
}

impl TimeUnit {
    /// Whole units since the epoch; anything finer is dropped. Offsets from
    /// the first record are taken between these truncated values, so they can
    /// differ by one unit from an offset truncated after subtracting.
    pub fn ticks(self, timestamp: &NaiveDateTime) -> i64 {
        let utc = timestamp.and_utc();
        match self {
            TimeUnit::Seconds => utc.timestamp(),
            TimeUnit::Millis => utc.timestamp_millis(),
        }
    }
}

/// How users are written to the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum UserIds {
    /// The identifier exactly as it appears in the dataset.
    #[default]
    Raw,
    /// A dense index assigned in order of first appearance.
    Indexed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvertOptions {
    pub base: TimeBase,
    pub unit: TimeUnit,
    pub users: UserIds,
    /// Order records by timestamp before emitting. Loads the whole input.
    pub sort: bool,
}

impl ConvertOptions {
    /// Millisecond offsets from the earliest login with indexed users, the
    /// shape used for monitoring traces of the RBA dataset.
    pub fn dataset_trace() -> Self {
        ConvertOptions {
            base: TimeBase::First,
            unit: TimeUnit::Millis,
            users: UserIds::Indexed,
            sort: true,
        }
    }
}

/// Turns login records into events. Holds the per-run state: the user
/// index table and the timestamp origin once it is known.
#[derive(Debug)]
pub struct Converter {
    options: ConvertOptions,
    users: UserIndex,
    origin: Option<i64>,
}

impl Converter {
    pub fn new(options: ConvertOptions) -> Self {
        Converter {
            options,
            users: UserIndex::new(),
            origin: None,
        }
    }

    pub fn event_for(&mut self, record: &LoginRecord) -> Event {
        let ticks = self.options.unit.ticks(&record.timestamp);
        let timestamp = match self.options.base {
            TimeBase::Epoch => ticks,
            TimeBase::First => ticks - *self.origin.get_or_insert(ticks),
        };

        let index = self.users.index_of(&record.user);
        let user = match self.options.users {
            UserIds::Raw => record.user.clone(),
            UserIds::Indexed => index.to_string(),
        };

        Event {
            timestamp,
            user,
            ip: record.ip.clone(),
            success: record.success.clone(),
        }
    }

    /// Distinct users seen so far.
    pub fn users(&self) -> usize {
        self.users.len()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ConversionSummary {
    pub records: usize,
    pub users: usize,
    pub output: PathBuf,
}

/// `data/rba-dataset.csv` becomes `data/rba-dataset.log`.
pub fn log_path_for(input: &Path) -> PathBuf {
    input.with_extension(LOG_EXTENSION)
}

/// Writes one line per record, in iteration order. Stops at the first bad
/// record; lines written before it stay in `out`.
pub fn write_events<I, W>(
    records: I,
    out: W,
    converter: &mut Converter,
) -> Result<usize, ConvertError>
where
    I: IntoIterator<Item = Result<LoginRecord, ConvertError>>,
    W: Write,
{
    let mut out = BufWriter::new(out);
    let mut written = 0;

    for record in records {
        let record = record?;
        let event = converter.event_for(&record);
        trace!(line = record.line, %event, "converted record");
        writeln!(out, "{event}")?;
        written += 1;
    }

    out.flush()?;
    Ok(written)
}

/// Whether `output` already names the file at `input`, through any alias.
fn same_file(input: &Path, output: &Path) -> io::Result<bool> {
    if !output.exists() {
        return Ok(false);
    }
    Ok(fs::canonicalize(input)? == fs::canonicalize(output)?)
}

pub fn convert_file(
    input: &Path,
    output: Option<&Path>,
    options: ConvertOptions,
) -> Result<ConversionSummary, ConvertError> {
    let output = output.map_or_else(|| log_path_for(input), Path::to_path_buf);
    if output == input || same_file(input, &output)? {
        return Err(ConvertError::OutputIsInput(output));
    }

    let mut converter = Converter::new(options);
    debug!(input = %input.display(), output = %output.display(), ?options, "converting");

    let written = if options.sort {
        let mut records = read_csv(input)?;
        // Stable, so logins sharing a timestamp keep their input order.
        records.sort_by_key(|record| record.timestamp);
        debug!(records = records.len(), "sorted records by timestamp");

        let file = File::create(&output)?;
        write_events(records.into_iter().map(Ok), file, &mut converter)?
    } else {
        let records = LoginRecords::from_path(input)?;
        let file = File::create(&output)?;
        write_events(records, file, &mut converter)?
    };

    Ok(ConversionSummary {
        records: written,
        users: converter.users(),
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    const SORTED: &str = "test-inputs/login_events.csv";
    const UNSORTED: &str = "test-inputs/login_events_unsorted.csv";

    fn convert_to_lines(path: &str, options: ConvertOptions) -> Vec<String> {
        let records = read_csv(path).unwrap();
        let mut converter = Converter::new(options);
        let mut out = Vec::new();

        write_events(records.into_iter().map(Ok), &mut out, &mut converter).unwrap();

        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn staged(fixture: &str) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join(Path::new(fixture).file_name().unwrap());
        fs::copy(fixture, &input).unwrap();
        (dir, input)
    }

    #[test]
    fn default_options_emit_epoch_seconds_and_raw_ids() {
        let lines = convert_to_lines(SORTED, ConvertOptions::default());

        assert_eq!(
            lines,
            vec![
                r#"@1577836805 attempt("user7","9.9.9.9",True)"#,
                r#"@1577836805 attempt("-4324475583306591935","10.0.65.171",False)"#,
                r#"@1577836870 attempt("user7","9.9.9.9",True)"#,
                r#"@1577836920 attempt("-4324475583306591935","194.87.207.6",True)"#,
                r#"@1577837010 attempt("user42","81.167.144.58",False)"#,
            ]
        );
    }

    #[test]
    fn dataset_trace_sorts_and_indexes() {
        let (_dir, input) = staged(UNSORTED);
        let summary = convert_file(&input, None, ConvertOptions::dataset_trace()).unwrap();

        assert_eq!(summary.records, 5);
        assert_eq!(summary.users, 3);
        assert_eq!(summary.output, input.with_extension("log"));
        assert_eq!(
            fs::read_to_string(&summary.output).unwrap(),
            "\
@0 attempt(\"0\",\"9.9.9.9\",True)
@250 attempt(\"1\",\"10.0.65.171\",False)
@65999 attempt(\"0\",\"9.9.9.9\",True)
@115000 attempt(\"1\",\"194.87.207.6\",True)
@205500 attempt(\"2\",\"81.167.144.58\",False)
"
        );
    }

    #[test]
    fn first_base_without_sort_keeps_row_order() {
        let options = ConvertOptions {
            base: TimeBase::First,
            ..ConvertOptions::default()
        };
        let timestamps: Vec<i64> = convert_to_lines(UNSORTED, options)
            .iter()
            .map(|line| Event::from_line(line).unwrap().timestamp)
            .collect();

        assert_eq!(timestamps, vec![0, -65, 140, -65, 50]);
    }

    #[test]
    fn first_record_is_zero_on_sorted_input() {
        let options = ConvertOptions {
            base: TimeBase::First,
            ..ConvertOptions::default()
        };
        let lines = convert_to_lines(SORTED, options);

        assert_eq!(lines[0], r#"@0 attempt("user7","9.9.9.9",True)"#);
        assert_eq!(lines[4], r#"@205 attempt("user42","81.167.144.58",False)"#);
    }

    #[test]
    fn repeated_users_share_an_index() {
        let options = ConvertOptions {
            users: UserIds::Indexed,
            ..ConvertOptions::default()
        };
        let users: Vec<String> = convert_to_lines(SORTED, options)
            .iter()
            .map(|line| Event::from_line(line).unwrap().user)
            .collect();

        assert_eq!(users, vec!["0", "1", "0", "1", "2"]);
    }

    #[test]
    fn emitted_lines_parse_back_to_records() {
        let records = read_csv(SORTED).unwrap();
        let lines = convert_to_lines(SORTED, ConvertOptions::default());

        assert_eq!(lines.len(), records.len());
        for (record, line) in records.iter().zip(&lines) {
            let event = Event::from_line(line).unwrap();
            assert_eq!(event.timestamp, TimeUnit::Seconds.ticks(&record.timestamp));
            assert_eq!(event.user, record.user);
            assert_eq!(event.ip, record.ip);
            assert_eq!(event.success, record.success);
        }
    }

    #[test]
    fn millis_drop_sub_millisecond_parts() {
        let timestamp =
            crate::records::parse_login_timestamp("2020-01-01 00:00:05.250999").unwrap();

        assert_eq!(TimeUnit::Millis.ticks(&timestamp), 1_577_836_805_250);
        assert_eq!(TimeUnit::Seconds.ticks(&timestamp), 1_577_836_805);
    }

    #[test]
    fn convert_file_writes_explicit_output() {
        let (dir, input) = staged(SORTED);
        let output = dir.path().join("trace.txt");

        let summary = convert_file(&input, Some(&output), ConvertOptions::default()).unwrap();

        assert_eq!(summary.output, output);
        assert_eq!(fs::read_to_string(&output).unwrap().lines().count(), 5);
        assert!(!input.with_extension("log").exists());
    }

    #[test]
    fn log_path_replaces_extension() {
        assert_eq!(
            log_path_for(Path::new("data/rba-dataset.csv")),
            PathBuf::from("data/rba-dataset.log")
        );
        assert_eq!(
            log_path_for(Path::new("rba-dataset")),
            PathBuf::from("rba-dataset.log")
        );
    }

    #[test]
    fn refuses_to_overwrite_input() {
        let (_dir, input) = staged(SORTED);
        let renamed = input.with_extension("log");
        fs::rename(&input, &renamed).unwrap();

        let err = convert_file(&renamed, None, ConvertOptions::default()).unwrap_err();

        assert!(matches!(err, ConvertError::OutputIsInput(_)));
        assert_eq!(fs::read_to_string(&renamed).unwrap().lines().count(), 6);
    }

    #[test]
    fn refuses_aliased_output_path() {
        let (dir, input) = staged(SORTED);
        fs::create_dir(dir.path().join("sub")).unwrap();
        let aliased = dir.path().join("sub").join("..").join("login_events.csv");

        let err = convert_file(&input, Some(&aliased), ConvertOptions::default()).unwrap_err();

        assert!(matches!(err, ConvertError::OutputIsInput(_)));
        assert_eq!(fs::read_to_string(&input).unwrap().lines().count(), 6);
    }

    #[test]
    fn multi_line_user_field_stays_one_event() {
        let (dir, _) = staged(SORTED);
        let input = dir.path().join("multiline.csv");
        fs::write(
            &input,
            "idx,ts,user,rtt,ip,a,b,c,d,e,f,g,h,ok\n\
             0,2020-01-01 00:00:05,\"us\ner\",,1.2.3.4,,,,,,,,,True\n",
        )
        .unwrap();

        let summary = convert_file(&input, None, ConvertOptions::default()).unwrap();
        let written = fs::read_to_string(&summary.output).unwrap();

        assert_eq!(summary.records, 1);
        assert_eq!(written.lines().count(), 1);
        let stats = crate::verify::verify_log(&summary.output).unwrap();
        assert_eq!(stats.events, 1);
        assert_eq!(Event::from_line(&written).unwrap().user, "us\ner");
    }

    #[test]
    fn missing_input_creates_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("missing.csv");

        let err = convert_file(&input, None, ConvertOptions::default()).unwrap_err();

        assert!(matches!(err, ConvertError::Io(_)));
        assert!(!input.with_extension("log").exists());
    }

    #[test]
    fn bad_row_aborts_the_run() {
        let (_dir, input) = staged("test-inputs/bad_timestamp.csv");

        let err = convert_file(&input, None, ConvertOptions::default()).unwrap_err();

        assert!(matches!(err, ConvertError::Timestamp { line: 3, .. }));
    }
}
