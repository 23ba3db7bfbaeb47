mod convert;
mod error;
mod events;
mod fix_path;
mod logging;
mod records;
mod verify;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use convert::{convert_file, ConvertOptions, TimeBase, TimeUnit, UserIds};
use fix_path::{fix_path, BundlePath, DEFAULT_BUNDLE, DEFAULT_BUNDLE_DIR, DEFAULT_HTML};
use logging::{init_logging, LogFormat};
use verify::verify_log;

#[derive(Parser, Debug)]
#[command(
    name = "rba-log",
    version,
    about = "Turn RBA login datasets into event logs"
)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, env = "RBA_LOG_FORMAT", default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a login CSV into one `@<time> attempt(...)` line per row
    Convert {
        /// Login dataset, e.g. rba-dataset.csv
        input: PathBuf,

        /// Where to write the log [default: input with a .log extension]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Count timestamps from the Unix epoch or from the first record
        #[arg(long, value_enum, default_value_t = TimeBase::Epoch)]
        base: TimeBase,

        #[arg(long, value_enum, default_value_t = TimeUnit::Seconds)]
        unit: TimeUnit,

        /// Write user ids as given or as dense indices
        #[arg(long, value_enum, default_value_t = UserIds::Raw)]
        users: UserIds,

        /// Sort by timestamp before writing (reads the whole file first)
        #[arg(long)]
        sort: bool,

        /// Monitoring trace preset: --base first --unit millis --users indexed --sort
        #[arg(long, conflicts_with_all = ["base", "unit", "users", "sort"])]
        trace: bool,
    },

    /// Check that every line of an event log parses, and summarize it
    Verify {
        log: PathBuf,
    },

    /// Toggle the bundle script path in a generated HTML page
    FixPath {
        #[arg(default_value = DEFAULT_HTML)]
        html: PathBuf,

        #[arg(long, default_value = DEFAULT_BUNDLE)]
        bundle: String,

        #[arg(long, default_value = DEFAULT_BUNDLE_DIR)]
        dir: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match cli.command {
        Command::Convert {
            input,
            output,
            base,
            unit,
            users,
            sort,
            trace,
        } => {
            let options = if trace {
                ConvertOptions::dataset_trace()
            } else {
                ConvertOptions {
                    base,
                    unit,
                    users,
                    sort,
                }
            };
            let summary = convert_file(&input, output.as_deref(), options)
                .with_context(|| format!("failed to convert {}", input.display()))?;

            info!(
                records = summary.records,
                users = summary.users,
                output = %summary.output.display(),
                "wrote event log"
            );
        }

        Command::Verify { log } => {
            let stats =
                verify_log(&log).with_context(|| format!("failed to verify {}", log.display()))?;

            info!(
                events = stats.events,
                users = stats.users,
                successes = stats.successes,
                first = ?stats.first,
                last = ?stats.last,
                out_of_order = stats.out_of_order,
                "event log is well formed"
            );
        }

        Command::FixPath { html, bundle, dir } => {
            let changed = fix_path(&html, &BundlePath::new(&dir, &bundle))
                .with_context(|| format!("failed to fix {}", html.display()))?;

            info!(
                changed,
                "Successfully fixed {bundle} path in {}",
                html.display()
            );
        }
    }

    Ok(())
}
