//! Stderr logger for the command-line tool.
//!
//! Lines look like `[  1.234s  INFO checkercal_calib] message`. Records from
//! the workspace crates pass at the requested level; other crates are capped
//! at `Warn` so dependency chatter stays out of `-vv` output.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

const OWN_PREFIX: &str = "checkercal";

struct StderrLogger {
    own: LevelFilter,
    started: Instant,
}

impl StderrLogger {
    fn limit_for(&self, target: &str) -> LevelFilter {
        if target.starts_with(OWN_PREFIX) {
            self.own
        } else {
            self.own.min(LevelFilter::Warn)
        }
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.limit_for(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let krate = record
            .target()
            .split_once("::")
            .map_or(record.target(), |(head, _)| head);
        let tag = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => " WARN",
            Level::Info => " INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        let _ = writeln!(
            std::io::stderr().lock(),
            "[{:8.3}s {tag} {krate}] {}",
            self.started.elapsed().as_secs_f64(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger. Later calls keep the first level.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    let logger = LOGGER.get_or_init(|| StderrLogger {
        own: level,
        started: Instant::now(),
    });
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}

/// Map a `-v` count onto a level: 0 = info, 1 = debug, 2+ = trace.
/// `quiet` wins and keeps only warnings and errors.
pub fn level_from_verbosity(verbose: u8, quiet: bool) -> LevelFilter {
    match (quiet, verbose) {
        (true, _) => LevelFilter::Warn,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    }
}

pub fn init_with_verbosity(verbose: u8, quiet: bool) -> Result<(), log::SetLoggerError> {
    init_with_level(level_from_verbosity(verbose, quiet))
}

/// Install a `tracing` subscriber honouring `RUST_LOG` (default `info`).
/// Span close events carry their timings.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_from_verbosity(0, false), LevelFilter::Info);
        assert_eq!(level_from_verbosity(1, false), LevelFilter::Debug);
        assert_eq!(level_from_verbosity(5, false), LevelFilter::Trace);
        assert_eq!(level_from_verbosity(3, true), LevelFilter::Warn);
    }

    #[test]
    fn foreign_crates_are_capped_at_warn() {
        let logger = StderrLogger {
            own: LevelFilter::Trace,
            started: Instant::now(),
        };
        assert_eq!(logger.limit_for("checkercal_calib::solver"), LevelFilter::Trace);
        assert_eq!(logger.limit_for("image::codecs::png"), LevelFilter::Warn);

        let quiet = StderrLogger {
            own: LevelFilter::Error,
            started: Instant::now(),
        };
        assert_eq!(quiet.limit_for("rayon_core"), LevelFilter::Error);
    }
}
