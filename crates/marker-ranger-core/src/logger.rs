//! Process-wide logging setup.
//!
//! [`init_with_level`] installs a stderr sink for the `log` facade that
//! prints `[elapsed LEVEL target] message`. Records from dependencies are
//! only shown at `debug` and above, so a default `info` run only reports
//! what the ranging crates themselves say. With the `tracing` feature,
//! [`init_tracing`] installs a `tracing-subscriber` formatter instead.

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

const OWN_TARGET: &str = "marker_ranger";

struct RangerLogger {
    level: LevelFilter,
    started: Instant,
}

impl RangerLogger {
    fn admits(&self, level: Level, target: &str) -> bool {
        if level > self.level {
            return false;
        }
        target.starts_with(OWN_TARGET) || self.level >= LevelFilter::Debug || level <= Level::Warn
    }
}

impl Log for RangerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.admits(metadata.level(), metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let target = record.target().strip_prefix("marker_ranger_").unwrap_or(record.target());
        let _ = writeln!(
            std::io::stderr().lock(),
            "[{:8.3}s {:>5} {}] {}",
            self.started.elapsed().as_secs_f64(),
            record.level(),
            target,
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<RangerLogger> = OnceLock::new();

/// Install the stderr logger.
///
/// Only the first call installs; later calls return `Ok(())` and keep the
/// original level.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    let logger = LOGGER.get_or_init(|| RangerLogger {
        level,
        started: Instant::now(),
    });
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}

/// `EnvFilter` directive equivalent to a `log` level filter.
#[cfg(feature = "tracing")]
fn env_directive(level: LevelFilter) -> String {
    level.as_str().to_ascii_lowercase()
}

/// Install a `tracing` subscriber filtered at `level`; `RUST_LOG` overrides it.
///
/// `json` selects flattened JSON events (one object per line), otherwise
/// human-readable lines with uptime stamps. Span close events carry the
/// time spent in instrumented calls.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool, level: LevelFilter) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_directive(level)));
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
