//! Logger implementation for the log crate.

use core::fmt::{self, Display};
use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::TinyResult;
use crate::error::TinyError;
use crate::hal::Mutex;
use crate::println;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Optional monotonic clock used to timestamp log lines.
static LOG_CLOCK: Mutex<Option<fn() -> u64>> = Mutex::new(None);

pub struct SimpleLogger;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorCode {
    Red = 31,
    Green = 32,
    Yellow = 33,
    Cyan = 36,
    BrightBlack = 90,
}

impl Display for ColorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\u{1B}[{}m", *self as u8)
    }
}

impl ColorCode {
    fn for_level(level: Level) -> Self {
        match level {
            Level::Error => ColorCode::Red,
            Level::Warn => ColorCode::Yellow,
            Level::Info => ColorCode::Green,
            Level::Debug => ColorCode::Cyan,
            Level::Trace => ColorCode::BrightBlack,
        }
    }
}

impl Log for SimpleLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let file = record.file().unwrap_or("none");
        let line = record.line().unwrap_or(0);
        let args = record.args();
        let color = ColorCode::for_level(record.level());
        let color_reset = "\u{1B}[0m";

        // Copy the clock out so it is not called with the lock held.
        let clock = *LOG_CLOCK.lock();
        match clock {
            Some(now) => {
                let nanos = now();
                let secs = nanos / NANOS_PER_SEC;
                let micros = (nanos % NANOS_PER_SEC) / 1000;
                println!("[{secs}.{micros:06} {file}:{line}] {color}{args}{color_reset}");
            }
            None => println!("[{file}:{line}] {color}{args}{color_reset}"),
        }
    }

    fn flush(&self) {}
}

/// Installs the nanosecond clock used for log timestamps.
pub fn set_clock(clock: fn() -> u64) {
    *LOG_CLOCK.lock() = Some(clock);
}

/// Maps the build-time `LOG` setting to a level filter.
pub fn level_filter(setting: Option<&str>) -> LevelFilter {
    match setting {
        Some("error") => LevelFilter::Error,
        Some("warn") => LevelFilter::Warn,
        Some("info") => LevelFilter::Info,
        Some("debug") => LevelFilter::Debug,
        Some("trace") => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

/// Initialize the logger.
pub fn init() -> TinyResult<()> {
    println!(
        "Initializing logger with level: {}",
        option_env!("LOG").unwrap_or("off")
    );
    log::set_logger(&SimpleLogger).map_err(|_| TinyError::LoggerInitFailed)?;
    log::set_max_level(level_filter(option_env!("LOG")));
    Ok(())
}
