//! Leveled status logging and migration progress reporting.
//!
//! The engine reports row-level warnings and completion counts through
//! these helpers; everything goes to stderr so command output stays
//! pipeable.

use std::io::Write;

/// Log level for status lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    fn prefix(self) -> &'static str {
        match self {
            LogLevel::Info => "   ",
            LogLevel::Success => " ✓ ",
            LogLevel::Warning => " ⚠ ",
            LogLevel::Error => " ✗ ",
        }
    }
}

/// Write one status line to stderr.
pub fn log(level: LogLevel, message: impl AsRef<str>) {
    eprintln!("{}{}", level.prefix(), message.as_ref());
}

/// Convenient logging functions
pub fn log_info(msg: impl AsRef<str>) {
    log(LogLevel::Info, msg);
}

pub fn log_success(msg: impl AsRef<str>) {
    log(LogLevel::Success, msg);
}

pub fn log_warning(msg: impl AsRef<str>) {
    log(LogLevel::Warning, msg);
}

pub fn log_error(msg: impl AsRef<str>) {
    log(LogLevel::Error, msg);
}

/// Textual progress ticker, one tick per emitted target.
///
/// Prints a dot per record and the running count every `stride` records.
/// Disabled instances are free to construct and tick.
#[derive(Debug)]
pub struct Progress {
    enabled: bool,
    stride: usize,
    count: usize,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            stride: 50,
            count: 0,
        }
    }

    pub fn tick(&mut self) {
        self.count += 1;
        if !self.enabled {
            return;
        }
        eprint!(".");
        if self.count % self.stride == 0 {
            eprintln!(" {}", self.count);
        }
        let _ = std::io::stderr().flush();
    }

    pub fn finish(&self) {
        if self.enabled && self.count % self.stride != 0 {
            eprintln!(" {}", self.count);
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}
