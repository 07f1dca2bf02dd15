// SPDX-License-Identifier: MIT

//! Leveled terminal output. The threshold is process-global; messages go
//! to stderr so the report tables on stdout stay clean.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Quiet = 0,
    Normal = 1,
    Verbose = 2,
}

impl LogLevel {
    /// Resolves the level from the usual CLI flags; quiet wins.
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        if quiet {
            LogLevel::Quiet
        } else if verbose {
            LogLevel::Verbose
        } else {
            LogLevel::Normal
        }
    }
}

static THRESHOLD: AtomicU8 = AtomicU8::new(LogLevel::Normal as u8);

pub fn init(level: LogLevel) {
    THRESHOLD.store(level as u8, Ordering::Relaxed);
}

/// Whether messages of the given level currently get printed.
pub fn enabled(level: LogLevel) -> bool {
    THRESHOLD.load(Ordering::Relaxed) >= level as u8
}

/// Progress message; suppressed under `--quiet`.
#[macro_export]
macro_rules! progress {
    ($($arg:tt)*) => {
        if $crate::utils::log::enabled($crate::utils::log::LogLevel::Normal) {
            eprintln!("mbrctl: {}", format_args!($($arg)*));
        }
    };
}

/// Diagnostic detail; printed only under `--verbose` (or a dry run).
#[macro_export]
macro_rules! detail {
    ($($arg:tt)*) => {
        if $crate::utils::log::enabled($crate::utils::log::LogLevel::Verbose) {
            eprintln!("mbrctl: {}", format_args!($($arg)*));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(LogLevel::Quiet < LogLevel::Normal);
        assert!(LogLevel::Normal < LogLevel::Verbose);
    }

    #[test]
    fn flags_resolve_with_quiet_winning() {
        assert_eq!(LogLevel::from_flags(false, false), LogLevel::Normal);
        assert_eq!(LogLevel::from_flags(false, true), LogLevel::Verbose);
        assert_eq!(LogLevel::from_flags(true, false), LogLevel::Quiet);
        assert_eq!(LogLevel::from_flags(true, true), LogLevel::Quiet);
    }

    #[test]
    fn threshold_gates_levels() {
        init(LogLevel::Normal);
        assert!(enabled(LogLevel::Normal));
        assert!(!enabled(LogLevel::Verbose));

        init(LogLevel::Verbose);
        assert!(enabled(LogLevel::Normal));
        assert!(enabled(LogLevel::Verbose));

        init(LogLevel::Quiet);
        assert!(!enabled(LogLevel::Normal));

        init(LogLevel::Normal);
    }
}
