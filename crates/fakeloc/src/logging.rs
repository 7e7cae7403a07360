//! Diagnostics output for fakeloc.
//!
//! Command results go to stdout; everything logged through `tracing` goes to
//! stderr. Only `fakeloc` events are shown unless `RUST_LOG` says otherwise.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crate whose events are shown by default.
const LOG_TARGET: &str = "fakeloc";

/// How much diagnostic output to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Progress messages.
    #[default]
    Normal,
    /// Each device step.
    Verbose,
    /// Device steps and addresses in full.
    Trace,
}

impl Verbosity {
    /// Derive the verbosity from `-v` repetitions and `-q`.
    ///
    /// `quiet` wins over any number of `-v`.
    #[must_use]
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// The most detailed level shown.
    #[must_use]
    pub fn to_level_filter(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Filter directive applied when `RUST_LOG` is unset.
    #[must_use]
    pub fn default_directive(&self) -> String {
        format!("{LOG_TARGET}={}", self.to_level_filter())
    }

    /// Targets and levels are noise at the default level.
    fn show_targets(self) -> bool {
        self >= Self::Verbose
    }
}

/// Install the stderr subscriber.
///
/// Call once at startup. `RUST_LOG` replaces the directive derived from
/// `verbosity`; a second call is a no-op.
pub fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_directive()));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbosity.show_targets())
        .with_level(verbosity.show_targets())
        .without_time();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init();
}

/// Initialize logging for tests.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}
