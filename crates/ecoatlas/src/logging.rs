//! Log output for the `ecoatlas` binary and tests.
//!
//! Diagnostics go to stderr so `--json` output on stdout stays parseable.
//! `-q`, `-v` and `-vv` move the crate's own level; HTTP and database
//! dependencies stay at `warn` unless `RUST_LOG` says otherwise.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Level for dependencies (reqwest, hyper, rusqlite) when `RUST_LOG` is unset.
const DEPENDENCY_LEVEL: Level = Level::WARN;

/// How chatty the CLI is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// `-q`: errors only, dependencies included.
    Quiet,
    /// Queue and sync milestones.
    #[default]
    Normal,
    /// `-v`: every request and queue operation.
    Verbose,
    /// `-vv`.
    Trace,
}

impl Verbosity {
    /// Level applied to the `ecoatlas` target.
    #[must_use]
    pub fn to_level_filter(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Filter used when `RUST_LOG` is unset.
    #[must_use]
    pub fn default_directive(&self) -> String {
        let dependencies = match self {
            Self::Quiet => Level::ERROR,
            _ => DEPENDENCY_LEVEL,
        };
        format!("{dependencies},ecoatlas={}", self.to_level_filter())
    }
}

/// Install the stderr subscriber.
///
/// `RUST_LOG` replaces the directive derived from `verbosity`. Calling this
/// more than once keeps the first subscriber.
///
/// ```no_run
/// use ecoatlas::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::Verbose);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_directive()));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}

/// Show skipped-row and failed-sync warnings in captured test output.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("ecoatlas=warn")
        .with_test_writer()
        .try_init();
}
