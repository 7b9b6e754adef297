//! Logging and output control
//!
//! This module provides the [`Logger`] handed to registry operations. Messages
//! are emitted as `tracing` events; [`init_tracing`] installs a subscriber for
//! binaries and tests that want to see them.

use tracing_subscriber::EnvFilter;

const TARGET: &str = "remote_resolver";

/// Install a fmt subscriber. `RUST_LOG` takes precedence over `verbose`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "remote_resolver=debug" } else { "remote_resolver=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Logger responsible for operation output
#[derive(Debug, Clone, Default)]
pub struct Logger {
    pub verbose: bool,
    pub quiet: bool,
}

impl Logger {
    pub fn new(verbose: bool) -> Self {
        Self { verbose, quiet: false }
    }

    pub fn new_quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
        }
    }

    /// Detailed information. Emitted at debug level and left to the
    /// subscriber's filter; `verbose` raises it to info.
    pub fn detail(&self, message: &str) {
        if self.quiet {
            return;
        }
        if self.verbose {
            tracing::info!(target: TARGET, "   {}", message);
        } else {
            tracing::debug!(target: TARGET, "   {}", message);
        }
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            tracing::info!(target: TARGET, "{}", message);
        }
    }

    pub fn warning(&self, message: &str) {
        if !self.quiet {
            tracing::warn!(target: TARGET, "{}", message);
        }
    }

    /// Errors are reported even in quiet mode
    pub fn error(&self, message: &str) {
        tracing::error!(target: TARGET, "{}", message);
    }
}
