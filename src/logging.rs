//! Logging setup and per-task log prefixes.

use std::fmt;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over `verbose`.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wordcatch={default_level}")));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(subscriber_fmt::layer().with_target(false))
        .try_init();
}

/// Display prefix owned by a single task.
///
/// Each task builds its own context; nothing is shared or mutated across tasks.
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    prefix: String,
}

impl LogContext {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Context for the `pos`-th (1-based) item out of `total`, e.g. `( 7/120) abc >> `.
    pub fn positioned(pos: usize, total: usize, label: &str) -> Self {
        Self::new(format!("({}) {} >> ", progress(pos, total), label))
    }

    /// A new context with `extra` appended to this prefix.
    pub fn child(&self, extra: impl fmt::Display) -> Self {
        Self::new(format!("{}{}", self.prefix, extra))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn info(&self, msg: impl fmt::Display) {
        tracing::info!("{}{}", self.prefix, msg);
    }

    pub fn warn(&self, msg: impl fmt::Display) {
        tracing::warn!("{}{}", self.prefix, msg);
    }

    pub fn error(&self, msg: impl fmt::Display) {
        tracing::error!("{}{}", self.prefix, msg);
    }

    pub fn debug(&self, msg: impl fmt::Display) {
        tracing::debug!("{}{}", self.prefix, msg);
    }
}

/// `pos/total` with `pos` right-aligned to the width of `total`.
pub fn progress(pos: usize, total: usize) -> String {
    let width = total.to_string().len();
    format!("{:>width$}/{}", pos, total, width = width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_right_aligned() {
        assert_eq!(progress(7, 120), "  7/120");
        assert_eq!(progress(120, 120), "120/120");
    }

    #[test]
    fn test_positioned_prefix() {
        let ctx = LogContext::positioned(3, 10, "abc");
        assert_eq!(ctx.prefix(), "( 3/10) abc >> ");
        assert_eq!(ctx.child("[cut] ").prefix(), "( 3/10) abc >> [cut] ");
    }
}
