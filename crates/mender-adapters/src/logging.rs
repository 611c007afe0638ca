//! Diagnostic tracing, written to stderr.
//!
//! The fix loop's user-facing log is separate: it is buffered on the session
//! and replayed to observers, regardless of what is configured here.

use crate::config::LoggingSettings;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_ENV_VAR: &str = "MENDER_LOG";

static INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Filter from `MENDER_LOG`, falling back to the configured level and then
/// to `warn`.
pub fn build_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_new(settings.level.trim()))
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Install the global subscriber. Later calls are no-ops; returns whether this
/// call (or an earlier one) installed it.
pub fn init_logging(settings: &LoggingSettings) -> bool {
    *INITIALIZED.get_or_init(|| {
        tracing_subscriber::registry()
            .with(build_filter(settings))
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .try_init()
            .is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let settings = LoggingSettings::default();
        let first = init_logging(&settings);
        assert_eq!(init_logging(&settings), first);
    }

    #[test]
    fn test_invalid_level_falls_back() {
        let settings = LoggingSettings {
            level: "mender=[[[".to_string(),
        };
        // Must not panic on a bad directive.
        let _ = build_filter(&settings);
    }
}
