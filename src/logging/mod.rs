//! Tracing subscriber setup
//!
//! `RUST_LOG` wins when set; otherwise the crate logs at `level` and
//! dependencies at `info`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

/// Filter directive used when `RUST_LOG` is not set
pub fn default_directive(level: &str) -> String {
    format!("eventhub={},info", level)
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init_tracing(level: &str, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive(level).into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_parses() {
        let directive = default_directive("debug");
        assert_eq!(directive, "eventhub=debug,info");
        assert!(EnvFilter::try_new(&directive).is_ok());
    }
}
