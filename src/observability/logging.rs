//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Pick the default filter from the debug flag
//!
//! # Design Decisions
//! - `RUST_LOG` always wins over the computed default
//! - `try_init` so a second initialization (tests, embedding hosts) is harmless

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(debug: bool) -> &'static str {
    if debug {
        "options_store=trace,optctl=trace"
    } else {
        "options_store=info,optctl=info"
    }
}

/// Install the global subscriber. Returns false if one was already installed.
pub fn init_logging(debug: bool) -> bool {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(debug).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        init_logging(false);
        assert!(!init_logging(true));
    }

    #[test]
    fn test_debug_filter_is_more_verbose() {
        assert!(default_filter(true).contains("trace"));
        assert!(!default_filter(false).contains("trace"));
    }
}
