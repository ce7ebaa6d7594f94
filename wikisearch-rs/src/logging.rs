//! Tracing initialization.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Default level for a `-v` count: warn, info, debug, trace.
fn level_for(verbosity: u8) -> tracing::Level {
    match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

/// Initialize tracing on stderr. `RUST_LOG` directives override the
/// verbosity default. Safe to call multiple times.
pub fn init(verbosity: u8) {
    INIT.call_once(|| {
        let filter = EnvFilter::builder()
            .with_default_directive(level_for(verbosity).into())
            .from_env_lossy();

        let result = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact()
            .try_init();

        if let Err(e) = result {
            eprintln!("Failed to initialize tracing: {}", e);
        }
    });
}

/// Route tracing output through the test harness.
#[cfg(test)]
pub fn init_for_tests() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("wikisearch=debug"))
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for() {
        assert_eq!(level_for(0), tracing::Level::WARN);
        assert_eq!(level_for(2), tracing::Level::DEBUG);
        assert_eq!(level_for(9), tracing::Level::TRACE);
    }

    #[test]
    fn test_init_is_idempotent() {
        init_for_tests();
        init(3);
        tracing::debug!("logging initialized");
    }
}
