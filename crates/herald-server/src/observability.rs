//! Tracing setup. The filter sits behind a reload layer so the level from
//! the config file can replace the bootstrap level once it is loaded.

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

static LOG_RELOAD_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

/// Directives used for a plain level: our crates at `level`, noisy
/// dependencies capped at `warn` unless tracing everything.
fn directives(level: &str) -> String {
    let level = level.to_ascii_lowercase();
    match level.as_str() {
        "trace" | "off" => level,
        _ => format!("{level},sqlx=warn,hyper=warn,reqwest=warn,lettre=warn"),
    }
}

/// Install the global subscriber at `info`, or at `RUST_LOG` when set.
/// Calling it twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives("info")));

    let (reload_layer, handle) = reload::Layer::new(filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Switch to the configured level. An explicit `RUST_LOG` wins.
pub fn apply_logging_level(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    if let Some(handle) = LOG_RELOAD_HANDLE.get() {
        let _ = handle.modify(|f| *f = EnvFilter::new(directives(level)));
        tracing::debug!(level, "Log level applied");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives() {
        assert_eq!(directives("OFF"), "off");
        assert_eq!(directives("trace"), "trace");
        assert!(directives("debug").starts_with("debug,sqlx=warn"));
    }
}
