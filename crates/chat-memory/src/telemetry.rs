//! Stderr logging for the `chat-memory` binary. The library itself only emits
//! `tracing` events; embedders install their own subscriber.

use tracing_subscriber::{fmt, EnvFilter};

/// Directives used when `RUST_LOG` is unset. Other crates stay at `warn` so
/// pool and runtime chatter does not drown out the engine's own events.
pub fn default_directives(verbose: u8) -> String {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    format!("warn,chat_memory={}", level)
}

/// A non-empty `RUST_LOG` overrides `verbose` entirely.
pub fn filter_for(verbose: u8) -> EnvFilter {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::new(default_directives(verbose)),
    }
}

/// Installs the global subscriber. Returns `false` when one was already set.
pub fn init_tracing(verbose: u8) -> bool {
    let subscriber = fmt()
        .with_env_filter(filter_for(verbose))
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(verbose > 0)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).is_ok()
}
