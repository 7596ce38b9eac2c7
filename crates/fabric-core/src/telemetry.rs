//! Tracing setup for the `memory-fabric` binary and embedding hosts.
//!
//! [`init_tracing`] installs the global subscriber; only the first call in a
//! process has any effect.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// `RUST_LOG` when set and parseable, otherwise `level` for everything.
fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install the global subscriber, writing to stderr.
///
/// With `json` every record is one JSON object per line. Stdout is left to
/// command output.
pub fn init_tracing(json: bool, level: Level) {
    let plain = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });
    let structured = json.then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .json()
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(plain)
        .with(structured)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_ignored() {
        init_tracing(false, Level::WARN);
        init_tracing(true, Level::DEBUG);
        tracing::info!("subscriber still installed");
    }

    #[test]
    fn filter_falls_back_to_level() {
        if std::env::var_os("RUST_LOG").is_none() {
            assert_eq!(env_filter(Level::DEBUG).to_string(), "debug");
        }
    }
}
