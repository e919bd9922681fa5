//! Tracing setup shared by the `capctl` and `capctld` binaries.
//!
//! Filtering comes from `CAPCTL_LOG` (then `RUST_LOG`), falling back to the
//! level passed in. `CAPCTL_LOG_FORMAT=json` forces JSON output.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "CAPCTL_LOG";
pub const LOG_FORMAT_ENV: &str = "CAPCTL_LOG_FORMAT";

fn filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Whether `CAPCTL_LOG_FORMAT` asks for JSON.
pub fn json_requested() -> bool {
    std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"))
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_tracing(json: bool, level: Level) {
    let json = json || json_requested();
    if json {
        tracing_subscriber::registry()
            .with(filter(level))
            .with(fmt::layer().with_target(false).json().with_writer(std::io::stderr))
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(filter(level))
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing(false, Level::WARN);
        init_tracing(true, Level::DEBUG);
        tracing::info!("still alive");
    }
}
