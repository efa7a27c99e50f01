//! Tracing subscriber setup

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates that are too chatty at `info`.
const QUIET_TARGETS: &[&str] = &["sqlx=warn", "hyper=warn", "reqwest=warn", "tower_http=info"];

fn build_filter(level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let mut directives = level.to_lowercase();
    for target in QUIET_TARGETS {
        directives.push(',');
        directives.push_str(target);
    }
    EnvFilter::new(directives)
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `LOG_LEVEL` when both are set. Calling this twice is
/// harmless; the second install is reported on stderr and ignored.
pub fn init_tracing(config: &LoggingConfig) {
    let registry = tracing_subscriber::registry().with(build_filter(&config.level));

    let result = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Plain => registry.with(fmt::layer().with_target(true)).try_init(),
    };

    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {}", e);
    }
}
