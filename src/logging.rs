use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

/// Installs the global subscriber. Everything goes to stderr; stdout carries
/// protocol responses only.
pub fn init(config: &Config) {
    let default_level = LevelFilter::INFO;
    let filter = match config.log_filter.as_deref() {
        Some(raw) => EnvFilter::try_new(raw).unwrap_or_else(|err| {
            eprintln!(
                "invalid log filter {:?}, falling back to level '{}' - {}",
                raw, default_level, err
            );
            EnvFilter::new(default_level.to_string())
        }),
        None => EnvFilter::new(default_level.to_string()),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {}", e);
    }
}
