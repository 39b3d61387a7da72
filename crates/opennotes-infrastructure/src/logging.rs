//! Logging bootstrap.

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Environment;

/// Initialize the global tracing subscriber.
///
/// JSON output in production, human-readable elsewhere. The filter honors
/// `RUST_LOG`, defaulting to `info` with quieter dependency crates.
pub fn init(environment: Environment) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=warn,h2=warn"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if environment.is_production() {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };

    // Already-initialized is fine (tests initialize repeatedly).
    if result.is_ok() {
        info!(environment = environment.as_str(), "Logging initialized");
    }
}
