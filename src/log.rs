//! Logging functionality.
//! The logging library of choice is [tracing].

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    filter::Targets, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer,
};

/// The name of this crate, used to set filter target.
const THIS_CRATE: &str = env!("CARGO_CRATE_NAME");

/// Setup format layers, tracing subscribers, and installs tracing.
pub(super) fn install_tracing() {
    // Uses local time.
    let timer = fmt::time::ChronoLocal::rfc_3339();

    // Set which traces are tracked.
    // By default, all INFO traces and above are shown.
    let target = if console_debug() {
        Targets::new()
            .with_default(LevelFilter::INFO)
            .with_target(THIS_CRATE, LevelFilter::DEBUG)
    } else {
        Targets::new().with_default(LevelFilter::INFO)
    };

    let console_layer = fmt::layer()
        .with_ansi(true)
        .with_level(true)
        .with_target(true)
        .with_timer(timer)
        .pretty();

    tracing_subscriber::registry()
        .with(console_layer.with_filter(target))
        .init();
}

/// Is debug mode enabled for console logs.
/// Read straight from the environment since tracing installs before [Config](crate::config::Config) loads.
fn console_debug() -> bool {
    std::env::var("CONSOLE_DEBUG")
        .map(|v| matches!(v.as_str(), "1" | "true"))
        .unwrap_or(false)
}
