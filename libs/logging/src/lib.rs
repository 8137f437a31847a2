#![cfg_attr(test, allow(clippy::unwrap_used))]

mod ansi;
mod err_with_sources;
mod format;

use anyhow::{Context, Result};
use tracing::{Subscriber, subscriber::DefaultGuard};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter::ParseError, fmt, layer::SubscriberExt as _,
    util::SubscriberInitExt,
};

pub use ansi::stderr_supports_ansi;
pub use err_with_sources::{ErrorWithSources, err_with_src};
pub use format::Format;

/// Registers a global subscriber that logs to stderr.
///
/// With `json`, every event is written as a single JSON object per line.
pub fn setup_global_subscriber(directives: &str, json: bool) -> Result<()> {
    let filter = try_filter(directives).context("Failed to parse directives")?;
    let ansi = stderr_supports_ansi();

    let layer = match json {
        true => fmt::layer()
            .json()
            .flatten_event(true)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        false => fmt::layer()
            .with_ansi(ansi)
            .event_format(Format::new())
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
    };

    init(Registry::default().with(layer))?;

    Ok(())
}

pub fn init(subscriber: impl Subscriber + Send + Sync + 'static) -> Result<()> {
    tracing::subscriber::set_global_default(subscriber).context("Could not set global default")?;
    LogTracer::init().context("Failed to init LogTracer")?;

    Ok(())
}

/// Constructs an [`EnvFilter`] from `directives`, defaulting to `info` if empty.
pub fn try_filter(directives: &str) -> Result<EnvFilter, ParseError> {
    if directives.trim().is_empty() {
        return EnvFilter::try_new("info");
    }

    EnvFilter::try_new(directives)
}

/// Initialises a logger to be used in tests.
pub fn test(directives: &str) -> DefaultGuard {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(directives)
        .set_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_directives_default_to_info() {
        let filter = try_filter("  ").unwrap();

        assert_eq!(
            filter.max_level_hint(),
            Some(tracing_subscriber::filter::LevelFilter::INFO)
        );
    }

    #[test]
    fn invalid_directives_are_rejected() {
        assert!(try_filter("tcp_demux=loud").is_err());
    }
}
