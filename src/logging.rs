use std::env;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_FILTER: &str = "warn";

fn filter_from(raw: Option<String>) -> EnvFilter {
    raw.as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Structured logs go to stderr so stdout stays reserved for reports.
/// `MDIMG_LOG` takes an `EnvFilter` directive (`info`, `mdimg=debug`, ...).
pub fn init() {
    let filter_layer = filter_from(env::var("MDIMG_LOG").ok());
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time()
                .with_ansi(false),
        )
        .with(filter_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_or_empty_directive_falls_back_to_warn() {
        assert_eq!(filter_from(None).to_string(), "warn");
        assert_eq!(filter_from(Some("  ".to_string())).to_string(), "warn");
        assert_eq!(filter_from(Some("debug".to_string())).to_string(), "debug");
    }
}
