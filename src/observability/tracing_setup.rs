/// Tracing and structured logging configuration
use std::str::FromStr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable format for development
    Human,
    /// JSON format for log aggregation
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            _ => Ok(OutputFormat::Human), // unknown values fall back to human
        }
    }
}

/// Build the filter: `RUST_LOG` wins, otherwise `s3gate=<level>`.
fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| default_level.to_string());
        EnvFilter::new(format!("s3gate={},tokio=warn", log_level))
    })
}

/// Initialize the global subscriber.
///
/// # Environment Variables
/// * `RUST_LOG` - Log level filter (e.g., "s3gate=debug")
/// * `LOG_LEVEL` - Level for the s3gate target if RUST_LOG is not set
///
/// Calling it twice is harmless; the second call leaves the first
/// subscriber in place.
///
/// ```no_run
/// use s3gate::observability::tracing_setup::{init_tracing, OutputFormat};
///
/// init_tracing(OutputFormat::Json, "info");
/// ```
pub fn init_tracing(format: OutputFormat, default_level: &str) {
    let env_filter = build_filter(default_level);

    let result = match format {
        OutputFormat::Human => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .try_init(),
        OutputFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_level(true),
            )
            .try_init(),
    };

    match result {
        Ok(()) => tracing::info!(format = ?format, "tracing initialized"),
        Err(e) => tracing::debug!(error = %e, "tracing already initialized"),
    }
}

/// Same as [`init_tracing`], with the format taken from `LOG_FORMAT`
/// ("json" or anything else for human-readable).
pub fn init_tracing_from_env(default_level: &str) {
    let format_str = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "human".to_string());
    let format = OutputFormat::from_str(&format_str).unwrap_or(OutputFormat::Human);
    init_tracing(format, default_level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parsing() {
        assert_eq!(OutputFormat::from_str("json"), Ok(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("JSON"), Ok(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("human"), Ok(OutputFormat::Human));
        assert_eq!(OutputFormat::from_str("bogus"), Ok(OutputFormat::Human));
    }

    #[test]
    fn test_double_init_does_not_panic() {
        init_tracing(OutputFormat::Human, "warn");
        init_tracing(OutputFormat::Json, "warn");
    }
}
