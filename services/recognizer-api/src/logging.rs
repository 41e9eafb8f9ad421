//!
//! src/logging.rs
//!
//! Initializes the tracing subscriber so every request and provider call
//! leaves a structured event on stdout
//!

use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use tracing_error::ErrorLayer;
use tracing_appender::non_blocking;

use crate::config::{LogFormat, LoggingConfig};

/// Keeps the non-blocking writer flushing until dropped at exit
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard
}

pub fn init_logging(cfg: &LoggingConfig) ->
    Result<LoggingGuard, crate::errors::AppError> {

    let (writer, guard) = non_blocking(std::io::stdout());
    let filter = std::env::var("RUST_LOG")
        .ok()
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::new(cfg.filter_directives.clone()));

    // exactly one of the two layers is Some
    let json_layer = (cfg.format == LogFormat::Json).then(|| {
        fmt::layer()
            .with_writer(writer.clone())
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_target(cfg.include_target)
            .with_file(cfg.include_file_line)
            .with_line_number(cfg.include_file_line)
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
    });

    let pretty_layer = (cfg.format == LogFormat::Pretty).then(|| {
        fmt::layer()
            .with_writer(writer.clone())
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_ansi(cfg.with_ansi)
            .with_target(cfg.include_target)
            .with_file(cfg.include_file_line)
            .with_line_number(cfg.include_file_line)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(pretty_layer)
        .with(ErrorLayer::default())
        .try_init()
        .map_err(|e| crate::errors::AppError::Config(format!("logger init: {e}")))?;

    Ok( LoggingGuard { _guard: guard } )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;

    #[test]
    fn second_init_is_a_config_error() {
        let cfg = LoggingConfig { format: LogFormat::Pretty, ..LoggingConfig::default() };
        let _guard = init_logging(&cfg).ok();

        let again = init_logging(&cfg);
        assert!(matches!(again, Err(AppError::Config(_))));
    }
}
