//! Structured logging: console output plus an optional rolling file appender,
//! driven by the `logging` section of the config.

use tracing_subscriber::{fmt::time::UtcTime, layer::Identity, prelude::*};

use crate::config::{LogFormat, LoggingConfig};

/// Initialize the global subscriber. A configured level wins over `RUST_LOG`;
/// the fallback is `info`. Safe to call more than once (later calls no-op).
pub fn init(cfg: &LoggingConfig) {
    let env_filter = match cfg.level {
        Some(level) => tracing_subscriber::EnvFilter::new(level.as_str()),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };

    let file_writer = file_writer(cfg);

    match cfg.format {
        LogFormat::Json => {
            let registry = tracing_subscriber::registry().with(env_filter).with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(std::io::stdout),
            );
            match file_writer {
                Some(writer) => {
                    let _ = registry
                        .with(
                            tracing_subscriber::fmt::layer()
                                .json()
                                .with_ansi(false)
                                .with_timer(UtcTime::rfc_3339())
                                .with_writer(writer),
                        )
                        .try_init();
                }
                None => {
                    let _ = registry.with(Identity::new()).try_init();
                }
            }
        }
        LogFormat::Text => {
            let registry = tracing_subscriber::registry().with(env_filter).with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(true)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(std::io::stdout),
            );
            match file_writer {
                Some(writer) => {
                    let _ = registry
                        .with(
                            tracing_subscriber::fmt::layer()
                                .with_ansi(false)
                                .with_timer(UtcTime::rfc_3339())
                                .with_writer(writer),
                        )
                        .try_init();
                }
                None => {
                    let _ = registry.with(Identity::new()).try_init();
                }
            }
        }
    }
}

fn file_writer(cfg: &LoggingConfig) -> Option<tracing_appender::non_blocking::NonBlocking> {
    if !cfg.enable_file_logging {
        return None;
    }

    let rotation = match cfg.rotation.to_lowercase().as_str() {
        "hourly" => tracing_appender::rolling::Rotation::HOURLY,
        "never" => tracing_appender::rolling::Rotation::NEVER,
        _ => tracing_appender::rolling::Rotation::DAILY,
    };

    if std::fs::create_dir_all(&cfg.dir).is_err() {
        eprintln!(
            "Failed to create log directory '{}', continuing with stdout logs",
            cfg.dir
        );
        return None;
    }

    let appender =
        tracing_appender::rolling::RollingFileAppender::new(rotation, &cfg.dir, &cfg.filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    // The guard must outlive the process for buffered lines to flush.
    let _leaked: &'static _ = Box::leak(Box::new(guard));

    Some(non_blocking)
}
