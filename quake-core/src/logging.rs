use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// File name of the log written under `LoggingConfig::dir`.
pub const LOG_FILE_NAME: &str = "quake-export.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize console logging and, when `config.file` is set, a plain-text copy in
/// `<dir>/quake-export.log`. `RUST_LOG` overrides the configured level.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging(config: &LoggingConfig) {
    let console = fmt::layer().with_target(false);

    let file = config.file.then_some(&config.dir).and_then(|dir| {
        if let Err(err) = std::fs::create_dir_all(dir) {
            eprintln!("failed to create log directory {}: {err}", dir.display());
            return None;
        }
        let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        Some(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(non_blocking),
        )
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(console)
        .with(file)
        .try_init();
}
