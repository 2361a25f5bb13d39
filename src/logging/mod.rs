// Logging setup
//
// tracing with an EnvFilter: RUST_LOG wins over the configured level. When
// a log directory is configured, a second non-blocking layer writes
// daily-rotated files alongside stdout; the returned guard must stay alive
// for the file writer to flush.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

/// Initialize tracing. Returns the file-writer guard when file logging is
/// enabled; dropping it stops log flushing, so hold it until exit.
pub fn init(config: &Config) -> Option<WorkerGuard> {
    let default_filter = format!("guardian_bridge={}", config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    match &config.log_dir {
        Some(log_dir) => {
            let appender = tracing_appender::rolling::daily(log_dir, "guardian-bridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            None
        }
    }
}
