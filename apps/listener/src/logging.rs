//! Console and rolling-file tracing for the daemon

use std::path::Path;

use hassbridge_core::branding;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Used when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info,hassbridge=debug,hassbridge_core=debug,hassbridge_storage=debug,\
hassbridge_auth=debug,hassbridge_hub=debug,hassbridge_pipeline=debug,hassbridge_listener=debug";

/// Install the global subscriber: compact console output plus a daily file
/// (`hassbridge.YYYY-MM-DD.log`) in `log_dir`.
///
/// Hold the returned guard until exit so buffered file lines are flushed.
/// `None` means the directory was unusable and only the console is logged to.
pub fn init_tracing(log_dir: &Path) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_layer, guard) = match daily_appender(log_dir) {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);
            (Some(layer), Some(guard))
        }
        Err(e) => {
            eprintln!("Warning: file logging disabled ({}): {}", log_dir.display(), e);
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_target(true))
        .with(file_layer)
        .init();
    guard
}

fn daily_appender(log_dir: &Path) -> anyhow::Result<RollingFileAppender> {
    std::fs::create_dir_all(log_dir)?;
    Ok(RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(branding::LOG_PREFIX)
        .filename_suffix("log")
        .build(log_dir)?)
}
