/*!
tracing subscriber setup
*/

use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::daemon::config::LoggingConfig;

/// Install the global subscriber. `level_override` wins over `RUST_LOG`, which
/// wins over the config. Keep the returned guard alive to flush the log file.
pub fn init(config: &LoggingConfig, level_override: Option<&str>) -> io::Result<Option<WorkerGuard>> {
    let filter = match level_override {
        Some(level) => EnvFilter::try_new(level),
        None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level)),
    }
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid log level: {e}")))?;

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(std::path::Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "logging.file has no file name"))?;
            std::fs::create_dir_all(dir)?;

            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = fmt::layer()
                .with_ansi(false)
                .with_thread_names(true)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_thread_names(true))
        .with(file_layer)
        .try_init()
        .map_err(|e| io::Error::other(format!("logger init failed: {e}")))?;

    Ok(guard)
}
