use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with stdout and, when `log_dir` is given, a daily rolling file.
/// Format: human-readable logfmt OR JSON if desired. Level comes from `RUST_LOG`
/// (default `info`).
///
/// The returned guard flushes the file writer on drop; hold it for the life of the process.
pub fn init_logging(log_dir: Option<&Path>, json_format: bool) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Console layer (stdout for dev visibility)
    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_level(true);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            // Log file = {dir}/kms.log.{date}
            let file_appender = rolling::daily(dir, "kms.log");
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

            let layer = if json_format {
                fmt::layer()
                    .json()
                    .with_writer(non_blocking_file)
                    .with_current_span(false)
                    .with_span_list(false)
                    .with_level(true)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(non_blocking_file)
                    .with_ansi(false)
                    .with_target(true)
                    .with_level(true)
                    .boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // try_init: a second call (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();

    guard
}
