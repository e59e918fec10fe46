//! provides logging helpers

use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::InitError;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;

/// Directory for rolling log files. Logs go to stderr when unset.
pub const LOG_PATH_ENV_VAR: &str = "MASSA_TEST_FRAMEWORK_LOG_PATH";

const LOG_FILE_PREFIX: &str = "massa-cluster.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Builds the formatting layer, writing either to stderr or to a daily rolling
/// file under `log_path`.
///
/// The returned guard must be held for as long as file logging is needed.
pub fn get_fmt_layer(
    log_path: Option<&Path>,
) -> Result<(BoxedLayer, Option<WorkerGuard>), InitError> {
    match log_path {
        Some(dir) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(LOG_FILE_PREFIX)
                .max_log_files(3)
                .build(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            Ok((layer, Some(guard)))
        }
        None => {
            let layer = layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .boxed();
            Ok((layer, None))
        }
    }
}

/// initiate the global tracing subscriber
///
/// The filter defaults to INFO and honours `RUST_LOG`.
pub fn init() -> Result<Option<WorkerGuard>, InitError> {
    let log_path = env::var(LOG_PATH_ENV_VAR).ok();
    let (fmt_layer, guard) = get_fmt_layer(log_path.as_deref().map(Path::new))?;

    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    registry().with(fmt_layer.with_filter(env_filter)).init();
    Ok(guard)
}
