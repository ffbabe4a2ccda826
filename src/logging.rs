use std::{path::PathBuf, sync::Once};

use tracing::{debug, metadata::LevelFilter, Level};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Name of the daily rotated log files.
pub const LOG_FILE_NAME: &str = "esc-telemetry.log";

/// Initialize tracing.
///
/// `RUST_LOG` wins over `stdout_level` when set.
/// With `file_logging`, events at or above the given level also go to a file
/// in the given directory, rotated daily.
///
/// Only the first call has an effect, so tests may call this freely.
pub fn init(stdout_level: Level, file_logging: Option<(Level, PathBuf)>) {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let stdout_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(stdout_level.to_string()));

        let file_layer = file_logging.as_ref().map(|(level, dir)| {
            tracing_subscriber::fmt::layer()
                .with_writer(RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_NAME))
                .with_ansi(false)
                .with_filter(LevelFilter::from(*level))
        });

        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(stdout_filter))
            .with(file_layer)
            .init();

        match &file_logging {
            Some((_, dir)) => debug!(?dir, "Logging to stdout and file"),
            None => debug!("Logging to stdout"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_fine() {
        init(Level::DEBUG, None);
        init(Level::TRACE, None);

        tracing::info!("Still logging");
    }
}
