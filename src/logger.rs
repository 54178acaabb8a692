use std::path::PathBuf;

use anyhow::Result;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Wire up `tracing`: pretty stdout always, plus a daily-rolling plain-text
/// file when `log_dir` is set. `log_level` is an `EnvFilter` directive
/// (e.g. `"info"` or `"patchbay=debug,axum=warn"`).
pub fn init_tracing(log_level: &str, log_dir: Option<PathBuf>) -> Result<()> {
    let stdout_layer = fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(log_level));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "patchbay.log");
            let file_layer = fmt::layer()
                .with_writer(appender)
                .with_ansi(false)
                .with_filter(EnvFilter::new(log_level));
            Registry::default()
                .with(stdout_layer)
                .with(file_layer)
                .init();
        }
        None => {
            Registry::default().with(stdout_layer).init();
        }
    }

    Ok(())
}
