use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::runtime::RuntimeOptions;

/// Process configuration, resolved from the environment (a `.env` in the
/// working directory is honoured). Every knob has a default so `patchbay run`
/// works out of the box.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Control-surface bind address. `PATCHBAY_ADDR`
    pub bind_addr: SocketAddr,
    /// Metrics sample cadence. `PATCHBAY_METRICS_INTERVAL_MS`
    pub metrics_interval: Duration,
    /// Per-subscriber channel buffer bound. `PATCHBAY_CHANNEL_CAPACITY`
    pub channel_capacity: usize,
    /// Frame-inspector ring size. `PATCHBAY_INSPECTOR_CAPACITY`
    pub inspector_capacity: usize,
    /// Log directory; unset logs to stdout only. `PATCHBAY_LOG_DIR`
    pub log_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            bind_addr: "0.0.0.0:8000".parse().expect("static addr"),
            metrics_interval: Duration::from_millis(500),
            channel_capacity: crate::channel::DEFAULT_CAPACITY,
            inspector_capacity: 100,
            log_dir: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = RuntimeConfig::default();
        RuntimeConfig {
            bind_addr: parse_var("PATCHBAY_ADDR", defaults.bind_addr),
            metrics_interval: Duration::from_millis(parse_var(
                "PATCHBAY_METRICS_INTERVAL_MS",
                defaults.metrics_interval.as_millis() as u64,
            )),
            channel_capacity: parse_var("PATCHBAY_CHANNEL_CAPACITY", defaults.channel_capacity),
            inspector_capacity: parse_var(
                "PATCHBAY_INSPECTOR_CAPACITY",
                defaults.inspector_capacity,
            ),
            log_dir: env::var("PATCHBAY_LOG_DIR").ok().map(PathBuf::from),
        }
    }

    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            channel_capacity: self.channel_capacity,
            inspector_capacity: self.inspector_capacity,
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("ignoring unparseable {key}={raw}");
                default
            }
        },
        Err(_) => default,
    }
}
