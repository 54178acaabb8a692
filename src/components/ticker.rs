use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::component::{Component, NodeContext};
use crate::error::ComponentError;
use crate::frame::Frame;

/// Counter source: emits `start, start+1, …` as int frames on a fixed
/// interval. Useful for wiring tests and load probes.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TickerConfig {
    pub interval_ms: u64,
    pub start: i64,
}

impl Default for TickerConfig {
    fn default() -> Self {
        TickerConfig {
            interval_ms: 100,
            start: 1,
        }
    }
}

pub struct Ticker {
    cfg: TickerConfig,
    next: i64,
}

impl Ticker {
    pub fn new(cfg: TickerConfig) -> Self {
        let next = cfg.start;
        Ticker { cfg, next }
    }
}

#[async_trait]
impl Component for Ticker {
    async fn step(
        &mut self,
        _input: Option<(String, Frame)>,
        ctx: &NodeContext,
    ) -> Result<(), ComponentError> {
        tokio::time::sleep(Duration::from_millis(self.cfg.interval_ms)).await;
        let value = self.next;
        self.next += 1;
        ctx.publish("out", Frame::int(value))?;
        Ok(())
    }
}
