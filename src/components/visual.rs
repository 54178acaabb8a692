use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::component::{Component, NodeContext};
use crate::error::ComponentError;
use crate::frame::{Frame, FrameKind};

/// Terminal for video branches: forwards every JPEG frame to the runtime's
/// video hub, where `/video/ws/{node_id}` clients pick them up.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(default)]
pub struct VisualConfig {}

pub struct Visual {
    _cfg: VisualConfig,
}

impl Visual {
    pub fn new(cfg: VisualConfig) -> Self {
        Visual { _cfg: cfg }
    }
}

#[async_trait]
impl Component for Visual {
    async fn start(&mut self, ctx: &NodeContext) -> Result<(), ComponentError> {
        ctx.video().register(ctx.node_id());
        Ok(())
    }

    async fn step(
        &mut self,
        input: Option<(String, Frame)>,
        ctx: &NodeContext,
    ) -> Result<(), ComponentError> {
        if let Some((_, frame)) = input {
            if let FrameKind::Video { jpeg } = frame.kind {
                ctx.video().publish(ctx.node_id(), jpeg);
            }
        }
        Ok(())
    }

    async fn stop(&mut self, ctx: &NodeContext) {
        ctx.video().unregister(ctx.node_id());
    }
}
