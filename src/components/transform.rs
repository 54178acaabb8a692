use async_trait::async_trait;
use bytes::Bytes;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

use crate::component::{Component, NodeContext};
use crate::error::ComponentError;
use crate::frame::{Frame, FrameKind};

/// Scales PCM16 samples by a linear factor, saturating at the i16 range.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GainConfig {
    pub gain: f32,
}

impl Default for GainConfig {
    fn default() -> Self {
        GainConfig { gain: 1.0 }
    }
}

pub struct Gain {
    cfg: GainConfig,
}

impl Gain {
    pub fn new(cfg: GainConfig) -> Self {
        Gain { cfg }
    }
}

#[async_trait]
impl Component for Gain {
    async fn step(
        &mut self,
        input: Option<(String, Frame)>,
        ctx: &NodeContext,
    ) -> Result<(), ComponentError> {
        let Some((_, frame)) = input else {
            return Ok(());
        };
        match frame.kind {
            FrameKind::Audio {
                pcm16,
                sample_rate,
                channels,
            } => {
                let mut scaled = Vec::with_capacity(pcm16.len());
                for pair in pcm16.chunks_exact(2) {
                    let sample = i16::from_le_bytes([pair[0], pair[1]]) as f32 * self.cfg.gain;
                    let sample = sample.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                    scaled.extend_from_slice(&sample.to_le_bytes());
                }
                ctx.publish(
                    "out",
                    Frame::audio(Bytes::from(scaled), sample_rate, channels),
                )?;
            }
            other => debug!("gain ignoring non-audio frame: {:?}", other),
        }
        Ok(())
    }
}

/// Multiplies int frames by a constant factor.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ScaleConfig {
    pub factor: i64,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        ScaleConfig { factor: 2 }
    }
}

pub struct Scale {
    cfg: ScaleConfig,
}

impl Scale {
    pub fn new(cfg: ScaleConfig) -> Self {
        Scale { cfg }
    }
}

#[async_trait]
impl Component for Scale {
    async fn step(
        &mut self,
        input: Option<(String, Frame)>,
        ctx: &NodeContext,
    ) -> Result<(), ComponentError> {
        if let Some((_, frame)) = input {
            if let FrameKind::Int(value) = frame.kind {
                ctx.publish("out", Frame::int(value * self.cfg.factor))?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CaseMode {
    Upper,
    Lower,
}

/// Re-cases text frames; mostly here to exercise enum-typed init schemas in
/// the editor.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RecaseConfig {
    pub mode: CaseMode,
}

impl Default for RecaseConfig {
    fn default() -> Self {
        RecaseConfig {
            mode: CaseMode::Upper,
        }
    }
}

pub struct Recase {
    cfg: RecaseConfig,
}

impl Recase {
    pub fn new(cfg: RecaseConfig) -> Self {
        Recase { cfg }
    }
}

#[async_trait]
impl Component for Recase {
    async fn step(
        &mut self,
        input: Option<(String, Frame)>,
        ctx: &NodeContext,
    ) -> Result<(), ComponentError> {
        if let Some((_, frame)) = input {
            if let FrameKind::Text(text) = frame.kind {
                let recased = match self.cfg.mode {
                    CaseMode::Upper => text.to_uppercase(),
                    CaseMode::Lower => text.to_lowercase(),
                };
                ctx.publish("out", Frame::text(recased))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scale_multiplies() {
        let (ctx, channel) = crate::test_support::source_context("scale");
        let mut sub = channel.subscribe("probe").unwrap();
        let mut scale = Scale::new(ScaleConfig { factor: 3 });
        scale
            .step(Some(("in".into(), Frame::int(7))), &ctx)
            .await
            .unwrap();
        let frame = sub.recv().await.unwrap();
        assert!(matches!(frame.kind, FrameKind::Int(21)));
    }

    #[tokio::test]
    async fn test_gain_doubles_samples() {
        let (ctx, channel) = crate::test_support::source_context("gain");
        let mut sub = channel.subscribe("probe").unwrap();
        let mut gain = Gain::new(GainConfig { gain: 2.0 });
        let pcm = Bytes::from(100i16.to_le_bytes().to_vec());
        gain.step(Some(("in".into(), Frame::audio(pcm, 48_000, 1))), &ctx)
            .await
            .unwrap();
        let frame = sub.recv().await.unwrap();
        let FrameKind::Audio { pcm16, .. } = frame.kind else {
            panic!("expected audio");
        };
        assert_eq!(i16::from_le_bytes([pcm16[0], pcm16[1]]), 200);
    }

    #[tokio::test]
    async fn test_gain_saturates() {
        let (ctx, channel) = crate::test_support::source_context("gain");
        let mut sub = channel.subscribe("probe").unwrap();
        let mut gain = Gain::new(GainConfig { gain: 100.0 });
        let pcm = Bytes::from(20_000i16.to_le_bytes().to_vec());
        gain.step(Some(("in".into(), Frame::audio(pcm, 48_000, 1))), &ctx)
            .await
            .unwrap();
        let frame = sub.recv().await.unwrap();
        let FrameKind::Audio { pcm16, .. } = frame.kind else {
            panic!("expected audio");
        };
        assert_eq!(i16::from_le_bytes([pcm16[0], pcm16[1]]), i16::MAX);
    }

    #[tokio::test]
    async fn test_recase_lower() {
        let (ctx, channel) = crate::test_support::source_context("recase");
        let mut sub = channel.subscribe("probe").unwrap();
        let mut recase = Recase::new(RecaseConfig {
            mode: CaseMode::Lower,
        });
        recase
            .step(Some(("in".into(), Frame::text("MiXeD"))), &ctx)
            .await
            .unwrap();
        let frame = sub.recv().await.unwrap();
        assert!(matches!(frame.kind, FrameKind::Text(t) if t == "mixed"));
    }
}
