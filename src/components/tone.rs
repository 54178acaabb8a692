use std::f32::consts::TAU;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::component::{Component, NodeContext};
use crate::error::ComponentError;
use crate::frame::Frame;

/// Sine test source: emits PCM16 audio frames at a fixed cadence. Stands in
/// for a capture device when exercising a pipeline without hardware.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ToneConfig {
    pub frequency_hz: f32,
    pub sample_rate: u32,
    /// Peak amplitude in 0..=1.
    pub amplitude: f32,
    /// Duration of each emitted frame.
    pub frame_ms: u64,
    pub envelope: Option<Envelope>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Envelope {
    /// Linear fade-in applied to the first `attack_ms` of output.
    pub attack_ms: u64,
}

impl Default for ToneConfig {
    fn default() -> Self {
        ToneConfig {
            frequency_hz: 440.0,
            sample_rate: 48_000,
            amplitude: 0.5,
            frame_ms: 20,
            envelope: None,
        }
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Envelope { attack_ms: 0 }
    }
}

pub struct Tone {
    cfg: ToneConfig,
    phase: f32,
    emitted_samples: u64,
}

impl Tone {
    pub fn new(cfg: ToneConfig) -> Self {
        Tone {
            cfg,
            phase: 0.0,
            emitted_samples: 0,
        }
    }

    fn synth_frame(&mut self) -> Bytes {
        let samples = (self.cfg.sample_rate as u64 * self.cfg.frame_ms / 1000).max(1) as usize;
        let attack_ms = self.cfg.envelope.as_ref().map(|e| e.attack_ms).unwrap_or(0);
        let attack_samples = self.cfg.sample_rate as u64 * attack_ms / 1000;
        let step = TAU * self.cfg.frequency_hz / self.cfg.sample_rate as f32;
        let mut pcm = Vec::with_capacity(samples * 2);
        for _ in 0..samples {
            let mut amplitude = self.cfg.amplitude;
            if self.emitted_samples < attack_samples {
                amplitude *= self.emitted_samples as f32 / attack_samples as f32;
            }
            let sample = (self.phase.sin() * amplitude * i16::MAX as f32) as i16;
            pcm.extend_from_slice(&sample.to_le_bytes());
            self.phase = (self.phase + step) % TAU;
            self.emitted_samples += 1;
        }
        Bytes::from(pcm)
    }
}

#[async_trait]
impl Component for Tone {
    async fn step(
        &mut self,
        _input: Option<(String, Frame)>,
        ctx: &NodeContext,
    ) -> Result<(), ComponentError> {
        tokio::time::sleep(Duration::from_millis(self.cfg.frame_ms)).await;
        let pcm = self.synth_frame();
        ctx.publish(
            "out",
            Frame::audio(pcm, self.cfg.sample_rate, 1),
        )?;
        Ok(())
    }
}
