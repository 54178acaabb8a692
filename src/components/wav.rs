use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::info;

use crate::component::{Component, NodeContext};
use crate::error::ComponentError;
use crate::frame::{Frame, FrameKind};

/// Appends incoming PCM16 audio to a RIFF/WAV file. The container is
/// finalized (header lengths patched) when the node stops.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct WavWriterConfig {
    pub path: PathBuf,
    #[serde(default = "WavWriterConfig::default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "WavWriterConfig::default_channels")]
    pub channels: u16,
}

impl WavWriterConfig {
    fn default_sample_rate() -> u32 {
        48_000
    }

    fn default_channels() -> u16 {
        1
    }
}

pub struct WavWriter {
    cfg: WavWriterConfig,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
}

impl WavWriter {
    pub fn new(cfg: WavWriterConfig) -> Self {
        WavWriter { cfg, writer: None }
    }
}

#[async_trait]
impl Component for WavWriter {
    async fn start(&mut self, ctx: &NodeContext) -> Result<(), ComponentError> {
        let spec = hound::WavSpec {
            channels: self.cfg.channels,
            sample_rate: self.cfg.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(&self.cfg.path, spec).map_err(|e| {
            ComponentError::failed(format!("failed to create WAV file: {e}"))
        })?;
        self.writer = Some(writer);
        info!(
            node = ctx.node_id(),
            path = %self.cfg.path.display(),
            "wav_writer recording"
        );
        Ok(())
    }

    async fn step(
        &mut self,
        input: Option<(String, Frame)>,
        _ctx: &NodeContext,
    ) -> Result<(), ComponentError> {
        let Some((_, frame)) = input else {
            return Ok(());
        };
        if let (FrameKind::Audio { pcm16, .. }, Some(writer)) = (frame.kind, self.writer.as_mut())
        {
            for pair in pcm16.chunks_exact(2) {
                let sample = i16::from_le_bytes([pair[0], pair[1]]);
                writer.write_sample(sample).map_err(|e| {
                    ComponentError::failed(format!("failed to write WAV samples: {e}"))
                })?;
            }
        }
        Ok(())
    }

    async fn stop(&mut self, _ctx: &NodeContext) {
        if let Some(writer) = self.writer.take() {
            let _ = writer.finalize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_writes_riff_header_and_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.wav");
        let cfg = WavWriterConfig {
            path: path.clone(),
            sample_rate: 16_000,
            channels: 1,
        };
        let (ctx, _channel) = crate::test_support::source_context("wav");
        let mut writer = WavWriter::new(cfg);
        writer.start(&ctx).await.unwrap();

        let pcm = Bytes::from(vec![0u8; 320]);
        writer
            .step(Some(("in".into(), Frame::audio(pcm, 16_000, 1))), &ctx)
            .await
            .unwrap();
        writer.stop(&ctx).await;

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, hound::SampleFormat::Int);
        // 320 bytes of PCM16 = 160 samples, all silence.
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 160);
        assert!(samples.iter().all(|s| *s == 0));
    }

    #[tokio::test]
    async fn test_samples_survive_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ramp.wav");
        let cfg = WavWriterConfig {
            path: path.clone(),
            sample_rate: 8_000,
            channels: 1,
        };
        let (ctx, _channel) = crate::test_support::source_context("wav");
        let mut writer = WavWriter::new(cfg);
        writer.start(&ctx).await.unwrap();

        let ramp: Vec<i16> = (0..64).collect();
        let mut pcm = Vec::with_capacity(ramp.len() * 2);
        for sample in &ramp {
            pcm.extend_from_slice(&sample.to_le_bytes());
        }
        writer
            .step(
                Some(("in".into(), Frame::audio(Bytes::from(pcm), 8_000, 1))),
                &ctx,
            )
            .await
            .unwrap();
        writer.stop(&ctx).await;

        let mut reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, ramp);
    }

    #[test]
    fn test_path_is_required() {
        let registry = crate::component::ComponentRegistry::with_builtins();
        let err = registry
            .validate_args("wav_writer", &serde_json::json!({}))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            crate::error::PipelineError::InvalidArgs { .. }
        ));
    }
}
