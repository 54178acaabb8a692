use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::channel::ByteSized;

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

fn next_frame_id() -> u64 {
    NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed)
}

fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(0)
}

/// One item flowing through the pipeline.
///
/// The graph layer types slots with element-type *strings*; at runtime every
/// channel carries `Frame` and the string names one of these variants. `pts`
/// is the presentation timestamp in nanoseconds, `id` is process-unique.
#[derive(Debug, Clone)]
pub struct Frame {
    pub pts: i64,
    pub id: u64,
    pub kind: FrameKind,
}

#[derive(Debug, Clone)]
pub enum FrameKind {
    Audio {
        pcm16: Bytes,
        sample_rate: u32,
        channels: u16,
    },
    Video {
        jpeg: Bytes,
    },
    Text(String),
    Int(i64),
    /// Barge-in signal: downstream speech producers should flush.
    Interrupt,
}

impl Frame {
    pub fn new(kind: FrameKind) -> Self {
        Frame {
            pts: now_ns(),
            id: next_frame_id(),
            kind,
        }
    }

    pub fn audio(pcm16: Bytes, sample_rate: u32, channels: u16) -> Self {
        Frame::new(FrameKind::Audio {
            pcm16,
            sample_rate,
            channels,
        })
    }

    pub fn video(jpeg: Bytes) -> Self {
        Frame::new(FrameKind::Video { jpeg })
    }

    pub fn text(text: impl Into<String>) -> Self {
        Frame::new(FrameKind::Text(text.into()))
    }

    pub fn int(value: i64) -> Self {
        Frame::new(FrameKind::Int(value))
    }

    pub fn interrupt() -> Self {
        Frame::new(FrameKind::Interrupt)
    }

    /// The element-type string slots declare and edges are checked against.
    pub fn element_type(&self) -> &'static str {
        match &self.kind {
            FrameKind::Audio { .. } => "audio",
            FrameKind::Video { .. } => "video",
            FrameKind::Text(_) => "text",
            FrameKind::Int(_) => "int",
            FrameKind::Interrupt => "interrupt",
        }
    }

    /// Short human rendering for the frame inspector. Payload bytes are
    /// elided to their lengths.
    pub fn summary(&self) -> String {
        match &self.kind {
            FrameKind::Audio {
                pcm16,
                sample_rate,
                channels,
            } => format!(
                "audio {} bytes @ {} Hz x{}",
                pcm16.len(),
                sample_rate,
                channels
            ),
            FrameKind::Video { jpeg } => format!("jpeg {} bytes", jpeg.len()),
            FrameKind::Text(text) => {
                if text.chars().count() > 80 {
                    format!("text: {}…", text.chars().take(80).collect::<String>())
                } else {
                    format!("text: {text}")
                }
            }
            FrameKind::Int(v) => format!("int: {v}"),
            FrameKind::Interrupt => "interrupt".to_string(),
        }
    }

    pub fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            id: self.id,
            frame_type: self.element_type().to_string(),
            pts: self.pts,
            size_bytes: self.size_bytes(),
            message: self.summary(),
        }
    }
}

impl ByteSized for Frame {
    fn size_bytes(&self) -> usize {
        match &self.kind {
            FrameKind::Audio { pcm16, .. } => pcm16.len(),
            FrameKind::Video { jpeg } => jpeg.len(),
            FrameKind::Text(text) => text.len(),
            FrameKind::Int(_) => std::mem::size_of::<i64>(),
            FrameKind::Interrupt => 0,
        }
    }
}

/// Wire form of a frame on the `/frames` inspector stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSnapshot {
    pub id: u64,
    pub frame_type: String,
    pub pts: i64,
    pub size_bytes: usize,
    pub message: String,
}

/// One inspector entry: which node published what, where.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectorRecord {
    pub node: String,
    pub slot: String,
    #[serde(flatten)]
    pub frame: FrameSnapshot,
}

/// Ring buffer of the most recent frames published anywhere in the pipeline,
/// FIFO-evicted past `capacity`. Feeds the `/frames` debug stream.
#[derive(Clone)]
pub struct FrameInspector {
    inner: Arc<Mutex<VecDeque<InspectorRecord>>>,
    capacity: usize,
}

impl FrameInspector {
    pub fn new(capacity: usize) -> Self {
        FrameInspector {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, node: &str, slot: &str, frame: &Frame) {
        let mut ring = self.inner.lock().unwrap();
        if ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(InspectorRecord {
            node: node.to_string(),
            slot: slot.to_string(),
            frame: frame.snapshot(),
        });
    }

    /// Newest first, the way the inspector panel renders them.
    pub fn recent(&self) -> Vec<InspectorRecord> {
        let ring = self.inner.lock().unwrap();
        ring.iter().rev().cloned().collect()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let a = Frame::int(1);
        let b = Frame::int(2);
        assert!(b.id > a.id);
    }

    #[test]
    fn test_element_types() {
        assert_eq!(Frame::text("hi").element_type(), "text");
        assert_eq!(Frame::int(0).element_type(), "int");
        assert_eq!(
            Frame::audio(Bytes::from_static(&[0, 0]), 48_000, 1).element_type(),
            "audio"
        );
        assert_eq!(Frame::interrupt().element_type(), "interrupt");
    }

    #[test]
    fn test_size_probe() {
        assert_eq!(Frame::audio(Bytes::from(vec![0u8; 960]), 48_000, 1).size_bytes(), 960);
        assert_eq!(Frame::text("abcd").size_bytes(), 4);
        assert_eq!(Frame::interrupt().size_bytes(), 0);
    }

    #[test]
    fn test_inspector_evicts_oldest() {
        let inspector = FrameInspector::new(3);
        for v in 0..5 {
            inspector.record("ticker", "out", &Frame::int(v));
        }
        let recent = inspector.recent();
        assert_eq!(recent.len(), 3);
        // Newest first.
        assert_eq!(recent[0].frame.message, "int: 4");
        assert_eq!(recent[2].frame.message, "int: 2");
        assert_eq!(recent[0].node, "ticker");
    }

    #[test]
    fn test_snapshot_elides_payload() {
        let frame = Frame::audio(Bytes::from(vec![0u8; 1920]), 16_000, 1);
        let snap = frame.snapshot();
        assert_eq!(snap.frame_type, "audio");
        assert_eq!(snap.size_bytes, 1920);
        assert!(snap.message.contains("16000 Hz"));
    }
}
