pub mod ticker;
pub mod tone;
pub mod transform;
pub mod visual;
pub mod wav;

pub use ticker::Ticker;
pub use tone::Tone;
pub use transform::{Gain, Recase, Scale};
pub use visual::Visual;
pub use wav::WavWriter;

use crate::component::{ComponentKind, ComponentRegistry};

/// The component palette every binary starts from. Hardware-backed media
/// endpoints (microphone, speaker, camera, ASR/TTS services) register through
/// the same call from their own crates.
pub fn register_builtins(registry: &mut ComponentRegistry) {
    registry.register::<tone::ToneConfig, _>(
        "tone",
        ComponentKind::Source,
        &[],
        &[("out", "audio")],
        |cfg| Box::new(Tone::new(cfg)),
    );
    registry.register::<ticker::TickerConfig, _>(
        "ticker",
        ComponentKind::Source,
        &[],
        &[("out", "int")],
        |cfg| Box::new(Ticker::new(cfg)),
    );
    registry.register::<transform::GainConfig, _>(
        "gain",
        ComponentKind::Conduit,
        &[("in", "audio")],
        &[("out", "audio")],
        |cfg| Box::new(Gain::new(cfg)),
    );
    registry.register::<transform::ScaleConfig, _>(
        "scale",
        ComponentKind::Conduit,
        &[("in", "int")],
        &[("out", "int")],
        |cfg| Box::new(Scale::new(cfg)),
    );
    registry.register::<transform::RecaseConfig, _>(
        "recase",
        ComponentKind::Conduit,
        &[("in", "text")],
        &[("out", "text")],
        |cfg| Box::new(Recase::new(cfg)),
    );
    registry.register::<wav::WavWriterConfig, _>(
        "wav_writer",
        ComponentKind::Sink,
        &[("in", "audio")],
        &[],
        |cfg| Box::new(WavWriter::new(cfg)),
    );
    registry.register::<visual::VisualConfig, _>(
        "visual",
        ComponentKind::Sink,
        &[("in", "video")],
        &[],
        |cfg| Box::new(Visual::new(cfg)),
    );
}
