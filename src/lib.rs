//! Patchbay: a typed, live-reconfigurable dataflow runtime for real-time
//! media pipelines.
//!
//! A graph of [`component::Component`] instances is edited over HTTP, driven
//! by the [`runtime::Runtime`] as one cooperative task per node, and wired
//! through [`channel::Channel`]s — bounded per-subscriber broadcast buffers
//! that shed oldest-first under pressure. The [`metrics::MetricsCollector`]
//! samples everything twice a second for the dashboard.

pub mod api;
pub mod channel;
pub mod component;
pub mod components;
pub mod config;
pub mod error;
pub mod frame;
pub mod graph;
pub mod logger;
pub mod metrics;
pub mod runtime;
pub mod schema;

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::sync::Arc;

    use crate::channel::Channel;
    use crate::component::{NodeContext, VideoHub};
    use crate::frame::{Frame, FrameInspector};

    /// A context with a single `out` channel, for exercising components
    /// outside the runtime.
    pub fn source_context(node_id: &str) -> (NodeContext, Arc<Channel<Frame>>) {
        let channel = Arc::new(Channel::new(format!("{node_id}.out"), 64));
        let mut outputs = HashMap::new();
        outputs.insert("out".to_string(), channel.clone());
        let ctx = NodeContext::new(
            node_id,
            outputs,
            VideoHub::new(),
            FrameInspector::new(32),
        );
        (ctx, channel)
    }
}
