use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use schemars::gen::SchemaSettings;
use schemars::schema::RootSchema;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::warn;

use crate::channel::Channel;
use crate::error::{ComponentError, PipelineError};
use crate::frame::{Frame, FrameInspector};

/// Where a component sits in the flow of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Source,
    Conduit,
    Sink,
}

/// Static description of one registered component: identity, port map and the
/// schema its init arguments are validated against.
#[derive(Debug, Clone)]
pub struct ComponentDescriptor {
    pub name: String,
    pub kind: ComponentKind,
    pub init_schema: RootSchema,
    /// input slot name → element type
    pub inputs: BTreeMap<String, String>,
    /// output slot name → element type
    pub outputs: BTreeMap<String, String>,
}

impl ComponentDescriptor {
    /// Per-parameter init schemas in the shape the editor's form resolver
    /// walks: each constructor parameter becomes one schema object, with the
    /// root's named definitions attached as `$defs` wherever a `$ref` needs
    /// resolving.
    pub fn init_param_schemas(&self) -> Map<String, Value> {
        let root = serde_json::to_value(&self.init_schema).unwrap_or_default();
        let defs = root
            .get("$defs")
            .or_else(|| root.get("definitions"))
            .cloned();
        let mut params = Map::new();
        if let Some(Value::Object(properties)) = root.get("properties") {
            for (name, schema) in properties {
                let mut schema = schema.clone();
                if let (Some(defs), Value::Object(obj)) = (&defs, &mut schema) {
                    if serde_json::to_string(obj).unwrap_or_default().contains("\"$ref\"") {
                        obj.insert("$defs".to_string(), defs.clone());
                    }
                }
                params.insert(name.clone(), schema);
            }
        }
        params
    }
}

/// Handed to a component while its node runs: identity, output channels, and
/// the shared taps (frame inspector, video hub).
pub struct NodeContext {
    node_id: String,
    outputs: HashMap<String, Arc<Channel<Frame>>>,
    video: VideoHub,
    inspector: FrameInspector,
}

impl NodeContext {
    pub fn new(
        node_id: impl Into<String>,
        outputs: HashMap<String, Arc<Channel<Frame>>>,
        video: VideoHub,
        inspector: FrameInspector,
    ) -> Self {
        NodeContext {
            node_id: node_id.into(),
            outputs,
            video,
            inspector,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Publish one frame on a declared output slot. Never blocks: slow
    /// subscribers shed oldest-first on their own buffers.
    pub fn publish(&self, slot: &str, frame: Frame) -> Result<(), ComponentError> {
        let channel = self.outputs.get(slot).ok_or_else(|| {
            ComponentError::failed(format!("{} has no output slot {slot}", self.node_id))
        })?;
        self.inspector.record(&self.node_id, slot, &frame);
        channel.publish(frame);
        Ok(())
    }

    pub fn video(&self) -> &VideoHub {
        &self.video
    }

    pub(crate) fn close_outputs(&self) {
        for channel in self.outputs.values() {
            channel.close();
        }
    }
}

/// A running node's work surface. `step` is called once per available input
/// item (sources: in a tight produce loop with `input == None`) until the
/// runtime cancels the task.
#[async_trait]
pub trait Component: Send {
    /// One-time setup before the node is considered `running`.
    async fn start(&mut self, _ctx: &NodeContext) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Process one item. For nodes with inputs, `input` carries the slot that
    /// produced and its frame; for sources it is `None`.
    async fn step(
        &mut self,
        input: Option<(String, Frame)>,
        ctx: &NodeContext,
    ) -> Result<(), ComponentError>;

    /// Teardown; runs on every exit path (stop, cancellation, error).
    async fn stop(&mut self, _ctx: &NodeContext) {}
}

/// Fan-out of JPEG frames from visual sinks to `/video/ws/{node_id}` clients.
#[derive(Clone)]
pub struct VideoHub {
    senders: Arc<DashMap<String, broadcast::Sender<Bytes>>>,
}

impl VideoHub {
    pub fn new() -> Self {
        VideoHub {
            senders: Arc::new(DashMap::new()),
        }
    }

    pub fn register(&self, node_id: &str) {
        let (tx, _) = broadcast::channel(8);
        self.senders.insert(node_id.to_string(), tx);
    }

    pub fn unregister(&self, node_id: &str) {
        self.senders.remove(node_id);
    }

    pub fn publish(&self, node_id: &str, jpeg: Bytes) {
        if let Some(tx) = self.senders.get(node_id) {
            // Nobody watching is fine.
            let _ = tx.send(jpeg);
        }
    }

    pub fn subscribe(&self, node_id: &str) -> Option<broadcast::Receiver<Bytes>> {
        self.senders.get(node_id).map(|tx| tx.subscribe())
    }
}

impl Default for VideoHub {
    fn default() -> Self {
        Self::new()
    }
}

type BuildFn = Box<dyn Fn(Value) -> Result<Box<dyn Component>, PipelineError> + Send + Sync>;
type CheckFn = Box<dyn Fn(&Value) -> Result<(), PipelineError> + Send + Sync>;

struct Registration {
    descriptor: ComponentDescriptor,
    check: CheckFn,
    build: BuildFn,
}

/// Explicit table of everything the process can instantiate. Components are
/// registered with a typed config struct; its `JsonSchema` derive is what the
/// editor renders as a form.
pub struct ComponentRegistry {
    entries: BTreeMap<String, Registration>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        ComponentRegistry {
            entries: BTreeMap::new(),
        }
    }

    /// The registry every binary starts from: all built-in components.
    pub fn with_builtins() -> Self {
        let mut registry = ComponentRegistry::new();
        crate::components::register_builtins(&mut registry);
        registry
    }

    /// Register a component under `name`. `Cfg` is parsed from the node's
    /// init arguments and passed to `build`; construction must stay free of
    /// side effects (resource acquisition belongs in `Component::start`).
    pub fn register<Cfg, F>(
        &mut self,
        name: &str,
        kind: ComponentKind,
        inputs: &[(&str, &str)],
        outputs: &[(&str, &str)],
        build: F,
    ) where
        Cfg: DeserializeOwned + JsonSchema + 'static,
        F: Fn(Cfg) -> Box<dyn Component> + Send + Sync + 'static,
    {
        match kind {
            ComponentKind::Source => assert!(inputs.is_empty(), "source {name} declares inputs"),
            ComponentKind::Sink => assert!(outputs.is_empty(), "sink {name} declares outputs"),
            ComponentKind::Conduit => {}
        }
        let to_map = |slots: &[(&str, &str)]| {
            let map: BTreeMap<String, String> = slots
                .iter()
                .map(|(slot, ty)| (slot.to_string(), ty.to_string()))
                .collect();
            assert_eq!(map.len(), slots.len(), "duplicate slot name on {name}");
            map
        };
        let init_schema = SchemaSettings::draft2019_09()
            .into_generator()
            .into_root_schema_for::<Cfg>();
        let descriptor = ComponentDescriptor {
            name: name.to_string(),
            kind,
            init_schema,
            inputs: to_map(inputs),
            outputs: to_map(outputs),
        };
        let component = name.to_string();
        let check_component = component.clone();
        let registration = Registration {
            descriptor,
            check: Box::new(move |args: &Value| {
                serde_json::from_value::<Cfg>(args.clone())
                    .map(|_| ())
                    .map_err(|e| PipelineError::InvalidArgs {
                        component: check_component.clone(),
                        detail: e.to_string(),
                    })
            }),
            build: Box::new(move |args: Value| {
                let cfg = serde_json::from_value::<Cfg>(args).map_err(|e| {
                    PipelineError::InvalidArgs {
                        component: component.clone(),
                        detail: e.to_string(),
                    }
                })?;
                Ok(build(cfg))
            }),
        };
        if self.entries.insert(name.to_string(), registration).is_some() {
            warn!("component `{}` registered twice, keeping the newer one", name);
        }
    }

    /// All descriptors, category then name.
    pub fn list(&self) -> Vec<&ComponentDescriptor> {
        let mut all: Vec<&ComponentDescriptor> =
            self.entries.values().map(|r| &r.descriptor).collect();
        all.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
        all
    }

    pub fn descriptor(&self, name: &str) -> Option<&ComponentDescriptor> {
        self.entries.get(name).map(|r| &r.descriptor)
    }

    /// Validate init arguments without constructing anything.
    pub fn validate_args(&self, name: &str, args: &Value) -> Result<(), PipelineError> {
        let registration = self
            .entries
            .get(name)
            .ok_or_else(|| PipelineError::ComponentNotFound(name.to_string()))?;
        (registration.check)(&normalize_args(args))
    }

    pub fn instantiate(&self, name: &str, args: &Value) -> Result<Box<dyn Component>, PipelineError> {
        let registration = self
            .entries
            .get(name)
            .ok_or_else(|| PipelineError::ComponentNotFound(name.to_string()))?;
        (registration.build)(normalize_args(args))
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Absent init arguments mean "all defaults".
fn normalize_args(args: &Value) -> Value {
    match args {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    }
}
