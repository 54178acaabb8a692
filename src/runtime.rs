use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Instant;

use dashmap::DashMap;
use futures::stream::{select_all, SelectAll, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::channel::{Channel, ChannelStats, Subscription};
use crate::component::{
    Component, ComponentDescriptor, ComponentRegistry, NodeContext, VideoHub,
};
use crate::error::{ComponentError, PipelineError};
use crate::frame::{Frame, FrameInspector};
use crate::graph::{Edge, GraphNode, PipelineGraph};

static PROCESS_START: OnceLock<Instant> = OnceLock::new();

/// Seconds since process start; what `started_at` is measured in.
pub fn uptime_seconds() -> f64 {
    PROCESS_START
        .get_or_init(Instant::now)
        .elapsed()
        .as_secs_f64()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Startup,
    Running,
    Stopped,
    Error,
}

/// Execution state of one node, kept apart from the graph data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    pub status: NodeStatus,
    pub started_at: Option<f64>,
    pub error: Option<String>,
}

impl Default for NodeState {
    fn default() -> Self {
        NodeState {
            status: NodeStatus::Stopped,
            started_at: None,
            error: None,
        }
    }
}

enum NodeControl {
    AddInput {
        slot: String,
        subscription: Subscription<Frame>,
    },
}

struct NodeTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    control: mpsc::UnboundedSender<NodeControl>,
}

/// Tuning knobs the runtime is constructed with.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub channel_capacity: usize,
    pub inspector_capacity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions {
            channel_capacity: crate::channel::DEFAULT_CAPACITY,
            inspector_capacity: 100,
        }
    }
}

/// Owns the graph model, the running tasks and the channel network.
///
/// The graph is pure data behind a writer lock; tasks and channels exist only
/// between `start_all` and `stop_all` (plus live edge edits in between).
pub struct Runtime {
    registry: Arc<ComponentRegistry>,
    graph: RwLock<PipelineGraph>,
    channels: DashMap<String, Arc<Channel<Frame>>>,
    tasks: DashMap<String, NodeTask>,
    states: Arc<DashMap<String, NodeState>>,
    running: Mutex<bool>,
    video: VideoHub,
    inspector: FrameInspector,
    options: RuntimeOptions,
}

impl Runtime {
    pub fn new(registry: Arc<ComponentRegistry>, options: RuntimeOptions) -> Arc<Self> {
        let graph = PipelineGraph::new(registry.clone());
        Arc::new(Runtime {
            registry,
            graph: RwLock::new(graph),
            channels: DashMap::new(),
            tasks: DashMap::new(),
            states: Arc::new(DashMap::new()),
            running: Mutex::new(false),
            video: VideoHub::new(),
            inspector: FrameInspector::new(options.inspector_capacity),
            options,
        })
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn video(&self) -> &VideoHub {
        &self.video
    }

    pub fn inspector(&self) -> &FrameInspector {
        &self.inspector
    }

    pub async fn is_running(&self) -> bool {
        *self.running.lock().await
    }

    // ---- graph edits ----------------------------------------------------

    pub fn list_nodes(&self) -> Vec<(GraphNode, NodeState)> {
        let graph = self.graph.read().unwrap();
        graph
            .nodes()
            .into_iter()
            .map(|node| {
                let state = self.state_of(&node.id);
                (node, state)
            })
            .collect()
    }

    pub fn get_node(&self, id: &str) -> Option<(GraphNode, NodeState)> {
        let graph = self.graph.read().unwrap();
        graph.node(id).cloned().map(|node| {
            let state = self.state_of(id);
            (node, state)
        })
    }

    pub fn list_edges(&self) -> Vec<Edge> {
        self.graph.read().unwrap().edges()
    }

    pub fn state_of(&self, id: &str) -> NodeState {
        self.states
            .get(id)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Create a node. Allowed while running; the new node stays `stopped`
    /// until the next `start_all`.
    pub fn add_node(
        &self,
        component: &str,
        id: Option<String>,
        init: Value,
    ) -> Result<(GraphNode, NodeState), PipelineError> {
        let node = {
            let mut graph = self.graph.write().unwrap();
            graph.add_node(component, id, init)?
        };
        self.states.insert(node.id.clone(), NodeState::default());
        info!(node = %node.id, component = %node.component, "node added");
        let state = self.state_of(&node.id);
        Ok((node, state))
    }

    /// Delete a node, stopping its task first when it is live.
    pub async fn remove_node(&self, id: &str) -> Result<(), PipelineError> {
        // Serializes with start_all/stop_all so the task table stays coherent.
        let _running = self.running.lock().await;
        if !self.graph.read().unwrap().contains_node(id) {
            return Err(PipelineError::NodeNotFound(id.to_string()));
        }
        if let Some((_, task)) = self.tasks.remove(id) {
            task.cancel.cancel();
            let _ = task.handle.await;
        }
        let (node, removed_edges) = {
            let mut graph = self.graph.write().unwrap();
            graph.remove_node(id)?
        };
        // Detach this node from upstream channels, then tear down its own.
        for edge in &removed_edges {
            if edge.target_node == id {
                if let Some(channel) = self.channels.get(&edge.channel_name()) {
                    channel.unsubscribe(id);
                    channel.unsubscribe(&format!("{}:{}", id, edge.target_slot));
                }
            }
        }
        let own_prefix = format!("{id}.");
        self.channels.retain(|name, channel| {
            if name.starts_with(&own_prefix) {
                channel.close();
                false
            } else {
                true
            }
        });
        self.states.remove(id);
        self.video.unregister(id);
        info!(node = %node.id, "node removed");
        Ok(())
    }

    /// Validate and insert an edge. On a running pipeline the target is
    /// subscribed to the producer channel before this returns.
    pub async fn add_edge(&self, edge: Edge) -> Result<(), PipelineError> {
        {
            let mut graph = self.graph.write().unwrap();
            graph.add_edge(edge.clone())?;
        }
        self.attach_edge(&edge).await;
        Ok(())
    }

    /// Remove an edge; on a running pipeline the subscriber detaches
    /// immediately.
    pub async fn remove_edge(&self, edge: &Edge) -> Result<(), PipelineError> {
        {
            let mut graph = self.graph.write().unwrap();
            graph.remove_edge(edge)?;
        }
        self.detach_edge(edge).await;
        Ok(())
    }

    async fn attach_edge(&self, edge: &Edge) {
        let running = self.running.lock().await;
        if !*running {
            return;
        }
        let Some(channel) = self.channels.get(&edge.channel_name()) else {
            // Producer was added after start_all; it has no channels yet.
            warn!(edge = %edge.id(), "producer not live, edge attaches on next start");
            return;
        };
        let Some(task) = self.tasks.get(&edge.target_node) else {
            warn!(edge = %edge.id(), "target not live, edge attaches on next start");
            return;
        };
        match subscribe_edge(channel.value(), edge) {
            Ok(subscription) => {
                let _ = task.control.send(NodeControl::AddInput {
                    slot: edge.target_slot.clone(),
                    subscription,
                });
            }
            Err(e) => error!(edge = %edge.id(), "live subscribe failed: {e}"),
        }
    }

    async fn detach_edge(&self, edge: &Edge) {
        let running = self.running.lock().await;
        if !*running {
            return;
        }
        if let Some(channel) = self.channels.get(&edge.channel_name()) {
            channel.unsubscribe(&edge.target_node);
            channel.unsubscribe(&format!("{}:{}", edge.target_node, edge.target_slot));
        }
    }

    // ---- lifecycle ------------------------------------------------------

    /// Bring the whole graph up: channels sources-first, one subscription per
    /// edge, one task per node. Fails without side effects if any component
    /// cannot be constructed.
    pub async fn start_all(&self) -> Result<(), PipelineError> {
        let mut running = self.running.lock().await;
        if *running {
            return Err(PipelineError::AlreadyRunning);
        }

        let (order, nodes, edges) = {
            let graph = self.graph.read().unwrap();
            let nodes: HashMap<String, (GraphNode, ComponentDescriptor)> = graph
                .nodes()
                .into_iter()
                .filter_map(|n| {
                    graph
                        .descriptor_of(&n.id)
                        .cloned()
                        .map(|d| (n.id.clone(), (n, d)))
                })
                .collect();
            (graph.topo_order(), nodes, graph.edges())
        };

        // Construct every component before anything is wired.
        let mut instances: HashMap<String, Box<dyn Component>> = HashMap::new();
        for (id, (node, _)) in &nodes {
            let instance = self.registry.instantiate(&node.component, &node.init)?;
            instances.insert(id.clone(), instance);
        }

        self.channels.clear();
        for id in &order {
            let Some((_, descriptor)) = nodes.get(id) else {
                continue;
            };
            for slot in descriptor.outputs.keys() {
                let name = format!("{id}.{slot}");
                self.channels.insert(
                    name.clone(),
                    Arc::new(Channel::new(name, self.options.channel_capacity)),
                );
            }
        }

        let mut inputs: HashMap<String, Vec<(String, Subscription<Frame>)>> = HashMap::new();
        for edge in &edges {
            let Some(channel) = self.channels.get(&edge.channel_name()) else {
                continue;
            };
            match subscribe_edge(channel.value(), edge) {
                Ok(subscription) => inputs
                    .entry(edge.target_node.clone())
                    .or_default()
                    .push((edge.target_slot.clone(), subscription)),
                Err(e) => {
                    drop(channel);
                    self.teardown_channels();
                    return Err(e);
                }
            }
        }

        for id in &order {
            let Some((node, descriptor)) = nodes.get(id) else {
                continue;
            };
            let Some(instance) = instances.remove(id) else {
                continue;
            };
            self.spawn_node(
                node,
                descriptor,
                instance,
                inputs.remove(id).unwrap_or_default(),
            );
        }

        *running = true;
        info!(nodes = order.len(), edges = edges.len(), "pipeline started");
        Ok(())
    }

    /// Cancel every task, close every channel, wait for the tasks to drain.
    /// Idempotent; a stopped pipeline stays stopped.
    pub async fn stop_all(&self) {
        let mut running = self.running.lock().await;
        for entry in self.tasks.iter() {
            entry.value().cancel.cancel();
        }
        for entry in self.channels.iter() {
            entry.value().close();
        }
        let ids: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, task)) = self.tasks.remove(&id) {
                let _ = task.handle.await;
            }
        }
        *running = false;
        info!("pipeline stopped");
    }

    fn teardown_channels(&self) {
        for entry in self.channels.iter() {
            entry.value().close();
        }
        self.channels.clear();
    }

    fn spawn_node(
        &self,
        node: &GraphNode,
        descriptor: &ComponentDescriptor,
        component: Box<dyn Component>,
        inputs: Vec<(String, Subscription<Frame>)>,
    ) {
        let mut outputs = HashMap::new();
        for slot in descriptor.outputs.keys() {
            if let Some(channel) = self.channels.get(&format!("{}.{slot}", node.id)) {
                outputs.insert(slot.clone(), channel.value().clone());
            }
        }
        let ctx = NodeContext::new(
            node.id.clone(),
            outputs,
            self.video.clone(),
            self.inspector.clone(),
        );
        let cancel = CancellationToken::new();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let is_source = descriptor.inputs.is_empty();

        self.states.insert(
            node.id.clone(),
            NodeState {
                status: NodeStatus::Startup,
                started_at: None,
                error: None,
            },
        );

        let handle = tokio::spawn(run_node(
            node.id.clone(),
            component,
            ctx,
            is_source,
            inputs,
            control_rx,
            cancel.clone(),
            self.states.clone(),
        ));
        self.tasks.insert(
            node.id.clone(),
            NodeTask {
                cancel,
                handle,
                control: control_tx,
            },
        );
    }

    // ---- metrics access -------------------------------------------------

    /// Channel counters grouped by producer node id.
    pub fn channel_stats_by_node(&self) -> HashMap<String, Vec<ChannelStats>> {
        let mut by_node: HashMap<String, Vec<ChannelStats>> = HashMap::new();
        for entry in self.channels.iter() {
            let stats = entry.value().stats();
            let node = stats
                .name
                .split_once('.')
                .map(|(node, _)| node.to_string())
                .unwrap_or_else(|| stats.name.clone());
            by_node.entry(node).or_default().push(stats);
        }
        by_node
    }

    pub fn node_states(&self) -> HashMap<String, NodeState> {
        let graph = self.graph.read().unwrap();
        graph
            .nodes()
            .into_iter()
            .map(|n| {
                let state = self.state_of(&n.id);
                (n.id, state)
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn channel(&self, name: &str) -> Option<Arc<Channel<Frame>>> {
        self.channels.get(name).map(|c| c.value().clone())
    }
}

/// Subscribe the edge's target to the producer channel. Subscriber id is the
/// target node id; a second edge from the same channel into another slot of
/// the same node falls back to a slot-qualified id.
fn subscribe_edge(
    channel: &Arc<Channel<Frame>>,
    edge: &Edge,
) -> Result<Subscription<Frame>, PipelineError> {
    match channel.subscribe(&edge.target_node) {
        Ok(subscription) => Ok(subscription),
        Err(PipelineError::AlreadySubscribed(_)) => {
            channel.subscribe(&format!("{}:{}", edge.target_node, edge.target_slot))
        }
        Err(e) => Err(e),
    }
}

type InputStream = Pin<Box<dyn Stream<Item = (String, Frame)> + Send>>;

fn input_stream(slot: String, subscription: Subscription<Frame>) -> InputStream {
    Box::pin(futures::stream::unfold(
        (slot, subscription),
        |(slot, mut subscription)| async move {
            subscription.recv().await.map(|frame| {
                let item = (slot.clone(), frame);
                (item, (slot, subscription))
            })
        },
    ))
}

fn set_state(states: &DashMap<String, NodeState>, id: &str, f: impl FnOnce(&mut NodeState)) {
    let mut entry = states.entry(id.to_string()).or_default();
    f(entry.value_mut());
}

#[allow(clippy::too_many_arguments)]
async fn run_node(
    node_id: String,
    mut component: Box<dyn Component>,
    ctx: NodeContext,
    is_source: bool,
    inputs: Vec<(String, Subscription<Frame>)>,
    control_rx: mpsc::UnboundedReceiver<NodeControl>,
    cancel: CancellationToken,
    states: Arc<DashMap<String, NodeState>>,
) {
    let started = tokio::select! {
        _ = cancel.cancelled() => Ok(false),
        result = component.start(&ctx) => result.map(|_| true),
    };

    let result = match started {
        Ok(false) => Ok(()),
        Err(e) => Err(e),
        Ok(true) => {
            set_state(&states, &node_id, |s| {
                s.status = NodeStatus::Running;
                s.started_at = Some(uptime_seconds());
                s.error = None;
            });
            if is_source {
                source_loop(component.as_mut(), &ctx, &cancel).await
            } else {
                input_loop(component.as_mut(), &ctx, inputs, control_rx, &cancel).await
            }
        }
    };

    if let Err(e) = &result {
        error!(node = %node_id, "node failed: {e}");
        set_state(&states, &node_id, |s| {
            s.status = NodeStatus::Error;
            s.started_at = None;
            s.error = Some(e.to_string());
        });
    }

    component.stop(&ctx).await;
    ctx.close_outputs();

    if result.is_ok() {
        set_state(&states, &node_id, |s| {
            s.status = NodeStatus::Stopped;
            s.started_at = None;
        });
    }
}

async fn source_loop(
    component: &mut dyn Component,
    ctx: &NodeContext,
    cancel: &CancellationToken,
) -> Result<(), ComponentError> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = component.step(None, ctx) => result?,
        }
    }
}

async fn input_loop(
    component: &mut dyn Component,
    ctx: &NodeContext,
    inputs: Vec<(String, Subscription<Frame>)>,
    mut control_rx: mpsc::UnboundedReceiver<NodeControl>,
    cancel: &CancellationToken,
) -> Result<(), ComponentError> {
    let mut fan_in: SelectAll<InputStream> = select_all(
        inputs
            .into_iter()
            .map(|(slot, subscription)| input_stream(slot, subscription)),
    );
    let mut control_open = true;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            control = control_rx.recv(), if control_open => {
                match control {
                    Some(NodeControl::AddInput { slot, subscription }) => {
                        fan_in.push(input_stream(slot, subscription));
                    }
                    None => control_open = false,
                }
            }
            next = fan_in.next(), if !fan_in.is_empty() => {
                // A closed input just falls out of the fan-in; the node keeps
                // waiting in case a live edit attaches a new one.
                if let Some((slot, frame)) = next {
                    component.step(Some((slot, frame)), ctx).await?;
                }
            }
        }
    }
}
