use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use patchbay::component::{Component, ComponentKind, ComponentRegistry, NodeContext};
use patchbay::error::ComponentError;
use patchbay::frame::{Frame, FrameKind};
use patchbay::graph::Edge;
use patchbay::metrics::MetricsCollector;
use patchbay::runtime::{NodeStatus, Runtime, RuntimeOptions};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(default)]
struct NoConfig {}

/// Sink that remembers every int it sees.
struct Collect {
    seen: Arc<Mutex<Vec<i64>>>,
}

#[async_trait]
impl Component for Collect {
    async fn step(
        &mut self,
        input: Option<(String, Frame)>,
        _ctx: &NodeContext,
    ) -> Result<(), ComponentError> {
        if let Some((_, frame)) = input {
            if let FrameKind::Int(v) = frame.kind {
                self.seen.lock().unwrap().push(v);
            }
        }
        Ok(())
    }
}

/// Sink that takes 10 ms per item.
struct SlowCollect {
    count: Arc<AtomicUsize>,
}

#[async_trait]
impl Component for SlowCollect {
    async fn step(
        &mut self,
        input: Option<(String, Frame)>,
        _ctx: &NodeContext,
    ) -> Result<(), ComponentError> {
        if input.is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// Conduit that forwards its first two items and blows up on the third.
struct Boom {
    steps: usize,
}

#[async_trait]
impl Component for Boom {
    async fn step(
        &mut self,
        input: Option<(String, Frame)>,
        ctx: &NodeContext,
    ) -> Result<(), ComponentError> {
        let Some((_, frame)) = input else {
            return Ok(());
        };
        self.steps += 1;
        if self.steps >= 3 {
            return Err(ComponentError::failed("boom on third step"));
        }
        ctx.publish("out", frame)?;
        Ok(())
    }
}

fn register_collect(
    registry: &mut ComponentRegistry,
    name: &str,
) -> Arc<Mutex<Vec<i64>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let captured = seen.clone();
    registry.register::<NoConfig, _>(name, ComponentKind::Sink, &[("in", "int")], &[], move |_| {
        Box::new(Collect {
            seen: captured.clone(),
        })
    });
    seen
}

fn edge(src: &str, dst: &str) -> Edge {
    Edge {
        source_node: src.into(),
        source_slot: "out".into(),
        target_node: dst.into(),
        target_slot: "in".into(),
    }
}

async fn wait_until(mut done: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    done()
}

#[tokio::test]
async fn test_linear_pipeline_doubles_in_order() {
    let mut registry = ComponentRegistry::with_builtins();
    let seen = register_collect(&mut registry, "collect");
    let runtime = Runtime::new(Arc::new(registry), RuntimeOptions::default());

    runtime
        .add_node("ticker", Some("src".into()), json!({"interval_ms": 1, "start": 1}))
        .unwrap();
    runtime
        .add_node("scale", Some("dbl".into()), json!({"factor": 2}))
        .unwrap();
    runtime.add_node("collect", Some("sink".into()), json!({})).unwrap();
    runtime.add_edge(edge("src", "dbl")).await.unwrap();
    runtime.add_edge(edge("dbl", "sink")).await.unwrap();

    runtime.start_all().await.unwrap();
    let filled = {
        let seen = seen.clone();
        wait_until(move || seen.lock().unwrap().len() >= 10, Duration::from_secs(5)).await
    };
    runtime.stop_all().await;

    assert!(filled, "sink never reached 10 items");
    let seen = seen.lock().unwrap();
    assert_eq!(
        &seen[..10],
        &[2, 4, 6, 8, 10, 12, 14, 16, 18, 20],
        "first ten items must be the doubled sequence in order"
    );
}

#[tokio::test]
async fn test_fan_out_delivers_same_sequence_to_both() {
    let mut registry = ComponentRegistry::with_builtins();
    let seen_a = register_collect(&mut registry, "collect_a");
    let seen_b = register_collect(&mut registry, "collect_b");
    let runtime = Runtime::new(Arc::new(registry), RuntimeOptions::default());

    runtime
        .add_node("ticker", Some("src".into()), json!({"interval_ms": 1, "start": 1}))
        .unwrap();
    runtime.add_node("collect_a", Some("a".into()), json!({})).unwrap();
    runtime.add_node("collect_b", Some("b".into()), json!({})).unwrap();
    runtime.add_edge(edge("src", "a")).await.unwrap();
    runtime.add_edge(edge("src", "b")).await.unwrap();

    runtime.start_all().await.unwrap();
    let filled = {
        let (a, b) = (seen_a.clone(), seen_b.clone());
        wait_until(
            move || a.lock().unwrap().len() >= 20 && b.lock().unwrap().len() >= 20,
            Duration::from_secs(5),
        )
        .await
    };
    runtime.stop_all().await;
    assert!(filled, "both sinks should fill");

    for seen in [seen_a, seen_b] {
        let seen = seen.lock().unwrap();
        for (i, v) in seen.iter().enumerate() {
            assert_eq!(*v, i as i64 + 1, "each subscriber sees 1..N in order");
        }
    }
}

#[tokio::test]
async fn test_slow_subscriber_sheds_while_fast_keeps_up() {
    let mut registry = ComponentRegistry::with_builtins();
    let fast_seen = register_collect(&mut registry, "collect");
    let slow_count = Arc::new(AtomicUsize::new(0));
    let captured = slow_count.clone();
    registry.register::<NoConfig, _>(
        "slow",
        ComponentKind::Sink,
        &[("in", "int")],
        &[],
        move |_| {
            Box::new(SlowCollect {
                count: captured.clone(),
            })
        },
    );
    let runtime = Runtime::new(
        Arc::new(registry),
        RuntimeOptions {
            channel_capacity: 8,
            ..RuntimeOptions::default()
        },
    );
    let metrics = MetricsCollector::new(runtime.clone(), Duration::from_millis(500));

    runtime
        .add_node("ticker", Some("src".into()), json!({"interval_ms": 1}))
        .unwrap();
    runtime.add_node("slow", Some("turtle".into()), json!({})).unwrap();
    runtime.add_node("collect", Some("hare".into()), json!({})).unwrap();
    runtime.add_edge(edge("src", "turtle")).await.unwrap();
    runtime.add_edge(edge("src", "hare")).await.unwrap();

    runtime.start_all().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    let snapshot = metrics.sample();
    runtime.stop_all().await;

    let channel = &snapshot.nodes["src"].channels["src.out"];
    let total = channel.msg_count;
    assert!(total > 300, "source too slow: {total} items in 1s");

    let slow = &channel.subscribers["turtle"];
    let fast = &channel.subscribers["hare"];

    // The 10 ms/item consumer manages ~100 items/s, everything else drops.
    assert!(slow.msg_count < 300, "slow consumed {}", slow.msg_count);
    assert!(slow.lag > 100, "slow lag only {}", slow.lag);
    // Drop accounting: published = delivered + dropped + still buffered.
    let accounted = slow.lag + slow.msg_count;
    assert!(
        accounted <= total && accounted + 8 + 2 >= total,
        "slow accounting off: lag {} + delivered {} vs total {total}",
        slow.lag,
        slow.msg_count
    );

    // The fast sibling on the same channel sees essentially everything.
    assert_eq!(fast.lag, 0);
    assert!(
        fast.msg_count + 8 + 2 >= total,
        "fast delivered {} of {total}",
        fast.msg_count
    );
    // The sinks keep draining between the sample and the stop, so the shared
    // handles can only be ahead of the sampled counters.
    assert!(fast_seen.lock().unwrap().len() >= fast.msg_count as usize);
    assert!(slow_count.load(Ordering::Relaxed) + 1 >= slow.msg_count as usize);
}

#[tokio::test]
async fn test_node_failure_is_isolated() {
    let mut registry = ComponentRegistry::with_builtins();
    let seen = register_collect(&mut registry, "collect");
    registry.register::<NoConfig, _>(
        "boom",
        ComponentKind::Conduit,
        &[("in", "int")],
        &[("out", "int")],
        |_| Box::new(Boom { steps: 0 }),
    );
    let runtime = Runtime::new(Arc::new(registry), RuntimeOptions::default());
    let metrics = MetricsCollector::new(runtime.clone(), Duration::from_millis(500));

    runtime
        .add_node("ticker", Some("src".into()), json!({"interval_ms": 2, "start": 1}))
        .unwrap();
    runtime.add_node("boom", Some("mid".into()), json!({})).unwrap();
    runtime.add_node("collect", Some("sink".into()), json!({})).unwrap();
    runtime.add_edge(edge("src", "mid")).await.unwrap();
    runtime.add_edge(edge("mid", "sink")).await.unwrap();

    runtime.start_all().await.unwrap();
    let errored = {
        let runtime = runtime.clone();
        wait_until(
            move || runtime.state_of("mid").status == NodeStatus::Error,
            Duration::from_secs(5),
        )
        .await
    };
    assert!(errored, "middle node never errored");

    let mid = runtime.state_of("mid");
    assert_eq!(mid.status, NodeStatus::Error);
    assert!(mid.error.unwrap().contains("boom on third step"));
    assert!(mid.started_at.is_none());

    // Upstream keeps running, untouched.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(runtime.state_of("src").status, NodeStatus::Running);
    assert_eq!(runtime.state_of("sink").status, NodeStatus::Running);

    let snapshot = metrics.sample();

    // Downstream got a prefix of the two forwarded items; whatever it had
    // not drained when the channel closed stays buffered for inspection.
    let delivered: Vec<i64> = seen.lock().unwrap().clone();
    assert!(delivered.len() <= 2);
    assert_eq!(&delivered[..], &[1, 2][..delivered.len()]);
    let mid_out = &snapshot.nodes["mid"].channels["mid.out"];
    assert_eq!(mid_out.buffer_depth, 2 - delivered.len());

    // The dead node's subscription stays attached upstream; its drops keep
    // accumulating where the dashboard can see them.
    let upstream = &snapshot.nodes["src"].channels["src.out"];
    assert!(upstream.subscribers["mid"].lag > 0);

    runtime.stop_all().await;
    assert_eq!(runtime.state_of("src").status, NodeStatus::Stopped);
    // The error verdict survives the shutdown for post-mortems.
    assert_eq!(runtime.state_of("mid").status, NodeStatus::Error);
}

#[tokio::test]
async fn test_restart_after_stop() {
    let mut registry = ComponentRegistry::with_builtins();
    let seen = register_collect(&mut registry, "collect");
    let runtime = Runtime::new(Arc::new(registry), RuntimeOptions::default());

    runtime
        .add_node("ticker", Some("src".into()), json!({"interval_ms": 1}))
        .unwrap();
    runtime.add_node("collect", Some("sink".into()), json!({})).unwrap();
    runtime.add_edge(edge("src", "sink")).await.unwrap();

    runtime.start_all().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    runtime.stop_all().await;
    let first_run = seen.lock().unwrap().len();
    assert!(first_run > 0);

    runtime.start_all().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    runtime.stop_all().await;
    assert!(seen.lock().unwrap().len() > first_run, "second run delivered nothing");
}
