use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::runtime::{NodeStatus, Runtime};

/// One timestamped reading of every node and channel, pushed to all attached
/// observers. Fields carry both instantaneous cumulative values and the delta
/// since the previous sample; `lag` is the current value, not a delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: f64,
    pub nodes: BTreeMap<String, NodeMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub status: NodeStatus,
    pub started_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub channels: BTreeMap<String, ChannelMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMetrics {
    pub msg_count: u64,
    pub byte_count: u64,
    pub msg_count_delta: u64,
    pub byte_count_delta: u64,
    pub last_send_time: f64,
    /// Max queue depth across this channel's subscribers.
    pub buffer_depth: usize,
    pub subscribers: BTreeMap<String, SubscriberMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberMetrics {
    pub lag: u64,
    pub msg_count: u64,
    pub byte_count: u64,
    pub msg_count_delta: u64,
    pub byte_count_delta: u64,
}

#[derive(Default, Clone, Copy)]
struct Cumulative {
    msg: u64,
    byte: u64,
}

#[derive(Default)]
struct Previous {
    channels: HashMap<String, Cumulative>,
    subscribers: HashMap<(String, String), Cumulative>,
}

/// Samples the runtime on a fixed cadence and fans snapshots out over a
/// broadcast channel; SSE handlers subscribe per connection.
pub struct MetricsCollector {
    runtime: Arc<Runtime>,
    interval: Duration,
    tx: broadcast::Sender<Arc<MetricsSnapshot>>,
    previous: Mutex<Previous>,
}

impl MetricsCollector {
    pub fn new(runtime: Arc<Runtime>, interval: Duration) -> Arc<Self> {
        let (tx, _) = broadcast::channel(16);
        Arc::new(MetricsCollector {
            runtime,
            interval,
            tx,
            previous: Mutex::new(Previous::default()),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<MetricsSnapshot>> {
        self.tx.subscribe()
    }

    /// Take one sample and roll the cumulative baselines forward.
    pub fn sample(&self) -> MetricsSnapshot {
        let timestamp = Utc::now().timestamp_micros() as f64 / 1e6;
        let states = self.runtime.node_states();
        let mut stats_by_node = self.runtime.channel_stats_by_node();

        let mut next = Previous::default();
        let mut previous = self.previous.lock().unwrap();

        let mut nodes = BTreeMap::new();
        for (node_id, state) in states {
            let mut channels = BTreeMap::new();
            for stats in stats_by_node.remove(&node_id).unwrap_or_default() {
                let prev = previous
                    .channels
                    .get(&stats.name)
                    .copied()
                    .unwrap_or_default();
                next.channels.insert(
                    stats.name.clone(),
                    Cumulative {
                        msg: stats.msg_count,
                        byte: stats.byte_count,
                    },
                );

                let mut subscribers = BTreeMap::new();
                for (sub_id, sub) in &stats.subscribers {
                    let key = (stats.name.clone(), sub_id.clone());
                    let sub_prev = previous.subscribers.get(&key).copied().unwrap_or_default();
                    next.subscribers.insert(
                        key,
                        Cumulative {
                            msg: sub.msg_count,
                            byte: sub.byte_count,
                        },
                    );
                    subscribers.insert(
                        sub_id.clone(),
                        SubscriberMetrics {
                            lag: sub.lag,
                            msg_count: sub.msg_count,
                            byte_count: sub.byte_count,
                            msg_count_delta: sub.msg_count.saturating_sub(sub_prev.msg),
                            byte_count_delta: sub.byte_count.saturating_sub(sub_prev.byte),
                        },
                    );
                }

                channels.insert(
                    stats.name.clone(),
                    ChannelMetrics {
                        msg_count: stats.msg_count,
                        byte_count: stats.byte_count,
                        msg_count_delta: stats.msg_count.saturating_sub(prev.msg),
                        byte_count_delta: stats.byte_count.saturating_sub(prev.byte),
                        last_send_time: stats.last_send_time,
                        buffer_depth: stats.buffer_depth(),
                        subscribers,
                    },
                );
            }
            nodes.insert(
                node_id,
                NodeMetrics {
                    status: state.status,
                    started_at: state.started_at,
                    error: state.error,
                    channels,
                },
            );
        }

        *previous = next;
        MetricsSnapshot { timestamp, nodes }
    }

    /// Periodic sampler; runs until the handle is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let snapshot = self.sample();
                match self.tx.send(Arc::new(snapshot)) {
                    Ok(observers) => debug!(observers, "metrics snapshot"),
                    Err(_) => {} // nobody attached right now
                }
            }
        })
    }
}
