pub mod component;
pub mod frames;
pub mod graph;
pub mod metrics;
pub mod video;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::metrics::MetricsCollector;
use crate::runtime::Runtime;

/// Handles the control surface hands to every request. The surface itself is
/// stateless; everything lives behind these two.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
    pub metrics: Arc<MetricsCollector>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/component", get(component::list_components))
        .route(
            "/graph/nodes",
            get(graph::list_nodes).post(graph::create_node),
        )
        .route(
            "/graph/nodes/{id}",
            get(graph::get_node).delete(graph::delete_node),
        )
        .route(
            "/graph/edges",
            get(graph::list_edges)
                .post(graph::create_edge)
                .delete(graph::delete_edge),
        )
        .route("/graph/start", post(graph::start_all))
        .route("/graph/stop", post(graph::stop_all))
        .route("/metrics", get(metrics::stream))
        .route("/frames", get(frames::stream))
        .route("/video/ws/{node_id}", get(video::stream))
        // The editor is served from its own origin.
        .layer(CorsLayer::permissive())
        .with_state(state)
}
