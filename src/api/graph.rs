use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::PipelineError;
use crate::graph::Edge;
use crate::runtime::{NodeState, NodeStatus};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct NodeCreateRequest {
    #[serde(rename = "type")]
    pub component: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub init: Value,
}

#[derive(Debug, Serialize)]
pub struct NodeResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub component: String,
    pub status: NodeStatus,
}

impl NodeResponse {
    fn new(id: String, component: String, state: &NodeState) -> Self {
        NodeResponse {
            id,
            component,
            status: state.status,
        }
    }
}

pub async fn list_nodes(State(state): State<AppState>) -> Json<Vec<NodeResponse>> {
    let nodes = state
        .runtime
        .list_nodes()
        .into_iter()
        .map(|(node, node_state)| NodeResponse::new(node.id, node.component, &node_state))
        .collect();
    Json(nodes)
}

pub async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<NodeResponse>, PipelineError> {
    let (node, node_state) = state
        .runtime
        .get_node(&id)
        .ok_or(PipelineError::NodeNotFound(id))?;
    Ok(Json(NodeResponse::new(node.id, node.component, &node_state)))
}

pub async fn create_node(
    State(state): State<AppState>,
    Json(req): Json<NodeCreateRequest>,
) -> Result<(StatusCode, Json<NodeResponse>), PipelineError> {
    let (node, node_state) = state.runtime.add_node(&req.component, req.id, req.init)?;
    Ok((
        StatusCode::CREATED,
        Json(NodeResponse::new(node.id, node.component, &node_state)),
    ))
}

pub async fn delete_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, PipelineError> {
    state.runtime.remove_node(&id).await?;
    Ok(Json(json!({})))
}

pub async fn list_edges(State(state): State<AppState>) -> Json<Vec<Edge>> {
    Json(state.runtime.list_edges())
}

pub async fn create_edge(
    State(state): State<AppState>,
    Json(edge): Json<Edge>,
) -> Result<(StatusCode, Json<Edge>), PipelineError> {
    state.runtime.add_edge(edge.clone()).await?;
    Ok((StatusCode::CREATED, Json(edge)))
}

pub async fn delete_edge(
    State(state): State<AppState>,
    Json(edge): Json<Edge>,
) -> Result<Json<Value>, PipelineError> {
    state.runtime.remove_edge(&edge).await?;
    Ok(Json(json!({})))
}

pub async fn start_all(
    State(state): State<AppState>,
) -> Result<Json<Value>, PipelineError> {
    state.runtime.start_all().await?;
    Ok(Json(json!({"status": "running"})))
}

pub async fn stop_all(State(state): State<AppState>) -> Json<Value> {
    state.runtime.stop_all().await;
    Json(json!({"status": "stopped"}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_response_wire_shape() {
        let response = NodeResponse::new(
            "mic".into(),
            "tone".into(),
            &NodeState {
                status: NodeStatus::Running,
                started_at: Some(1.5),
                error: None,
            },
        );
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({"id": "mic", "type": "tone", "status": "running"})
        );
    }

    #[test]
    fn test_create_request_accepts_missing_init() {
        let req: NodeCreateRequest =
            serde_json::from_value(json!({"type": "tone", "id": "t"})).unwrap();
        assert_eq!(req.component, "tone");
        assert!(req.init.is_null());
    }
}
