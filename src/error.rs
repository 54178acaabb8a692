use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Every failure the control surface can report, with a stable machine code.
///
/// Graph edits validate-then-apply: when one of these comes back the graph is
/// unchanged.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("unknown component: {0}")]
    ComponentNotFound(String),

    #[error("invalid init arguments for {component}: {detail}")]
    InvalidArgs { component: String, detail: String },

    #[error("duplicate node id: {0}")]
    DuplicateId(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("node {node} has no slot named {slot}")]
    UnknownSlot { node: String, slot: String },

    #[error("type mismatch: {source_endpoint} produces `{output_type}` but {target} expects `{input_type}`")]
    TypeMismatch {
        source_endpoint: String,
        output_type: String,
        target: String,
        input_type: String,
    },

    #[error("edge already exists: {0}")]
    DuplicateEdge(String),

    #[error("edge would close a cycle: {0}")]
    CycleDetected(String),

    #[error("edge not found: {0}")]
    EdgeNotFound(String),

    #[error("pipeline is already running")]
    AlreadyRunning,

    #[error("subscriber already attached: {0}")]
    AlreadySubscribed(String),

    #[error("channel closed")]
    ChannelClosed,
}

impl PipelineError {
    /// Stable machine-readable code, mirrored into the JSON error body.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::ComponentNotFound(_) => "ComponentNotFound",
            PipelineError::InvalidArgs { .. } => "InvalidArgs",
            PipelineError::DuplicateId(_) => "DuplicateId",
            PipelineError::NodeNotFound(_) => "NodeNotFound",
            PipelineError::UnknownSlot { .. } => "UnknownSlot",
            PipelineError::TypeMismatch { .. } => "TypeMismatch",
            PipelineError::DuplicateEdge(_) => "DuplicateEdge",
            PipelineError::CycleDetected(_) => "CycleDetected",
            PipelineError::EdgeNotFound(_) => "EdgeNotFound",
            PipelineError::AlreadyRunning => "AlreadyRunning",
            PipelineError::AlreadySubscribed(_) => "AlreadySubscribed",
            PipelineError::ChannelClosed => "ChannelClosed",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::ComponentNotFound(_)
            | PipelineError::NodeNotFound(_)
            | PipelineError::EdgeNotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::DuplicateId(_) | PipelineError::AlreadyRunning => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.code(), "detail": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

/// Failure inside a component's own `start`/`step` code. These never reach the
/// HTTP caller; the runtime records the message on the node and flips it to
/// `error`.
#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("{0}")]
    Failed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ComponentError {
    pub fn failed(msg: impl Into<String>) -> Self {
        ComponentError::Failed(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        let err = PipelineError::TypeMismatch {
            source_endpoint: "mic.out".into(),
            output_type: "audio".into(),
            target: "caption.in".into(),
            input_type: "text".into(),
        };
        assert_eq!(err.code(), "TypeMismatch");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_maps_to_404() {
        assert_eq!(
            PipelineError::NodeNotFound("ghost".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            PipelineError::EdgeNotFound("a.out->b.in".into()).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_conflicts_map_to_409() {
        assert_eq!(
            PipelineError::AlreadyRunning.status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            PipelineError::DuplicateId("mic".into()).status(),
            StatusCode::CONFLICT
        );
    }
}
