use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::component::ComponentKind;

use super::AppState;

/// One entry of `GET /component`: everything the editor needs to render a
/// palette entry and its init form.
#[derive(Debug, Serialize)]
pub struct ComponentInfo {
    pub name: String,
    pub category: ComponentKind,
    pub init: Map<String, Value>,
    pub inputs: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
}

pub async fn list_components(State(state): State<AppState>) -> Json<Vec<ComponentInfo>> {
    let infos = state
        .runtime
        .registry()
        .list()
        .into_iter()
        .map(|descriptor| ComponentInfo {
            name: descriptor.name.clone(),
            category: descriptor.kind,
            init: descriptor.init_param_schemas(),
            inputs: descriptor.inputs.clone(),
            outputs: descriptor.outputs.clone(),
        })
        .collect();
    Json(infos)
}
