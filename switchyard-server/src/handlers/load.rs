use std::collections::BTreeMap;

use axum::{Json, extract::State};
use serde::Serialize;
use switchyard_model::SystemLoad;

use crate::{AppState, errors::AppResult};

#[derive(Debug, Serialize)]
pub struct OwnLoadResponse {
    pub host: String,
    pub load: f32,
}

pub async fn current_load(State(state): State<AppState>) -> AppResult<Json<SystemLoad>> {
    Ok(Json(state.registry.current_load().await?))
}

pub async fn max_loads(
    State(state): State<AppState>,
) -> AppResult<Json<BTreeMap<String, f32>>> {
    Ok(Json(state.registry.max_loads().await?))
}

pub async fn own_load(State(state): State<AppState>) -> Json<OwnLoadResponse> {
    Json(OwnLoadResponse {
        host: state.registry.local_host().to_string(),
        load: state.registry.own_load(),
    })
}
