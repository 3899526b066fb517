use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use switchyard_model::HostRegistration;

use crate::{AppState, errors::AppResult};

#[derive(Debug, Deserialize)]
pub struct RegisterHostRequest {
    pub base_url: String,
    pub ip_address: String,
    pub node_name: String,
    #[serde(default)]
    pub memory: u64,
    #[serde(default)]
    pub cores: u32,
    pub max_load: f32,
}

#[derive(Debug, Deserialize)]
pub struct HostQuery {
    pub host: String,
}

#[derive(Debug, Deserialize)]
pub struct MaintenanceRequest {
    pub host: String,
    pub maintenance: bool,
}

pub async fn register_host(
    State(state): State<AppState>,
    Json(request): Json<RegisterHostRequest>,
) -> AppResult<(StatusCode, Json<HostRegistration>)> {
    let host = HostRegistration::new(
        request.base_url,
        request.ip_address,
        request.node_name,
        request.memory,
        request.cores,
        request.max_load,
    );
    let registered = state.registry.register_host(host).await?;
    Ok((StatusCode::CREATED, Json(registered)))
}

pub async fn unregister_host(
    State(state): State<AppState>,
    Query(query): Query<HostQuery>,
) -> AppResult<StatusCode> {
    state.registry.unregister_host(&query.host).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_hosts(State(state): State<AppState>) -> AppResult<Json<Vec<HostRegistration>>> {
    Ok(Json(state.registry.hosts().await?))
}

pub async fn enable_host(
    State(state): State<AppState>,
    Json(request): Json<HostQuery>,
) -> AppResult<StatusCode> {
    state.registry.enable_host(&request.host).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn disable_host(
    State(state): State<AppState>,
    Json(request): Json<HostQuery>,
) -> AppResult<StatusCode> {
    state.registry.disable_host(&request.host).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_maintenance(
    State(state): State<AppState>,
    Json(request): Json<MaintenanceRequest>,
) -> AppResult<StatusCode> {
    state
        .registry
        .set_maintenance(&request.host, request.maintenance)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
