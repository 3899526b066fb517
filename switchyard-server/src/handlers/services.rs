use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use switchyard_core::HealthSummary;
use switchyard_model::ServiceRegistration;

use crate::{AppState, errors::AppResult};

#[derive(Debug, Deserialize)]
pub struct RegisterServiceRequest {
    pub service_type: String,
    pub host: String,
    pub path: String,
    #[serde(default)]
    pub job_producer: bool,
}

#[derive(Debug, Deserialize)]
pub struct ServiceQuery {
    #[serde(rename = "type")]
    pub service_type: String,
    pub host: String,
}

#[derive(Debug, Deserialize)]
pub struct ServiceListQuery {
    #[serde(rename = "type")]
    pub service_type: Option<String>,
}

pub async fn register_service(
    State(state): State<AppState>,
    Json(request): Json<RegisterServiceRequest>,
) -> AppResult<(StatusCode, Json<ServiceRegistration>)> {
    let service = state
        .registry
        .register_service(
            &request.service_type,
            &request.host,
            &request.path,
            request.job_producer,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(service)))
}

pub async fn unregister_service(
    State(state): State<AppState>,
    Query(query): Query<ServiceQuery>,
) -> AppResult<StatusCode> {
    state
        .registry
        .unregister_service(&query.service_type, &query.host)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_services(
    State(state): State<AppState>,
    Query(query): Query<ServiceListQuery>,
) -> AppResult<Json<Vec<ServiceRegistration>>> {
    let services = match query.service_type.as_deref() {
        Some(service_type) => state.registry.services_for(service_type).await?,
        None => state.registry.services().await?,
    };
    Ok(Json(services))
}

/// Puts a service back into the normal health state.
pub async fn sanitize_service(
    State(state): State<AppState>,
    Json(request): Json<ServiceQuery>,
) -> AppResult<Json<ServiceRegistration>> {
    let service = state
        .registry
        .sanitize(&request.service_type, &request.host)
        .await?;
    Ok(Json(service))
}

pub async fn health(State(state): State<AppState>) -> AppResult<Json<HealthSummary>> {
    Ok(Json(state.registry.health_summary().await?))
}
