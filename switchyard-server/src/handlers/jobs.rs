use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use switchyard_core::{JobFilter, NewJob};
use switchyard_model::{Job, JobId, JobStatus};

use crate::{
    AppState,
    errors::{AppError, AppResult},
};

#[derive(Debug, Default, Deserialize)]
pub struct JobQuery {
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    pub status: Option<String>,
}

impl JobQuery {
    fn status(&self) -> AppResult<Option<JobStatus>> {
        self.status
            .as_deref()
            .map(|raw| {
                raw.parse::<JobStatus>()
                    .map_err(|_| AppError::bad_request(format!("unknown job status '{raw}'")))
            })
            .transpose()
    }
}

#[derive(Debug, Deserialize)]
pub struct GroupedCountQuery {
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Deserialize)]
pub struct RemoveParentlessRequest {
    pub lifetime_days: u32,
}

#[derive(Debug, Serialize)]
pub struct RemovedResponse {
    pub removed: u64,
}

pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<NewJob>,
) -> AppResult<(StatusCode, Json<Job>)> {
    let job = state.registry.create_job(request).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<Json<Job>> {
    Ok(Json(state.registry.job(id).await?))
}

pub async fn update_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
    Json(job): Json<Job>,
) -> AppResult<Json<Job>> {
    if job.id != id {
        return Err(AppError::bad_request(format!(
            "job id {} does not match path {id}",
            job.id
        )));
    }
    Ok(Json(state.registry.update_job(job).await?))
}

/// Removes the job together with its descendants.
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<StatusCode> {
    state.registry.job(id).await?;
    state.registry.remove_jobs(&[id]).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<Json<Job>> {
    Ok(Json(state.registry.cancel_job(id).await?))
}

pub async fn child_jobs(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<Json<Vec<Job>>> {
    Ok(Json(state.registry.child_jobs(id).await?))
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> AppResult<Json<Vec<Job>>> {
    let status = query.status()?;
    Ok(Json(
        state
            .registry
            .jobs(query.job_type.as_deref(), status)
            .await?,
    ))
}

pub async fn active_jobs(State(state): State<AppState>) -> AppResult<Json<Vec<Job>>> {
    Ok(Json(state.registry.active_jobs().await?))
}

pub async fn count_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> AppResult<Json<CountResponse>> {
    let mut filter = JobFilter::default();
    if let Some(status) = query.status()? {
        filter = filter.statuses(&[status]);
    }
    if let Some(job_type) = query.job_type {
        filter = filter.job_type(job_type);
    }
    let count = state.registry.count(&filter).await?;
    Ok(Json(CountResponse { count }))
}

pub async fn count_by_host(
    State(state): State<AppState>,
    Query(query): Query<GroupedCountQuery>,
) -> AppResult<Json<BTreeMap<String, u64>>> {
    let status = parse_status(&query.status)?;
    Ok(Json(
        state
            .registry
            .count_by_host(&query.job_type, status)
            .await?,
    ))
}

pub async fn count_by_operation(
    State(state): State<AppState>,
    Query(query): Query<GroupedCountQuery>,
) -> AppResult<Json<BTreeMap<String, u64>>> {
    let status = parse_status(&query.status)?;
    Ok(Json(
        state
            .registry
            .count_by_operation(&query.job_type, status)
            .await?,
    ))
}

pub async fn remove_parentless(
    State(state): State<AppState>,
    Json(request): Json<RemoveParentlessRequest>,
) -> AppResult<Json<RemovedResponse>> {
    let removed = state
        .registry
        .remove_parentless_jobs(request.lifetime_days)
        .await?;
    Ok(Json(RemovedResponse { removed }))
}

/// Jobs the dispatcher is holding back for a specific host.
pub async fn priority_list(
    State(state): State<AppState>,
) -> AppResult<Json<BTreeMap<String, String>>> {
    let dispatcher = state
        .dispatcher
        .as_ref()
        .ok_or_else(|| AppError::unavailable("dispatcher is not running on this node"))?;
    Ok(Json(
        dispatcher
            .priority_list()
            .into_iter()
            .map(|(id, host)| (id.to_string(), host))
            .collect(),
    ))
}

fn parse_status(raw: &str) -> AppResult<JobStatus> {
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("unknown job status '{raw}'")))
}
