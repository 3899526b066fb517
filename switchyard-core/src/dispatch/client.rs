use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use switchyard_model::JobId;

use crate::{
    config::DispatchConfig,
    error::Result,
    identity::DispatchContext,
};

pub const ORGANIZATION_HEADER: &str = "X-Switchyard-Organization";
pub const USER_HEADER: &str = "X-Switchyard-User";

/// Body of a dispatch call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchRequest {
    pub job_id: JobId,
    pub operation: String,
}

/// How a worker answered a dispatch call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchResponse {
    Accepted,
    /// The worker has no room right now.
    Busy,
    /// The worker refuses the job itself, with its explanation.
    Rejected(String),
    /// The dispatch endpoint is not serving yet.
    NotReachable,
    Unexpected(u16),
}

impl DispatchResponse {
    pub fn from_status(status: StatusCode, body: impl FnOnce() -> String) -> Self {
        match status {
            s if s.is_success() => DispatchResponse::Accepted,
            StatusCode::SERVICE_UNAVAILABLE => DispatchResponse::Busy,
            StatusCode::PRECONDITION_FAILED => DispatchResponse::Rejected(body()),
            StatusCode::METHOD_NOT_ALLOWED => DispatchResponse::NotReachable,
            other => DispatchResponse::Unexpected(other.as_u16()),
        }
    }
}

/// Transport to worker services.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// Sends the job to `url`. Transport failures surface as
    /// `RegistryError::Transport`.
    async fn dispatch(
        &self,
        url: &str,
        request: &DispatchRequest,
        context: &DispatchContext,
    ) -> Result<DispatchResponse>;

    /// Liveness check against `url`. `Ok(false)` for a non-2xx answer.
    async fn probe(&self, url: &str) -> Result<bool>;
}

/// `reqwest` implementation posting a form of `id` and `operation`.
#[derive(Debug, Clone)]
pub struct HttpWorkerClient {
    client: reqwest::Client,
}

impl HttpWorkerClient {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn from_config(config: &DispatchConfig) -> Result<Self> {
        Self::new(config.connect_timeout(), config.request_timeout())
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn dispatch(
        &self,
        url: &str,
        request: &DispatchRequest,
        context: &DispatchContext,
    ) -> Result<DispatchResponse> {
        let job_id = request.job_id.to_string();
        let response = self
            .client
            .post(url)
            .header(ORGANIZATION_HEADER, &context.organization)
            .header(USER_HEADER, &context.user)
            .form(&[("id", job_id.as_str()), ("operation", request.operation.as_str())])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::PRECONDITION_FAILED {
            let body = response.text().await.unwrap_or_default();
            return Ok(DispatchResponse::Rejected(body));
        }
        Ok(DispatchResponse::from_status(status, String::new))
    }

    async fn probe(&self, url: &str) -> Result<bool> {
        let response = self.client.head(url).send().await?;
        Ok(response.status().is_success())
    }
}
