use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tms_core::control::{
    START_PROCESSING_PATH, STOP_PROCESSING_PATH, VEHICLE_COUNTS_PATH, VIOLATIONS_PATH,
};
use tms_core::counts::counts_from_value;
use tms_core::{ControlResponse, CountMap, StartRequest, ViolationsSummary};
use tracing::debug;
use url::Url;

const CONNECT_FAILURE_MESSAGE: &str = "Error connecting to server";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("control request failed: {0}")]
    Transport(String),
    #[error("control endpoint returned http {0}")]
    HttpStatus(u16),
    #[error("control endpoint returned an invalid body: {0}")]
    InvalidResponse(String),
    #[error("server rejected request: {0}")]
    Rejected(String),
}

impl ControlError {
    /// Text shown to the viewer. Only a server rejection carries its own message.
    pub fn user_message(&self) -> String {
        match self {
            ControlError::Rejected(message) => format!("Error: {message}"),
            _ => CONNECT_FAILURE_MESSAGE.to_string(),
        }
    }
}

/// Start/stop operations of the analysis server.
#[async_trait]
pub trait ControlApi: Send + Sync {
    async fn start_processing(&self, request: &StartRequest) -> Result<Option<String>, ControlError>;
    async fn stop_processing(&self) -> Result<Option<String>, ControlError>;
}

#[derive(Debug, Clone)]
pub struct ControlClient {
    http: reqwest::Client,
    base: Url,
}

impl ControlClient {
    pub fn new(base: Url, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base: with_trailing_slash(base),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub async fn fetch_vehicle_counts(&self) -> Result<CountMap, ControlError> {
        let body: serde_json::Value = self.get_json(VEHICLE_COUNTS_PATH).await?;
        Ok(counts_from_value(&body))
    }

    pub async fn fetch_violations(&self) -> Result<ViolationsSummary, ControlError> {
        let body = self.get_json(VIOLATIONS_PATH).await?;
        serde_json::from_value(body).map_err(|err| ControlError::InvalidResponse(err.to_string()))
    }

    fn endpoint(&self, path: &str) -> Result<Url, ControlError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|err| ControlError::Transport(err.to_string()))
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value, ControlError> {
        let url = self.endpoint(path)?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| ControlError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ControlError::HttpStatus(status.as_u16()));
        }
        let text = response
            .text()
            .await
            .map_err(|err| ControlError::Transport(err.to_string()))?;
        serde_json::from_str(&text).map_err(|err| ControlError::InvalidResponse(err.to_string()))
    }

    async fn post_control(
        &self,
        path: &str,
        form: &[(&'static str, String)],
    ) -> Result<Option<String>, ControlError> {
        let url = self.endpoint(path)?;
        let response = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|err| ControlError::Transport(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| ControlError::Transport(err.to_string()))?;
        debug!(
            event = "control_response",
            path,
            status = status.as_u16(),
            bytes = text.len()
        );
        parse_control_body(status, &text)
    }
}

#[async_trait]
impl ControlApi for ControlClient {
    async fn start_processing(&self, request: &StartRequest) -> Result<Option<String>, ControlError> {
        self.post_control(START_PROCESSING_PATH, &request.form_fields())
            .await
    }

    async fn stop_processing(&self) -> Result<Option<String>, ControlError> {
        self.post_control(STOP_PROCESSING_PATH, &[]).await
    }
}

fn parse_control_body(status: StatusCode, text: &str) -> Result<Option<String>, ControlError> {
    if !status.is_success() {
        return Err(ControlError::HttpStatus(status.as_u16()));
    }
    let response: ControlResponse = serde_json::from_str(text)
        .map_err(|err| ControlError::InvalidResponse(err.to_string()))?;
    response.into_result().map_err(ControlError::Rejected)
}

fn with_trailing_slash(mut base: Url) -> Url {
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}
