//! HTTP client for the prediction API.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::{ClientError, ClientResult};
use crate::types::{CreatePrediction, Prediction};

const DEFAULT_BASE_URL: &str = "https://api.replicate.com/v1";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root, e.g. `https://api.replicate.com/v1`
    pub base_url: String,
    /// Bearer token
    pub api_token: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: api_token.into(),
            request_timeout: Duration::from_secs(60),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> ClientResult<Self> {
        let api_token = std::env::var("REPLICATE_API_TOKEN")
            .map_err(|_| ClientError::config("REPLICATE_API_TOKEN is not set"))?;
        let base_url =
            std::env::var("REPLICATE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let request_timeout = Duration::from_secs(
            std::env::var("REPLICATE_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
        );

        Ok(Self {
            base_url,
            api_token,
            request_timeout,
        })
    }
}

/// Prediction API client.
#[derive(Debug, Clone)]
pub struct PredictionClient {
    http: Client,
    base_url: Url,
    api_token: String,
}

impl PredictionClient {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let mut base = config.base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = Url::parse(&base)
            .map_err(|e| ClientError::config(format!("invalid base url '{}': {}", config.base_url, e)))?;

        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::config(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            api_token: config.api_token,
        })
    }

    pub fn from_env() -> ClientResult<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> ClientResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::config(format!("invalid endpoint '{}': {}", path, e)))
    }

    /// Start a prediction on `model` (`owner/name`).
    pub async fn create_prediction(&self, model: &str, input: &Value) -> ClientResult<Prediction> {
        let url = self.endpoint(&format!("models/{}/predictions", model))?;
        debug!(model = model, "Creating prediction");

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_token)
            .json(&CreatePrediction { input })
            .send()
            .await?;

        let prediction: Prediction = check_status(response).await?.json().await?;
        debug!(model = model, prediction_id = %prediction.id, status = ?prediction.status, "Prediction created");
        Ok(prediction)
    }

    /// Fetch the current state of a prediction.
    pub async fn get_prediction(&self, prediction_id: &str) -> ClientResult<Prediction> {
        let url = self.endpoint(&format!("predictions/{}", prediction_id))?;

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        let prediction: Prediction = check_status(response).await?.json().await?;
        if prediction.status.is_terminal() {
            debug!(prediction_id = %prediction.id, status = ?prediction.status, "Prediction finished");
        }
        Ok(prediction)
    }
}

async fn check_status(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::from_status(status.as_u16(), body, retry_after))
}
