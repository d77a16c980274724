//! Remote scorer: one record per HTTP call against a prediction API

use crate::config::RemoteConfig;
use crate::error::RemoteError;
use crate::types::table::RowView;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info};

const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// Prediction for one record, and whether it came from the memo
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordPrediction {
    pub value: f64,
    /// No request was made; the value was remembered from an identical record
    pub cached: bool,
}

impl RecordPrediction {
    pub fn fetched(value: f64) -> Self {
        Self {
            value,
            cached: false,
        }
    }

    pub fn cached(value: f64) -> Self {
        Self {
            value,
            cached: true,
        }
    }
}

/// Scores exactly one record per call
#[async_trait]
pub trait RecordScorer: Send + Sync {
    async fn predict_one(&self, row: RowView<'_>) -> Result<RecordPrediction, RemoteError>;
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    data: Vec<PredictionRow>,
}

#[derive(Debug, Deserialize)]
struct PredictionRow {
    #[serde(rename = "predictionValues")]
    prediction_values: Vec<PredictionValue>,
}

#[derive(Debug, Deserialize)]
struct PredictionValue {
    value: f64,
}

/// Extract the single prediction value from a response body
pub fn parse_prediction(body: &str) -> Result<f64, RemoteError> {
    let response: PredictionResponse =
        serde_json::from_str(body).map_err(|e| RemoteError::MalformedResponse(e.to_string()))?;

    let [row] = response.data.as_slice() else {
        return Err(RemoteError::MalformedResponse(format!(
            "expected exactly one element in data, got {}",
            response.data.len()
        )));
    };

    row.prediction_values
        .first()
        .map(|p| p.value)
        .ok_or_else(|| RemoteError::MalformedResponse("empty predictionValues".to_string()))
}

/// Map a non-success status to the matching error
fn status_error(status: StatusCode, body: String) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Auth {
            status: status.as_u16(),
            body,
        },
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => RemoteError::Schema {
            status: status.as_u16(),
            message: body,
        },
        _ => RemoteError::HttpStatus {
            status: status.as_u16(),
            body,
        },
    }
}

/// HTTP client for a single prediction endpoint
pub struct RemoteScorer {
    client: Client,
    endpoint: String,
    headers: HeaderMap,
    /// Predictions by serialized record, when memoization is on
    memo: Option<RwLock<HashMap<String, f64>>>,
}

impl RemoteScorer {
    /// Build from configuration, reading the credential from the environment
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let token = config.api_token()?;
        Self::with_token(config, &token)
    }

    /// Build with an explicit bearer credential
    pub fn with_token(config: &RemoteConfig, token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).context("Invalid API token")?,
        );
        headers.insert(
            HeaderName::from_bytes(config.routing_key_header.as_bytes())
                .context("Invalid routing key header name")?,
            HeaderValue::from_str(&config.routing_key).context("Invalid routing key")?,
        );

        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().context("Failed to build HTTP client")?;

        info!(
            endpoint = %config.endpoint_url,
            memoize = config.memoize,
            timeout_secs = ?config.timeout_secs,
            "Remote scorer ready"
        );

        Ok(Self {
            client,
            endpoint: config.endpoint_url.clone(),
            headers,
            memo: config.memoize.then(|| RwLock::new(HashMap::new())),
        })
    }

    /// Prediction URL for a deployment under `base`
    pub fn endpoint_for(base: &str, deployment_id: &str) -> String {
        format!(
            "{}/predApi/v1.0/deployments/{}/predictions",
            base.trim_end_matches('/'),
            deployment_id
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn remembered(&self, payload: &str) -> Option<f64> {
        self.memo
            .as_ref()
            .and_then(|memo| memo.read().ok()?.get(payload).copied())
    }

    fn remember(&self, payload: String, value: f64) {
        if let Some(memo) = &self.memo {
            if let Ok(mut memo) = memo.write() {
                memo.insert(payload, value);
            }
        }
    }
}

#[async_trait]
impl RecordScorer for RemoteScorer {
    async fn predict_one(&self, row: RowView<'_>) -> Result<RecordPrediction, RemoteError> {
        let payload = serde_json::to_string(&[row.to_record()])?;

        if let Some(value) = self.remembered(&payload) {
            debug!(row = row.index(), value = value, "Reusing prediction for identical record");
            return Ok(RecordPrediction::cached(value));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .body(payload.clone())
            .send()
            .await
            .map_err(RemoteError::Network)?;

        let status = response.status();
        let body = response.text().await.map_err(RemoteError::Network)?;
        if !status.is_success() {
            return Err(status_error(status, body));
        }

        let value = parse_prediction(&body)?;
        debug!(row = row.index(), value = value, "Remote prediction received");

        self.remember(payload, value);
        Ok(RecordPrediction::fetched(value))
    }
}
