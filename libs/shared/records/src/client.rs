use std::time::Duration;

use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION},
    Client, StatusCode,
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;

#[derive(Error, Debug)]
pub enum RecordsError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Records API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid header value for {0}")]
    InvalidHeader(&'static str),

    #[error("Failed to parse response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Thin client for the hospital records backend.
pub struct RecordsClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RecordsClient {
    pub fn new(config: &AppConfig) -> Result<Self, RecordsError> {
        // The scan controller applies its own deadline; this one only bounds connect.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.lookup_timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            base_url: config.records_api_url.trim_end_matches('/').to_string(),
            api_key: config.records_api_key.clone(),
        })
    }

    fn headers(&self, auth_token: Option<&str>) -> Result<HeaderMap, RecordsError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(key).map_err(|_| RecordsError::InvalidHeader("apikey"))?;
            headers.insert("apikey", value);
        }

        if let Some(token) = auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| RecordsError::InvalidHeader("authorization"))?;
            headers.insert(AUTHORIZATION, value);
        }

        Ok(headers)
    }

    /// GET `path` and decode the JSON body. 404 is reported as `NotFound`,
    /// every other non-success status as `Status`.
    pub async fn get_json<T>(&self, path: &str, auth_token: Option<&str>) -> Result<T, RecordsError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making request to {}", url);

        let response = self
            .client
            .get(&url)
            .headers(self.headers(auth_token)?)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::NOT_FOUND {
            debug!("Records API returned 404 for {}", path);
            return Err(RecordsError::NotFound(path.to_string()));
        }

        if !status.is_success() {
            error!("Records API error ({}): {}", status, body);
            return Err(RecordsError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}
