use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use thiserror::Error;

use crate::snapshot::{Snapshot, SnapshotError};

pub const DEFAULT_DATA_PATH: &str = "/api/data";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Timed out communicating with the inverter: {0}")]
    Timeout(String),
    #[error("Error communicating with the inverter: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("Inverter responded with status {0}")]
    Status(StatusCode),
    #[error("Cannot read inverter response body: {0}")]
    Body(#[source] reqwest::Error),
    #[error("Unexpected inverter payload: {0}")]
    Decode(#[from] SnapshotError),
}

impl FetchError {
    /// Timeouts are the expected failure of a device on a flaky local network.
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout(_))
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err.to_string())
        } else if err.is_decode() || err.is_body() {
            FetchError::Body(err)
        } else {
            FetchError::Transport(err)
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid inverter address [{address}]: {reason}")]
    InvalidUrl { address: String, reason: String },
    #[error("Cannot build http client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Source of inverter readings.
///
/// Implementations own their deadline: a fetch either returns a complete reading or fails,
/// and never retries on its own.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    async fn fetch_latest(&self) -> Result<Snapshot, FetchError>;
}

/// Http client for the inverter's local api.
#[derive(Debug, Clone)]
pub struct KStarClient {
    client: Client,
    url: Url,
}

impl KStarClient {
    pub fn new(host: &str, data_path: &str, timeout: Duration) -> Result<Self, ClientError> {
        let path = data_path.trim_start_matches('/');
        let address = format!("http://{}/{}", host, path);
        let url = Url::parse(&address).map_err(|err| ClientError::InvalidUrl {
            address: address.clone(),
            reason: err.to_string(),
        })?;
        let client = Client::builder().timeout(timeout).build()?;
        log::debug!("Inverter client for [{}] with timeout {:?}", url, timeout);
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl DeviceClient for KStarClient {
    async fn fetch_latest(&self) -> Result<Snapshot, FetchError> {
        log::trace!("Fetching latest reading from {}", self.url);
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body: Value = response.json().await.map_err(FetchError::from_reqwest)?;
        Ok(Snapshot::from_json(body)?)
    }
}
