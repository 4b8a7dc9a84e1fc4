//! Endpoint list and transport settings for the etcd client.

use std::time::Duration;
use thiserror::Error;
use url::Url;
use warden_core::CoordinationError;

/// Default etcd client URL.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:2379";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors building an [`EtcdClient`](crate::EtcdClient).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EtcdError {
    #[error("No etcd endpoints configured")]
    NoEndpoints,

    #[error("Invalid etcd endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Cannot build HTTP client: {0}")]
    Client(String),
}

impl From<EtcdError> for CoordinationError {
    fn from(error: EtcdError) -> Self {
        CoordinationError::other(error.to_string())
    }
}

/// Configuration for the etcd v2 client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdConfig {
    /// Client URLs, tried in order on transport failures
    pub endpoints: Vec<Url>,
    /// Timeout of a single HTTP request
    pub request_timeout: Duration,
}

impl EtcdConfig {
    /// Build a configuration from endpoint strings such as `http://10.0.0.1:2379`.
    pub fn new<I, S>(endpoints: I) -> Result<Self, EtcdError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let endpoints = endpoints
            .into_iter()
            .map(|endpoint| parse_endpoint(endpoint.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        if endpoints.is_empty() {
            return Err(EtcdError::NoEndpoints);
        }

        Ok(Self {
            endpoints,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Parse a comma-separated endpoint list. Blank entries are ignored.
    pub fn from_list(list: &str) -> Result<Self, EtcdError> {
        Self::new(
            list.split(',')
                .map(str::trim)
                .filter(|endpoint| !endpoint.is_empty()),
        )
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url, EtcdError> {
    let invalid = |reason: String| EtcdError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };

    let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme {:?}", other))),
    }
    if url.cannot_be_a_base() || url.host().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}
