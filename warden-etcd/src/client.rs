//! HTTP client for the etcd v2 keys API.
//!
//! Every conditional write maps onto a single etcd request, so atomicity is
//! provided by the server:
//!
//! | operation            | request                                        |
//! |----------------------|------------------------------------------------|
//! | `get`                | `GET /v2/keys/<key>`                           |
//! | `create_if_absent`   | `PUT /v2/keys/<key>?prevExist=false` (form)    |
//! | `compare_and_swap`   | `PUT /v2/keys/<key>?prevValue=<expected>` (form) |
//! | `compare_and_delete` | `DELETE /v2/keys/<key>?prevValue=<expected>`   |

use crate::config::{EtcdConfig, EtcdError};
use crate::wire::{ApiError, KeysResponse, Node};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};
use url::Url;
use warden_core::{
    CoordResult, CoordinationClient, CoordinationError, InstanceToken, LeaseKey, LeaseRecord,
};

/// `CoordinationClient` backed by one or more etcd members.
///
/// Requests go to the last endpoint that answered. On a transport error or a
/// 5xx status the next endpoint in list order is tried; only when all of them
/// fail does the call return `Unavailable`.
#[derive(Debug)]
pub struct EtcdClient {
    http: Client,
    endpoints: Vec<Url>,
    preferred: AtomicUsize,
}

impl EtcdClient {
    pub fn new(config: EtcdConfig) -> Result<Self, EtcdError> {
        if config.endpoints.is_empty() {
            return Err(EtcdError::NoEndpoints);
        }

        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("warden/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EtcdError::Client(e.to_string()))?;

        Ok(Self {
            http,
            endpoints: config.endpoints,
            preferred: AtomicUsize::new(0),
        })
    }

    pub fn endpoints(&self) -> &[Url] {
        &self.endpoints
    }

    /// Endpoint the next request will be sent to first.
    pub fn current_endpoint(&self) -> &Url {
        &self.endpoints[self.preferred.load(Ordering::Relaxed) % self.endpoints.len()]
    }

    async fn send<F>(
        &self,
        key: &LeaseKey,
        query: &[(&str, &str)],
        request: F,
    ) -> CoordResult<Option<Node>>
    where
        F: Fn(&Client, Url) -> RequestBuilder + Send + Sync,
    {
        let count = self.endpoints.len();
        let start = self.preferred.load(Ordering::Relaxed) % count;
        let mut last_error = String::new();

        for offset in 0..count {
            let index = (start + offset) % count;
            let endpoint = &self.endpoints[index];
            let url = key_url(endpoint, key, query)?;

            match request(&self.http, url).send().await {
                Ok(response) if response.status().is_server_error() => {
                    last_error = format!("{} returned {}", endpoint, response.status());
                    warn!("etcd endpoint {} failed: {}", endpoint, response.status());
                }
                Ok(response) => {
                    if index != start {
                        info!("Switched to etcd endpoint {}", endpoint);
                        self.preferred.store(index, Ordering::Relaxed);
                    }
                    return decode(response, key).await;
                }
                Err(e) => {
                    warn!("etcd endpoint {} unreachable: {}", endpoint, e);
                    last_error = e.to_string();
                }
            }
        }

        Err(CoordinationError::unavailable(format!(
            "all {} etcd endpoints failed, last error: {}",
            count, last_error
        )))
    }
}

#[async_trait]
impl CoordinationClient for EtcdClient {
    async fn get(&self, key: &LeaseKey) -> CoordResult<LeaseRecord> {
        debug!("etcd GET {}", key);
        let node = self.send(key, &[], |http, url| http.get(url)).await?;
        node.map(|node| node.into_record(key))
            .ok_or_else(|| CoordinationError::other(format!("etcd returned no node for {}", key)))
    }

    async fn create_if_absent(
        &self,
        key: &LeaseKey,
        value: &InstanceToken,
        ttl_secs: u64,
    ) -> CoordResult<()> {
        debug!("etcd CREATE {} = {} (ttl {}s)", key, value, ttl_secs);
        let form = lease_form(value, ttl_secs);
        self.send(key, &[("prevExist", "false")], |http, url| {
            http.put(url).form(&form)
        })
        .await
        .map(|_| ())
    }

    async fn compare_and_swap(
        &self,
        key: &LeaseKey,
        expected: &InstanceToken,
        ttl_secs: u64,
        new_value: &InstanceToken,
    ) -> CoordResult<()> {
        debug!("etcd CAS {} {} -> {} (ttl {}s)", key, expected, new_value, ttl_secs);
        let form = lease_form(new_value, ttl_secs);
        self.send(key, &[("prevValue", expected.as_str())], |http, url| {
            http.put(url).form(&form)
        })
        .await
        .map(|_| ())
    }

    async fn compare_and_delete(
        &self,
        key: &LeaseKey,
        expected: &InstanceToken,
    ) -> CoordResult<()> {
        debug!("etcd CAD {} if {}", key, expected);
        self.send(key, &[("prevValue", expected.as_str())], |http, url| {
            http.delete(url)
        })
        .await
        .map(|_| ())
    }
}

fn lease_form(value: &InstanceToken, ttl_secs: u64) -> Vec<(&'static str, String)> {
    vec![
        ("value", value.as_str().to_string()),
        ("ttl", ttl_secs.to_string()),
    ]
}

/// `<endpoint>/v2/keys/<key>?<query>`, with each key segment percent-encoded.
fn key_url(endpoint: &Url, key: &LeaseKey, query: &[(&str, &str)]) -> CoordResult<Url> {
    let mut url = endpoint.clone();
    {
        let mut segments = url.path_segments_mut().map_err(|_| {
            CoordinationError::other(format!("etcd endpoint {} cannot be a base URL", endpoint))
        })?;
        segments
            .pop_if_empty()
            .push("v2")
            .push("keys")
            .extend(key.as_str().split('/').filter(|segment| !segment.is_empty()));
    }

    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}

async fn decode(response: reqwest::Response, key: &LeaseKey) -> CoordResult<Option<Node>> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| CoordinationError::unavailable(format!("reading etcd response: {}", e)))?;

    if status.is_success() {
        let parsed: KeysResponse = serde_json::from_str(&body).map_err(|e| {
            CoordinationError::other(format!("malformed etcd response ({}): {}", status, e))
        })?;
        debug!("etcd {} on {} succeeded", parsed.action, key);
        return Ok(parsed.node);
    }

    match serde_json::from_str::<ApiError>(&body) {
        Ok(error) => Err(error.into_coordination(key)),
        Err(_) => Err(CoordinationError::other(format!(
            "unexpected etcd status {} for {}",
            status, key
        ))),
    }
}
