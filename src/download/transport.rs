//! Pluggable network transport for the download pipeline

use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use url::Url;

/// Streamed response body; each item is one chunk of bytes
pub type BodyStream = BoxStream<'static, std::io::Result<Vec<u8>>>;

/// A GET request handed to a [`NetworkTransport`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkRequest {
    /// Target URL
    pub url: Url,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Time allowed to establish the connection
    pub connect_timeout: Duration,
    /// Time allowed for the whole exchange
    pub read_timeout: Duration,
}

impl NetworkRequest {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response returned by a [`NetworkTransport`]
pub struct NetworkResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers with lowercase names
    pub headers: HashMap<String, String>,
    /// Response body
    pub body: BodyStream,
}

impl NetworkResponse {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

impl fmt::Debug for NetworkResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Performs HTTP-like requests on behalf of the download pipeline
///
/// Implementations return `Err` only when no response was obtained at all
/// (DNS, connect, TLS failures). Any status code, including errors, is an
/// `Ok` response.
#[async_trait]
pub trait NetworkTransport: Send + Sync {
    /// Send `request` and return the response head with a streamed body
    async fn connect(&self, request: NetworkRequest) -> Result<NetworkResponse>;
}

/// [`NetworkTransport`] backed by `reqwest`
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client from the network configuration
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NetworkTransport for ReqwestTransport {
    async fn connect(&self, request: NetworkRequest) -> Result<NetworkResponse> {
        let mut builder = self
            .client
            .get(request.url.clone())
            .timeout(request.read_timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(Error::Network)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let body = futures::stream::unfold(Some(response), |state| async move {
            let mut response = state?;
            match response.chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk.to_vec()), Some(response))),
                Ok(None) => None,
                Err(e) => Some((Err(std::io::Error::other(e)), None)),
            }
        })
        .boxed();

        Ok(NetworkResponse {
            status,
            headers,
            body,
        })
    }
}
