//! HTTP client for the Consul agent and health APIs.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use sextant_core::{InstanceSource, RegistryError, Result, ServerInstance};
use tracing::debug;
use url::Url;

use crate::config::ConsulConfig;
use crate::convert::to_server_instance;
use crate::model::{ServiceEntry, ServiceRegistration};
use crate::SCHEME;

const TOKEN_HEADER: &str = "x-consul-token";

/// Client for one Consul agent.
#[derive(Debug, Clone)]
pub struct ConsulClient {
    http: Client,
    api: Url,
    datacenter: Option<String>,
}

impl ConsulClient {
    /// Creates a client from configuration.
    pub fn new(config: &ConsulConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(token).map_err(|e| {
                RegistryError::InvalidConnectionString {
                    input: config.address.clone(),
                    reason: format!("invalid token: {e}"),
                }
            })?;
            value.set_sensitive(true);
            headers.insert(TOKEN_HEADER, value);
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| RegistryError::backend(SCHEME, "connect", e))?;

        Ok(Self {
            http,
            api: config.api_url()?,
            datacenter: config.datacenter.clone(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api.clone();
        url.path_segments_mut()
            .map_err(|()| RegistryError::backend(SCHEME, "url", "base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(request: RequestBuilder, operation: &'static str) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|e| RegistryError::backend(SCHEME, operation, e))
    }

    async fn expect_ok(response: Response, operation: &'static str) -> Result<Response> {
        if response.status() == StatusCode::OK {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(RegistryError::Rejected {
            backend: SCHEME,
            operation,
            status,
            body,
        })
    }

    /// Registers a service instance and its check with the agent.
    pub async fn register(&self, registration: &ServiceRegistration) -> Result<()> {
        let url = self.url(&["agent", "service", "register"])?;
        debug!(url = %url, instance_id = %registration.id, "registering with consul");

        let response = Self::send(self.http.put(url).json(registration), "register").await?;
        Self::expect_ok(response, "register").await.map(drop)
    }

    /// Removes a service instance from the agent.
    pub async fn deregister(&self, id: &str) -> Result<()> {
        let url = self.url(&["agent", "service", "deregister", id])?;
        let response = Self::send(self.http.put(url), "deregister").await?;
        Self::expect_ok(response, "deregister").await.map(drop)
    }

    /// Health entries of `service` carrying every tag in `tags`.
    ///
    /// An unknown service has none.
    pub async fn health(&self, service: &str, tags: &[String]) -> Result<Vec<ServiceEntry>> {
        let mut url = self.url(&["health", "service", service])?;
        {
            let mut query = url.query_pairs_mut();
            for tag in tags {
                query.append_pair("tag", tag);
            }
            if let Some(dc) = &self.datacenter {
                query.append_pair("dc", dc);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        let response = Self::send(self.http.get(url), "lookup").await?;
        let response = Self::expect_ok(response, "lookup").await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| RegistryError::backend(SCHEME, "lookup", e))?;

        serde_json::from_slice(&body).map_err(|e| RegistryError::malformed(SCHEME, e))
    }
}

#[async_trait]
impl InstanceSource for ConsulClient {
    async fn fetch(&self, service: &str) -> Result<Vec<ServerInstance>> {
        Ok(self
            .health(service, &[])
            .await?
            .iter()
            .map(|entry| to_server_instance(service, entry))
            .collect())
    }
}
