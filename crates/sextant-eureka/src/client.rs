//! HTTP client for the Eureka REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use sextant_core::{InstanceSource, RegistryError, Result, ServerInstance};
use tracing::debug;
use url::Url;

use crate::config::EurekaConfig;
use crate::convert::to_server_instance;
use crate::model::{
    ApplicationResponse, InstanceInfo, RegisterRequest, STATUS_OUT_OF_SERVICE, STATUS_UP,
};
use crate::SCHEME;

const JSON: &str = "application/json";

/// Outcome of a lease renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renewal {
    /// The lease was extended.
    Renewed,
    /// The server no longer knows the instance and it must register again.
    Unknown,
}

/// Client for one Eureka server.
#[derive(Debug, Clone)]
pub struct EurekaClient {
    http: Client,
    apps: Url,
}

impl EurekaClient {
    /// Creates a client from configuration.
    pub fn new(config: &EurekaConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RegistryError::backend(SCHEME, "connect", e))?;

        Ok(Self {
            http,
            apps: config.apps_url()?,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.apps.clone();
        url.path_segments_mut()
            .map_err(|()| RegistryError::backend(SCHEME, "url", "base URL cannot carry a path"))?
            .extend(segments);
        Ok(url)
    }

    async fn send(request: RequestBuilder, operation: &'static str) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|e| RegistryError::backend(SCHEME, operation, e))
    }

    async fn rejected(response: Response, operation: &'static str) -> RegistryError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        RegistryError::Rejected {
            backend: SCHEME,
            operation,
            status,
            body,
        }
    }

    async fn expect(response: Response, operation: &'static str, expected: StatusCode) -> Result<()> {
        if response.status() == expected {
            Ok(())
        } else {
            Err(Self::rejected(response, operation).await)
        }
    }

    /// Registers `instance` under its application. Eureka answers 204.
    pub async fn register(&self, instance: &InstanceInfo, timeout: Duration) -> Result<()> {
        let url = self.url(&[instance.app.as_str()])?;
        debug!(url = %url, instance_id = %instance.instance_id, "registering with eureka");

        let request = self
            .http
            .post(url)
            .timeout(timeout)
            .json(&RegisterRequest { instance });
        let response = Self::send(request, "register").await?;
        Self::expect(response, "register", StatusCode::NO_CONTENT).await
    }

    /// Cancels the lease of `instance_id`.
    pub async fn deregister(&self, app: &str, instance_id: &str, timeout: Duration) -> Result<()> {
        let request = self
            .http
            .delete(self.url(&[app, instance_id])?)
            .timeout(timeout);
        let response = Self::send(request, "deregister").await?;
        Self::expect(response, "deregister", StatusCode::OK).await
    }

    /// Renews the lease of `instance_id`.
    pub async fn heartbeat(&self, app: &str, instance_id: &str, timeout: Duration) -> Result<Renewal> {
        let request = self
            .http
            .put(self.url(&[app, instance_id])?)
            .timeout(timeout);
        let response = Self::send(request, "heartbeat").await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Renewal::Unknown);
        }
        Self::expect(response, "heartbeat", StatusCode::OK).await?;
        Ok(Renewal::Renewed)
    }

    /// Lists every instance of `app`. An unknown application has none.
    pub async fn application(&self, app: &str) -> Result<Vec<InstanceInfo>> {
        let request = self.http.get(self.url(&[app])?).header(ACCEPT, JSON);
        let response = Self::send(request, "lookup").await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Ok(Vec::new()),
            _ => return Err(Self::rejected(response, "lookup").await),
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RegistryError::backend(SCHEME, "lookup", e))?;
        let parsed: ApplicationResponse =
            serde_json::from_slice(&body).map_err(|e| RegistryError::malformed(SCHEME, e))?;
        Ok(parsed.application.instance)
    }

    /// Overrides the status of `instance_id` to `OUT_OF_SERVICE`.
    pub async fn take_out_of_service(&self, app: &str, instance_id: &str) -> Result<()> {
        let mut url = self.url(&[app, instance_id, "status"])?;
        url.query_pairs_mut().append_pair("value", STATUS_OUT_OF_SERVICE);

        let response = Self::send(self.http.put(url), "out of service").await?;
        Self::expect(response, "out of service", StatusCode::OK).await
    }

    /// Removes a status override, putting `instance_id` back in service.
    pub async fn clear_status_override(&self, app: &str, instance_id: &str) -> Result<()> {
        let mut url = self.url(&[app, instance_id, "status"])?;
        url.query_pairs_mut().append_pair("value", STATUS_UP);

        let response = Self::send(self.http.delete(url), "restore").await?;
        Self::expect(response, "restore", StatusCode::OK).await
    }
}

#[async_trait]
impl InstanceSource for EurekaClient {
    async fn fetch(&self, service: &str) -> Result<Vec<ServerInstance>> {
        Ok(self
            .application(service)
            .await?
            .iter()
            .map(|info| to_server_instance(service, info))
            .collect())
    }
}
