//! GCP Client
//!
//! REST implementation of the [`ServiceApi`] boundary, combining
//! authentication and HTTP functionality.

use super::api::{ApiConnector, IamStyle, ServiceApi};
use super::auth::GcpCredentials;
use super::http::{GcpHttpClient, TransportError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use url::Url;

/// Build the root URL of a service's REST API.
///
/// With an endpoint override (emulators, tests) the Google host is replaced
/// but the service-specific path prefix is kept.
pub fn service_base_url(service: &str, version: &str, endpoint: Option<&Url>) -> String {
    let host = |default: String| match endpoint {
        Some(url) => url.as_str().trim_end_matches('/').to_string(),
        None => default,
    };

    match service {
        "storage" => format!(
            "{}/storage/{}",
            host("https://storage.googleapis.com".to_string()),
            version
        ),
        "bigquery" => format!(
            "{}/bigquery/{}",
            host("https://bigquery.googleapis.com".to_string()),
            version
        ),
        "compute" => format!(
            "{}/compute/{}",
            host("https://compute.googleapis.com".to_string()),
            version
        ),
        _ => format!(
            "{}/{}",
            host(format!("https://{}.googleapis.com", service)),
            version
        ),
    }
}

/// Client for one GCP service at one API version
#[derive(Clone)]
pub struct GcpClient {
    pub credentials: GcpCredentials,
    pub http: GcpHttpClient,
    pub base_url: String,
}

impl GcpClient {
    pub fn new(credentials: GcpCredentials, http: GcpHttpClient, base_url: String) -> Self {
        Self {
            credentials,
            http,
            base_url,
        }
    }

    /// Get the current access token
    pub async fn get_token(&self) -> Result<String, TransportError> {
        Ok(self.credentials.get_token().await?)
    }

    /// Absolute URL for a resource path under this service
    pub fn url(&self, resource: &str) -> String {
        format!("{}/{}", self.base_url, resource.trim_start_matches('/'))
    }
}

#[async_trait]
impl ServiceApi for GcpClient {
    async fn get_iam_policy(
        &self,
        resource: &str,
        style: IamStyle,
    ) -> Result<Value, TransportError> {
        let token = self.get_token().await?;
        match style {
            IamStyle::Rpc => {
                let url = self.url(&format!("{}:getIamPolicy", resource));
                self.http.post(&url, &token, Some(&json!({}))).await
            },
            IamStyle::Rest => {
                let url = self.url(&format!("{}/iam", resource));
                self.http.get(&url, &token).await
            },
            IamStyle::Compute => {
                let url = self.url(&format!("{}/getIamPolicy", resource));
                self.http.get(&url, &token).await
            },
        }
    }

    async fn set_iam_policy(
        &self,
        resource: &str,
        style: IamStyle,
        policy: &Value,
    ) -> Result<Value, TransportError> {
        let token = self.get_token().await?;
        match style {
            IamStyle::Rpc => {
                let url = self.url(&format!("{}:setIamPolicy", resource));
                let body = json!({ "policy": policy });
                self.http.post(&url, &token, Some(&body)).await
            },
            IamStyle::Rest => {
                let url = self.url(&format!("{}/iam", resource));
                self.http.put(&url, &token, policy).await
            },
            IamStyle::Compute => {
                let url = self.url(&format!("{}/setIamPolicy", resource));
                let body = json!({ "policy": policy });
                self.http.post(&url, &token, Some(&body)).await
            },
        }
    }

    async fn get_resource(&self, resource: &str) -> Result<Value, TransportError> {
        let token = self.get_token().await?;
        self.http.get(&self.url(resource), &token).await
    }

    async fn patch_resource(&self, resource: &str, body: &Value) -> Result<Value, TransportError> {
        let token = self.get_token().await?;
        self.http.patch(&self.url(resource), &token, body).await
    }
}

/// Connector producing [`GcpClient`] handles that share one HTTP client and
/// one credential cache
#[derive(Clone)]
pub struct RestConnector {
    credentials: GcpCredentials,
    http: GcpHttpClient,
    endpoint: Option<Url>,
}

impl RestConnector {
    pub fn new(credentials: GcpCredentials, user_agent: &str) -> Result<Self, TransportError> {
        Ok(Self {
            credentials,
            http: GcpHttpClient::new(user_agent)?,
            endpoint: None,
        })
    }

    /// Send every service's traffic to `endpoint` instead of `*.googleapis.com`
    pub fn with_endpoint(mut self, endpoint: Option<Url>) -> Self {
        self.endpoint = endpoint;
        self
    }
}

#[async_trait]
impl ApiConnector for RestConnector {
    async fn connect(
        &self,
        service: &str,
        version: &str,
    ) -> Result<Arc<dyn ServiceApi>, TransportError> {
        let base_url = service_base_url(service, version, self.endpoint.as_ref());
        tracing::debug!("Creating API client for {} {} at {}", service, version, base_url);

        Ok(Arc::new(GcpClient::new(
            self.credentials.clone(),
            self.http.clone(),
            base_url,
        )))
    }
}
