//! Remote API boundary
//!
//! The binding engine never builds URLs or speaks HTTP itself. It asks an
//! [`ApiConnector`] for one [`ServiceApi`] handle per (service, version) pair
//! and issues the four operation shapes it needs through that handle.

use super::http::TransportError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// How a service exposes `getIamPolicy` / `setIamPolicy`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IamStyle {
    /// `POST {resource}:getIamPolicy` / `POST {resource}:setIamPolicy` with `{"policy": ...}`
    Rpc,
    /// `GET {resource}/iam` / `PUT {resource}/iam` with the bare policy (Cloud Storage)
    Rest,
    /// `GET {resource}/getIamPolicy` / `POST {resource}/setIamPolicy` with `{"policy": ...}` (Compute Engine)
    Compute,
}

/// Client handle for one API service at one version.
///
/// Resource paths are relative to the service root, e.g. `projects/p1` for
/// Resource Manager or `projects/p1/datasets/d1` for BigQuery.
#[async_trait]
pub trait ServiceApi: Send + Sync {
    async fn get_iam_policy(&self, resource: &str, style: IamStyle)
        -> Result<Value, TransportError>;

    async fn set_iam_policy(
        &self,
        resource: &str,
        style: IamStyle,
        policy: &Value,
    ) -> Result<Value, TransportError>;

    async fn get_resource(&self, resource: &str) -> Result<Value, TransportError>;

    async fn patch_resource(&self, resource: &str, body: &Value)
        -> Result<Value, TransportError>;
}

/// Builds service handles; the engine caches what it returns
#[async_trait]
pub trait ApiConnector: Send + Sync {
    async fn connect(
        &self,
        service: &str,
        version: &str,
    ) -> Result<Arc<dyn ServiceApi>, TransportError>;
}
