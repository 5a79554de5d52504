//! Policy handlers
//!
//! A handler knows how to read and write the access policy of one resource
//! kind. Two strategies cover every built-in kind:
//!
//! - [`BindingListHandler`] - `getIamPolicy` / `setIamPolicy` (projects, buckets, instances)
//! - [`AccessListHandler`] - resource `get` / `patch` of the `access` list
//!   (BigQuery datasets, tables, models, routines)
//!
//! Both are driven by a resource path template such as
//! `projects/{project_id}/datasets/{dataset_id}`, so custom kinds registered
//! through a config document can reuse them. Anything more exotic implements
//! [`PolicyHandler`] directly.

use super::merge::{self, MergeOutcome};
use super::{AccessEntry, AccessPolicy, Grant, IamPolicy};
use crate::asset::ResourceCoordinates;
use crate::error::BindingError;
use crate::gcp::api::{IamStyle, ServiceApi};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// The resource a handler operates on
#[derive(Debug, Clone, Copy)]
pub struct PolicyTarget<'a> {
    pub asset_type: &'a str,
    pub coordinates: &'a ResourceCoordinates,
    /// Project from the request, for kinds whose asset name omits it
    pub project_id: Option<&'a str>,
}

impl PolicyTarget<'_> {
    /// Render a `{coordinate}` path template, URL-encoding each value
    pub fn render_path(&self, template: &str) -> Result<String, BindingError> {
        let mut path = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find('{') {
            path.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let Some(end) = after.find('}') else {
                path.push_str(&rest[start..]);
                return Ok(path);
            };

            let name = &after[..end];
            let value = self.coordinate(name).ok_or_else(|| BindingError::MissingCoordinate {
                coordinate: name.to_string(),
                asset_type: self.asset_type.to_string(),
            })?;
            path.push_str(&urlencoding::encode(value));
            rest = &after[end + 1..];
        }

        path.push_str(rest);
        Ok(path)
    }

    fn coordinate(&self, name: &str) -> Option<&str> {
        self.coordinates.get(name).or(match name {
            "project_id" => self.project_id.filter(|p| !p.is_empty()),
            _ => None,
        })
    }
}

/// Fetch / merge / commit capability set for one resource kind
#[async_trait]
pub trait PolicyHandler: Send + Sync {
    /// Read the current policy
    async fn fetch(
        &self,
        api: &dyn ServiceApi,
        target: &PolicyTarget<'_>,
    ) -> Result<AccessPolicy, BindingError>;

    /// Add the grant to the fetched policy
    fn merge(&self, policy: &mut AccessPolicy, grant: &Grant) -> MergeOutcome {
        merge::merge(policy, grant)
    }

    /// Write the merged policy back, returning the raw API response
    async fn commit(
        &self,
        api: &dyn ServiceApi,
        target: &PolicyTarget<'_>,
        policy: &AccessPolicy,
    ) -> Result<Value, BindingError>;
}

/// IAM policy handler (`getIamPolicy` / `setIamPolicy`)
#[derive(Debug, Clone)]
pub struct BindingListHandler {
    path_template: String,
    style: IamStyle,
}

impl BindingListHandler {
    /// `POST {path}:getIamPolicy` style, used by most services
    pub fn rpc(path_template: impl Into<String>) -> Self {
        Self {
            path_template: path_template.into(),
            style: IamStyle::Rpc,
        }
    }

    /// `GET {path}/iam` style, used by Cloud Storage
    pub fn rest(path_template: impl Into<String>) -> Self {
        Self {
            path_template: path_template.into(),
            style: IamStyle::Rest,
        }
    }

    /// `GET {path}/getIamPolicy` style, used by Compute Engine
    pub fn compute(path_template: impl Into<String>) -> Self {
        Self {
            path_template: path_template.into(),
            style: IamStyle::Compute,
        }
    }
}

#[async_trait]
impl PolicyHandler for BindingListHandler {
    async fn fetch(
        &self,
        api: &dyn ServiceApi,
        target: &PolicyTarget<'_>,
    ) -> Result<AccessPolicy, BindingError> {
        let path = target.render_path(&self.path_template)?;
        let response = api.get_iam_policy(&path, self.style).await?;

        if response.is_null() {
            return Ok(AccessPolicy::Bindings(IamPolicy::default()));
        }

        let policy: IamPolicy = serde_json::from_value(response)
            .map_err(|e| BindingError::MalformedPolicy(format!("{}: {}", path, e)))?;
        Ok(AccessPolicy::Bindings(policy))
    }

    async fn commit(
        &self,
        api: &dyn ServiceApi,
        target: &PolicyTarget<'_>,
        policy: &AccessPolicy,
    ) -> Result<Value, BindingError> {
        let AccessPolicy::Bindings(policy) = policy else {
            return Err(BindingError::MalformedPolicy(format!(
                "{} expects a binding-list policy, got {}",
                target.asset_type,
                policy.shape()
            )));
        };

        let path = target.render_path(&self.path_template)?;
        let body = serde_json::to_value(policy)
            .map_err(|e| BindingError::MalformedPolicy(e.to_string()))?;
        Ok(api.set_iam_policy(&path, self.style, &body).await?)
    }
}

/// BigQuery-style `access` list handler (resource `get` / `patch`)
#[derive(Debug, Clone)]
pub struct AccessListHandler {
    path_template: String,
}

impl AccessListHandler {
    pub fn new(path_template: impl Into<String>) -> Self {
        Self {
            path_template: path_template.into(),
        }
    }
}

#[async_trait]
impl PolicyHandler for AccessListHandler {
    async fn fetch(
        &self,
        api: &dyn ServiceApi,
        target: &PolicyTarget<'_>,
    ) -> Result<AccessPolicy, BindingError> {
        let path = target.render_path(&self.path_template)?;
        let resource = api.get_resource(&path).await?;

        let entries = match resource.get("access") {
            None | Some(Value::Null) => Vec::new(),
            Some(access) => serde_json::from_value::<Vec<AccessEntry>>(access.clone())
                .map_err(|e| BindingError::MalformedPolicy(format!("{}: {}", path, e)))?,
        };
        Ok(AccessPolicy::AccessEntries(entries))
    }

    async fn commit(
        &self,
        api: &dyn ServiceApi,
        target: &PolicyTarget<'_>,
        policy: &AccessPolicy,
    ) -> Result<Value, BindingError> {
        let AccessPolicy::AccessEntries(entries) = policy else {
            return Err(BindingError::MalformedPolicy(format!(
                "{} expects an access-entry-list policy, got {}",
                target.asset_type,
                policy.shape()
            )));
        };

        let path = target.render_path(&self.path_template)?;
        // Partial update: only the access list is sent
        let body = json!({ "access": entries });
        Ok(api.patch_resource(&path, &body).await?)
    }
}

/// Policy handlers keyed by resource kind
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn PolicyHandler>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Handlers for the built-in kinds, plus Compute Engine instances
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("project", BindingListHandler::rpc("projects/{project_id}"));
        registry.register(
            "instance",
            BindingListHandler::compute("projects/{project_id}/zones/{zone}/instances/{instance_id}"),
        );
        registry.register("bucket", BindingListHandler::rest("b/{bucket_name}"));
        registry.register(
            "dataset",
            AccessListHandler::new("projects/{project_id}/datasets/{dataset_id}"),
        );
        registry.register(
            "table",
            AccessListHandler::new("projects/{project_id}/datasets/{dataset_id}/tables/{table_id}"),
        );
        registry.register(
            "model",
            AccessListHandler::new("projects/{project_id}/datasets/{dataset_id}/models/{model_id}"),
        );
        registry.register(
            "routine",
            AccessListHandler::new(
                "projects/{project_id}/datasets/{dataset_id}/routines/{routine_id}",
            ),
        );
        registry
    }

    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Install (or replace) the handler for a resource kind
    pub fn register(&mut self, kind: impl Into<String>, handler: impl PolicyHandler + 'static) {
        self.register_arc(kind, Arc::new(handler));
    }

    pub fn register_arc(&mut self, kind: impl Into<String>, handler: Arc<dyn PolicyHandler>) {
        let kind = kind.into();
        tracing::debug!("Registered policy handler for kind: {}", kind);
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn PolicyHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target<'a>(coordinates: &'a ResourceCoordinates, project_id: Option<&'a str>) -> PolicyTarget<'a> {
        PolicyTarget {
            asset_type: "bigquery.googleapis.com/Table",
            coordinates,
            project_id,
        }
    }

    #[test]
    fn test_render_path() {
        let coordinates: ResourceCoordinates =
            [("project_id", "p1"), ("dataset_id", "d1"), ("table_id", "t 1")]
                .into_iter()
                .collect();
        let path = target(&coordinates, None)
            .render_path("projects/{project_id}/datasets/{dataset_id}/tables/{table_id}")
            .unwrap();
        assert_eq!(path, "projects/p1/datasets/d1/tables/t%201");
    }

    #[test]
    fn test_render_path_falls_back_to_request_project() {
        let coordinates: ResourceCoordinates = [("resource_1", "topic-a")].into_iter().collect();
        let path = target(&coordinates, Some("proj-9"))
            .render_path("projects/{project_id}/topics/{resource_1}")
            .unwrap();
        assert_eq!(path, "projects/proj-9/topics/topic-a");
    }

    #[test]
    fn test_render_path_prefers_asset_project_over_request() {
        let coordinates: ResourceCoordinates =
            [("project_id", "from-name"), ("dataset_id", "d1")].into_iter().collect();
        let path = target(&coordinates, Some("from-row"))
            .render_path("projects/{project_id}/datasets/{dataset_id}")
            .unwrap();
        assert_eq!(path, "projects/from-name/datasets/d1");
    }

    #[test]
    fn test_instance_handler_path() {
        let coordinates: ResourceCoordinates =
            [("project_id", "p1"), ("zone", "us-east1-b"), ("instance_id", "vm-1")]
                .into_iter()
                .collect();
        let path = target(&coordinates, None)
            .render_path("projects/{project_id}/zones/{zone}/instances/{instance_id}")
            .unwrap();
        assert_eq!(path, "projects/p1/zones/us-east1-b/instances/vm-1");
    }

    #[test]
    fn test_render_path_missing_coordinate() {
        let coordinates = ResourceCoordinates::new();
        let err = target(&coordinates, Some(""))
            .render_path("projects/{project_id}")
            .unwrap_err();
        assert!(matches!(err, BindingError::MissingCoordinate { coordinate, .. } if coordinate == "project_id"));
    }

    #[test]
    fn test_builtin_handlers() {
        let handlers = HandlerRegistry::new();
        assert_eq!(
            handlers.kinds(),
            vec!["bucket", "dataset", "instance", "model", "project", "routine", "table"]
        );
        assert!(!handlers.contains("topic"));
    }
}
