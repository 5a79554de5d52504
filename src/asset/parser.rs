//! Asset Name Parser
//!
//! Turns a fully-qualified asset name such as
//! `//bigquery.googleapis.com/projects/p1/datasets/d1` into named resource
//! coordinates by matching it against the asset type's registered pattern.

use super::registry::AssetTypeRegistry;
use crate::error::BindingError;
use std::collections::BTreeMap;

/// Coordinate names for positional capture groups of the built-in kinds
fn semantic_names(kind: &str) -> Option<&'static [&'static str]> {
    match kind {
        "project" => Some(&["project_id"]),
        "bucket" => Some(&["bucket_name"]),
        "dataset" => Some(&["project_id", "dataset_id"]),
        "table" => Some(&["project_id", "dataset_id", "table_id"]),
        "model" => Some(&["project_id", "dataset_id", "model_id"]),
        "routine" => Some(&["project_id", "dataset_id", "routine_id"]),
        "instance" => Some(&["project_id", "zone", "instance_id"]),
        _ => None,
    }
}

/// Named values extracted from one asset name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceCoordinates {
    values: BTreeMap<String, String>,
}

impl ResourceCoordinates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|s| s.as_str())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ResourceCoordinates {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut coordinates = Self::new();
        for (k, v) in iter {
            coordinates.insert(k, v);
        }
        coordinates
    }
}

/// Parse `asset_name` against the pattern registered for `asset_type`
///
/// Groups written as `(?P<name>...)` keep their own names. Otherwise the
/// built-in kinds get semantic names (`project_id`, `dataset_id`, ...) and
/// everything else is numbered `resource_1`, `resource_2`, ... in group order.
pub fn parse(
    registry: &AssetTypeRegistry,
    asset_name: &str,
    asset_type: &str,
) -> Result<ResourceCoordinates, BindingError> {
    let descriptor = registry
        .get(asset_type)
        .ok_or_else(|| BindingError::UnsupportedAssetType(asset_type.to_string()))?;

    let regex = descriptor
        .regex()
        .map_err(|source| BindingError::InvalidPattern {
            asset_type: asset_type.to_string(),
            source,
        })?;

    let captures = regex
        .captures(asset_name)
        .ok_or_else(|| BindingError::InvalidAssetName {
            asset_name: asset_name.to_string(),
            asset_type: asset_type.to_string(),
        })?;

    let mut coordinates = ResourceCoordinates::new();

    let has_named_groups = regex.capture_names().flatten().next().is_some();
    if has_named_groups {
        for name in regex.capture_names().flatten() {
            if let Some(m) = captures.name(name) {
                coordinates.insert(name, m.as_str());
            }
        }
        return Ok(coordinates);
    }

    // Group 0 is the whole match
    let group_count = regex.captures_len() - 1;
    let names = semantic_names(&descriptor.resource_type).filter(|n| n.len() == group_count);

    for index in 1..=group_count {
        let Some(m) = captures.get(index) else {
            continue;
        };
        match names {
            Some(names) => coordinates.insert(names[index - 1], m.as_str()),
            None => coordinates.insert(format!("resource_{}", index), m.as_str()),
        }
    }

    tracing::trace!("Parsed {} as {:?}", asset_name, coordinates);
    Ok(coordinates)
}

impl AssetTypeRegistry {
    /// Parse an asset name against this registry; see [`parse`]
    pub fn parse(
        &self,
        asset_name: &str,
        asset_type: &str,
    ) -> Result<ResourceCoordinates, BindingError> {
        parse(self, asset_name, asset_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::registry::AssetTypeDescriptor;

    fn coords(pairs: &[(&str, &str)]) -> ResourceCoordinates {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_parse_bucket() {
        let registry = AssetTypeRegistry::new();
        let parsed = registry
            .parse(
                "//storage.googleapis.com/projects/_/buckets/b1",
                "storage.googleapis.com/Bucket",
            )
            .unwrap();
        assert_eq!(parsed, coords(&[("bucket_name", "b1")]));
    }

    #[test]
    fn test_parse_project() {
        let registry = AssetTypeRegistry::new();
        let parsed = registry
            .parse(
                "//cloudresourcemanager.googleapis.com/projects/proj-1",
                "cloudresourcemanager.googleapis.com/Project",
            )
            .unwrap();
        assert_eq!(parsed, coords(&[("project_id", "proj-1")]));
    }

    #[test]
    fn test_parse_bigquery_kinds() {
        let registry = AssetTypeRegistry::new();

        let dataset = registry
            .parse(
                "//bigquery.googleapis.com/projects/p1/datasets/d1",
                "bigquery.googleapis.com/Dataset",
            )
            .unwrap();
        assert_eq!(dataset, coords(&[("project_id", "p1"), ("dataset_id", "d1")]));

        let table = registry
            .parse(
                "//bigquery.googleapis.com/projects/p1/datasets/d1/tables/t1",
                "bigquery.googleapis.com/Table",
            )
            .unwrap();
        assert_eq!(table.get("table_id"), Some("t1"));
        assert_eq!(table.get("dataset_id"), Some("d1"));

        let model = registry
            .parse(
                "//bigquery.googleapis.com/projects/p1/datasets/d1/models/m1",
                "bigquery.googleapis.com/Model",
            )
            .unwrap();
        assert_eq!(model.get("model_id"), Some("m1"));

        let routine = registry
            .parse(
                "//bigquery.googleapis.com/projects/p1/datasets/d1/routines/r1",
                "bigquery.googleapis.com/Routine",
            )
            .unwrap();
        assert_eq!(routine.get("routine_id"), Some("r1"));
    }

    #[test]
    fn test_pattern_is_anchored_at_start_only() {
        let registry = AssetTypeRegistry::new();
        let err = registry
            .parse(
                "prefix//cloudresourcemanager.googleapis.com/projects/proj-1",
                "cloudresourcemanager.googleapis.com/Project",
            )
            .unwrap_err();
        assert!(matches!(err, BindingError::InvalidAssetName { .. }));

        // trailing text is tolerated
        let parsed = registry
            .parse(
                "//bigquery.googleapis.com/projects/p1/datasets/d1/tables/t1",
                "bigquery.googleapis.com/Dataset",
            )
            .unwrap();
        assert_eq!(parsed.get("dataset_id"), Some("d1"));
    }

    #[test]
    fn test_unregistered_type_is_unsupported() {
        let registry = AssetTypeRegistry::new();
        let err = registry
            .parse("//x/y", "compute.googleapis.com/Instance")
            .unwrap_err();
        assert!(matches!(err, BindingError::UnsupportedAssetType(t) if t == "compute.googleapis.com/Instance"));
    }

    #[test]
    fn test_instance_kind_gets_semantic_names() {
        let mut registry = AssetTypeRegistry::new();
        registry.register(AssetTypeDescriptor::new(
            "compute.googleapis.com/Instance",
            "compute",
            "v1",
            "setIamPolicy",
            "instance",
            r"//compute\.googleapis\.com/projects/([^/]+)/zones/([^/]+)/instances/([^/]+)",
        ));

        let parsed = registry
            .parse(
                "//compute.googleapis.com/projects/p1/zones/us-east1-b/instances/vm-1",
                "compute.googleapis.com/Instance",
            )
            .unwrap();
        assert_eq!(
            parsed,
            coords(&[("project_id", "p1"), ("zone", "us-east1-b"), ("instance_id", "vm-1")])
        );
    }

    #[test]
    fn test_custom_type_gets_numbered_coordinates() {
        let mut registry = AssetTypeRegistry::new();
        registry.register(AssetTypeDescriptor::new(
            "cloudfunctions.googleapis.com/Function",
            "cloudfunctions",
            "v1",
            "setIamPolicy",
            "function",
            r"//cloudfunctions\.googleapis\.com/projects/([^/]+)/locations/([^/]+)/functions/([^/]+)",
        ));

        let parsed = registry
            .parse(
                "//cloudfunctions.googleapis.com/projects/p1/locations/us-central1/functions/f1",
                "cloudfunctions.googleapis.com/Function",
            )
            .unwrap();
        assert_eq!(
            parsed,
            coords(&[
                ("resource_1", "p1"),
                ("resource_2", "us-central1"),
                ("resource_3", "f1"),
            ])
        );
    }

    #[test]
    fn test_named_groups_keep_their_names() {
        let mut registry = AssetTypeRegistry::new();
        registry.register(AssetTypeDescriptor::new(
            "pubsub.googleapis.com/Topic",
            "pubsub",
            "v1",
            "setIamPolicy",
            "topic",
            r"//pubsub\.googleapis\.com/projects/(?P<project_id>[^/]+)/topics/(?P<topic_id>[^/]+)",
        ));

        let parsed = registry
            .parse(
                "//pubsub.googleapis.com/projects/p1/topics/events",
                "pubsub.googleapis.com/Topic",
            )
            .unwrap();
        assert_eq!(parsed, coords(&[("project_id", "p1"), ("topic_id", "events")]));
    }

    #[test]
    fn test_invalid_pattern_surfaces_on_parse() {
        let mut registry = AssetTypeRegistry::new();
        registry
            .update_pattern("bigquery.googleapis.com/Dataset", "([")
            .unwrap();
        let err = registry
            .parse("//bigquery.googleapis.com/projects/p/datasets/d", "bigquery.googleapis.com/Dataset")
            .unwrap_err();
        assert!(matches!(err, BindingError::InvalidPattern { .. }));
    }
}
