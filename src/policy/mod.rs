//! Access policies
//!
//! Google Cloud resources expose access control in two incompatible shapes:
//!
//! - binding-list IAM policies (`{"bindings": [{"role", "members"}], "etag"}`)
//!   used by projects, buckets, and most other services
//! - access-entry lists (`[{"role", "userByEmail"}]`) used by BigQuery
//!   datasets, tables, models and routines
//!
//! Both are modelled here; fields the engine does not interpret are kept in
//! `extra` so they survive a read-modify-write cycle.
//!
//! - [`merge`] - Idempotent grant merging for both shapes
//! - [`handler`] - Fetch/commit strategies per resource kind

pub mod handler;
pub mod merge;

use crate::error::BindingError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Suffix identifying service account emails
const SERVICE_ACCOUNT_DOMAIN: &str = ".gserviceaccount.com";

/// Binding-list IAM policy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IamPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    /// Concurrency token, echoed back unmodified on write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One role and the principals holding it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub role: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Binding {
    pub fn new(role: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            role: role.into(),
            members,
            condition: None,
            extra: Map::new(),
        }
    }
}

/// One entry of a BigQuery `access` list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessEntry {
    /// Absent on view/routine/dataset grants
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_by_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_member: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AccessEntry {
    /// Entry granting `role` to `principal`
    pub fn new(role: impl Into<String>, principal: &Principal) -> Self {
        let mut entry = Self {
            role: Some(role.into()),
            ..Default::default()
        };
        match principal {
            Principal::User(email) | Principal::ServiceAccount(email) => {
                entry.user_by_email = Some(email.clone())
            },
            Principal::Group(email) => entry.group_by_email = Some(email.clone()),
            Principal::Domain(domain) => entry.domain = Some(domain.clone()),
            Principal::AllAuthenticatedUsers => entry.special_group = Some(principal.id().to_string()),
            Principal::AllUsers => entry.iam_member = Some(principal.id().to_string()),
        }
        entry
    }

    /// Whether this entry names `principal`
    pub fn names(&self, principal: &Principal) -> bool {
        let field = match principal {
            Principal::User(_) | Principal::ServiceAccount(_) => &self.user_by_email,
            Principal::Group(_) => &self.group_by_email,
            Principal::Domain(_) => &self.domain,
            Principal::AllAuthenticatedUsers => &self.special_group,
            Principal::AllUsers => &self.iam_member,
        };
        field
            .as_deref()
            .is_some_and(|v| v.eq_ignore_ascii_case(principal.id()))
    }
}

/// Current access policy of a resource, in whichever shape it uses
#[derive(Debug, Clone, PartialEq)]
pub enum AccessPolicy {
    Bindings(IamPolicy),
    AccessEntries(Vec<AccessEntry>),
}

impl AccessPolicy {
    pub fn shape(&self) -> PolicyShape {
        match self {
            AccessPolicy::Bindings(_) => PolicyShape::BindingList,
            AccessPolicy::AccessEntries(_) => PolicyShape::AccessEntryList,
        }
    }

    /// Number of grants (binding members, or access entries)
    pub fn grant_count(&self) -> usize {
        match self {
            AccessPolicy::Bindings(policy) => policy.bindings.iter().map(|b| b.members.len()).sum(),
            AccessPolicy::AccessEntries(entries) => entries.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyShape {
    BindingList,
    AccessEntryList,
}

impl fmt::Display for PolicyShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyShape::BindingList => write!(f, "binding-list"),
            PolicyShape::AccessEntryList => write!(f, "access-entry-list"),
        }
    }
}

/// Identity being granted a role
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Principal {
    User(String),
    ServiceAccount(String),
    Group(String),
    Domain(String),
    /// Anyone on the internet (`allUsers`)
    AllUsers,
    /// Any signed-in Google account (`allAuthenticatedUsers`)
    AllAuthenticatedUsers,
}

impl Principal {
    /// Interpret a CSV principal column
    ///
    /// `user:`, `serviceAccount:`, `group:` and `domain:` prefixes are honoured.
    /// A bare address is a user unless it is a `*.gserviceaccount.com` address.
    /// `allUsers` and `allAuthenticatedUsers` are the IAM special members.
    /// An empty identity, with or without a prefix, is rejected.
    pub fn parse(value: &str) -> Result<Self, BindingError> {
        let value = value.trim();
        let invalid = || BindingError::InvalidPrincipal(value.to_string());

        match value {
            "" => return Err(invalid()),
            "allUsers" => return Ok(Principal::AllUsers),
            "allAuthenticatedUsers" => return Ok(Principal::AllAuthenticatedUsers),
            _ => {},
        }

        if let Some((prefix, rest)) = value.split_once(':') {
            let build: Option<fn(String) -> Principal> = match prefix {
                "user" => Some(Principal::User),
                "serviceAccount" => Some(Principal::ServiceAccount),
                "group" => Some(Principal::Group),
                "domain" => Some(Principal::Domain),
                _ => None,
            };
            if let Some(build) = build {
                let rest = rest.trim();
                if rest.is_empty() {
                    return Err(invalid());
                }
                return Ok(build(rest.to_string()));
            }
        }

        if value.to_ascii_lowercase().ends_with(SERVICE_ACCOUNT_DOMAIN) {
            Ok(Principal::ServiceAccount(value.to_string()))
        } else {
            Ok(Principal::User(value.to_string()))
        }
    }

    /// The email address or domain, without prefix
    pub fn id(&self) -> &str {
        match self {
            Principal::User(id)
            | Principal::ServiceAccount(id)
            | Principal::Group(id)
            | Principal::Domain(id) => id,
            Principal::AllUsers => "allUsers",
            Principal::AllAuthenticatedUsers => "allAuthenticatedUsers",
        }
    }

    /// IAM member string, e.g. `user:alice@example.com`
    pub fn member(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::User(id) => write!(f, "user:{}", id),
            Principal::ServiceAccount(id) => write!(f, "serviceAccount:{}", id),
            Principal::Group(id) => write!(f, "group:{}", id),
            Principal::Domain(id) => write!(f, "domain:{}", id),
            Principal::AllUsers | Principal::AllAuthenticatedUsers => f.write_str(self.id()),
        }
    }
}

/// A principal/role pair to be added to a policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub principal: Principal,
    pub role: String,
}

impl Grant {
    pub fn new(principal: &str, role: &str) -> Result<Self, BindingError> {
        Ok(Self {
            principal: Principal::parse(principal)?,
            role: role.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_principal_parse() {
        assert_eq!(
            Principal::parse("user1@example.com").unwrap(),
            Principal::User("user1@example.com".to_string())
        );
        assert_eq!(
            Principal::parse("etl@proj-1.iam.gserviceaccount.com").unwrap(),
            Principal::ServiceAccount("etl@proj-1.iam.gserviceaccount.com".to_string())
        );
        assert_eq!(
            Principal::parse("group:admins@example.com").unwrap(),
            Principal::Group("admins@example.com".to_string())
        );
        assert_eq!(
            Principal::parse("domain:example.com").unwrap().member(),
            "domain:example.com"
        );
        assert_eq!(Principal::parse(" a@b.com ").unwrap().member(), "user:a@b.com");
    }

    #[test]
    fn test_special_members_are_not_prefixed() {
        assert_eq!(Principal::parse("allUsers").unwrap(), Principal::AllUsers);
        assert_eq!(Principal::parse("allUsers").unwrap().member(), "allUsers");
        assert_eq!(
            Principal::parse(" allAuthenticatedUsers ").unwrap().member(),
            "allAuthenticatedUsers"
        );
    }

    #[test]
    fn test_empty_identity_is_rejected() {
        for value in ["", "   ", "user:", "group: ", "serviceAccount:", "domain:"] {
            let err = Principal::parse(value).unwrap_err();
            assert!(matches!(err, BindingError::InvalidPrincipal(_)), "{:?}", value);
        }
    }

    #[test]
    fn test_access_entries_for_special_members() {
        let public = AccessEntry::new("READER", &Principal::AllUsers);
        assert_eq!(
            serde_json::to_value(&public).unwrap(),
            json!({"role": "READER", "iamMember": "allUsers"})
        );
        assert!(public.names(&Principal::AllUsers));
        assert!(!public.names(&Principal::User("allUsers".to_string())));

        let signed_in = AccessEntry::new("READER", &Principal::AllAuthenticatedUsers);
        assert_eq!(
            serde_json::to_value(&signed_in).unwrap(),
            json!({"role": "READER", "specialGroup": "allAuthenticatedUsers"})
        );
        assert!(signed_in.names(&Principal::AllAuthenticatedUsers));
    }

    #[test]
    fn test_iam_policy_preserves_unknown_fields() {
        let raw = json!({
            "version": 3,
            "etag": "BwWWja0YfJA=",
            "auditConfigs": [{"service": "allServices"}],
            "bindings": [{
                "role": "roles/viewer",
                "members": ["user:eve@example.com"],
                "condition": {"title": "expirable", "expression": "true"}
            }]
        });
        let policy: IamPolicy = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(policy.etag.as_deref(), Some("BwWWja0YfJA="));
        assert!(policy.bindings[0].condition.is_some());
        assert_eq!(serde_json::to_value(&policy).unwrap(), raw);
    }

    #[test]
    fn test_access_entry_round_trips_other_grant_kinds() {
        let raw = json!([
            {"role": "OWNER", "specialGroup": "projectOwners"},
            {"view": {"projectId": "p", "datasetId": "d", "tableId": "v"}},
            {"role": "READER", "groupByEmail": "analysts@example.com"}
        ]);
        let entries: Vec<AccessEntry> = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(entries[1].role, None);
        assert!(entries[2].names(&Principal::Group("Analysts@example.com".to_string())));
        assert_eq!(serde_json::to_value(&entries).unwrap(), raw);
    }

    #[test]
    fn test_access_entry_for_service_account_uses_user_by_email() {
        let principal = Principal::parse("etl@p.iam.gserviceaccount.com").unwrap();
        let entry = AccessEntry::new("dataViewer", &principal);
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({"role": "dataViewer", "userByEmail": "etl@p.iam.gserviceaccount.com"})
        );
    }
}
