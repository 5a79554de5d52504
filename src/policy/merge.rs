//! Binding Merger
//!
//! Adds one grant to a policy. Existing entries are never removed or
//! reordered; a grant that is already present leaves the policy untouched and
//! is reported as [`MergeOutcome::AlreadyGranted`], so running the same
//! request twice yields a single grant.

use super::{AccessEntry, AccessPolicy, Binding, Grant, IamPolicy};

/// Role prefix BigQuery access entries omit
const BIGQUERY_ROLE_PREFIX: &str = "roles/bigquery.";

/// Result of merging one grant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Nothing to commit
    AlreadyGranted,
    /// Principal appended to an existing binding for the role
    MemberAdded,
    /// New binding or access entry appended
    EntryAdded,
}

impl MergeOutcome {
    pub fn is_noop(self) -> bool {
        self == MergeOutcome::AlreadyGranted
    }
}

/// Merge a grant into a policy of either shape
pub fn merge(policy: &mut AccessPolicy, grant: &Grant) -> MergeOutcome {
    match policy {
        AccessPolicy::Bindings(policy) => merge_binding(policy, grant),
        AccessPolicy::AccessEntries(entries) => merge_access_entry(entries, grant),
    }
}

/// Merge into a binding-list policy. `version` and `etag` are left as fetched.
///
/// Conditional bindings are not considered a match: granting unconditionally
/// must not widen or reuse a binding guarded by a condition.
pub fn merge_binding(policy: &mut IamPolicy, grant: &Grant) -> MergeOutcome {
    let member = grant.principal.member();

    let existing = policy
        .bindings
        .iter_mut()
        .find(|b| b.role == grant.role && b.condition.is_none());

    match existing {
        Some(binding) => {
            if binding
                .members
                .iter()
                .any(|m| m.eq_ignore_ascii_case(&member))
            {
                return MergeOutcome::AlreadyGranted;
            }
            binding.members.push(member);
            MergeOutcome::MemberAdded
        },
        None => {
            policy
                .bindings
                .push(Binding::new(grant.role.clone(), vec![member]));
            MergeOutcome::EntryAdded
        },
    }
}

/// Merge into a BigQuery access list
pub fn merge_access_entry(entries: &mut Vec<AccessEntry>, grant: &Grant) -> MergeOutcome {
    let role = normalize_access_role(&grant.role);

    let exists = entries.iter().any(|entry| {
        entry
            .role
            .as_deref()
            .is_some_and(|r| same_access_role(r, &role))
            && entry.names(&grant.principal)
    });

    if exists {
        return MergeOutcome::AlreadyGranted;
    }

    entries.push(AccessEntry::new(role, &grant.principal));
    MergeOutcome::EntryAdded
}

/// `roles/bigquery.dataViewer` -> `dataViewer`; other roles are kept as given
pub fn normalize_access_role(role: &str) -> String {
    role.strip_prefix(BIGQUERY_ROLE_PREFIX)
        .unwrap_or(role)
        .to_string()
}

/// BigQuery reports basic roles in their legacy spelling
fn canonical_access_role(role: &str) -> &str {
    match role {
        "READER" => "dataViewer",
        "WRITER" => "dataEditor",
        "OWNER" => "dataOwner",
        other => other.strip_prefix(BIGQUERY_ROLE_PREFIX).unwrap_or(other),
    }
}

fn same_access_role(a: &str, b: &str) -> bool {
    canonical_access_role(a) == canonical_access_role(b)
}
