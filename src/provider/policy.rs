//! IAM policy model shared by Cloud Storage, Cloud KMS and Secret Manager.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Role to member bindings plus the etag used for optimistic locking
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    /// Members granted each role
    pub bindings: BTreeMap<String, BTreeSet<String>>,
    /// Etag of the policy as fetched; echoed on write so stale writes conflict
    pub etag: Option<String>,
    /// Policy schema version reported by the service
    pub version: Option<i32>,
}

impl Policy {
    /// Grant `role` to `member`; returns true if the binding was new
    pub fn add(&mut self, role: &str, member: &str) -> bool {
        self.bindings
            .entry(role.to_string())
            .or_default()
            .insert(member.to_string())
    }

    /// Remove `member` from `role`; missing bindings are ignored
    pub fn remove(&mut self, role: &str, member: &str) -> bool {
        let Some(members) = self.bindings.get_mut(role) else {
            return false;
        };
        let removed = members.remove(member);
        if members.is_empty() {
            self.bindings.remove(role);
        }
        removed
    }

    /// True if `member` holds `role`
    #[must_use]
    pub fn has(&self, role: &str, member: &str) -> bool {
        self.bindings
            .get(role)
            .is_some_and(|members| members.contains(member))
    }

    /// Members holding `role`, sorted
    #[must_use]
    pub fn members(&self, role: &str) -> Vec<&str> {
        self.bindings
            .get(role)
            .map(|members| members.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Union every binding from `other` into this policy
    pub fn merge(&mut self, other: &Policy) {
        for (role, members) in &other.bindings {
            for member in members {
                self.add(role, member);
            }
        }
    }
}

/// JSON shape of a policy on every Google REST API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct PolicyJson {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<BindingJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct BindingJson {
    pub role: String,
    #[serde(default)]
    pub members: Vec<String>,
}

impl From<PolicyJson> for Policy {
    fn from(json: PolicyJson) -> Self {
        let mut policy = Policy {
            etag: json.etag,
            version: json.version,
            ..Policy::default()
        };
        for binding in json.bindings {
            for member in binding.members {
                policy.add(&binding.role, &member);
            }
        }
        policy
    }
}

impl From<&Policy> for PolicyJson {
    fn from(policy: &Policy) -> Self {
        PolicyJson {
            bindings: policy
                .bindings
                .iter()
                .map(|(role, members)| BindingJson {
                    role: role.clone(),
                    members: members.iter().cloned().collect(),
                })
                .collect(),
            etag: policy.etag.clone(),
            version: policy.version,
        }
    }
}
