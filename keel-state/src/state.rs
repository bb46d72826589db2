//! State file structures for persisting provisioning state

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{BackendError, BackendResult};

/// Placeholder printed instead of a secret value
pub const MASKED: &str = "********";

/// The main state file structure that persists to the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State file format version
    pub version: u32,
    /// Monotonically increasing number for each state modification
    pub serial: u64,
    /// Unique identifier for this state lineage
    pub lineage: String,
    /// Version of keel that last modified this state
    pub keel_version: String,
    /// Project prefix this state belongs to (recorded on first write)
    #[serde(default)]
    pub project: Option<String>,
    /// All recorded resources
    pub resources: Vec<ResourceState>,
}

impl StateFile {
    /// Current state file format version
    pub const CURRENT_VERSION: u32 = 1;

    /// Create a new empty state file
    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage: uuid::Uuid::new_v4().to_string(),
            keel_version: env!("CARGO_PKG_VERSION").to_string(),
            project: None,
            resources: Vec::new(),
        }
    }

    /// Create a new empty state file bound to a project
    pub fn for_project(project: impl Into<String>) -> Self {
        Self {
            project: Some(project.into()),
            ..Self::new()
        }
    }

    /// Increment serial and update keel version for a new state write
    pub fn increment_serial(&mut self) {
        self.serial += 1;
        self.keel_version = env!("CARGO_PKG_VERSION").to_string();
    }

    /// Reject a state file recorded for a different project.
    ///
    /// A state file without a project is claimed by the given one.
    pub fn claim(&mut self, project: &str) -> BackendResult<()> {
        match &self.project {
            Some(recorded) if recorded != project => Err(BackendError::ProjectMismatch {
                expected: project.to_string(),
                actual: recorded.clone(),
            }),
            Some(_) => Ok(()),
            None => {
                self.project = Some(project.to_string());
                Ok(())
            }
        }
    }

    /// Find a resource by type and name
    pub fn find_resource(&self, resource_type: &str, name: &str) -> Option<&ResourceState> {
        self.resources
            .iter()
            .find(|r| r.resource_type == resource_type && r.name == name)
    }

    /// Find a resource mutably by type and name
    pub fn find_resource_mut(
        &mut self,
        resource_type: &str,
        name: &str,
    ) -> Option<&mut ResourceState> {
        self.resources
            .iter_mut()
            .find(|r| r.resource_type == resource_type && r.name == name)
    }

    /// Identifier recorded for a resource, if any
    pub fn identifier(&self, resource_type: &str, name: &str) -> Option<&str> {
        self.find_resource(resource_type, name)
            .and_then(|r| r.identifier.as_deref())
    }

    /// String attribute recorded for a resource, if any
    pub fn attribute_str(&self, resource_type: &str, name: &str, key: &str) -> Option<&str> {
        self.find_resource(resource_type, name)
            .and_then(|r| r.attributes.get(key))
            .and_then(|v| v.as_str())
    }

    /// Secret recorded for a resource, if any
    pub fn secret(&self, resource_type: &str, name: &str, key: &str) -> Option<&str> {
        self.find_resource(resource_type, name)
            .and_then(|r| r.secrets.get(key))
            .map(|s| s.as_str())
    }

    /// Add or update a resource in the state.
    ///
    /// Identifier and attributes from the incoming record win. Secrets are
    /// write-once: a key already stored is never replaced.
    pub fn upsert_resource(&mut self, resource: ResourceState) {
        if let Some(existing) = self.find_resource_mut(&resource.resource_type, &resource.name) {
            if resource.identifier.is_some() {
                existing.identifier = resource.identifier;
            }
            existing.attributes.extend(resource.attributes);
            for (key, value) in resource.secrets {
                existing.secrets.entry(key).or_insert(value);
            }
            if existing.created_at.is_none() {
                existing.created_at = resource.created_at;
            }
        } else {
            self.resources.push(resource);
        }
    }

    /// Flatten the state into `KEY=value` pairs, sorted by key.
    ///
    /// Keys are `<TYPE>_<NAME>_<ATTRIBUTE>` in upper snake case; the identifier
    /// is exported as `<TYPE>_<NAME>_ID`. Secrets are masked unless requested.
    pub fn outputs(&self, show_secrets: bool) -> Vec<(String, String)> {
        let mut outputs = Vec::new();

        for resource in &self.resources {
            let prefix = format!(
                "{}_{}",
                output_key(&resource.resource_type),
                output_key(&resource.name)
            );

            if let Some(identifier) = &resource.identifier {
                outputs.push((format!("{}_ID", prefix), identifier.clone()));
            }

            for (key, value) in &resource.attributes {
                let rendered = match value {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => continue,
                    other => other.to_string(),
                };
                outputs.push((format!("{}_{}", prefix, output_key(key)), rendered));
            }

            for (key, value) in &resource.secrets {
                let rendered = if show_secrets {
                    value.clone()
                } else {
                    MASKED.to_string()
                };
                outputs.push((format!("{}_{}", prefix, output_key(key)), rendered));
            }
        }

        outputs.sort_by(|a, b| a.0.cmp(&b.0));
        outputs
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

fn output_key(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// State of a single recorded resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource type (e.g., "vpc", "eks_cluster")
    pub resource_type: String,
    /// Deterministic, project-prefixed resource name
    pub name: String,
    /// Provider identifier (e.g., vpc-xxx, an ARN)
    #[serde(default)]
    pub identifier: Option<String>,
    /// Discovered attributes (endpoints, ids) as JSON values
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Generated credentials; written once, never rotated
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, String>,
    /// When this resource was first recorded
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ResourceState {
    /// Create a new resource state
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            identifier: None,
            attributes: BTreeMap::new(),
            secrets: BTreeMap::new(),
            created_at: Some(Utc::now()),
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Set an attribute value
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_file_new() {
        let state = StateFile::new();
        assert_eq!(state.version, StateFile::CURRENT_VERSION);
        assert_eq!(state.serial, 0);
        assert!(!state.lineage.is_empty());
        assert!(state.project.is_none());
        assert!(state.resources.is_empty());
    }

    #[test]
    fn test_state_file_increment_serial() {
        let mut state = StateFile::new();
        state.increment_serial();
        state.increment_serial();
        assert_eq!(state.serial, 2);
    }

    #[test]
    fn test_claim_unbound_state() {
        let mut state = StateFile::new();
        state.claim("acme").unwrap();
        assert_eq!(state.project.as_deref(), Some("acme"));
        state.claim("acme").unwrap();
    }

    #[test]
    fn test_claim_rejects_other_project() {
        let mut state = StateFile::for_project("acme");
        match state.claim("globex") {
            Err(BackendError::ProjectMismatch { expected, actual }) => {
                assert_eq!(expected, "globex");
                assert_eq!(actual, "acme");
            }
            other => panic!("Expected ProjectMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_upsert_replaces_identifier_and_merges_attributes() {
        let mut state = StateFile::new();
        state.upsert_resource(
            ResourceState::new("eks_cluster", "acme-cluster")
                .with_identifier("arn:1")
                .with_attribute("status", serde_json::json!("CREATING")),
        );
        state.upsert_resource(
            ResourceState::new("eks_cluster", "acme-cluster")
                .with_attribute("status", serde_json::json!("ACTIVE"))
                .with_attribute("endpoint", serde_json::json!("https://example")),
        );

        assert_eq!(state.resources.len(), 1);
        assert_eq!(state.identifier("eks_cluster", "acme-cluster"), Some("arn:1"));
        assert_eq!(
            state.attribute_str("eks_cluster", "acme-cluster", "status"),
            Some("ACTIVE")
        );
        assert_eq!(
            state.attribute_str("eks_cluster", "acme-cluster", "endpoint"),
            Some("https://example")
        );
    }

    #[test]
    fn test_secrets_are_write_once() {
        let mut state = StateFile::new();
        state.upsert_resource(
            ResourceState::new("rds_instance", "acme-postgres").with_secret("password", "first"),
        );
        state.upsert_resource(
            ResourceState::new("rds_instance", "acme-postgres")
                .with_secret("password", "second")
                .with_secret("username", "app"),
        );

        assert_eq!(
            state.secret("rds_instance", "acme-postgres", "password"),
            Some("first")
        );
        assert_eq!(
            state.secret("rds_instance", "acme-postgres", "username"),
            Some("app")
        );
    }

    #[test]
    fn test_outputs_mask_secrets() {
        let mut state = StateFile::new();
        state.upsert_resource(
            ResourceState::new("access_key", "acme-admin-key")
                .with_identifier("AKIA123")
                .with_secret("secret_access_key", "shh"),
        );

        let masked = state.outputs(false);
        assert!(masked.contains(&(
            "ACCESS_KEY_ACME_ADMIN_KEY_ID".to_string(),
            "AKIA123".to_string()
        )));
        assert!(masked.contains(&(
            "ACCESS_KEY_ACME_ADMIN_KEY_SECRET_ACCESS_KEY".to_string(),
            MASKED.to_string()
        )));

        let shown = state.outputs(true);
        assert!(shown.contains(&(
            "ACCESS_KEY_ACME_ADMIN_KEY_SECRET_ACCESS_KEY".to_string(),
            "shh".to_string()
        )));
    }

    #[test]
    fn test_outputs_render_non_string_values() {
        let mut state = StateFile::new();
        state.upsert_resource(
            ResourceState::new("rds_instance", "acme-postgres")
                .with_attribute("port", serde_json::json!(5432))
                .with_attribute("unused", serde_json::Value::Null),
        );

        let outputs = state.outputs(false);
        assert_eq!(
            outputs,
            vec![(
                "RDS_INSTANCE_ACME_POSTGRES_PORT".to_string(),
                "5432".to_string()
            )]
        );
    }

    #[test]
    fn test_state_file_serialization() {
        let mut state = StateFile::for_project("acme");
        state.upsert_resource(
            ResourceState::new("vpc", "acme-vpc")
                .with_identifier("vpc-123")
                .with_attribute("cidr_block", serde_json::json!("10.0.0.0/16")),
        );

        let json = serde_json::to_string_pretty(&state).unwrap();
        assert!(!json.contains("secrets"));
        let deserialized: StateFile = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.lineage, state.lineage);
        assert_eq!(deserialized.project.as_deref(), Some("acme"));
        assert_eq!(deserialized.identifier("vpc", "acme-vpc"), Some("vpc-123"));
    }
}
