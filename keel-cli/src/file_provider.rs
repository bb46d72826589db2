//! File-backed rehearsal provider
//!
//! Records "created" resources in a JSON file so the runbooks can be
//! rehearsed without an AWS account. Every polled type reports its ready
//! status immediately.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use keel_core::provider::{
    BoxFuture, Preflight, Probe, Provider, ProviderError, ProviderResult, ResourceType,
};
use keel_core::resource::{Resource, ResourceId, SENSITIVE_ATTRIBUTES, State, Value, kind};
use uuid::Uuid;

/// Default store next to the state file
pub const DEFAULT_RESOURCES_FILE: &str = "keel.resources.json";

type Records = BTreeMap<String, serde_json::Value>;

pub struct FileProvider {
    store_file: PathBuf,
}

impl FileProvider {
    pub fn new(store_file: impl Into<PathBuf>) -> Self {
        Self {
            store_file: store_file.into(),
        }
    }

    fn load_records(&self) -> ProviderResult<Records> {
        if !self.store_file.exists() {
            return Ok(Records::new());
        }
        let content = fs::read_to_string(&self.store_file).map_err(|e| {
            ProviderError::new(format!(
                "Failed to read {}: {}",
                self.store_file.display(),
                e
            ))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ProviderError::new(format!(
                "Failed to parse {}: {}",
                self.store_file.display(),
                e
            ))
        })
    }

    fn save_records(&self, records: &Records) -> ProviderResult<()> {
        let content = serde_json::to_string_pretty(records)
            .map_err(|e| ProviderError::new(format!("Failed to serialize records: {}", e)))?;
        fs::write(&self.store_file, content).map_err(|e| {
            ProviderError::new(format!(
                "Failed to write {}: {}",
                self.store_file.display(),
                e
            ))
        })
    }

    fn resource_key(id: &ResourceId) -> String {
        id.to_string()
    }

    fn ready_status(&self, resource_type: &str) -> Option<&'static str> {
        self.lifecycle(resource_type).map(|l| l.success)
    }

    /// Identifier shaped like the one AWS would assign
    fn fake_identifier(resource_type: &str) -> String {
        let hex = Uuid::new_v4().simple().to_string();
        match resource_type {
            kind::VPC => format!("vpc-{}", &hex[..17]),
            kind::SUBNET => format!("subnet-{}", &hex[..17]),
            kind::INTERNET_GATEWAY => format!("igw-{}", &hex[..17]),
            kind::ROUTE_TABLE => format!("rtb-{}", &hex[..17]),
            kind::SECURITY_GROUP => format!("sg-{}", &hex[..17]),
            kind::ACCESS_KEY => format!("AKIA{}", hex[..16].to_uppercase()),
            _ => format!("rehearsal-{}", hex),
        }
    }

    fn to_state(&self, id: ResourceId, record: &serde_json::Value) -> State {
        let attributes = record
            .get("attributes")
            .and_then(|a| a.as_object())
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
                    .collect()
            })
            .unwrap_or_default();

        let mut state = State::existing(id, attributes);
        if let Some(identifier) = record.get("identifier").and_then(|i| i.as_str()) {
            state = state.with_identifier(identifier);
        }
        if let Some(status) = self.ready_status(&state.id.resource_type) {
            state = state.with_status(status);
        }
        state
    }
}

impl Provider for FileProvider {
    fn name(&self) -> &'static str {
        "file"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        keel_provider_aws::resources::resource_types()
    }

    fn read(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let id = resource.id.clone();
        Box::pin(async move {
            let records = self.load_records()?;
            match records.get(&Self::resource_key(&id)) {
                Some(record) => Ok(self.to_state(id, record)),
                None => Ok(State::not_found(id)),
            }
        })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move {
            let mut records = self.load_records()?;

            let attributes: serde_json::Map<String, serde_json::Value> = resource
                .attributes
                .iter()
                .filter(|(k, _)| !SENSITIVE_ATTRIBUTES.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect();
            let identifier = Self::fake_identifier(&resource.id.resource_type);
            let record = serde_json::json!({
                "identifier": identifier,
                "attributes": attributes,
            });

            let mut state = self.to_state(resource.id.clone(), &record);
            records.insert(Self::resource_key(&resource.id), record);
            self.save_records(&records)?;

            if resource.id.resource_type == kind::ACCESS_KEY {
                let secret = Uuid::new_v4().simple().to_string();
                state = state.with_secret("secret_access_key", secret);
            }
            Ok(state)
        })
    }

    fn preflight(&self) -> BoxFuture<'_, ProviderResult<Preflight>> {
        Box::pin(async move {
            let probes = ["ec2", "iam", "eks", "rds", "elasticache"]
                .into_iter()
                .map(Probe::passed)
                .collect();
            Ok(Preflight {
                account: "000000000000".to_string(),
                arn: format!("file://{}", self.store_file.display()),
                probes,
            })
        })
    }
}
