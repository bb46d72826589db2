//! Runbook - Ordered, resumable provisioning steps
//!
//! A [`Runbook`] owns the state file for one invocation. Every resource it
//! ensures is written to state immediately, so a later step (or a later run
//! after an interruption) finds the identifiers it depends on.

pub(crate) mod cluster;
pub(crate) mod databases;
pub(crate) mod security_groups;

pub use cluster::ClusterStep;
pub use databases::MASTER_PASSWORD;

use keel_state::{ResourceState, StateBackend, StateFile};
use tokio_util::sync::CancellationToken;

use crate::config::{Names, ProjectConfig};
use crate::error::RunbookError;
use crate::provider::{Provider, ProviderError};
use crate::provisioner::{Ensured, Provisioner};
use crate::resource::{Resource, SENSITIVE_ATTRIBUTES, State};
use crate::waiter::{WaitPolicy, WaitTarget, wait_for};

/// A resource that reached its ready status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub label: String,
    pub status: String,
}

/// What one step or unit did
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub title: String,
    pub results: Vec<Ensured>,
    pub waited: Vec<Readiness>,
    pub notes: Vec<String>,
}

impl StepReport {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            results: Vec::new(),
            waited: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn created(&self) -> usize {
        self.results.iter().filter(|r| r.created()).count()
    }
}

pub struct Runbook<'a> {
    provider: &'a dyn Provider,
    config: &'a ProjectConfig,
    backend: &'a dyn StateBackend,
    state: StateFile,
    cancel: CancellationToken,
}

impl<'a> Runbook<'a> {
    /// Validate the configuration and load the project's state
    pub async fn open(
        provider: &'a dyn Provider,
        config: &'a ProjectConfig,
        backend: &'a dyn StateBackend,
        cancel: CancellationToken,
    ) -> Result<Runbook<'a>, RunbookError> {
        config.validate()?;
        let state = backend.load(&config.project).await?;
        log::debug!(
            "loaded state from {} (serial {}, {} resources)",
            backend.location(),
            state.serial,
            state.resources.len()
        );

        Ok(Self {
            provider,
            config,
            backend,
            state,
            cancel,
        })
    }

    pub fn state(&self) -> &StateFile {
        &self.state
    }

    pub fn into_state(self) -> StateFile {
        self.state
    }

    fn names(&self) -> Names {
        self.config.names()
    }

    /// Ensure a resource and record the result before returning
    async fn ensure(
        &mut self,
        resource: &Resource,
        report: &mut StepReport,
    ) -> Result<State, RunbookError> {
        let ensured = self.provisioner().ensure(resource).await?;
        self.settle(ensured, report).await
    }

    fn provisioner(&self) -> Provisioner<'a> {
        let config = self.config;
        Provisioner::new(self.provider, &config.project)
    }

    /// Record an ensured resource and add it to the report
    async fn settle(
        &mut self,
        ensured: Ensured,
        report: &mut StepReport,
    ) -> Result<State, RunbookError> {
        self.record(&ensured.state).await?;
        let state = ensured.state.clone();
        report.results.push(ensured);
        Ok(state)
    }

    /// Ensure a resource and return its identifier
    async fn ensure_id(
        &mut self,
        resource: &Resource,
        report: &mut StepReport,
    ) -> Result<String, RunbookError> {
        let state = self.ensure(resource, report).await?;
        state.identifier.ok_or_else(|| {
            ProviderError::new("no identifier returned")
                .for_resource(resource.id.clone())
                .into()
        })
    }

    /// Write an observed resource to state and persist it
    async fn record(&mut self, state: &State) -> Result<(), RunbookError> {
        let mut record = ResourceState::new(&state.id.resource_type, &state.id.name);
        record.identifier = state.identifier.clone();
        for (key, value) in &state.attributes {
            if key == "tags" || SENSITIVE_ATTRIBUTES.contains(&key.as_str()) {
                continue;
            }
            record.attributes.insert(key.clone(), value.to_json());
        }
        if let Some(status) = &state.status {
            record
                .attributes
                .insert("status".to_string(), serde_json::Value::from(status.clone()));
        }
        record.secrets = state.secrets.clone();

        self.state.upsert_resource(record);
        self.persist().await
    }

    async fn persist(&mut self) -> Result<(), RunbookError> {
        self.backend.persist(&mut self.state).await?;
        Ok(())
    }

    /// Identifier recorded by an earlier step
    fn require(&self, resource_type: &str, name: &str, hint: &str) -> Result<String, RunbookError> {
        self.state
            .identifier(resource_type, name)
            .map(str::to_string)
            .ok_or_else(|| RunbookError::prerequisite(format!("{}.{}", resource_type, name), hint))
    }

    /// Poll a resource until it is ready, then record its final state.
    ///
    /// Types without a lifecycle and resources already at their success
    /// status return immediately.
    async fn wait_until_ready(
        &mut self,
        resource: &Resource,
        current: State,
        policy: WaitPolicy,
        report: &mut StepReport,
    ) -> Result<State, RunbookError> {
        let Some(lifecycle) = self.provider.lifecycle(&resource.id.resource_type) else {
            return Ok(current);
        };
        let label = resource.id.to_string();
        if current.status.as_deref() == Some(lifecycle.success) {
            report.waited.push(Readiness {
                label,
                status: lifecycle.success.to_string(),
            });
            return Ok(current);
        }

        let target = WaitTarget::from_lifecycle(&label, &lifecycle);
        let provider = self.provider;
        let outcome = wait_for(
            || {
                let read = provider.read(resource);
                async move { read.await.map(|s| if s.exists { s.status } else { None }) }
            },
            &target,
            &policy,
            &self.cancel,
        )
        .await?;
        let status = outcome.into_ready(&label)?;

        let ready = self.provider.read(resource).await?;
        self.record(&ready).await?;
        report.waited.push(Readiness { label, status });
        Ok(ready)
    }
}

fn step_hint(step: ClusterStep) -> String {
    format!("run `keel cluster --step {}` first", step.number())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::kind;
    use crate::testing::FakeProvider;
    use keel_state::LocalBackend;
    use std::time::Duration;

    pub(crate) fn test_config() -> ProjectConfig {
        let mut config = ProjectConfig {
            project: "acme".to_string(),
            ..Default::default()
        };
        config.wait.propagation_delay_secs = 0;
        config
    }

    #[tokio::test]
    async fn open_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("state.json"));
        let provider = FakeProvider::new();
        let config = ProjectConfig::default();

        let result = Runbook::open(&provider, &config, &backend, CancellationToken::new()).await;
        assert!(matches!(result, Err(RunbookError::Config(_))));
    }

    #[tokio::test]
    async fn ensure_persists_and_strips_sensitive_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("state.json"));
        let provider = FakeProvider::new();
        let config = test_config();
        let mut runbook = Runbook::open(&provider, &config, &backend, CancellationToken::new())
            .await
            .unwrap();

        let mut report = StepReport::new("test");
        let resource = Resource::new(kind::RDS_INSTANCE, "acme-postgres")
            .with_attribute("engine", "postgres")
            .with_attribute("master_password", "hunter2");
        runbook.ensure(&resource, &mut report).await.unwrap();

        let persisted = backend.read_state().await.unwrap().unwrap();
        let record = persisted
            .find_resource(kind::RDS_INSTANCE, "acme-postgres")
            .unwrap();
        assert_eq!(record.attributes.get("engine"), Some(&serde_json::json!("postgres")));
        assert!(!record.attributes.contains_key("master_password"));
        assert!(!record.attributes.contains_key("tags"));
        assert_eq!(persisted.serial, 1);
        assert_eq!(report.created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_ready_records_final_status() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("state.json"));
        let provider = FakeProvider::new().with_statuses(
            kind::EKS_CLUSTER,
            &["CREATING", "CREATING", "ACTIVE"],
        );
        let config = test_config();
        let mut runbook = Runbook::open(&provider, &config, &backend, CancellationToken::new())
            .await
            .unwrap();

        let mut report = StepReport::new("test");
        let cluster = Resource::new(kind::EKS_CLUSTER, "acme-cluster");
        let created = runbook.ensure(&cluster, &mut report).await.unwrap();
        assert_eq!(created.status.as_deref(), Some("CREATING"));

        let policy = WaitPolicy::new(Duration::from_secs(30), Duration::from_secs(900));
        let ready = runbook
            .wait_until_ready(&cluster, created, policy, &mut report)
            .await
            .unwrap();

        assert_eq!(ready.status.as_deref(), Some("ACTIVE"));
        assert_eq!(
            runbook
                .state()
                .attribute_str(kind::EKS_CLUSTER, "acme-cluster", "status"),
            Some("ACTIVE")
        );
        assert_eq!(report.waited.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_ready_fails_on_failure_status() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::with_path(dir.path().join("state.json"));
        let provider =
            FakeProvider::new().with_statuses(kind::RDS_INSTANCE, &["creating", "failed"]);
        let config = test_config();
        let mut runbook = Runbook::open(&provider, &config, &backend, CancellationToken::new())
            .await
            .unwrap();

        let mut report = StepReport::new("test");
        let db = Resource::new(kind::RDS_INSTANCE, "acme-postgres");
        let created = runbook.ensure(&db, &mut report).await.unwrap();
        let err = runbook
            .wait_until_ready(&db, created, config.wait.database(), &mut report)
            .await
            .unwrap_err();

        match err {
            RunbookError::WaitFailed { label, status } => {
                assert_eq!(label, "rds_instance.acme-postgres");
                assert_eq!(status, "failed");
            }
            other => panic!("Expected WaitFailed, got {:?}", other),
        }
    }
}
