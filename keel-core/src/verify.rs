//! Verify - Read-only check that provisioned resources exist and are ready

use std::fmt;

use keel_state::StateFile;

use crate::config::ProjectConfig;
use crate::error::RunbookError;
use crate::provider::Provider;
use crate::resource::{Resource, ResourceId, kind};
use crate::runbook;

/// Which runbook's resources to check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyScope {
    Cluster,
    SecurityGroups,
    Databases,
}

impl fmt::Display for VerifyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VerifyScope::Cluster => "cluster",
            VerifyScope::SecurityGroups => "security-groups",
            VerifyScope::Databases => "databases",
        };
        f.write_str(name)
    }
}

/// Outcome of checking one resource
#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub id: ResourceId,
    pub exists: bool,
    pub status: Option<String>,
    /// Status the resource must have, for types that have one
    pub expected: Option<String>,
    pub passed: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifyReport {
    pub scope: VerifyScope,
    pub checks: Vec<Check>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

/// Resources the scope is expected to have created, keyed for lookup
pub fn expected_resources(
    config: &ProjectConfig,
    state: &StateFile,
    scope: VerifyScope,
) -> Vec<Resource> {
    let names = config.names();
    let vpc_id = state.identifier(kind::VPC, &names.vpc());
    let with_vpc = |resource: Resource| match vpc_id {
        Some(id) => resource.with_attribute("vpc_id", id),
        None => resource,
    };

    match scope {
        VerifyScope::Cluster => runbook::cluster::expected_resources(config, &names)
            .into_iter()
            .map(|r| {
                if r.id.resource_type == kind::SECURITY_GROUP {
                    with_vpc(r)
                } else {
                    r
                }
            })
            .collect(),
        VerifyScope::SecurityGroups => config
            .security_groups
            .iter()
            .map(|g| with_vpc(runbook::security_groups::security_group(g, &names)))
            .collect(),
        VerifyScope::Databases => {
            let mut resources: Vec<Resource> = Vec::new();
            for db in &config.databases {
                let group = runbook::databases::subnet_group(db, &names);
                if !resources.iter().any(|r| r.id == group.id) {
                    resources.push(group);
                }
                resources.push(runbook::databases::database(db, &names));
            }
            resources
        }
    }
}

/// Look up every expected resource and compare its status.
///
/// Provider errors on individual lookups fail that check and do not stop the
/// others.
pub async fn verify(
    provider: &dyn Provider,
    config: &ProjectConfig,
    state: &StateFile,
    scope: VerifyScope,
) -> Result<VerifyReport, RunbookError> {
    config.validate()?;
    let mut checks = Vec::new();

    for resource in expected_resources(config, state, scope) {
        let expected = provider
            .lifecycle(&resource.id.resource_type)
            .map(|l| l.success.to_string());

        let check = match provider.read(&resource).await {
            Ok(found) if !found.exists => Check {
                id: resource.id.clone(),
                exists: false,
                status: None,
                expected,
                passed: false,
                detail: Some("not found".to_string()),
            },
            Ok(found) => {
                let passed = match (&expected, &found.status) {
                    (Some(want), Some(have)) => want == have,
                    (Some(_), None) => false,
                    (None, _) => true,
                };
                Check {
                    id: resource.id.clone(),
                    exists: true,
                    detail: (!passed).then(|| {
                        format!(
                            "status {}",
                            found.status.as_deref().unwrap_or("unknown")
                        )
                    }),
                    status: found.status,
                    expected,
                    passed,
                }
            }
            Err(e) => Check {
                id: resource.id.clone(),
                exists: false,
                status: None,
                expected,
                passed: false,
                detail: Some(e.to_string()),
            },
        };

        log::debug!("verify {}: passed={}", check.id, check.passed);
        checks.push(check);
    }

    Ok(VerifyReport { scope, checks })
}
