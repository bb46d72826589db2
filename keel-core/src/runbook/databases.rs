//! Database runbook: RDS instances and ElastiCache clusters

use keel_state::ResourceState;

use crate::config::{DatabaseConfig, Names};
use crate::error::RunbookError;
use crate::provisioner::ensure_with;
use crate::resource::{Resource, State, kind};
use crate::secret::{PASSWORD_LENGTH, generate_password};

use super::{ClusterStep, Runbook, StepReport, step_hint};

/// Secret key holding a relational database's master password
pub const MASTER_PASSWORD: &str = "master_password";

pub(crate) fn subnet_group(db: &DatabaseConfig, names: &Names) -> Resource {
    if db.engine.is_cache() {
        Resource::new(kind::CACHE_SUBNET_GROUP, names.cache_subnet_group())
            .with_attribute("description", format!("{} cache subnets", names.project()))
    } else {
        Resource::new(kind::DB_SUBNET_GROUP, names.db_subnet_group())
            .with_attribute("description", format!("{} database subnets", names.project()))
    }
}

pub(crate) fn database(db: &DatabaseConfig, names: &Names) -> Resource {
    let name = names.database(&db.name);
    let resource = if db.engine.is_cache() {
        Resource::new(kind::ELASTICACHE_CLUSTER, name)
            .with_attribute("node_type", db.instance_class())
            .with_attribute("num_cache_nodes", 1i64)
    } else {
        let mut resource = Resource::new(kind::RDS_INSTANCE, name)
            .with_attribute("instance_class", db.instance_class())
            .with_attribute("allocated_storage", i64::from(db.allocated_storage))
            .with_attribute("master_username", db.master_username.clone());
        if let Some(db_name) = &db.db_name {
            resource = resource.with_attribute("db_name", db_name.clone());
        }
        resource
    };

    let resource = resource
        .with_attribute("engine", db.engine.as_str())
        .with_attribute("port", i64::from(db.engine.default_port()));
    match &db.engine_version {
        Some(version) => resource.with_attribute("engine_version", version.clone()),
        None => resource,
    }
}

impl Runbook<'_> {
    /// Create every configured database, then wait for all of them
    pub async fn run_databases_all(&mut self) -> Result<Vec<StepReport>, RunbookError> {
        let config = self.config;
        let mut pending = Vec::new();
        for db in &config.databases {
            let mut report = StepReport::new(format!("Database {}", db.name));
            let (resource, state) = self.provision_database(db, &mut report).await?;
            pending.push((report, resource, state));
        }

        let policy = config.wait.database();
        let mut reports = Vec::new();
        for (mut report, resource, state) in pending {
            self.wait_until_ready(&resource, state, policy, &mut report)
                .await?;
            reports.push(report);
        }
        Ok(reports)
    }

    pub async fn run_database(&mut self, name: &str) -> Result<StepReport, RunbookError> {
        let config = self.config;
        let db = config.database(name).ok_or_else(|| {
            RunbookError::unknown_unit(
                "database",
                name,
                config.databases.iter().map(|d| d.name.as_str()),
            )
        })?;

        let mut report = StepReport::new(format!("Database {}", db.name));
        let (resource, state) = self.provision_database(db, &mut report).await?;
        self.wait_until_ready(&resource, state, config.wait.database(), &mut report)
            .await?;
        Ok(report)
    }

    /// Ensure the subnet group and the instance, without waiting
    async fn provision_database(
        &mut self,
        db: &DatabaseConfig,
        report: &mut StepReport,
    ) -> Result<(Resource, State), RunbookError> {
        let names = self.names();
        log::info!("database {} ({})", db.name, db.engine.as_str());

        let network = step_hint(ClusterStep::Network);
        let mut subnet_ids = Vec::new();
        for index in 0..self.config.network.private_subnets.len() {
            subnet_ids.push(self.require(kind::SUBNET, &names.private_subnet(index), &network)?);
        }
        let sg_id = self.require(
            kind::SECURITY_GROUP,
            &names.security_group(&db.security_group),
            &format!("run `keel security-groups --sg {}` first", db.security_group),
        )?;

        let group = subnet_group(db, &names).with_attribute("subnet_ids", subnet_ids);
        let group_name = self.ensure_id(&group, report).await?;

        let resource = database(db, &names).with_attribute("security_group_ids", vec![sg_id]);
        if db.engine.is_cache() {
            let resource = resource.with_attribute("cache_subnet_group_name", group_name);
            let state = self.ensure(&resource, report).await?;
            return Ok((resource, state));
        }

        let resource = resource.with_attribute("db_subnet_group_name", group_name);
        let name = resource.id.name.clone();
        let provisioner = self.provisioner();
        let this = &mut *self;
        let ensured = provisioner
            .ensure_prepared(&resource, move |desired| async move {
                let password = this.master_password(&name).await?;
                Ok::<_, RunbookError>(desired.with_attribute(MASTER_PASSWORD, password))
            })
            .await?;

        let state = self.settle(ensured, report).await?;
        if self
            .state
            .secret(kind::RDS_INSTANCE, &resource.id.name, MASTER_PASSWORD)
            .is_none()
        {
            report.notes.push(format!(
                "{} was not created by this tool; its master password is not available",
                resource.id.name
            ));
        }
        Ok((resource, state))
    }

    /// Stored master password, generated and persisted before the instance
    /// is created
    async fn master_password(&mut self, name: &str) -> Result<String, RunbookError> {
        let stored = self
            .state
            .secret(kind::RDS_INSTANCE, name, MASTER_PASSWORD)
            .map(str::to_string);
        let this = &mut *self;

        let (_, password) = ensure_with(
            "master password for",
            name,
            move || async move { Ok::<_, RunbookError>(stored) },
            move || async move {
                let password = generate_password(PASSWORD_LENGTH);
                this.state.upsert_resource(
                    ResourceState::new(kind::RDS_INSTANCE, name)
                        .with_secret(MASTER_PASSWORD, password.clone()),
                );
                this.persist().await?;
                Ok(password)
            },
        )
        .await?;
        Ok(password)
    }
}
