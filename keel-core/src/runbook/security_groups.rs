//! Security group runbook

use std::collections::BTreeMap;

use crate::config::{ConfigError, IngressRule, Names, SecurityGroupConfig, order_security_groups};
use crate::error::RunbookError;
use crate::resource::{Resource, Value, kind};

use super::{ClusterStep, Runbook, StepReport, step_hint};

pub(crate) fn security_group(group: &SecurityGroupConfig, names: &Names) -> Resource {
    let description = if group.description.is_empty() {
        format!("{} security group", group.name)
    } else {
        group.description.clone()
    };
    Resource::new(kind::SECURITY_GROUP, names.security_group(&group.name))
        .with_attribute("description", description)
}

fn source_hint(source: &str) -> String {
    format!("run `keel security-groups --sg {}` first", source)
}

impl Runbook<'_> {
    pub async fn run_security_groups_all(&mut self) -> Result<Vec<StepReport>, RunbookError> {
        let config = self.config;
        let ordered = order_security_groups(&config.security_groups).map_err(|cycle| {
            RunbookError::Config(ConfigError::Invalid(vec![format!(
                "security group sources form a cycle through '{}'",
                cycle
            )]))
        })?;

        let mut reports = Vec::new();
        for group in ordered {
            reports.push(self.security_group_unit(group).await?);
        }
        Ok(reports)
    }

    pub async fn run_security_group(&mut self, name: &str) -> Result<StepReport, RunbookError> {
        let config = self.config;
        let group = config.security_group(name).ok_or_else(|| {
            RunbookError::unknown_unit(
                "security group",
                name,
                config.security_groups.iter().map(|g| g.name.as_str()),
            )
        })?;
        self.security_group_unit(group).await
    }

    async fn security_group_unit(
        &mut self,
        group: &SecurityGroupConfig,
    ) -> Result<StepReport, RunbookError> {
        let names = self.names();
        log::info!("security group {}", group.name);
        let mut report = StepReport::new(format!("Security group {}", group.name));

        let vpc_id = self.require(kind::VPC, &names.vpc(), &step_hint(ClusterStep::Network))?;
        let mut ingress = Vec::new();
        for rule in &group.ingress {
            ingress.push(self.ingress_value(rule, &names)?);
        }

        let resource = security_group(group, &names)
            .with_attribute("vpc_id", vpc_id)
            .with_attribute("ingress", Value::List(ingress));
        self.ensure_id(&resource, &mut report).await?;
        Ok(report)
    }

    /// Provider form of a rule, with `source` resolved to a group id
    fn ingress_value(&self, rule: &IngressRule, names: &Names) -> Result<Value, RunbookError> {
        let (from, to) = rule.port_range().ok_or_else(|| {
            ConfigError::Invalid(vec!["ingress rule without ports".to_string()])
        })?;

        let mut map = BTreeMap::new();
        map.insert("protocol".to_string(), Value::from(rule.protocol.clone()));
        map.insert("from_port".to_string(), Value::Int(i64::from(from)));
        map.insert("to_port".to_string(), Value::Int(i64::from(to)));
        if let Some(cidr) = &rule.cidr {
            map.insert("cidr".to_string(), Value::from(cidr.clone()));
        }
        if let Some(source) = &rule.source {
            let group_id = self.require(
                kind::SECURITY_GROUP,
                &names.security_group(source),
                &source_hint(source),
            )?;
            map.insert("source_group_id".to_string(), Value::from(group_id));
        }
        if let Some(description) = &rule.description {
            map.insert("description".to_string(), Value::from(description.clone()));
        }
        Ok(Value::Map(map))
    }
}
