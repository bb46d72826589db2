//! Project configuration
//!
//! Everything the runbooks need to know about a project is carried in a
//! [`ProjectConfig`], loaded from `keel.toml` and passed explicitly to every
//! step. Every section has defaults, so a file containing only `project = "…"`
//! describes a complete small cluster.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::waiter::WaitPolicy;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "keel.toml";

const AWS_MANAGED_POLICY_PREFIX: &str = "arn:aws:iam::aws:policy/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

/// Which provider implementation executes the runbooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// AWS SDK
    #[default]
    Aws,
    /// File-backed rehearsal provider
    File,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    /// Project prefix every resource name is derived from
    pub project: String,
    pub region: String,
    pub provider: ProviderKind,
    pub state_path: PathBuf,
    pub network: NetworkConfig,
    pub cluster: ClusterConfig,
    pub wait: WaitConfig,
    pub check: CheckConfig,
    pub security_groups: Vec<SecurityGroupConfig>,
    pub databases: Vec<DatabaseConfig>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            region: "ap-northeast-1".to_string(),
            provider: ProviderKind::default(),
            state_path: PathBuf::from("keel.state.json"),
            network: NetworkConfig::default(),
            cluster: ClusterConfig::default(),
            wait: WaitConfig::default(),
            check: CheckConfig::default(),
            security_groups: default_security_groups(),
            databases: default_databases(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub vpc_cidr: String,
    /// Empty means `<region>a` and `<region>c`
    pub availability_zones: Vec<String>,
    /// One CIDR per availability zone
    pub public_subnets: Vec<String>,
    /// One CIDR per availability zone, or none
    pub private_subnets: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            vpc_cidr: "10.0.0.0/16".to_string(),
            availability_zones: Vec::new(),
            public_subnets: vec!["10.0.1.0/24".to_string(), "10.0.2.0/24".to_string()],
            private_subnets: vec!["10.0.11.0/24".to_string(), "10.0.12.0/24".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    pub kubernetes_version: String,
    pub node_instance_type: String,
    pub node_min: u32,
    pub node_desired: u32,
    pub node_max: u32,
    /// Node root volume size in GiB
    pub node_disk_size: u32,
    pub admin_policy_arns: Vec<String>,
    pub cicd_policy_arns: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kubernetes_version: "1.29".to_string(),
            node_instance_type: "t3.medium".to_string(),
            node_min: 1,
            node_desired: 2,
            node_max: 3,
            node_disk_size: 20,
            admin_policy_arns: vec![format!("{}AdministratorAccess", AWS_MANAGED_POLICY_PREFIX)],
            cicd_policy_arns: vec![format!(
                "{}AmazonEC2ContainerRegistryPowerUser",
                AWS_MANAGED_POLICY_PREFIX
            )],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WaitConfig {
    pub poll_interval_secs: u64,
    pub cluster_timeout_secs: u64,
    pub nodegroup_timeout_secs: u64,
    pub database_timeout_secs: u64,
    /// Blind delay after creating IAM principals, for identity propagation
    pub propagation_delay_secs: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            cluster_timeout_secs: 900,
            nodegroup_timeout_secs: 1200,
            database_timeout_secs: 1200,
            propagation_delay_secs: 30,
        }
    }
}

impl WaitConfig {
    pub fn policy(&self, timeout_secs: u64) -> WaitPolicy {
        WaitPolicy::new(
            Duration::from_secs(self.poll_interval_secs),
            Duration::from_secs(timeout_secs),
        )
    }

    pub fn cluster(&self) -> WaitPolicy {
        self.policy(self.cluster_timeout_secs)
    }

    pub fn nodegroup(&self) -> WaitPolicy {
        self.policy(self.nodegroup_timeout_secs)
    }

    pub fn database(&self) -> WaitPolicy {
        self.policy(self.database_timeout_secs)
    }

    pub fn propagation_delay(&self) -> Duration {
        Duration::from_secs(self.propagation_delay_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckConfig {
    /// Executables that must be on PATH
    pub required_tools: Vec<String>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            required_tools: vec!["kubectl".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityGroupConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ingress: Vec<IngressRule>,
}

impl SecurityGroupConfig {
    fn new(name: &str, description: &str, ingress: Vec<IngressRule>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            ingress,
        }
    }

    /// Names of other security groups this one admits traffic from
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.ingress.iter().filter_map(|r| r.source.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngressRule {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Single port; alternative to `from_port`/`to_port`
    pub port: Option<u16>,
    pub from_port: Option<u16>,
    pub to_port: Option<u16>,
    /// CIDR allowed in
    pub cidr: Option<String>,
    /// Name of another configured security group allowed in
    pub source: Option<String>,
    pub description: Option<String>,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

impl IngressRule {
    fn from_cidr(port: u16, cidr: &str) -> Self {
        Self {
            protocol: default_protocol(),
            port: Some(port),
            from_port: None,
            to_port: None,
            cidr: Some(cidr.to_string()),
            source: None,
            description: None,
        }
    }

    fn from_group(port: u16, source: &str) -> Self {
        Self {
            cidr: None,
            source: Some(source.to_string()),
            ..Self::from_cidr(port, "")
        }
    }

    /// Inclusive port range, if the rule names one
    pub fn port_range(&self) -> Option<(u16, u16)> {
        match (self.port, self.from_port, self.to_port) {
            (Some(port), None, None) => Some((port, port)),
            (None, Some(from), Some(to)) if from <= to => Some((from, to)),
            _ => None,
        }
    }
}

fn default_security_groups() -> Vec<SecurityGroupConfig> {
    vec![
        SecurityGroupConfig::new(
            "alb",
            "Load balancer ingress",
            vec![
                IngressRule::from_cidr(80, "0.0.0.0/0"),
                IngressRule::from_cidr(443, "0.0.0.0/0"),
            ],
        ),
        SecurityGroupConfig::new(
            "app",
            "Application pods",
            vec![IngressRule::from_group(8080, "alb")],
        ),
        SecurityGroupConfig::new(
            "database",
            "Relational databases",
            vec![IngressRule::from_group(5432, "app")],
        ),
        SecurityGroupConfig::new(
            "cache",
            "Cache clusters",
            vec![IngressRule::from_group(6379, "app")],
        ),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    Postgres,
    Mysql,
    Redis,
}

impl DatabaseEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseEngine::Postgres => "postgres",
            DatabaseEngine::Mysql => "mysql",
            DatabaseEngine::Redis => "redis",
        }
    }

    /// Served by ElastiCache rather than RDS
    pub fn is_cache(&self) -> bool {
        matches!(self, DatabaseEngine::Redis)
    }

    pub fn default_instance_class(&self) -> &'static str {
        match self {
            DatabaseEngine::Postgres | DatabaseEngine::Mysql => "db.t3.micro",
            DatabaseEngine::Redis => "cache.t3.micro",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseEngine::Postgres => 5432,
            DatabaseEngine::Mysql => 3306,
            DatabaseEngine::Redis => 6379,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub name: String,
    pub engine: DatabaseEngine,
    pub engine_version: Option<String>,
    pub instance_class: Option<String>,
    /// Storage in GiB (relational engines only)
    #[serde(default = "default_allocated_storage")]
    pub allocated_storage: u32,
    /// Initial database name (relational engines only)
    pub db_name: Option<String>,
    #[serde(default = "default_master_username")]
    pub master_username: String,
    /// Name of the configured security group the instance joins
    pub security_group: String,
}

fn default_allocated_storage() -> u32 {
    20
}

fn default_master_username() -> String {
    "keeladmin".to_string()
}

impl DatabaseConfig {
    pub fn instance_class(&self) -> &str {
        self.instance_class
            .as_deref()
            .unwrap_or_else(|| self.engine.default_instance_class())
    }
}

fn default_databases() -> Vec<DatabaseConfig> {
    vec![
        DatabaseConfig {
            name: "postgres".to_string(),
            engine: DatabaseEngine::Postgres,
            engine_version: None,
            instance_class: None,
            allocated_storage: default_allocated_storage(),
            db_name: Some("app".to_string()),
            master_username: default_master_username(),
            security_group: "database".to_string(),
        },
        DatabaseConfig {
            name: "redis".to_string(),
            engine: DatabaseEngine::Redis,
            engine_version: None,
            instance_class: None,
            allocated_storage: default_allocated_storage(),
            db_name: None,
            master_username: default_master_username(),
            security_group: "cache".to_string(),
        },
    ]
}

impl ProjectConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load configuration from a file.
    ///
    /// A missing file yields the defaults unless `required` is set.
    pub fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        if !path.exists() && !required {
            log::debug!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply command-line / environment overrides
    pub fn apply_overrides(
        &mut self,
        project: Option<String>,
        region: Option<String>,
        state_path: Option<PathBuf>,
    ) {
        if let Some(project) = project {
            self.project = project;
        }
        if let Some(region) = region {
            self.region = region;
        }
        if let Some(state_path) = state_path {
            self.state_path = state_path;
        }
    }

    pub fn names(&self) -> Names {
        Names::new(&self.project)
    }

    /// Availability zones, resolved against the region when not configured
    pub fn zones(&self) -> Vec<String> {
        if self.network.availability_zones.is_empty() {
            vec![format!("{}a", self.region), format!("{}c", self.region)]
        } else {
            self.network.availability_zones.clone()
        }
    }

    pub fn security_group(&self, name: &str) -> Option<&SecurityGroupConfig> {
        self.security_groups.iter().find(|g| g.name == name)
    }

    pub fn database(&self, name: &str) -> Option<&DatabaseConfig> {
        self.databases.iter().find(|d| d.name == name)
    }

    /// Check every rule and report all violations at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if !is_valid_project(&self.project) {
            errors.push(format!(
                "project '{}' must start with a lowercase letter and contain 2-31 lowercase letters, digits or '-' (set `project` or pass --project)",
                self.project
            ));
        }
        if self.region.is_empty() {
            errors.push("region must not be empty".to_string());
        }

        self.validate_network(&mut errors);
        self.validate_cluster(&mut errors);
        self.validate_security_groups(&mut errors);
        self.validate_databases(&mut errors);

        if self.wait.poll_interval_secs == 0 {
            errors.push("wait.poll_interval_secs must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    fn validate_network(&self, errors: &mut Vec<String>) {
        let zones = self.zones().len();
        if zones < 2 {
            errors.push("network needs at least two availability zones".to_string());
        }
        if self.network.public_subnets.len() != zones {
            errors.push(format!(
                "network.public_subnets has {} entries for {} availability zones",
                self.network.public_subnets.len(),
                zones
            ));
        }
        if !self.network.private_subnets.is_empty() && self.network.private_subnets.len() != zones
        {
            errors.push(format!(
                "network.private_subnets has {} entries for {} availability zones",
                self.network.private_subnets.len(),
                zones
            ));
        }
        let cidrs = std::iter::once(&self.network.vpc_cidr)
            .chain(&self.network.public_subnets)
            .chain(&self.network.private_subnets);
        for cidr in cidrs {
            if !is_cidr(cidr) {
                errors.push(format!("'{}' is not an IPv4 CIDR block", cidr));
            }
        }
    }

    fn validate_cluster(&self, errors: &mut Vec<String>) {
        let c = &self.cluster;
        if c.node_max == 0 || c.node_min > c.node_desired || c.node_desired > c.node_max {
            errors.push(format!(
                "cluster node scaling must satisfy min <= desired <= max and max > 0 (got {}/{}/{})",
                c.node_min, c.node_desired, c.node_max
            ));
        }
    }

    fn validate_security_groups(&self, errors: &mut Vec<String>) {
        let mut seen = HashSet::new();
        for group in &self.security_groups {
            if !seen.insert(group.name.as_str()) {
                errors.push(format!("security group '{}' is defined twice", group.name));
            }
        }

        for group in &self.security_groups {
            for rule in &group.ingress {
                if rule.port_range().is_none() {
                    errors.push(format!(
                        "security group '{}': each rule needs `port` or `from_port` <= `to_port`",
                        group.name
                    ));
                }
                match (&rule.cidr, &rule.source) {
                    (Some(_), None) => {}
                    (None, Some(source)) if source == &group.name => errors.push(format!(
                        "security group '{}' cannot name itself as a source",
                        group.name
                    )),
                    (None, Some(source)) if !seen.contains(source.as_str()) => {
                        errors.push(format!(
                            "security group '{}' references unknown source '{}'",
                            group.name, source
                        ))
                    }
                    (None, Some(_)) => {}
                    _ => errors.push(format!(
                        "security group '{}': each rule needs exactly one of `cidr` or `source`",
                        group.name
                    )),
                }
            }
        }

        if let Err(cycle) = order_security_groups(&self.security_groups) {
            errors.push(format!(
                "security group sources form a cycle through '{}'",
                cycle
            ));
        }
    }

    fn validate_databases(&self, errors: &mut Vec<String>) {
        let mut seen = HashSet::new();
        for db in &self.databases {
            if !seen.insert(db.name.as_str()) {
                errors.push(format!("database '{}' is defined twice", db.name));
            }
            if self.security_group(&db.security_group).is_none() {
                errors.push(format!(
                    "database '{}' references unknown security group '{}'",
                    db.name, db.security_group
                ));
            }
            if !db.engine.is_cache() && db.allocated_storage < 20 {
                errors.push(format!(
                    "database '{}' needs at least 20 GiB of storage",
                    db.name
                ));
            }
        }
        if !self.databases.is_empty() && self.network.private_subnets.len() < 2 {
            errors.push(
                "databases need network.private_subnets in at least two availability zones"
                    .to_string(),
            );
        }
    }
}

/// Order security groups so every source is created before the groups that
/// reference it. Declared order is kept otherwise.
///
/// Returns the name of a group on a cycle if the references are circular.
/// Sources that are not configured are ignored here; `validate` reports them.
pub fn order_security_groups(
    groups: &[SecurityGroupConfig],
) -> Result<Vec<&SecurityGroupConfig>, String> {
    fn visit<'a>(
        group: &'a SecurityGroupConfig,
        by_name: &HashMap<&str, &'a SecurityGroupConfig>,
        visited: &mut HashSet<&'a str>,
        visiting: &mut HashSet<&'a str>,
        sorted: &mut Vec<&'a SecurityGroupConfig>,
    ) -> Result<(), String> {
        if visited.contains(group.name.as_str()) {
            return Ok(());
        }
        if !visiting.insert(group.name.as_str()) {
            return Err(group.name.clone());
        }

        for source in group.sources() {
            if source == group.name {
                continue;
            }
            if let Some(dep) = by_name.get(source) {
                visit(dep, by_name, visited, visiting, sorted)?;
            }
        }

        visiting.remove(group.name.as_str());
        visited.insert(group.name.as_str());
        sorted.push(group);
        Ok(())
    }

    let by_name: HashMap<&str, &SecurityGroupConfig> =
        groups.iter().map(|g| (g.name.as_str(), g)).collect();
    let mut sorted = Vec::new();
    let mut visited = HashSet::new();
    let mut visiting = HashSet::new();

    for group in groups {
        visit(group, &by_name, &mut visited, &mut visiting, &mut sorted)?;
    }

    Ok(sorted)
}

fn is_valid_project(project: &str) -> bool {
    let mut chars = project.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && (2..=31).contains(&project.len())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !project.ends_with('-')
}

fn is_cidr(value: &str) -> bool {
    let Some((addr, prefix)) = value.split_once('/') else {
        return false;
    };
    addr.parse::<std::net::Ipv4Addr>().is_ok()
        && prefix.parse::<u8>().map(|p| p <= 32).unwrap_or(false)
}

/// Deterministic resource names derived from the project prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Names {
    project: String,
}

impl Names {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
        }
    }

    fn prefixed(&self, suffix: &str) -> String {
        format!("{}-{}", self.project, suffix)
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn vpc(&self) -> String {
        self.prefixed("vpc")
    }

    /// `index` is zero-based; names are numbered from 1
    pub fn public_subnet(&self, index: usize) -> String {
        self.prefixed(&format!("public-{}", index + 1))
    }

    /// `index` is zero-based; names are numbered from 1
    pub fn private_subnet(&self, index: usize) -> String {
        self.prefixed(&format!("private-{}", index + 1))
    }

    pub fn internet_gateway(&self) -> String {
        self.prefixed("igw")
    }

    pub fn route_table(&self) -> String {
        self.prefixed("public-rt")
    }

    pub fn cluster_security_group(&self) -> String {
        self.prefixed("cluster-sg")
    }

    pub fn cluster_role(&self) -> String {
        self.prefixed("eks-cluster-role")
    }

    pub fn node_role(&self) -> String {
        self.prefixed("eks-node-role")
    }

    pub fn admin_user(&self) -> String {
        self.prefixed("admin")
    }

    pub fn cicd_user(&self) -> String {
        self.prefixed("cicd")
    }

    pub fn access_key(&self, user: &str) -> String {
        format!("{}-key", user)
    }

    pub fn cluster(&self) -> String {
        self.prefixed("cluster")
    }

    pub fn nodegroup(&self) -> String {
        self.prefixed("nodes")
    }

    pub fn security_group(&self, name: &str) -> String {
        self.prefixed(&format!("sg-{}", name))
    }

    pub fn database(&self, name: &str) -> String {
        self.prefixed(name)
    }

    pub fn db_subnet_group(&self) -> String {
        self.prefixed("db-subnets")
    }

    pub fn cache_subnet_group(&self) -> String {
        self.prefixed("cache-subnets")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ProjectConfig {
        ProjectConfig {
            project: "acme".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_are_valid_once_project_is_set() {
        assert!(ProjectConfig::default().validate().is_err());
        valid().validate().unwrap();
    }

    #[test]
    fn minimal_file_takes_defaults() {
        let config = ProjectConfig::from_toml_str("project = \"acme\"").unwrap();
        assert_eq!(config.project, "acme");
        assert_eq!(config.region, "ap-northeast-1");
        assert_eq!(config.provider, ProviderKind::Aws);
        assert_eq!(config.wait.poll_interval_secs, 30);
        assert_eq!(config.wait.cluster_timeout_secs, 900);
        assert_eq!(config.security_groups.len(), 4);
        assert_eq!(config.databases.len(), 2);
        assert_eq!(
            config.zones(),
            vec!["ap-northeast-1a".to_string(), "ap-northeast-1c".to_string()]
        );
    }

    #[test]
    fn full_file_overrides_sections() {
        let config = ProjectConfig::from_toml_str(
            r#"
            project = "shop"
            region = "us-west-2"
            provider = "file"

            [network]
            availability_zones = ["us-west-2a", "us-west-2b", "us-west-2c"]
            public_subnets = ["10.0.1.0/24", "10.0.2.0/24", "10.0.3.0/24"]
            private_subnets = []

            [cluster]
            node_instance_type = "m5.large"
            node_desired = 3

            [wait]
            poll_interval_secs = 10

            [[security_groups]]
            name = "web"
            ingress = [{ port = 443, cidr = "0.0.0.0/0" }]

            [[security_groups]]
            name = "worker"
            ingress = [{ from_port = 9000, to_port = 9100, source = "web", protocol = "udp" }]
            "#,
        )
        .unwrap();

        assert_eq!(config.provider, ProviderKind::File);
        assert_eq!(config.zones().len(), 3);
        assert_eq!(config.cluster.node_instance_type, "m5.large");
        assert_eq!(config.cluster.node_max, 3);
        assert_eq!(config.wait.poll_interval_secs, 10);
        assert_eq!(config.wait.nodegroup_timeout_secs, 1200);
        assert_eq!(config.security_groups.len(), 2);

        let worker = config.security_group("worker").unwrap();
        assert_eq!(worker.ingress[0].protocol, "udp");
        assert_eq!(worker.ingress[0].port_range(), Some((9000, 9100)));

        // Default databases need private subnets, which this file removed.
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("private_subnets"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = ProjectConfig::from_toml_str("project = \"acme\"\nregoin = \"x\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn validation_reports_every_problem() {
        let mut config = valid();
        config.project = "Bad_Name".to_string();
        config.network.public_subnets = vec!["10.0.1.0/24".to_string()];
        config.cluster.node_min = 5;
        config.databases[0].security_group = "missing".to_string();

        match config.validate() {
            Err(ConfigError::Invalid(errors)) => {
                assert_eq!(errors.len(), 4, "{:?}", errors);
            }
            other => panic!("Expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn rejects_invalid_cidr() {
        let mut config = valid();
        config.network.vpc_cidr = "10.0.0.0/40".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("10.0.0.0/40"));
    }

    #[test]
    fn rejects_rule_with_cidr_and_source() {
        let mut config = valid();
        config.security_groups[1].ingress[0].cidr = Some("0.0.0.0/0".to_string());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("exactly one of"));
    }

    #[test]
    fn orders_sources_before_dependents() {
        let mut groups = default_security_groups();
        groups.reverse();

        let order: Vec<&str> = order_security_groups(&groups)
            .unwrap()
            .iter()
            .map(|g| g.name.as_str())
            .collect();

        let pos = |name: &str| order.iter().position(|n| *n == name).unwrap();
        assert_eq!(order.len(), 4);
        assert!(pos("alb") < pos("app"));
        assert!(pos("app") < pos("database"));
        assert!(pos("app") < pos("cache"));
    }

    #[test]
    fn detects_source_cycles() {
        let mut config = valid();
        config.security_groups[0]
            .ingress
            .push(IngressRule::from_group(9000, "database"));

        assert!(order_security_groups(&config.security_groups).is_err());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("cycle"));
    }

    #[test]
    fn project_name_rules() {
        assert!(is_valid_project("acme"));
        assert!(is_valid_project("acme-prod-2"));
        assert!(!is_valid_project("a"));
        assert!(!is_valid_project("2acme"));
        assert!(!is_valid_project("acme-"));
        assert!(!is_valid_project("Acme"));
    }

    #[test]
    fn names_are_prefixed() {
        let names = valid().names();
        assert_eq!(names.vpc(), "acme-vpc");
        assert_eq!(names.public_subnet(0), "acme-public-1");
        assert_eq!(names.private_subnet(1), "acme-private-2");
        assert_eq!(names.cluster(), "acme-cluster");
        assert_eq!(names.nodegroup(), "acme-nodes");
        assert_eq!(names.security_group("app"), "acme-sg-app");
        assert_eq!(names.database("postgres"), "acme-postgres");
        assert_eq!(names.access_key(&names.admin_user()), "acme-admin-key");
    }

    #[test]
    fn load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.toml");

        let config = ProjectConfig::load(&path, false).unwrap();
        assert_eq!(config, ProjectConfig::default());
        assert!(matches!(
            ProjectConfig::load(&path, true),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = valid();
        config.apply_overrides(Some("other".to_string()), None, Some(PathBuf::from("s.json")));
        assert_eq!(config.project, "other");
        assert_eq!(config.region, "ap-northeast-1");
        assert_eq!(config.state_path, PathBuf::from("s.json"));
    }

    #[test]
    fn wait_policies() {
        let wait = WaitConfig::default();
        assert_eq!(wait.cluster().timeout, Duration::from_secs(900));
        assert_eq!(wait.nodegroup().timeout, Duration::from_secs(1200));
        assert_eq!(wait.database().interval, Duration::from_secs(30));
        assert_eq!(wait.propagation_delay(), Duration::from_secs(30));
    }

    #[test]
    fn database_instance_class_defaults_by_engine() {
        let config = valid();
        assert_eq!(config.database("postgres").unwrap().instance_class(), "db.t3.micro");
        assert_eq!(config.database("redis").unwrap().instance_class(), "cache.t3.micro");
        assert!(config.database("redis").unwrap().engine.is_cache());
    }
}
