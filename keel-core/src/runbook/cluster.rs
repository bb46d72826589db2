//! Cluster runbook: network, IAM, EKS control plane and nodes

use std::fmt;

use crate::config::{Names, ProjectConfig};
use crate::error::RunbookError;
use crate::resource::{Resource, Value, kind};
use crate::waiter::pause;

use super::{Runbook, StepReport, step_hint};

const CLUSTER_POLICIES: &[&str] = &["arn:aws:iam::aws:policy/AmazonEKSClusterPolicy"];
const NODE_POLICIES: &[&str] = &[
    "arn:aws:iam::aws:policy/AmazonEKSWorkerNodePolicy",
    "arn:aws:iam::aws:policy/AmazonEKS_CNI_Policy",
    "arn:aws:iam::aws:policy/AmazonEC2ContainerRegistryReadOnly",
];

/// Steps of the cluster runbook, in dependency order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClusterStep {
    Network,
    IamRoles,
    AdminUser,
    CicdUser,
    Propagation,
    Cluster,
    NodeGroup,
}

impl ClusterStep {
    pub const ALL: [ClusterStep; 7] = [
        ClusterStep::Network,
        ClusterStep::IamRoles,
        ClusterStep::AdminUser,
        ClusterStep::CicdUser,
        ClusterStep::Propagation,
        ClusterStep::Cluster,
        ClusterStep::NodeGroup,
    ];

    /// Step for a 1-based step number
    pub fn from_number(number: u8) -> Option<ClusterStep> {
        Self::ALL.get(usize::from(number).checked_sub(1)?).copied()
    }

    pub fn number(&self) -> u8 {
        match self {
            ClusterStep::Network => 1,
            ClusterStep::IamRoles => 2,
            ClusterStep::AdminUser => 3,
            ClusterStep::CicdUser => 4,
            ClusterStep::Propagation => 5,
            ClusterStep::Cluster => 6,
            ClusterStep::NodeGroup => 7,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ClusterStep::Network => "VPC, subnets, internet gateway and routing",
            ClusterStep::IamRoles => "EKS cluster and node IAM roles",
            ClusterStep::AdminUser => "Administrator IAM user and access key",
            ClusterStep::CicdUser => "CI/CD IAM user and access key",
            ClusterStep::Propagation => "Wait for IAM propagation",
            ClusterStep::Cluster => "EKS control plane",
            ClusterStep::NodeGroup => "EKS managed node group",
        }
    }
}

impl fmt::Display for ClusterStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Step {}: {}", self.number(), self.title())
    }
}

fn policy_list(arns: &[&str]) -> Value {
    Value::List(arns.iter().map(|a| Value::from(*a)).collect())
}

fn cicd_inline_policy() -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Action": ["eks:DescribeCluster", "eks:ListClusters"],
            "Resource": "*"
        }]
    })
    .to_string()
}

pub(crate) fn vpc(config: &ProjectConfig, names: &Names) -> Resource {
    Resource::new(kind::VPC, names.vpc())
        .with_attribute("cidr_block", config.network.vpc_cidr.clone())
        .with_attribute("enable_dns_support", true)
        .with_attribute("enable_dns_hostnames", true)
}

pub(crate) fn internet_gateway(names: &Names) -> Resource {
    Resource::new(kind::INTERNET_GATEWAY, names.internet_gateway())
}

pub(crate) fn public_subnet(config: &ProjectConfig, names: &Names, index: usize) -> Resource {
    let zones = config.zones();
    Resource::new(kind::SUBNET, names.public_subnet(index))
        .with_attribute("cidr_block", config.network.public_subnets[index].clone())
        .with_attribute("availability_zone", zones[index].clone())
        .with_attribute("map_public_ip_on_launch", true)
        .with_tag("kubernetes.io/role/elb", "1")
        .with_tag(format!("kubernetes.io/cluster/{}", names.cluster()), "shared")
}

pub(crate) fn private_subnet(config: &ProjectConfig, names: &Names, index: usize) -> Resource {
    let zones = config.zones();
    Resource::new(kind::SUBNET, names.private_subnet(index))
        .with_attribute("cidr_block", config.network.private_subnets[index].clone())
        .with_attribute("availability_zone", zones[index].clone())
        .with_attribute("map_public_ip_on_launch", false)
        .with_tag("kubernetes.io/role/internal-elb", "1")
        .with_tag(format!("kubernetes.io/cluster/{}", names.cluster()), "shared")
}

pub(crate) fn route_table(names: &Names) -> Resource {
    Resource::new(kind::ROUTE_TABLE, names.route_table())
}

pub(crate) fn cluster_security_group(config: &ProjectConfig, names: &Names) -> Resource {
    let https_from_vpc: Value = Value::Map(
        [
            ("protocol".to_string(), Value::from("tcp")),
            ("from_port".to_string(), Value::Int(443)),
            ("to_port".to_string(), Value::Int(443)),
            ("cidr".to_string(), Value::from(config.network.vpc_cidr.clone())),
            ("description".to_string(), Value::from("Kubernetes API from the VPC")),
        ]
        .into_iter()
        .collect(),
    );
    Resource::new(kind::SECURITY_GROUP, names.cluster_security_group())
        .with_attribute("description", "EKS control plane")
        .with_attribute("ingress", Value::List(vec![https_from_vpc]))
}

pub(crate) fn cluster_role(names: &Names) -> Resource {
    Resource::new(kind::IAM_ROLE, names.cluster_role())
        .with_attribute("assume_role_service", "eks.amazonaws.com")
        .with_attribute("policy_arns", policy_list(CLUSTER_POLICIES))
}

pub(crate) fn node_role(names: &Names) -> Resource {
    Resource::new(kind::IAM_ROLE, names.node_role())
        .with_attribute("assume_role_service", "ec2.amazonaws.com")
        .with_attribute("policy_arns", policy_list(NODE_POLICIES))
}

pub(crate) fn admin_user(config: &ProjectConfig, names: &Names) -> Resource {
    Resource::new(kind::IAM_USER, names.admin_user())
        .with_attribute("policy_arns", config.cluster.admin_policy_arns.clone())
}

pub(crate) fn cicd_user(config: &ProjectConfig, names: &Names) -> Resource {
    Resource::new(kind::IAM_USER, names.cicd_user())
        .with_attribute("policy_arns", config.cluster.cicd_policy_arns.clone())
        .with_attribute("inline_policy_name", "eks-describe")
        .with_attribute("inline_policy", cicd_inline_policy())
}

pub(crate) fn access_key(names: &Names, user: &str) -> Resource {
    Resource::new(kind::ACCESS_KEY, names.access_key(user)).with_attribute("user_name", user)
}

pub(crate) fn cluster(config: &ProjectConfig, names: &Names) -> Resource {
    Resource::new(kind::EKS_CLUSTER, names.cluster())
        .with_attribute("version", config.cluster.kubernetes_version.clone())
}

pub(crate) fn nodegroup(config: &ProjectConfig, names: &Names) -> Resource {
    let c = &config.cluster;
    Resource::new(kind::EKS_NODEGROUP, names.nodegroup())
        .with_attribute("cluster_name", names.cluster())
        .with_attribute("instance_types", vec![c.node_instance_type.clone()])
        .with_attribute("min_size", i64::from(c.node_min))
        .with_attribute("desired_size", i64::from(c.node_desired))
        .with_attribute("max_size", i64::from(c.node_max))
        .with_attribute("disk_size", i64::from(c.node_disk_size))
}

/// Every resource the cluster runbook creates, as looked up by name
pub(crate) fn expected_resources(config: &ProjectConfig, names: &Names) -> Vec<Resource> {
    let mut resources = vec![vpc(config, names), internet_gateway(names)];
    let network = &config.network;
    resources.extend((0..network.public_subnets.len()).map(|i| public_subnet(config, names, i)));
    resources.extend((0..network.private_subnets.len()).map(|i| private_subnet(config, names, i)));
    resources.push(route_table(names));
    resources.push(cluster_security_group(config, names));
    resources.push(cluster_role(names));
    resources.push(node_role(names));
    for user in [names.admin_user(), names.cicd_user()] {
        resources.push(Resource::new(kind::IAM_USER, user.clone()));
        resources.push(access_key(names, &user));
    }
    resources.push(cluster(config, names));
    resources.push(nodegroup(config, names));
    resources
}

impl Runbook<'_> {
    /// Run every cluster step in order, stopping at the first error
    pub async fn run_cluster_all(&mut self) -> Result<Vec<StepReport>, RunbookError> {
        let mut reports = Vec::new();
        for step in ClusterStep::ALL {
            reports.push(self.run_cluster_step(step).await?);
        }
        Ok(reports)
    }

    pub async fn run_cluster_step(
        &mut self,
        step: ClusterStep,
    ) -> Result<StepReport, RunbookError> {
        log::info!("{}", step);
        let mut report = StepReport::new(step.to_string());

        match step {
            ClusterStep::Network => self.network(&mut report).await?,
            ClusterStep::IamRoles => self.iam_roles(&mut report).await?,
            ClusterStep::AdminUser => {
                let user = admin_user(self.config, &self.names());
                self.user_with_key(user, &mut report).await?
            }
            ClusterStep::CicdUser => {
                let user = cicd_user(self.config, &self.names());
                self.user_with_key(user, &mut report).await?
            }
            ClusterStep::Propagation => self.propagation(&mut report).await?,
            ClusterStep::Cluster => self.control_plane(&mut report).await?,
            ClusterStep::NodeGroup => self.node_group(&mut report).await?,
        }

        Ok(report)
    }

    async fn network(&mut self, report: &mut StepReport) -> Result<(), RunbookError> {
        let names = self.names();
        let config = self.config;

        let vpc_id = self.ensure_id(&vpc(config, &names), report).await?;

        let igw = internet_gateway(&names).with_attribute("vpc_id", vpc_id.clone());
        let igw_id = self.ensure_id(&igw, report).await?;

        let mut public_ids = Vec::new();
        for index in 0..config.network.public_subnets.len() {
            let subnet =
                public_subnet(config, &names, index).with_attribute("vpc_id", vpc_id.clone());
            public_ids.push(self.ensure_id(&subnet, report).await?);
        }
        for index in 0..config.network.private_subnets.len() {
            let subnet =
                private_subnet(config, &names, index).with_attribute("vpc_id", vpc_id.clone());
            self.ensure_id(&subnet, report).await?;
        }

        let routes = route_table(&names)
            .with_attribute("vpc_id", vpc_id.clone())
            .with_attribute("gateway_id", igw_id)
            .with_attribute("subnet_ids", public_ids);
        self.ensure_id(&routes, report).await?;

        let sg = cluster_security_group(config, &names).with_attribute("vpc_id", vpc_id);
        self.ensure_id(&sg, report).await?;
        Ok(())
    }

    async fn iam_roles(&mut self, report: &mut StepReport) -> Result<(), RunbookError> {
        let names = self.names();
        self.ensure_id(&cluster_role(&names), report).await?;
        self.ensure_id(&node_role(&names), report).await?;
        Ok(())
    }

    /// IAM user plus one access key; the key's secret is only returned when
    /// it is created and is recorded then
    async fn user_with_key(
        &mut self,
        user: Resource,
        report: &mut StepReport,
    ) -> Result<(), RunbookError> {
        self.ensure_id(&user, report).await?;
        let key = access_key(&self.names(), &user.id.name);
        let state = self.ensure(&key, report).await?;

        if !state.secrets.contains_key("secret_access_key")
            && self
                .state
                .secret(kind::ACCESS_KEY, &key.id.name, "secret_access_key")
                .is_none()
        {
            report.notes.push(format!(
                "{} has an access key that was not created by this tool; its secret is not available",
                user.id.name
            ));
        }
        Ok(())
    }

    async fn propagation(&mut self, report: &mut StepReport) -> Result<(), RunbookError> {
        let delay = self.config.wait.propagation_delay();
        log::info!("waiting {}s for IAM changes to propagate", delay.as_secs());
        if !pause(delay, &self.cancel).await {
            return Err(RunbookError::Cancelled);
        }
        report
            .notes
            .push(format!("waited {}s for IAM propagation", delay.as_secs()));
        Ok(())
    }

    async fn control_plane(&mut self, report: &mut StepReport) -> Result<(), RunbookError> {
        let names = self.names();
        let network = step_hint(ClusterStep::Network);

        self.require(kind::VPC, &names.vpc(), &network)?;
        let mut subnet_ids = Vec::new();
        for index in 0..self.config.network.public_subnets.len() {
            subnet_ids.push(self.require(kind::SUBNET, &names.public_subnet(index), &network)?);
        }
        for index in 0..self.config.network.private_subnets.len() {
            subnet_ids.push(self.require(kind::SUBNET, &names.private_subnet(index), &network)?);
        }
        let sg_id = self.require(kind::SECURITY_GROUP, &names.cluster_security_group(), &network)?;
        let role_arn = self.require(
            kind::IAM_ROLE,
            &names.cluster_role(),
            &step_hint(ClusterStep::IamRoles),
        )?;

        let resource = cluster(self.config, &names)
            .with_attribute("role_arn", role_arn)
            .with_attribute("subnet_ids", subnet_ids)
            .with_attribute("security_group_ids", vec![sg_id]);
        let state = self.ensure(&resource, report).await?;
        let policy = self.config.wait.cluster();
        self.wait_until_ready(&resource, state, policy, report).await?;
        Ok(())
    }

    async fn node_group(&mut self, report: &mut StepReport) -> Result<(), RunbookError> {
        let names = self.names();
        let network = step_hint(ClusterStep::Network);

        self.require(
            kind::EKS_CLUSTER,
            &names.cluster(),
            &step_hint(ClusterStep::Cluster),
        )?;
        let role_arn = self.require(
            kind::IAM_ROLE,
            &names.node_role(),
            &step_hint(ClusterStep::IamRoles),
        )?;
        let mut subnet_ids = Vec::new();
        for index in 0..self.config.network.public_subnets.len() {
            subnet_ids.push(self.require(kind::SUBNET, &names.public_subnet(index), &network)?);
        }

        let resource = nodegroup(self.config, &names)
            .with_attribute("node_role_arn", role_arn)
            .with_attribute("subnet_ids", subnet_ids);
        let state = self.ensure(&resource, report).await?;
        let policy = self.config.wait.nodegroup();
        self.wait_until_ready(&resource, state, policy, report).await?;
        Ok(())
    }
}
