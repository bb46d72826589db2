//! EKS control plane and managed node group

use std::collections::HashMap;

use aws_sdk_eks::types::{NodegroupScalingConfig, VpcConfigRequest};
use keel_core::provider::{ProviderError, ProviderResult};
use keel_core::resource::{Resource, State, Value};

use crate::{AwsProvider, api_error, attributes, int_attr, required_str, str_list};

fn eks_tags(resource: &Resource) -> HashMap<String, String> {
    resource.tags().into_iter().collect()
}

impl AwsProvider {
    // ========== EKS Cluster Operations ==========

    pub(crate) async fn read_eks_cluster(&self, resource: &Resource) -> ProviderResult<State> {
        let id = resource.id.clone();

        let output = match self.eks_client.describe_cluster().name(&id.name).send().await {
            Ok(output) => output,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_resource_not_found_exception()) =>
            {
                return Ok(State::not_found(id));
            }
            Err(e) => return Err(api_error("describe cluster", &id, e)),
        };

        let Some(cluster) = output.cluster() else {
            return Ok(State::not_found(id));
        };
        let attrs = attributes([
            ("version", cluster.version().map(Value::from)),
            ("endpoint", cluster.endpoint().map(Value::from)),
            (
                "certificate_authority",
                cluster
                    .certificate_authority()
                    .and_then(|ca| ca.data())
                    .map(Value::from),
            ),
        ]);

        let mut state = State::existing(id, attrs)
            .with_identifier(cluster.arn().unwrap_or_default());
        if let Some(status) = cluster.status() {
            state = state.with_status(status.as_str());
        }
        Ok(state)
    }

    pub(crate) async fn create_eks_cluster(&self, resource: Resource) -> ProviderResult<State> {
        let role_arn = required_str(&resource, "role_arn")?;
        let vpc_config = VpcConfigRequest::builder()
            .set_subnet_ids(Some(str_list(&resource, "subnet_ids")))
            .set_security_group_ids(Some(str_list(&resource, "security_group_ids")))
            .build();

        let mut request = self
            .eks_client
            .create_cluster()
            .name(&resource.id.name)
            .role_arn(role_arn)
            .resources_vpc_config(vpc_config)
            .set_tags(Some(eks_tags(&resource)));
        if let Some(version) = resource.get_str("version") {
            request = request.version(version);
        }
        let result = request
            .send()
            .await
            .map_err(|e| api_error("create cluster", &resource.id, e))?;

        let cluster = result.cluster().ok_or_else(|| {
            ProviderError::new("Cluster created but not returned").for_resource(resource.id.clone())
        })?;
        let attrs = attributes([("version", cluster.version().map(Value::from))]);

        let mut state = State::existing(resource.id.clone(), attrs)
            .with_identifier(cluster.arn().unwrap_or_default());
        if let Some(status) = cluster.status() {
            state = state.with_status(status.as_str());
        }
        Ok(state)
    }

    // ========== EKS Node Group Operations ==========

    pub(crate) async fn read_eks_nodegroup(&self, resource: &Resource) -> ProviderResult<State> {
        let id = resource.id.clone();
        let cluster_name = required_str(resource, "cluster_name")?;

        let output = match self
            .eks_client
            .describe_nodegroup()
            .cluster_name(cluster_name)
            .nodegroup_name(&id.name)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_resource_not_found_exception()) =>
            {
                return Ok(State::not_found(id));
            }
            Err(e) => return Err(api_error("describe node group", &id, e)),
        };

        let Some(nodegroup) = output.nodegroup() else {
            return Ok(State::not_found(id));
        };
        let attrs = attributes([
            ("cluster_name", Some(Value::from(cluster_name))),
            (
                "desired_size",
                nodegroup
                    .scaling_config()
                    .and_then(|s| s.desired_size())
                    .map(|n| Value::Int(i64::from(n))),
            ),
        ]);

        let mut state = State::existing(id, attrs)
            .with_identifier(nodegroup.nodegroup_arn().unwrap_or_default());
        if let Some(status) = nodegroup.status() {
            state = state.with_status(status.as_str());
        }
        Ok(state)
    }

    pub(crate) async fn create_eks_nodegroup(&self, resource: Resource) -> ProviderResult<State> {
        let cluster_name = required_str(&resource, "cluster_name")?;
        let node_role = required_str(&resource, "node_role_arn")?;

        let mut scaling = NodegroupScalingConfig::builder();
        if let Some(min) = int_attr(&resource, "min_size")? {
            scaling = scaling.min_size(min);
        }
        if let Some(desired) = int_attr(&resource, "desired_size")? {
            scaling = scaling.desired_size(desired);
        }
        if let Some(max) = int_attr(&resource, "max_size")? {
            scaling = scaling.max_size(max);
        }

        let mut request = self
            .eks_client
            .create_nodegroup()
            .cluster_name(cluster_name)
            .nodegroup_name(&resource.id.name)
            .node_role(node_role)
            .set_subnets(Some(str_list(&resource, "subnet_ids")))
            .set_instance_types(Some(str_list(&resource, "instance_types")))
            .scaling_config(scaling.build())
            .set_tags(Some(eks_tags(&resource)));
        if let Some(disk_size) = int_attr(&resource, "disk_size")? {
            request = request.disk_size(disk_size);
        }
        let result = request
            .send()
            .await
            .map_err(|e| api_error("create node group", &resource.id, e))?;

        let nodegroup = result.nodegroup().ok_or_else(|| {
            ProviderError::new("Node group created but not returned")
                .for_resource(resource.id.clone())
        })?;
        let attrs = attributes([("cluster_name", Some(Value::from(cluster_name)))]);

        let mut state = State::existing(resource.id.clone(), attrs)
            .with_identifier(nodegroup.nodegroup_arn().unwrap_or_default());
        if let Some(status) = nodegroup.status() {
            state = state.with_status(status.as_str());
        }
        Ok(state)
    }
}
