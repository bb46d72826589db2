//! ElastiCache subnet groups and single-node cache clusters

use aws_sdk_elasticache::types::{CacheCluster, Tag};
use keel_core::provider::{ProviderError, ProviderResult};
use keel_core::resource::{Resource, ResourceId, State, Value};

use crate::{AwsProvider, api_error, attributes, int_attr, required_str, str_list};

fn cache_tags(resource: &Resource) -> Vec<Tag> {
    resource
        .tags()
        .into_iter()
        .map(|(key, value)| Tag::builder().key(key).value(value).build())
        .collect()
}

fn cluster_state(id: ResourceId, cluster: &CacheCluster) -> State {
    let node_endpoint = cluster.cache_nodes().first().and_then(|n| n.endpoint());
    let attrs = attributes([
        ("engine", cluster.engine().map(Value::from)),
        ("node_type", cluster.cache_node_type().map(Value::from)),
        (
            "endpoint",
            node_endpoint.and_then(|e| e.address()).map(Value::from),
        ),
        (
            "port",
            node_endpoint
                .and_then(|e| e.port())
                .map(|p| Value::Int(i64::from(p))),
        ),
    ]);

    let mut state = State::existing(id, attrs)
        .with_identifier(cluster.arn().unwrap_or_default());
    if let Some(status) = cluster.cache_cluster_status() {
        state = state.with_status(status);
    }
    state
}

impl AwsProvider {
    // ========== ElastiCache Subnet Group Operations ==========

    pub(crate) async fn read_cache_subnet_group(
        &self,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let id = resource.id.clone();

        let output = match self
            .elasticache_client
            .describe_cache_subnet_groups()
            .cache_subnet_group_name(&id.name)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_cache_subnet_group_not_found_fault()) =>
            {
                return Ok(State::not_found(id));
            }
            Err(e) => return Err(api_error("describe cache subnet groups", &id, e)),
        };

        match output.cache_subnet_groups().first() {
            Some(group) => {
                let attrs = attributes([("vpc_id", group.vpc_id().map(Value::from))]);
                let name = group.cache_subnet_group_name().unwrap_or(&id.name).to_string();
                Ok(State::existing(id, attrs).with_identifier(name))
            }
            None => Ok(State::not_found(id)),
        }
    }

    pub(crate) async fn create_cache_subnet_group(
        &self,
        resource: Resource,
    ) -> ProviderResult<State> {
        let description = resource
            .get_str("description")
            .unwrap_or(&resource.id.name)
            .to_string();

        let result = self
            .elasticache_client
            .create_cache_subnet_group()
            .cache_subnet_group_name(&resource.id.name)
            .cache_subnet_group_description(description)
            .set_subnet_ids(Some(str_list(&resource, "subnet_ids")))
            .set_tags(Some(cache_tags(&resource)))
            .send()
            .await
            .map_err(|e| api_error("create cache subnet group", &resource.id, e))?;

        let vpc_id = result.cache_subnet_group().and_then(|g| g.vpc_id());
        let attrs = attributes([("vpc_id", vpc_id.map(Value::from))]);
        Ok(State::existing(resource.id.clone(), attrs).with_identifier(&resource.id.name))
    }

    // ========== ElastiCache Cluster Operations ==========

    pub(crate) async fn read_cache_cluster(&self, resource: &Resource) -> ProviderResult<State> {
        let id = resource.id.clone();

        let output = match self
            .elasticache_client
            .describe_cache_clusters()
            .cache_cluster_id(&id.name)
            .show_cache_node_info(true)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_cache_cluster_not_found_fault()) =>
            {
                return Ok(State::not_found(id));
            }
            Err(e) => return Err(api_error("describe cache clusters", &id, e)),
        };

        match output.cache_clusters().first() {
            Some(cluster) => Ok(cluster_state(id, cluster)),
            None => Ok(State::not_found(id)),
        }
    }

    pub(crate) async fn create_cache_cluster(&self, resource: Resource) -> ProviderResult<State> {
        let engine = required_str(&resource, "engine")?;
        let node_type = required_str(&resource, "node_type")?;
        let subnet_group = required_str(&resource, "cache_subnet_group_name")?;

        let mut request = self
            .elasticache_client
            .create_cache_cluster()
            .cache_cluster_id(&resource.id.name)
            .engine(engine)
            .cache_node_type(node_type)
            .num_cache_nodes(int_attr(&resource, "num_cache_nodes")?.unwrap_or(1))
            .cache_subnet_group_name(subnet_group)
            .set_security_group_ids(Some(str_list(&resource, "security_group_ids")))
            .set_tags(Some(cache_tags(&resource)));
        if let Some(port) = int_attr(&resource, "port")? {
            request = request.port(port);
        }
        if let Some(version) = resource.get_str("engine_version") {
            request = request.engine_version(version);
        }

        let result = request
            .send()
            .await
            .map_err(|e| api_error("create cache cluster", &resource.id, e))?;

        let cluster = result.cache_cluster().ok_or_else(|| {
            ProviderError::new("Cache cluster created but not returned")
                .for_resource(resource.id.clone())
        })?;
        Ok(cluster_state(resource.id.clone(), cluster))
    }
}
