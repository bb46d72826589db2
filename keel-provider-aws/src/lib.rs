//! Keel AWS Provider
//!
//! AWS implementation of the keel [`Provider`] trait. Each resource is looked
//! up by its deterministic name (the `Name` tag for EC2 resources, the
//! resource name everywhere else) and created with the SDK client for its
//! service.

mod ec2;
mod eks;
mod elasticache;
mod iam;
mod preflight;
mod rds;
pub mod resources;

use std::collections::HashMap;

use aws_config::Region;
use aws_sdk_ec2::Client as Ec2Client;
use aws_sdk_ec2::error::DisplayErrorContext;
use aws_sdk_eks::Client as EksClient;
use aws_sdk_elasticache::Client as ElastiCacheClient;
use aws_sdk_iam::Client as IamClient;
use aws_sdk_rds::Client as RdsClient;
use aws_sdk_sts::Client as StsClient;
use keel_core::provider::{
    BoxFuture, Preflight, Provider, ProviderError, ProviderResult, ResourceType,
};
use keel_core::resource::{Resource, ResourceId, State, Value, kind};

pub struct AwsProvider {
    ec2_client: Ec2Client,
    iam_client: IamClient,
    eks_client: EksClient,
    rds_client: RdsClient,
    elasticache_client: ElastiCacheClient,
    sts_client: StsClient,
    region: String,
}

impl AwsProvider {
    /// Create a new AWS Provider using the default credential chain
    pub async fn new(region: &str) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        log::debug!("AWS provider configured for {}", region);

        Self {
            ec2_client: Ec2Client::new(&config),
            iam_client: IamClient::new(&config),
            eks_client: EksClient::new(&config),
            rds_client: RdsClient::new(&config),
            elasticache_client: ElastiCacheClient::new(&config),
            sts_client: StsClient::new(&config),
            region: region.to_string(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

/// Error for a failed SDK call, with the service's error code and message
pub(crate) fn api_error<E: std::error::Error>(
    action: &str,
    id: &ResourceId,
    err: E,
) -> ProviderError {
    ProviderError::new(format!("Failed to {}: {}", action, DisplayErrorContext(err)))
        .for_resource(id.clone())
}

pub(crate) fn required_str<'a>(resource: &'a Resource, key: &str) -> ProviderResult<&'a str> {
    resource
        .get_str(key)
        .ok_or_else(|| ProviderError::missing_attribute(resource, key))
}

pub(crate) fn str_list(resource: &Resource, key: &str) -> Vec<String> {
    resource.get_str_list(key).unwrap_or_default()
}

/// Integer attribute narrowed to the SDK's `i32`
pub(crate) fn int_attr(resource: &Resource, key: &str) -> ProviderResult<Option<i32>> {
    match resource.get_int(key) {
        None => Ok(None),
        Some(value) => i32::try_from(value).map(Some).map_err(|_| {
            ProviderError::new(format!("attribute '{}' is out of range: {}", key, value))
                .for_resource(resource.id.clone())
        }),
    }
}

/// Attribute map for a State, skipping absent values
pub(crate) fn attributes<const N: usize>(
    pairs: [(&str, Option<Value>); N],
) -> HashMap<String, Value> {
    pairs
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_string(), v)))
        .collect()
}

impl Provider for AwsProvider {
    fn name(&self) -> &'static str {
        "aws"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        resources::resource_types()
    }

    fn read(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move {
            match resource.id.resource_type.as_str() {
                kind::VPC => self.read_ec2_vpc(&resource).await,
                kind::SUBNET => self.read_ec2_subnet(&resource).await,
                kind::INTERNET_GATEWAY => self.read_ec2_internet_gateway(&resource).await,
                kind::ROUTE_TABLE => self.read_ec2_route_table(&resource).await,
                kind::SECURITY_GROUP => self.read_ec2_security_group(&resource).await,
                kind::IAM_ROLE => self.read_iam_role(&resource).await,
                kind::IAM_USER => self.read_iam_user(&resource).await,
                kind::ACCESS_KEY => self.read_iam_access_key(&resource).await,
                kind::EKS_CLUSTER => self.read_eks_cluster(&resource).await,
                kind::EKS_NODEGROUP => self.read_eks_nodegroup(&resource).await,
                kind::DB_SUBNET_GROUP => self.read_rds_subnet_group(&resource).await,
                kind::RDS_INSTANCE => self.read_rds_instance(&resource).await,
                kind::CACHE_SUBNET_GROUP => self.read_cache_subnet_group(&resource).await,
                kind::ELASTICACHE_CLUSTER => self.read_cache_cluster(&resource).await,
                _ => Err(ProviderError::new(format!(
                    "Unknown resource type: {}",
                    resource.id.resource_type
                ))
                .for_resource(resource.id.clone())),
            }
        })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move {
            log::debug!("creating {}", resource.id);
            match resource.id.resource_type.as_str() {
                kind::VPC => self.create_ec2_vpc(resource).await,
                kind::SUBNET => self.create_ec2_subnet(resource).await,
                kind::INTERNET_GATEWAY => self.create_ec2_internet_gateway(resource).await,
                kind::ROUTE_TABLE => self.create_ec2_route_table(resource).await,
                kind::SECURITY_GROUP => self.create_ec2_security_group(resource).await,
                kind::IAM_ROLE => self.create_iam_role(resource).await,
                kind::IAM_USER => self.create_iam_user(resource).await,
                kind::ACCESS_KEY => self.create_iam_access_key(resource).await,
                kind::EKS_CLUSTER => self.create_eks_cluster(resource).await,
                kind::EKS_NODEGROUP => self.create_eks_nodegroup(resource).await,
                kind::DB_SUBNET_GROUP => self.create_rds_subnet_group(resource).await,
                kind::RDS_INSTANCE => self.create_rds_instance(resource).await,
                kind::CACHE_SUBNET_GROUP => self.create_cache_subnet_group(resource).await,
                kind::ELASTICACHE_CLUSTER => self.create_cache_cluster(resource).await,
                _ => Err(ProviderError::new(format!(
                    "Unknown resource type: {}",
                    resource.id.resource_type
                ))
                .for_resource(resource.id.clone())),
            }
        })
    }

    fn preflight(&self) -> BoxFuture<'_, ProviderResult<Preflight>> {
        Box::pin(self.run_preflight())
    }
}
