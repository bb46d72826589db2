//! Resource types handled by the AWS provider, with the terminal statuses of
//! the ones that provision asynchronously

use keel_core::define_resource_type;
use keel_core::provider::ResourceType;
use keel_core::resource::kind;

define_resource_type!(VpcType, kind::VPC);
define_resource_type!(SubnetType, kind::SUBNET);
define_resource_type!(InternetGatewayType, kind::INTERNET_GATEWAY);
define_resource_type!(RouteTableType, kind::ROUTE_TABLE);
define_resource_type!(SecurityGroupType, kind::SECURITY_GROUP);
define_resource_type!(IamRoleType, kind::IAM_ROLE);
define_resource_type!(IamUserType, kind::IAM_USER);
define_resource_type!(AccessKeyType, kind::ACCESS_KEY);
define_resource_type!(
    EksClusterType,
    kind::EKS_CLUSTER,
    ready = "ACTIVE",
    failed = ["FAILED", "DELETING"]
);
define_resource_type!(
    EksNodegroupType,
    kind::EKS_NODEGROUP,
    ready = "ACTIVE",
    failed = ["CREATE_FAILED", "DEGRADED", "DELETING"]
);
define_resource_type!(DbSubnetGroupType, kind::DB_SUBNET_GROUP);
define_resource_type!(
    RdsInstanceType,
    kind::RDS_INSTANCE,
    ready = "available",
    failed = [
        "failed",
        "incompatible-network",
        "incompatible-parameters",
        "incompatible-restore",
        "storage-full",
        "inaccessible-encryption-credentials",
        "deleting",
    ]
);
define_resource_type!(CacheSubnetGroupType, kind::CACHE_SUBNET_GROUP);
define_resource_type!(
    ElasticacheClusterType,
    kind::ELASTICACHE_CLUSTER,
    ready = "available",
    failed = ["create-failed", "incompatible-network", "restore-failed", "deleting"]
);

/// Every type the runbooks provision, in provisioning order
pub fn resource_types() -> Vec<Box<dyn ResourceType>> {
    vec![
        Box::new(VpcType),
        Box::new(InternetGatewayType),
        Box::new(SubnetType),
        Box::new(RouteTableType),
        Box::new(SecurityGroupType),
        Box::new(IamRoleType),
        Box::new(IamUserType),
        Box::new(AccessKeyType),
        Box::new(EksClusterType),
        Box::new(EksNodegroupType),
        Box::new(DbSubnetGroupType),
        Box::new(RdsInstanceType),
        Box::new(CacheSubnetGroupType),
        Box::new(ElasticacheClusterType),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_is_listed_once() {
        let mut names: Vec<&str> = resource_types().iter().map(|t| t.name()).collect();
        assert_eq!(names.len(), 14);
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 14);
    }

    #[test]
    fn only_control_planes_and_databases_are_polled() {
        let polled: Vec<&str> = resource_types()
            .iter()
            .filter(|t| t.lifecycle().is_some())
            .map(|t| t.name())
            .collect();
        assert_eq!(
            polled,
            vec![
                kind::EKS_CLUSTER,
                kind::EKS_NODEGROUP,
                kind::RDS_INSTANCE,
                kind::ELASTICACHE_CLUSTER
            ]
        );
    }

    #[test]
    fn rds_lifecycle_uses_lowercase_statuses() {
        let lifecycle = RdsInstanceType.lifecycle().unwrap();
        assert_eq!(lifecycle.success, "available");
        assert!(lifecycle.failures.contains(&"storage-full"));
    }
}
