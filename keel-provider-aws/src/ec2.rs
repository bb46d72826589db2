//! EC2 network resources: VPC, subnets, internet gateway, route table and
//! security groups
//!
//! EC2 names are not unique, so every resource is tagged with `Name` in its
//! create call and found again through a `tag:Name` filter. Security groups
//! are found by group name, which is unique per VPC.

use std::collections::HashMap;

use aws_sdk_ec2::types::{
    AttributeBooleanValue, Filter, IpPermission, IpRange, ResourceType, Tag, TagSpecification,
    UserIdGroupPair,
};
use keel_core::provider::{ProviderError, ProviderResult};
use keel_core::resource::{Resource, ResourceId, State, Value};

use crate::{AwsProvider, api_error, attributes, required_str, str_list};

fn name_filter(name: &str) -> Filter {
    Filter::builder().name("tag:Name").values(name).build()
}

fn ec2_tags(resource: &Resource) -> Vec<Tag> {
    resource
        .tags()
        .into_iter()
        .map(|(key, value)| Tag::builder().key(key).value(value).build())
        .collect()
}

/// Tags applied atomically by the create call
fn tag_specification(resource: &Resource, resource_type: ResourceType) -> TagSpecification {
    TagSpecification::builder()
        .resource_type(resource_type)
        .set_tags(Some(ec2_tags(resource)))
        .build()
}

/// Convert one `ingress` entry into an EC2 permission
fn ip_permission(rule: &Value, id: &ResourceId) -> ProviderResult<IpPermission> {
    let Value::Map(rule) = rule else {
        return Err(ProviderError::new("ingress rule must be a map").for_resource(id.clone()));
    };
    let text = |key: &str| rule.get(key).and_then(Value::as_str);
    let port = |key: &str| match rule.get(key) {
        Some(Value::Int(p)) => i32::try_from(*p).ok(),
        _ => None,
    };

    let (Some(from), Some(to)) = (port("from_port"), port("to_port")) else {
        return Err(ProviderError::new("ingress rule needs from_port and to_port")
            .for_resource(id.clone()));
    };

    let mut permission = IpPermission::builder()
        .ip_protocol(text("protocol").unwrap_or("tcp"))
        .from_port(from)
        .to_port(to);

    if let Some(cidr) = text("cidr") {
        let mut range = IpRange::builder().cidr_ip(cidr);
        if let Some(description) = text("description") {
            range = range.description(description);
        }
        permission = permission.ip_ranges(range.build());
    } else if let Some(group_id) = text("source_group_id") {
        let mut pair = UserIdGroupPair::builder().group_id(group_id);
        if let Some(description) = text("description") {
            pair = pair.description(description);
        }
        permission = permission.user_id_group_pairs(pair.build());
    } else {
        return Err(ProviderError::new("ingress rule needs cidr or source_group_id")
            .for_resource(id.clone()));
    }

    Ok(permission.build())
}

impl AwsProvider {
    // ========== EC2 VPC Operations ==========

    pub(crate) async fn read_ec2_vpc(&self, resource: &Resource) -> ProviderResult<State> {
        let id = resource.id.clone();

        let result = self
            .ec2_client
            .describe_vpcs()
            .filters(name_filter(&id.name))
            .send()
            .await
            .map_err(|e| api_error("describe VPCs", &id, e))?;

        let Some(vpc) = result.vpcs().first() else {
            return Ok(State::not_found(id));
        };
        let vpc_id = vpc.vpc_id().unwrap_or_default().to_string();
        let attrs = attributes([
            ("cidr_block", vpc.cidr_block().map(Value::from)),
            ("state", vpc.state().map(|s| Value::from(s.as_str()))),
        ]);

        Ok(State::existing(id, attrs).with_identifier(vpc_id))
    }

    pub(crate) async fn create_ec2_vpc(&self, resource: Resource) -> ProviderResult<State> {
        let cidr_block = required_str(&resource, "cidr_block")?;

        let result = self
            .ec2_client
            .create_vpc()
            .cidr_block(cidr_block)
            .tag_specifications(tag_specification(&resource, ResourceType::Vpc))
            .send()
            .await
            .map_err(|e| api_error("create VPC", &resource.id, e))?;

        let vpc_id = result.vpc().and_then(|v| v.vpc_id()).ok_or_else(|| {
            ProviderError::new("VPC created but no ID returned").for_resource(resource.id.clone())
        })?;

        // One attribute per call
        if let Some(enabled) = resource.get_bool("enable_dns_support") {
            self.ec2_client
                .modify_vpc_attribute()
                .vpc_id(vpc_id)
                .enable_dns_support(AttributeBooleanValue::builder().value(enabled).build())
                .send()
                .await
                .map_err(|e| api_error("set DNS support", &resource.id, e))?;
        }
        if let Some(enabled) = resource.get_bool("enable_dns_hostnames") {
            self.ec2_client
                .modify_vpc_attribute()
                .vpc_id(vpc_id)
                .enable_dns_hostnames(AttributeBooleanValue::builder().value(enabled).build())
                .send()
                .await
                .map_err(|e| api_error("set DNS hostnames", &resource.id, e))?;
        }

        let attrs = attributes([("cidr_block", Some(Value::from(cidr_block)))]);
        Ok(State::existing(resource.id.clone(), attrs).with_identifier(vpc_id))
    }

    // ========== EC2 Subnet Operations ==========

    pub(crate) async fn read_ec2_subnet(&self, resource: &Resource) -> ProviderResult<State> {
        let id = resource.id.clone();

        let result = self
            .ec2_client
            .describe_subnets()
            .filters(name_filter(&id.name))
            .send()
            .await
            .map_err(|e| api_error("describe subnets", &id, e))?;

        let Some(subnet) = result.subnets().first() else {
            return Ok(State::not_found(id));
        };
        let subnet_id = subnet.subnet_id().unwrap_or_default().to_string();
        let attrs = attributes([
            ("cidr_block", subnet.cidr_block().map(Value::from)),
            ("availability_zone", subnet.availability_zone().map(Value::from)),
            ("vpc_id", subnet.vpc_id().map(Value::from)),
        ]);

        Ok(State::existing(id, attrs).with_identifier(subnet_id))
    }

    pub(crate) async fn create_ec2_subnet(&self, resource: Resource) -> ProviderResult<State> {
        let vpc_id = required_str(&resource, "vpc_id")?;
        let cidr_block = required_str(&resource, "cidr_block")?;

        let mut request = self
            .ec2_client
            .create_subnet()
            .vpc_id(vpc_id)
            .cidr_block(cidr_block)
            .tag_specifications(tag_specification(&resource, ResourceType::Subnet));
        if let Some(az) = resource.get_str("availability_zone") {
            request = request.availability_zone(az);
        }
        let result = request
            .send()
            .await
            .map_err(|e| api_error("create subnet", &resource.id, e))?;

        let subnet = result.subnet().ok_or_else(|| {
            ProviderError::new("Subnet created but not returned").for_resource(resource.id.clone())
        })?;
        let subnet_id = subnet.subnet_id().ok_or_else(|| {
            ProviderError::new("Subnet created but no ID returned")
                .for_resource(resource.id.clone())
        })?;

        if resource.get_bool("map_public_ip_on_launch") == Some(true) {
            self.ec2_client
                .modify_subnet_attribute()
                .subnet_id(subnet_id)
                .map_public_ip_on_launch(AttributeBooleanValue::builder().value(true).build())
                .send()
                .await
                .map_err(|e| api_error("enable public IPs on subnet", &resource.id, e))?;
        }

        let attrs = attributes([
            ("cidr_block", Some(Value::from(cidr_block))),
            ("availability_zone", subnet.availability_zone().map(Value::from)),
            ("vpc_id", Some(Value::from(vpc_id))),
        ]);
        Ok(State::existing(resource.id.clone(), attrs).with_identifier(subnet_id))
    }

    // ========== EC2 Internet Gateway Operations ==========

    pub(crate) async fn read_ec2_internet_gateway(
        &self,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let id = resource.id.clone();

        let result = self
            .ec2_client
            .describe_internet_gateways()
            .filters(name_filter(&id.name))
            .send()
            .await
            .map_err(|e| api_error("describe internet gateways", &id, e))?;

        let Some(igw) = result.internet_gateways().first() else {
            return Ok(State::not_found(id));
        };
        let igw_id = igw.internet_gateway_id().unwrap_or_default().to_string();
        let vpc_id = igw.attachments().first().and_then(|a| a.vpc_id());
        let attrs = attributes([("vpc_id", vpc_id.map(Value::from))]);

        Ok(State::existing(id, attrs).with_identifier(igw_id))
    }

    pub(crate) async fn create_ec2_internet_gateway(
        &self,
        resource: Resource,
    ) -> ProviderResult<State> {
        let vpc_id = required_str(&resource, "vpc_id")?;

        let result = self
            .ec2_client
            .create_internet_gateway()
            .tag_specifications(tag_specification(&resource, ResourceType::InternetGateway))
            .send()
            .await
            .map_err(|e| api_error("create internet gateway", &resource.id, e))?;

        let igw_id = result
            .internet_gateway()
            .and_then(|igw| igw.internet_gateway_id())
            .ok_or_else(|| {
                ProviderError::new("Internet Gateway created but no ID returned")
                    .for_resource(resource.id.clone())
            })?;

        self.ec2_client
            .attach_internet_gateway()
            .internet_gateway_id(igw_id)
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(|e| api_error("attach internet gateway", &resource.id, e))?;

        let attrs = attributes([("vpc_id", Some(Value::from(vpc_id)))]);
        Ok(State::existing(resource.id.clone(), attrs).with_identifier(igw_id))
    }

    // ========== EC2 Route Table Operations ==========

    pub(crate) async fn read_ec2_route_table(&self, resource: &Resource) -> ProviderResult<State> {
        let id = resource.id.clone();

        let result = self
            .ec2_client
            .describe_route_tables()
            .filters(name_filter(&id.name))
            .send()
            .await
            .map_err(|e| api_error("describe route tables", &id, e))?;

        let Some(table) = result.route_tables().first() else {
            return Ok(State::not_found(id));
        };
        let table_id = table.route_table_id().unwrap_or_default().to_string();
        let subnet_ids: Vec<String> = table
            .associations()
            .iter()
            .filter_map(|a| a.subnet_id().map(String::from))
            .collect();
        let attrs = attributes([
            ("vpc_id", table.vpc_id().map(Value::from)),
            ("subnet_ids", Some(Value::from(subnet_ids))),
        ]);

        Ok(State::existing(id, attrs).with_identifier(table_id))
    }

    /// Create the table, its default route and its subnet associations
    pub(crate) async fn create_ec2_route_table(&self, resource: Resource) -> ProviderResult<State> {
        let vpc_id = required_str(&resource, "vpc_id")?;
        let gateway_id = required_str(&resource, "gateway_id")?;
        let subnet_ids = str_list(&resource, "subnet_ids");

        let result = self
            .ec2_client
            .create_route_table()
            .vpc_id(vpc_id)
            .tag_specifications(tag_specification(&resource, ResourceType::RouteTable))
            .send()
            .await
            .map_err(|e| api_error("create route table", &resource.id, e))?;

        let table_id = result
            .route_table()
            .and_then(|rt| rt.route_table_id())
            .ok_or_else(|| {
                ProviderError::new("Route Table created but no ID returned")
                    .for_resource(resource.id.clone())
            })?;

        self.ec2_client
            .create_route()
            .route_table_id(table_id)
            .destination_cidr_block("0.0.0.0/0")
            .gateway_id(gateway_id)
            .send()
            .await
            .map_err(|e| api_error("create default route", &resource.id, e))?;

        for subnet_id in &subnet_ids {
            self.ec2_client
                .associate_route_table()
                .route_table_id(table_id)
                .subnet_id(subnet_id)
                .send()
                .await
                .map_err(|e| {
                    api_error(
                        &format!("associate route table with {}", subnet_id),
                        &resource.id,
                        e,
                    )
                })?;
        }

        let attrs = attributes([
            ("vpc_id", Some(Value::from(vpc_id))),
            ("subnet_ids", Some(Value::from(subnet_ids))),
        ]);
        Ok(State::existing(resource.id.clone(), attrs).with_identifier(table_id))
    }

    // ========== EC2 Security Group Operations ==========

    pub(crate) async fn read_ec2_security_group(
        &self,
        resource: &Resource,
    ) -> ProviderResult<State> {
        let id = resource.id.clone();

        let mut request = self
            .ec2_client
            .describe_security_groups()
            .filters(Filter::builder().name("group-name").values(&id.name).build());
        if let Some(vpc_id) = resource.get_str("vpc_id") {
            request = request.filters(Filter::builder().name("vpc-id").values(vpc_id).build());
        }
        let result = request
            .send()
            .await
            .map_err(|e| api_error("describe security groups", &id, e))?;

        let Some(group) = result.security_groups().first() else {
            return Ok(State::not_found(id));
        };
        let group_id = group.group_id().unwrap_or_default().to_string();
        let attrs = attributes([
            ("vpc_id", group.vpc_id().map(Value::from)),
            ("description", group.description().map(Value::from)),
        ]);

        Ok(State::existing(id, attrs).with_identifier(group_id))
    }

    /// Create the group and authorize all of its ingress rules
    pub(crate) async fn create_ec2_security_group(
        &self,
        resource: Resource,
    ) -> ProviderResult<State> {
        let vpc_id = required_str(&resource, "vpc_id")?;
        let description = resource.get_str("description").unwrap_or(&resource.id.name);

        let permissions = match resource.attributes.get("ingress") {
            Some(Value::List(rules)) => rules
                .iter()
                .map(|rule| ip_permission(rule, &resource.id))
                .collect::<ProviderResult<Vec<_>>>()?,
            _ => Vec::new(),
        };

        let result = self
            .ec2_client
            .create_security_group()
            .group_name(&resource.id.name)
            .description(description)
            .vpc_id(vpc_id)
            .tag_specifications(tag_specification(&resource, ResourceType::SecurityGroup))
            .send()
            .await
            .map_err(|e| api_error("create security group", &resource.id, e))?;

        let group_id = result.group_id().ok_or_else(|| {
            ProviderError::new("Security Group created but no ID returned")
                .for_resource(resource.id.clone())
        })?;

        if !permissions.is_empty() {
            self.ec2_client
                .authorize_security_group_ingress()
                .group_id(group_id)
                .set_ip_permissions(Some(permissions))
                .send()
                .await
                .map_err(|e| api_error("authorize ingress", &resource.id, e))?;
        }

        let attrs: HashMap<String, Value> = attributes([
            ("vpc_id", Some(Value::from(vpc_id))),
            ("description", Some(Value::from(description))),
        ]);
        Ok(State::existing(resource.id.clone(), attrs).with_identifier(group_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn rule(pairs: &[(&str, Value)]) -> Value {
        Value::Map(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn id() -> ResourceId {
        ResourceId::new("security_group", "acme-sg-app")
    }

    #[test]
    fn cidr_rule_becomes_ip_range() {
        let value = rule(&[
            ("protocol", Value::from("tcp")),
            ("from_port", Value::Int(443)),
            ("to_port", Value::Int(443)),
            ("cidr", Value::from("0.0.0.0/0")),
            ("description", Value::from("https")),
        ]);

        let permission = ip_permission(&value, &id()).unwrap();
        assert_eq!(permission.ip_protocol(), Some("tcp"));
        assert_eq!(permission.from_port(), Some(443));
        assert_eq!(permission.ip_ranges()[0].cidr_ip(), Some("0.0.0.0/0"));
        assert_eq!(permission.ip_ranges()[0].description(), Some("https"));
        assert!(permission.user_id_group_pairs().is_empty());
    }

    #[test]
    fn source_rule_becomes_group_pair() {
        let value = rule(&[
            ("from_port", Value::Int(8080)),
            ("to_port", Value::Int(8080)),
            ("source_group_id", Value::from("sg-123")),
        ]);

        let permission = ip_permission(&value, &id()).unwrap();
        assert_eq!(permission.ip_protocol(), Some("tcp"));
        assert_eq!(permission.user_id_group_pairs()[0].group_id(), Some("sg-123"));
        assert!(permission.ip_ranges().is_empty());
    }

    #[test]
    fn rule_without_target_is_rejected() {
        let value = rule(&[("from_port", Value::Int(22)), ("to_port", Value::Int(22))]);
        let err = ip_permission(&value, &id()).unwrap_err();
        assert!(err.to_string().contains("cidr or source_group_id"));

        let err = ip_permission(&Value::from("tcp:22"), &id()).unwrap_err();
        assert!(err.to_string().contains("must be a map"));
    }

    #[test]
    fn tags_are_copied_from_the_resource() {
        let resource = Resource::new("vpc", "acme-vpc")
            .with_tag("Name", "acme-vpc")
            .with_tag("Project", "acme");
        let tags = ec2_tags(&resource);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].key(), Some("Name"));
        assert_eq!(tags[1].value(), Some("acme"));
    }

    #[test]
    fn tags_travel_with_the_create_request() {
        let resource = Resource::new("subnet", "acme-private-1")
            .with_tag("Name", "acme-private-1")
            .with_tag("kubernetes.io/role/internal-elb", "1");

        let spec = tag_specification(&resource, ResourceType::Subnet);
        assert_eq!(spec.resource_type(), Some(&ResourceType::Subnet));
        let name = spec.tags().iter().find(|t| t.key() == Some("Name")).unwrap();
        assert_eq!(name.value(), Some("acme-private-1"));
        assert_eq!(spec.tags().len(), 2);
    }
}
