//! RDS subnet groups and database instances

use aws_sdk_rds::types::{DbInstance, Tag};
use keel_core::provider::{ProviderError, ProviderResult};
use keel_core::resource::{Resource, ResourceId, State, Value};

use crate::{AwsProvider, api_error, attributes, int_attr, required_str, str_list};

fn rds_tags(resource: &Resource) -> Vec<Tag> {
    resource
        .tags()
        .into_iter()
        .map(|(key, value)| Tag::builder().key(key).value(value).build())
        .collect()
}

fn instance_state(id: ResourceId, instance: &DbInstance) -> State {
    let endpoint = instance.endpoint();
    let attrs = attributes([
        ("engine", instance.engine().map(Value::from)),
        (
            "endpoint",
            endpoint.and_then(|e| e.address()).map(Value::from),
        ),
        (
            "port",
            endpoint
                .and_then(|e| e.port())
                .map(|p| Value::Int(i64::from(p))),
        ),
        ("db_name", instance.db_name().map(Value::from)),
        ("master_username", instance.master_username().map(Value::from)),
    ]);

    let mut state = State::existing(id, attrs)
        .with_identifier(instance.db_instance_arn().unwrap_or_default());
    if let Some(status) = instance.db_instance_status() {
        state = state.with_status(status);
    }
    state
}

impl AwsProvider {
    // ========== RDS Subnet Group Operations ==========

    pub(crate) async fn read_rds_subnet_group(&self, resource: &Resource) -> ProviderResult<State> {
        let id = resource.id.clone();

        let output = match self
            .rds_client
            .describe_db_subnet_groups()
            .db_subnet_group_name(&id.name)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_db_subnet_group_not_found_fault()) =>
            {
                return Ok(State::not_found(id));
            }
            Err(e) => return Err(api_error("describe DB subnet groups", &id, e)),
        };

        match output.db_subnet_groups().first() {
            Some(group) => {
                let attrs = attributes([("vpc_id", group.vpc_id().map(Value::from))]);
                let name = group.db_subnet_group_name().unwrap_or(&id.name).to_string();
                Ok(State::existing(id, attrs).with_identifier(name))
            }
            None => Ok(State::not_found(id)),
        }
    }

    pub(crate) async fn create_rds_subnet_group(
        &self,
        resource: Resource,
    ) -> ProviderResult<State> {
        let description = resource
            .get_str("description")
            .unwrap_or(&resource.id.name)
            .to_string();

        let result = self
            .rds_client
            .create_db_subnet_group()
            .db_subnet_group_name(&resource.id.name)
            .db_subnet_group_description(description)
            .set_subnet_ids(Some(str_list(&resource, "subnet_ids")))
            .set_tags(Some(rds_tags(&resource)))
            .send()
            .await
            .map_err(|e| api_error("create DB subnet group", &resource.id, e))?;

        let vpc_id = result.db_subnet_group().and_then(|g| g.vpc_id());
        let attrs = attributes([("vpc_id", vpc_id.map(Value::from))]);
        Ok(State::existing(resource.id.clone(), attrs).with_identifier(&resource.id.name))
    }

    // ========== RDS Instance Operations ==========

    pub(crate) async fn read_rds_instance(&self, resource: &Resource) -> ProviderResult<State> {
        let id = resource.id.clone();

        let output = match self
            .rds_client
            .describe_db_instances()
            .db_instance_identifier(&id.name)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_db_instance_not_found_fault()) =>
            {
                return Ok(State::not_found(id));
            }
            Err(e) => return Err(api_error("describe DB instances", &id, e)),
        };

        match output.db_instances().first() {
            Some(instance) => Ok(instance_state(id, instance)),
            None => Ok(State::not_found(id)),
        }
    }

    /// Create a private, encrypted instance with the supplied master password
    pub(crate) async fn create_rds_instance(&self, resource: Resource) -> ProviderResult<State> {
        let engine = required_str(&resource, "engine")?;
        let instance_class = required_str(&resource, "instance_class")?;
        let master_username = required_str(&resource, "master_username")?;
        let master_password = required_str(&resource, "master_password")?;
        let subnet_group = required_str(&resource, "db_subnet_group_name")?;

        let mut request = self
            .rds_client
            .create_db_instance()
            .db_instance_identifier(&resource.id.name)
            .engine(engine)
            .db_instance_class(instance_class)
            .master_username(master_username)
            .master_user_password(master_password)
            .db_subnet_group_name(subnet_group)
            .set_vpc_security_group_ids(Some(str_list(&resource, "security_group_ids")))
            .publicly_accessible(false)
            .storage_encrypted(true)
            .set_tags(Some(rds_tags(&resource)));
        if let Some(storage) = int_attr(&resource, "allocated_storage")? {
            request = request.allocated_storage(storage);
        }
        if let Some(port) = int_attr(&resource, "port")? {
            request = request.port(port);
        }
        if let Some(version) = resource.get_str("engine_version") {
            request = request.engine_version(version);
        }
        if let Some(db_name) = resource.get_str("db_name") {
            request = request.db_name(db_name);
        }

        let result = request
            .send()
            .await
            .map_err(|e| api_error("create DB instance", &resource.id, e))?;

        let instance = result.db_instance().ok_or_else(|| {
            ProviderError::new("DB instance created but not returned")
                .for_resource(resource.id.clone())
        })?;
        Ok(instance_state(resource.id.clone(), instance))
    }
}
