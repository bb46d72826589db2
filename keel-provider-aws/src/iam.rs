//! IAM roles, users and access keys
//!
//! Policies are attached only when the role or user is created. An existing
//! role or user is never touched again.

use aws_sdk_iam::types::Tag;
use keel_core::provider::{ProviderError, ProviderResult};
use keel_core::resource::{Resource, State, Value};

use crate::{AwsProvider, api_error, attributes, required_str, str_list};

/// Trust policy letting an AWS service assume a role
fn assume_role_policy(service: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": service },
            "Action": "sts:AssumeRole"
        }]
    })
    .to_string()
}

fn iam_tags(resource: &Resource) -> ProviderResult<Vec<Tag>> {
    resource
        .tags()
        .into_iter()
        .map(|(key, value)| {
            Tag::builder().key(key).value(value).build().map_err(|e| {
                ProviderError::new(format!("Invalid tag: {}", e)).for_resource(resource.id.clone())
            })
        })
        .collect()
}

impl AwsProvider {
    // ========== IAM Role Operations ==========

    pub(crate) async fn read_iam_role(&self, resource: &Resource) -> ProviderResult<State> {
        let id = resource.id.clone();

        match self.iam_client.get_role().role_name(&id.name).send().await {
            Ok(output) => match output.role() {
                Some(role) => {
                    let attrs = attributes([("role_id", Some(Value::from(role.role_id())))]);
                    Ok(State::existing(id, attrs).with_identifier(role.arn()))
                }
                None => Ok(State::not_found(id)),
            },
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_no_such_entity_exception()) =>
            {
                Ok(State::not_found(id))
            }
            Err(e) => Err(api_error("get role", &id, e)),
        }
    }

    /// Create a role trusted by `assume_role_service` and attach its policies
    pub(crate) async fn create_iam_role(&self, resource: Resource) -> ProviderResult<State> {
        let service = required_str(&resource, "assume_role_service")?;

        let result = self
            .iam_client
            .create_role()
            .role_name(&resource.id.name)
            .assume_role_policy_document(assume_role_policy(service))
            .set_tags(Some(iam_tags(&resource)?))
            .send()
            .await
            .map_err(|e| api_error("create role", &resource.id, e))?;

        let role = result.role().ok_or_else(|| {
            ProviderError::new("Role created but not returned").for_resource(resource.id.clone())
        })?;

        for policy_arn in str_list(&resource, "policy_arns") {
            self.iam_client
                .attach_role_policy()
                .role_name(&resource.id.name)
                .policy_arn(&policy_arn)
                .send()
                .await
                .map_err(|e| api_error(&format!("attach {}", policy_arn), &resource.id, e))?;
        }

        let attrs = attributes([("role_id", Some(Value::from(role.role_id())))]);
        Ok(State::existing(resource.id.clone(), attrs).with_identifier(role.arn()))
    }

    // ========== IAM User Operations ==========

    pub(crate) async fn read_iam_user(&self, resource: &Resource) -> ProviderResult<State> {
        let id = resource.id.clone();

        match self.iam_client.get_user().user_name(&id.name).send().await {
            Ok(output) => match output.user() {
                Some(user) => {
                    let attrs = attributes([("user_id", Some(Value::from(user.user_id())))]);
                    Ok(State::existing(id, attrs).with_identifier(user.arn()))
                }
                None => Ok(State::not_found(id)),
            },
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_no_such_entity_exception()) =>
            {
                Ok(State::not_found(id))
            }
            Err(e) => Err(api_error("get user", &id, e)),
        }
    }

    /// Create a user with its managed policies and optional inline policy
    pub(crate) async fn create_iam_user(&self, resource: Resource) -> ProviderResult<State> {
        let result = self
            .iam_client
            .create_user()
            .user_name(&resource.id.name)
            .set_tags(Some(iam_tags(&resource)?))
            .send()
            .await
            .map_err(|e| api_error("create user", &resource.id, e))?;

        let user = result.user().ok_or_else(|| {
            ProviderError::new("User created but not returned").for_resource(resource.id.clone())
        })?;

        for policy_arn in str_list(&resource, "policy_arns") {
            self.iam_client
                .attach_user_policy()
                .user_name(&resource.id.name)
                .policy_arn(&policy_arn)
                .send()
                .await
                .map_err(|e| api_error(&format!("attach {}", policy_arn), &resource.id, e))?;
        }

        if let (Some(policy_name), Some(document)) = (
            resource.get_str("inline_policy_name"),
            resource.get_str("inline_policy"),
        ) {
            self.iam_client
                .put_user_policy()
                .user_name(&resource.id.name)
                .policy_name(policy_name)
                .policy_document(document)
                .send()
                .await
                .map_err(|e| api_error("put inline policy", &resource.id, e))?;
        }

        let attrs = attributes([("user_id", Some(Value::from(user.user_id())))]);
        Ok(State::existing(resource.id.clone(), attrs).with_identifier(user.arn()))
    }

    // ========== IAM Access Key Operations ==========

    /// A user with any access key counts as having one; keys are not rotated
    pub(crate) async fn read_iam_access_key(&self, resource: &Resource) -> ProviderResult<State> {
        let id = resource.id.clone();
        let user_name = required_str(resource, "user_name")?;

        match self
            .iam_client
            .list_access_keys()
            .user_name(user_name)
            .send()
            .await
        {
            Ok(output) => {
                let key_id = output
                    .access_key_metadata()
                    .iter()
                    .find_map(|key| key.access_key_id());
                match key_id {
                    Some(key_id) => {
                        let attrs = attributes([("user_name", Some(Value::from(user_name)))]);
                        Ok(State::existing(id, attrs).with_identifier(key_id))
                    }
                    None => Ok(State::not_found(id)),
                }
            }
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_no_such_entity_exception()) =>
            {
                Ok(State::not_found(id))
            }
            Err(e) => Err(api_error("list access keys", &id, e)),
        }
    }

    /// Create an access key; the secret is only available in this response
    pub(crate) async fn create_iam_access_key(&self, resource: Resource) -> ProviderResult<State> {
        let user_name = required_str(&resource, "user_name")?;

        let result = self
            .iam_client
            .create_access_key()
            .user_name(user_name)
            .send()
            .await
            .map_err(|e| api_error("create access key", &resource.id, e))?;

        let key = result.access_key().ok_or_else(|| {
            ProviderError::new("Access key created but not returned")
                .for_resource(resource.id.clone())
        })?;

        let attrs = attributes([("user_name", Some(Value::from(user_name)))]);
        Ok(State::existing(resource.id.clone(), attrs)
            .with_identifier(key.access_key_id())
            .with_secret("secret_access_key", key.secret_access_key()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_policy_names_the_service() {
        let policy: serde_json::Value =
            serde_json::from_str(&assume_role_policy("eks.amazonaws.com")).unwrap();
        assert_eq!(policy["Statement"][0]["Principal"]["Service"], "eks.amazonaws.com");
        assert_eq!(policy["Statement"][0]["Action"], "sts:AssumeRole");
    }

    #[test]
    fn iam_tags_keep_every_tag() {
        let resource = Resource::new("iam_role", "acme-cluster-role")
            .with_tag("Name", "acme-cluster-role")
            .with_tag("ManagedBy", "keel");
        let tags = iam_tags(&resource).unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].key(), "ManagedBy");
        assert_eq!(tags[0].value(), "keel");
    }
}
