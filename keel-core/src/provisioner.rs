//! Provisioner - Create a resource only if it does not exist yet
//!
//! Existing resources are never compared with the desired attributes: a
//! resource found under its deterministic name is taken as it is.

use std::future::Future;

use crate::provider::{Provider, ProviderError, ProviderResult};
use crate::resource::{Resource, State};

/// Tag value identifying resources created by this tool
pub const MANAGED_BY: &str = "keel";

/// What `ensure` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The resource was absent and has been created
    Created,
    /// A resource with the same name already existed
    Skipped,
}

impl EnsureOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnsureOutcome::Created => "created",
            EnsureOutcome::Skipped => "exists",
        }
    }
}

/// Result of ensuring a single resource
#[derive(Debug, Clone, PartialEq)]
pub struct Ensured {
    pub outcome: EnsureOutcome,
    pub state: State,
}

impl Ensured {
    pub fn identifier(&self) -> Option<&str> {
        self.state.identifier.as_deref()
    }

    pub fn created(&self) -> bool {
        self.outcome == EnsureOutcome::Created
    }
}

/// Runs the existence check and, when needed, the create call
pub struct Provisioner<'a> {
    provider: &'a dyn Provider,
    project: &'a str,
}

impl<'a> Provisioner<'a> {
    pub fn new(provider: &'a dyn Provider, project: &'a str) -> Self {
        Self { provider, project }
    }

    /// Make sure `resource` exists, creating it if its name is not taken.
    ///
    /// The resource is tagged with its name, the project and `ManagedBy`
    /// before any call. Tags already set on the resource are kept.
    pub async fn ensure(&self, resource: &Resource) -> ProviderResult<Ensured> {
        self.ensure_prepared(resource, |tagged| async move { Ok(tagged) })
            .await
    }

    /// Like [`Provisioner::ensure`], but `prepare` runs only when the
    /// resource is absent and returns the resource to create.
    pub async fn ensure_prepared<E, P, PF>(
        &self,
        resource: &Resource,
        prepare: P,
    ) -> Result<Ensured, E>
    where
        E: From<ProviderError>,
        P: FnOnce(Resource) -> PF,
        PF: Future<Output = Result<Resource, E>>,
    {
        let id = &resource.id;
        if !self.provider.supports(&id.resource_type) {
            return Err(ProviderError::new(format!(
                "resource type '{}' is not supported by provider '{}'",
                id.resource_type,
                self.provider.name()
            ))
            .for_resource(id.clone())
            .into());
        }

        let tagged = resource
            .clone()
            .with_tag("Name", id.name.clone())
            .with_tag("Project", self.project)
            .with_tag("ManagedBy", MANAGED_BY);

        let current = self.provider.read(&tagged).await?;
        if current.exists {
            log::info!(
                "{} already exists ({})",
                id,
                current.identifier.as_deref().unwrap_or("no identifier")
            );
            return Ok(Ensured {
                outcome: EnsureOutcome::Skipped,
                state: current,
            });
        }

        let desired = prepare(tagged).await?;
        log::info!("creating {}", id);
        let created = self.provider.create(&desired).await?;
        let Some(identifier) = created.identifier.as_deref() else {
            return Err(
                ProviderError::new("create returned no identifier")
                    .for_resource(id.clone())
                    .into(),
            );
        };
        log::info!("created {} ({})", id, identifier);

        Ok(Ensured {
            outcome: EnsureOutcome::Created,
            state: created,
        })
    }
}

/// Closure form of the ensure contract for things that are not provider
/// resources.
///
/// `exists` returns the identifier of an existing item; `create` is only
/// called when it returns `None` and must return the new identifier.
pub async fn ensure_with<E, X, XF, C, CF>(
    kind: &str,
    name: &str,
    exists: X,
    create: C,
) -> Result<(EnsureOutcome, String), E>
where
    X: FnOnce() -> XF,
    XF: Future<Output = Result<Option<String>, E>>,
    C: FnOnce() -> CF,
    CF: Future<Output = Result<String, E>>,
{
    if let Some(identifier) = exists().await? {
        log::debug!("{} {} already present", kind, name);
        return Ok((EnsureOutcome::Skipped, identifier));
    }

    let identifier = create().await?;
    log::info!("created {} {}", kind, name);
    Ok((EnsureOutcome::Created, identifier))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::kind;
    use crate::testing::FakeProvider;
    use std::cell::Cell;
    use std::convert::Infallible;

    #[tokio::test]
    async fn ensure_twice_creates_once() {
        let provider = FakeProvider::new();
        let provisioner = Provisioner::new(&provider, "acme");
        let vpc = Resource::new(kind::VPC, "acme-vpc").with_attribute("cidr_block", "10.0.0.0/16");

        let first = provisioner.ensure(&vpc).await.unwrap();
        let second = provisioner.ensure(&vpc).await.unwrap();

        assert_eq!(first.outcome, EnsureOutcome::Created);
        assert_eq!(second.outcome, EnsureOutcome::Skipped);
        assert_eq!(first.identifier(), second.identifier());
        assert_eq!(provider.create_count(), 1);
    }

    #[tokio::test]
    async fn ensure_tags_created_resources() {
        let provider = FakeProvider::new();
        let provisioner = Provisioner::new(&provider, "acme");
        let subnet = Resource::new(kind::SUBNET, "acme-public-1").with_tag("Tier", "public");

        provisioner.ensure(&subnet).await.unwrap();

        let stored = provider.stored(kind::SUBNET, "acme-public-1").unwrap();
        let tags = stored.tags();
        assert_eq!(tags.get("Name").map(String::as_str), Some("acme-public-1"));
        assert_eq!(tags.get("Project").map(String::as_str), Some("acme"));
        assert_eq!(tags.get("ManagedBy").map(String::as_str), Some("keel"));
        assert_eq!(tags.get("Tier").map(String::as_str), Some("public"));
    }

    #[tokio::test]
    async fn ensure_rejects_unsupported_types() {
        let provider = FakeProvider::new();
        let provisioner = Provisioner::new(&provider, "acme");

        let err = provisioner
            .ensure(&Resource::new("lambda_function", "acme-fn"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("not supported"));
        assert_eq!(provider.read_count(), 0);
    }

    #[tokio::test]
    async fn ensure_propagates_create_errors() {
        let provider = FakeProvider::new().fail_creates_of(kind::IAM_ROLE);
        let provisioner = Provisioner::new(&provider, "acme");

        let err = provisioner
            .ensure(&Resource::new(kind::IAM_ROLE, "acme-eks-node-role"))
            .await
            .unwrap_err();

        assert_eq!(
            err.resource_id.map(|id| id.to_string()),
            Some("iam_role.acme-eks-node-role".to_string())
        );
    }

    #[tokio::test]
    async fn prepare_runs_only_for_absent_resources() {
        let provider = FakeProvider::new().with_existing(kind::RDS_INSTANCE, "acme-old", "arn:old");
        let provisioner = Provisioner::new(&provider, "acme");
        let prepared = Cell::new(0);

        let prepare = |r: Resource| {
            prepared.set(prepared.get() + 1);
            async move { Ok::<_, ProviderError>(r.with_attribute("master_password", "s3cret")) }
        };
        let skipped = provisioner
            .ensure_prepared(&Resource::new(kind::RDS_INSTANCE, "acme-old"), prepare)
            .await
            .unwrap();
        assert_eq!(skipped.outcome, EnsureOutcome::Skipped);
        assert_eq!(prepared.get(), 0);

        let prepare = |r: Resource| {
            prepared.set(prepared.get() + 1);
            async move { Ok::<_, ProviderError>(r.with_attribute("master_password", "s3cret")) }
        };
        let created = provisioner
            .ensure_prepared(&Resource::new(kind::RDS_INSTANCE, "acme-new"), prepare)
            .await
            .unwrap();
        assert_eq!(created.outcome, EnsureOutcome::Created);
        assert_eq!(prepared.get(), 1);
        let stored = provider.stored(kind::RDS_INSTANCE, "acme-new").unwrap();
        assert_eq!(stored.get_str("master_password"), Some("s3cret"));
    }

    #[tokio::test]
    async fn ensure_with_skips_create_when_present() {
        let created = Cell::new(false);
        let (outcome, id) = ensure_with(
            "password",
            "acme-postgres",
            || async { Ok::<_, Infallible>(Some("stored".to_string())) },
            || async {
                created.set(true);
                Ok("fresh".to_string())
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome, EnsureOutcome::Skipped);
        assert_eq!(id, "stored");
        assert!(!created.get());
    }

    #[tokio::test]
    async fn ensure_with_creates_when_absent() {
        let (outcome, id) = ensure_with(
            "password",
            "acme-postgres",
            || async { Ok::<_, Infallible>(None) },
            || async { Ok("fresh".to_string()) },
        )
        .await
        .unwrap();

        assert_eq!(outcome, EnsureOutcome::Created);
        assert_eq!(id, "fresh");
    }
}
