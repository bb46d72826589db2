//! In-memory provider for tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use crate::provider::{
    BoxFuture, Preflight, Probe, Provider, ProviderError, ProviderResult, ResourceType,
};
use crate::resource::{Resource, ResourceId, State, Value, kind};

crate::define_resource_type!(Vpc, kind::VPC);
crate::define_resource_type!(Subnet, kind::SUBNET);
crate::define_resource_type!(InternetGateway, kind::INTERNET_GATEWAY);
crate::define_resource_type!(RouteTable, kind::ROUTE_TABLE);
crate::define_resource_type!(SecurityGroup, kind::SECURITY_GROUP);
crate::define_resource_type!(IamRole, kind::IAM_ROLE);
crate::define_resource_type!(IamUser, kind::IAM_USER);
crate::define_resource_type!(AccessKey, kind::ACCESS_KEY);
crate::define_resource_type!(EksCluster, kind::EKS_CLUSTER, ready = "ACTIVE", failed = ["FAILED"]);
crate::define_resource_type!(
    EksNodegroup,
    kind::EKS_NODEGROUP,
    ready = "ACTIVE",
    failed = ["CREATE_FAILED", "DEGRADED"]
);
crate::define_resource_type!(DbSubnetGroup, kind::DB_SUBNET_GROUP);
crate::define_resource_type!(
    RdsInstance,
    kind::RDS_INSTANCE,
    ready = "available",
    failed = ["failed"]
);
crate::define_resource_type!(CacheSubnetGroup, kind::CACHE_SUBNET_GROUP);
crate::define_resource_type!(
    ElasticacheCluster,
    kind::ELASTICACHE_CLUSTER,
    ready = "available",
    failed = ["create-failed"]
);

struct Stored {
    resource: Resource,
    identifier: String,
    status: Option<String>,
}

/// Provider keeping resources in memory.
///
/// Statuses of polled types follow a per-type script: creation takes the
/// first scripted status and every later read advances one entry, staying on
/// the last one.
#[derive(Default)]
pub struct FakeProvider {
    store: Mutex<HashMap<ResourceId, Stored>>,
    scripts: Mutex<HashMap<String, VecDeque<String>>>,
    calls: Mutex<Vec<String>>,
    fail_creates: HashSet<String>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statuses(self, resource_type: &str, statuses: &[&str]) -> Self {
        self.scripts.lock().unwrap().insert(
            resource_type.to_string(),
            statuses.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub fn fail_creates_of(mut self, resource_type: &str) -> Self {
        self.fail_creates.insert(resource_type.to_string());
        self
    }

    /// Seed a resource as if it had been created outside this run
    pub fn with_existing(self, resource_type: &str, name: &str, identifier: &str) -> Self {
        let status = self.initial_status(resource_type);
        self.store.lock().unwrap().insert(
            ResourceId::new(resource_type, name),
            Stored {
                resource: Resource::new(resource_type, name),
                identifier: identifier.to_string(),
                status,
            },
        );
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn read_count(&self) -> usize {
        self.calls().iter().filter(|c| c.starts_with("read ")).count()
    }

    pub fn create_count(&self) -> usize {
        self.calls().iter().filter(|c| c.starts_with("create ")).count()
    }

    pub fn stored(&self, resource_type: &str, name: &str) -> Option<Resource> {
        self.store
            .lock()
            .unwrap()
            .get(&ResourceId::new(resource_type, name))
            .map(|s| s.resource.clone())
    }

    pub fn names_of(&self, resource_type: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .store
            .lock()
            .unwrap()
            .keys()
            .filter(|id| id.resource_type == resource_type)
            .map(|id| id.name.clone())
            .collect();
        names.sort();
        names
    }

    fn advance_status(&self, resource_type: &str) -> Option<String> {
        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts.get_mut(resource_type)?;
        if script.len() > 1 {
            script.pop_front();
        }
        script.front().cloned()
    }

    fn initial_status(&self, resource_type: &str) -> Option<String> {
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get(resource_type)
            .and_then(|s| s.front().cloned());
        scripted.or_else(|| self.lifecycle(resource_type).map(|l| l.success.to_string()))
    }

    fn to_state(stored: &Stored) -> State {
        let mut attributes = stored.resource.attributes.clone();
        match stored.resource.id.resource_type.as_str() {
            kind::EKS_CLUSTER => {
                attributes.insert(
                    "endpoint".to_string(),
                    Value::from(format!("https://{}.eks.example", stored.resource.id.name)),
                );
                attributes.insert("certificate_authority".to_string(), Value::from("Q0E="));
            }
            kind::RDS_INSTANCE | kind::ELASTICACHE_CLUSTER => {
                attributes.insert(
                    "endpoint".to_string(),
                    Value::from(format!("{}.db.example", stored.resource.id.name)),
                );
            }
            _ => {}
        }

        let mut state = State::existing(stored.resource.id.clone(), attributes)
            .with_identifier(stored.identifier.clone());
        state.status = stored.status.clone();
        state
    }
}

impl Provider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        vec![
            Box::new(Vpc),
            Box::new(Subnet),
            Box::new(InternetGateway),
            Box::new(RouteTable),
            Box::new(SecurityGroup),
            Box::new(IamRole),
            Box::new(IamUser),
            Box::new(AccessKey),
            Box::new(EksCluster),
            Box::new(EksNodegroup),
            Box::new(DbSubnetGroup),
            Box::new(RdsInstance),
            Box::new(CacheSubnetGroup),
            Box::new(ElasticacheCluster),
        ]
    }

    fn read(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let id = resource.id.clone();
        Box::pin(async move {
            self.calls.lock().unwrap().push(format!("read {}", id));

            let exists = self.store.lock().unwrap().contains_key(&id);
            if !exists {
                return Ok(State::not_found(id));
            }

            let next = self.advance_status(&id.resource_type);
            let mut store = self.store.lock().unwrap();
            let stored = store
                .get_mut(&id)
                .ok_or_else(|| ProviderError::new("vanished").for_resource(id.clone()))?;
            if next.is_some() {
                stored.status = next;
            }
            Ok(Self::to_state(stored))
        })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move {
            let id = resource.id.clone();
            self.calls.lock().unwrap().push(format!("create {}", id));

            if self.fail_creates.contains(&id.resource_type) {
                return Err(ProviderError::new("simulated failure").for_resource(id));
            }

            let status = self.initial_status(&id.resource_type);
            let mut store = self.store.lock().unwrap();
            let identifier = format!("{}-{:04}", id.resource_type, store.len() + 1);
            let stored = Stored {
                resource,
                identifier,
                status,
            };

            let mut state = Self::to_state(&stored);
            if id.resource_type == kind::ACCESS_KEY {
                state = state.with_secret("secret_access_key", format!("secret-{}", id.name));
            }
            store.insert(id, stored);
            Ok(state)
        })
    }

    fn preflight(&self) -> BoxFuture<'_, ProviderResult<Preflight>> {
        Box::pin(async {
            Ok(Preflight {
                account: "123456789012".to_string(),
                arn: "arn:aws:iam::123456789012:user/fake".to_string(),
                probes: vec![Probe::passed("ec2"), Probe::passed("eks")],
            })
        })
    }
}
