//! Resource - Representing desired resources and their observed state

use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Resource type names understood by every provider
pub mod kind {
    pub const VPC: &str = "vpc";
    pub const SUBNET: &str = "subnet";
    pub const INTERNET_GATEWAY: &str = "internet_gateway";
    pub const ROUTE_TABLE: &str = "route_table";
    pub const SECURITY_GROUP: &str = "security_group";
    pub const IAM_ROLE: &str = "iam_role";
    pub const IAM_USER: &str = "iam_user";
    pub const ACCESS_KEY: &str = "access_key";
    pub const EKS_CLUSTER: &str = "eks_cluster";
    pub const EKS_NODEGROUP: &str = "eks_nodegroup";
    pub const DB_SUBNET_GROUP: &str = "db_subnet_group";
    pub const RDS_INSTANCE: &str = "rds_instance";
    pub const CACHE_SUBNET_GROUP: &str = "cache_subnet_group";
    pub const ELASTICACHE_CLUSTER: &str = "elasticache_cluster";
}

/// Desired attributes that carry credentials and are never recorded in state
/// attributes
pub const SENSITIVE_ATTRIBUTES: &[&str] = &["master_password"];

/// Unique identifier for a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    /// Resource type (e.g., "vpc", "eks_cluster")
    pub resource_type: String,
    /// Deterministic, project-prefixed name; the existence-check key
    pub name: String,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

/// Attribute value of a resource
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to a JSON value for persistence
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Convert from a JSON value; `null` and non-integral numbers have no equivalent
    pub fn from_json(value: &serde_json::Value) -> Option<Value> {
        match value {
            serde_json::Value::String(s) => Some(Value::String(s.clone())),
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => n.as_i64().map(Value::Int),
            serde_json::Value::Array(arr) => {
                Some(Value::List(arr.iter().filter_map(Value::from_json).collect()))
            }
            serde_json::Value::Object(map) => Some(Value::Map(
                map.iter()
                    .filter_map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
                    .collect(),
            )),
            serde_json::Value::Null => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::List(items.into_iter().map(Value::String).collect())
    }
}

/// Desired resource
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub attributes: HashMap<String, Value>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(resource_type, name),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add a tag, keeping any tag already set under the same key
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let tags = self
            .attributes
            .entry("tags".to_string())
            .or_insert_with(|| Value::Map(BTreeMap::new()));
        if let Value::Map(map) = tags {
            map.entry(key.into())
                .or_insert_with(|| Value::String(value.into()));
        }
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.attributes.get(key) {
            Some(Value::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.attributes.get(key) {
            Some(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// String items of a list attribute; non-string items are skipped
    pub fn get_str_list(&self, key: &str) -> Option<Vec<String>> {
        match self.attributes.get(key) {
            Some(Value::List(items)) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn tags(&self) -> BTreeMap<String, String> {
        match self.attributes.get("tags") {
            Some(Value::Map(map)) => map
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect(),
            _ => BTreeMap::new(),
        }
    }
}

/// Observed state fetched from the provider
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub id: ResourceId,
    /// Provider identifier (e.g., vpc-xxx, an ARN)
    pub identifier: Option<String>,
    pub attributes: HashMap<String, Value>,
    /// Lifecycle status for resource types that have one (e.g., "ACTIVE")
    pub status: Option<String>,
    /// Values only returned at creation time (e.g., secret access keys)
    pub secrets: BTreeMap<String, String>,
    /// Whether this resource exists
    pub exists: bool,
}

impl State {
    pub fn not_found(id: ResourceId) -> Self {
        Self {
            id,
            identifier: None,
            attributes: HashMap::new(),
            status: None,
            secrets: BTreeMap::new(),
            exists: false,
        }
    }

    pub fn existing(id: ResourceId, attributes: HashMap<String, Value>) -> Self {
        Self {
            id,
            identifier: None,
            attributes,
            status: None,
            secrets: BTreeMap::new(),
            exists: true,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(key.into(), value.into());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}
