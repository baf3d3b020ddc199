//! Cache key types

use crate::resource::ResourceType;

/// Identity addressing one cache entry.
///
/// `shard` names the accounting bucket the key is counted under; it is not a
/// storage partition.
pub trait CacheKey {
    fn shard(&self) -> &str;
    fn key(&self) -> String;
}

/// A Kubernetes object addressed by type, namespace and name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub resource: ResourceType,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(resource: ResourceType, namespace: Option<String>, name: impl Into<String>) -> Self {
        Self {
            resource,
            namespace,
            name: name.into(),
        }
    }
}

impl CacheKey for ObjectKey {
    fn shard(&self) -> &str {
        self.resource.as_str()
    }

    fn key(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}/{}", self.resource, ns, self.name),
            None => format!("{}/{}", self.resource, self.name),
        }
    }
}

/// An object addressed only by its cluster-wide UID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UidKey(pub String);

impl CacheKey for UidKey {
    fn shard(&self) -> &str {
        "uid"
    }

    fn key(&self) -> String {
        format!("uid/{}", self.0)
    }
}
