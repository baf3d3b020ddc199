//! Resource types and the records produced for them

use clusterdump_common::types::is_path_segment;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::ObjectKey;
use crate::error::{DumpError, Result};

/// Relative output path for cluster-scoped objects
pub const CLUSTER_SCOPED_FILE: &str = "cluster.ndjson";

/// Extension of every per-namespace output file
pub const RECORD_FILE_EXTENSION: &str = "ndjson";

/// One category of collected entity.
///
/// Each type gets its own collector stream, its own worker and its own
/// output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Nodes,
    Pods,
    Roles,
    RoleBindings,
    ClusterRoles,
    ClusterRoleBindings,
    EndpointSlices,
}

impl ResourceType {
    pub const ALL: [ResourceType; 7] = [
        ResourceType::Nodes,
        ResourceType::Pods,
        ResourceType::Roles,
        ResourceType::RoleBindings,
        ResourceType::ClusterRoles,
        ResourceType::ClusterRoleBindings,
        ResourceType::EndpointSlices,
    ];

    /// Directory name under the output root
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Nodes => "nodes",
            ResourceType::Pods => "pods",
            ResourceType::Roles => "roles",
            ResourceType::RoleBindings => "rolebindings",
            ResourceType::ClusterRoles => "clusterroles",
            ResourceType::ClusterRoleBindings => "clusterrolebindings",
            ResourceType::EndpointSlices => "endpointslices",
        }
    }

    /// Cluster-wide list path on the Kubernetes API server
    pub fn api_path(&self) -> &'static str {
        match self {
            ResourceType::Nodes => "/api/v1/nodes",
            ResourceType::Pods => "/api/v1/pods",
            ResourceType::Roles => "/apis/rbac.authorization.k8s.io/v1/roles",
            ResourceType::RoleBindings => "/apis/rbac.authorization.k8s.io/v1/rolebindings",
            ResourceType::ClusterRoles => "/apis/rbac.authorization.k8s.io/v1/clusterroles",
            ResourceType::ClusterRoleBindings => {
                "/apis/rbac.authorization.k8s.io/v1/clusterrolebindings"
            },
            ResourceType::EndpointSlices => "/apis/discovery.k8s.io/v1/endpointslices",
        }
    }

    pub fn is_namespaced(&self) -> bool {
        !matches!(
            self,
            ResourceType::Nodes | ResourceType::ClusterRoles | ResourceType::ClusterRoleBindings
        )
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceType {
    type Err = DumpError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DumpError::config(format!("Unknown resource type: {}", s)))
    }
}

/// An entity as produced by a collector, before serialization
#[derive(Debug, Clone, PartialEq)]
pub struct RawObject {
    pub resource: ResourceType,
    pub value: Value,
}

impl RawObject {
    pub fn new(resource: ResourceType, value: Value) -> Self {
        Self { resource, value }
    }
}

/// Identity facts tracked in the cache for every written record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordIdentity {
    pub uid: Option<String>,
    pub resource_version: Option<String>,
}

/// One serialized entity ready for the writer
#[derive(Debug, Clone)]
pub struct ResourceRecord {
    pub resource: ResourceType,
    pub key: ObjectKey,
    pub identity: RecordIdentity,
    /// Path relative to the resource type's output directory
    pub relative_path: String,
    /// JSON document terminated by a newline
    pub data: Vec<u8>,
}

impl ResourceRecord {
    /// Serialize a collected object.
    ///
    /// Fails with a per-record error when the object has no `metadata.name`,
    /// or no usable `metadata.namespace` for a namespaced type. The namespace
    /// names the output file, so it must be a single path segment.
    pub fn from_object(object: &RawObject) -> Result<Self> {
        let resource = object.resource;
        let metadata = object
            .value
            .get("metadata")
            .ok_or_else(|| DumpError::malformed(resource, "missing metadata"))?;

        let field = |name: &str| metadata.get(name).and_then(Value::as_str).map(str::to_owned);

        let name = field("name")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| DumpError::malformed(resource, "missing metadata.name"))?;

        let namespace = if resource.is_namespaced() {
            Some(
                field("namespace")
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| DumpError::malformed(resource, format!("{} has no namespace", name)))?,
            )
        } else {
            None
        };

        if let Some(ns) = namespace.as_deref().filter(|ns| !is_path_segment(ns)) {
            return Err(DumpError::malformed(
                resource,
                format!("{} has invalid namespace '{}'", name, ns),
            ));
        }

        let relative_path = match &namespace {
            Some(ns) => format!("{}.{}", ns, RECORD_FILE_EXTENSION),
            None => CLUSTER_SCOPED_FILE.to_string(),
        };

        let mut data = serde_json::to_vec(&object.value)?;
        data.push(b'\n');

        Ok(Self {
            resource,
            key: ObjectKey::new(resource, namespace, name),
            identity: RecordIdentity {
                uid: field("uid"),
                resource_version: field("resourceVersion"),
            },
            relative_path,
            data,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cache::CacheKey;
    use serde_json::json;

    #[test]
    fn test_resource_type_parse() {
        assert_eq!("Pods".parse::<ResourceType>().unwrap(), ResourceType::Pods);
        assert_eq!(
            "clusterrolebindings".parse::<ResourceType>().unwrap(),
            ResourceType::ClusterRoleBindings
        );
        assert!("secrets".parse::<ResourceType>().is_err());
    }

    #[test]
    fn test_namespaced_record_path() {
        let object = RawObject::new(
            ResourceType::Pods,
            json!({"metadata": {"name": "foo", "namespace": "ns1", "uid": "abc"}}),
        );
        let record = ResourceRecord::from_object(&object).unwrap();

        assert_eq!(record.relative_path, "ns1.ndjson");
        assert_eq!(record.key.key(), "pods/ns1/foo");
        assert_eq!(record.identity.uid.as_deref(), Some("abc"));
        assert_eq!(record.data.last(), Some(&b'\n'));
    }

    #[test]
    fn test_cluster_scoped_record_path() {
        let object = RawObject::new(ResourceType::Nodes, json!({"metadata": {"name": "node-1"}}));
        let record = ResourceRecord::from_object(&object).unwrap();
        assert_eq!(record.relative_path, CLUSTER_SCOPED_FILE);
    }

    #[test]
    fn test_malformed_records() {
        let nameless = RawObject::new(ResourceType::Roles, json!({"metadata": {"namespace": "a"}}));
        assert!(matches!(
            ResourceRecord::from_object(&nameless),
            Err(DumpError::MalformedRecord { .. })
        ));

        let no_namespace = RawObject::new(ResourceType::Pods, json!({"metadata": {"name": "x"}}));
        assert!(matches!(
            ResourceRecord::from_object(&no_namespace),
            Err(DumpError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_namespace_must_be_a_single_segment() {
        for ns in ["../nodes/x", "a/b", "..", "/etc"] {
            let object = RawObject::new(
                ResourceType::Pods,
                json!({"metadata": {"name": "evil", "namespace": ns}}),
            );
            let err = ResourceRecord::from_object(&object).unwrap_err();
            assert!(matches!(err, DumpError::MalformedRecord { .. }), "{ns}: {err:?}");
            assert_eq!(err.scope(), crate::error::ErrorScope::Record);
        }
    }
}
