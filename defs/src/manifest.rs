use serde_json::Value;

/// Kinds that never carry a namespace. Anything else is treated as
/// namespaced for the purpose of target-namespace substitution.
const CLUSTER_SCOPED_KINDS: [&str; 8] = [
    "Namespace",
    "Node",
    "PersistentVolume",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "StorageClass",
    "PriorityClass",
];

pub fn is_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

/// A single Kubernetes manifest parsed from a repository file. Wraps the
/// JSON form of the document; field access never panics on malformed input,
/// validation happens at parse time in the applier.
#[derive(Clone, Debug, PartialEq)]
pub struct Manifest(pub Value);

impl Manifest {
    pub fn api_version(&self) -> &str {
        self.0["apiVersion"].as_str().unwrap_or("")
    }

    pub fn kind(&self) -> &str {
        self.0["kind"].as_str().unwrap_or("")
    }

    pub fn name(&self) -> &str {
        self.0["metadata"]["name"].as_str().unwrap_or("")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.0["metadata"]["namespace"].as_str()
    }

    pub fn annotations(&self) -> Option<&serde_json::Map<String, Value>> {
        self.0["metadata"]["annotations"].as_object()
    }

    pub fn is_namespaced(&self) -> bool {
        !is_cluster_scoped(self.kind())
    }

    /// Stable identity of a resource within one repository:
    /// `{apiVersion}/{kind}/{namespace|"default"}/{name}`. Built only from
    /// fields the server never mutates.
    pub fn resource_key(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.api_version(),
            self.kind(),
            self.namespace().unwrap_or("default"),
            self.name()
        )
    }

    pub fn set_namespace(&mut self, namespace: &str) {
        if let Some(Value::Object(metadata)) = self.0.get_mut("metadata") {
            metadata.insert("namespace".to_string(), Value::String(namespace.to_string()));
        }
    }
}
