use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject, Patch, PatchParams};
use kube::Client;
use nopea_defs::{is_cluster_scoped, Error};
use serde_json::{json, Value};

use crate::FIELD_MANAGER;

/// The Kubernetes collaborator. Everything the reconciliation core needs
/// from the cluster, expressed over untyped manifests so workers can apply
/// arbitrary kinds.
#[async_trait]
pub trait KubeApi: Send + Sync {
    /// Fetch a resource; `Ok(None)` when it does not exist.
    async fn get(
        &self,
        api_version: &str,
        kind: &str,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Value>, Error>;

    /// Server-side apply with NOPEA's field manager, force=true.
    async fn apply(&self, manifest: &Value) -> Result<(), Error>;

    async fn delete(
        &self,
        api_version: &str,
        kind: &str,
        name: &str,
        namespace: &str,
    ) -> Result<(), Error>;

    /// Merge-patch the `/status` subresource.
    async fn patch_status(
        &self,
        api_version: &str,
        kind: &str,
        name: &str,
        namespace: &str,
        status: Value,
    ) -> Result<(), Error>;
}

/// `KubeApi` over a real cluster connection via dynamic objects.
pub struct DynamicKube {
    client: Client,
}

impl DynamicKube {
    pub fn new(client: Client) -> Self {
        DynamicKube { client }
    }

    fn api_for(&self, api_version: &str, kind: &str, namespace: &str) -> Api<DynamicObject> {
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group, version),
            // Core group, e.g. "v1".
            None => ("", api_version),
        };
        let resource = ApiResource {
            group: group.to_string(),
            version: version.to_string(),
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            plural: plural_of(kind),
        };
        if is_cluster_scoped(kind) {
            Api::all_with(self.client.clone(), &resource)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, &resource)
        }
    }
}

fn k8s_err(context: &str, e: kube::Error) -> Error {
    Error::k8s(format!("{}: {}", context, e))
}

/// English pluralization as the API machinery does it for built-in kinds:
/// trailing "y" becomes "ies", "s"/"x"/"ch"/"sh" gain "es", everything else
/// gains "s".
fn plural_of(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if let Some(stem) = lower.strip_suffix('y') {
        format!("{}ies", stem)
    } else if lower.ends_with('s')
        || lower.ends_with('x')
        || lower.ends_with("ch")
        || lower.ends_with("sh")
    {
        format!("{}es", lower)
    } else {
        format!("{}s", lower)
    }
}


#[async_trait]
impl KubeApi for DynamicKube {
    async fn get(
        &self,
        api_version: &str,
        kind: &str,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Value>, Error> {
        let api = self.api_for(api_version, kind, namespace);
        let found = api
            .get_opt(name)
            .await
            .map_err(|e| k8s_err(&format!("get {}/{}", kind, name), e))?;
        match found {
            Some(object) => Ok(Some(serde_json::to_value(object).map_err(|e| {
                Error::k8s(format!("serialize {}/{}: {}", kind, name, e))
            })?)),
            None => Ok(None),
        }
    }

    async fn apply(&self, manifest: &Value) -> Result<(), Error> {
        let api_version = manifest["apiVersion"].as_str().unwrap_or_default();
        let kind = manifest["kind"].as_str().unwrap_or_default();
        let name = manifest["metadata"]["name"].as_str().unwrap_or_default();
        let namespace = manifest["metadata"]["namespace"]
            .as_str()
            .unwrap_or("default");

        let api = self.api_for(api_version, kind, namespace);
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(name, &params, &Patch::Apply(manifest))
            .await
            .map_err(|e| k8s_err(&format!("apply {}/{}", kind, name), e))?;
        Ok(())
    }

    async fn delete(
        &self,
        api_version: &str,
        kind: &str,
        name: &str,
        namespace: &str,
    ) -> Result<(), Error> {
        let api = self.api_for(api_version, kind, namespace);
        api.delete(name, &Default::default())
            .await
            .map_err(|e| k8s_err(&format!("delete {}/{}", kind, name), e))?;
        Ok(())
    }

    async fn patch_status(
        &self,
        api_version: &str,
        kind: &str,
        name: &str,
        namespace: &str,
        status: Value,
    ) -> Result<(), Error> {
        let api = self.api_for(api_version, kind, namespace);
        let patch = json!({"status": status});
        api.patch_status(name, &Default::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| k8s_err(&format!("patch status {}/{}", kind, name), e))?;
        Ok(())
    }
}
