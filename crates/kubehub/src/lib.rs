//! Deck kubehub – client construction, discovery and the read-only cluster probes used
//! after a deploy (server version, ingress rules, pod readiness).

#![forbid(unsafe_code)]

use std::time::Duration;

use deck_core::KubeconfigHandle;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    api::{Api, ListParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::{ApiResource, GroupVersionKind},
    discovery::Scope,
    Client, Config,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("cannot load kubeconfig ({handle}): {reason}")]
    Kubeconfig { handle: String, reason: String },
    #[error(transparent)]
    Api(#[from] kube::Error),
}

fn kubeconfig_err(handle: &KubeconfigHandle, e: impl ToString) -> HubError {
    HubError::Kubeconfig { handle: handle.to_string(), reason: e.to_string() }
}

/// Build a client for `handle`: a provider-written kubeconfig file, or the user's own
/// kubeconfig (optionally pinned to a context).
pub async fn connect(handle: &KubeconfigHandle) -> Result<Client, HubError> {
    let mut config = match handle {
        KubeconfigHandle::File(path) => {
            let kc = Kubeconfig::read_from(path).map_err(|e| kubeconfig_err(handle, e))?;
            Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                .await
                .map_err(|e| kubeconfig_err(handle, e))?
        }
        KubeconfigHandle::CurrentContext { context: Some(ctx) } => {
            let opts = KubeConfigOptions { context: Some(ctx.clone()), ..Default::default() };
            Config::from_kubeconfig(&opts).await.map_err(|e| kubeconfig_err(handle, e))?
        }
        KubeconfigHandle::CurrentContext { context: None } => Config::infer().await.map_err(|e| kubeconfig_err(handle, e))?,
    };
    config.connect_timeout = Some(CONNECT_TIMEOUT);
    config.read_timeout = Some(READ_TIMEOUT);
    debug!(handle = %handle, cluster_url = %config.cluster_url, "kube client");
    Ok(Client::try_from(config)?)
}

/// Name of the active context in the user's kubeconfig.
pub fn current_context() -> Result<String, HubError> {
    let handle = KubeconfigHandle::CurrentContext { context: None };
    let kc = Kubeconfig::read().map_err(|e| kubeconfig_err(&handle, e))?;
    kc.current_context.filter(|c| !c.is_empty()).ok_or_else(|| kubeconfig_err(&handle, "no current-context set"))
}

/// `major.minor` with provider suffixes such as `24+` trimmed.
pub fn format_version(major: &str, minor: &str) -> String {
    format!("{}.{}", major.trim(), minor.trim().trim_end_matches('+'))
}

pub async fn server_version(client: &Client) -> Result<String, HubError> {
    let info = client.apiserver_version().await?;
    Ok(format_version(&info.major, &info.minor))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub host: String,
    pub path: String,
}

/// Flatten an Ingress into `host -> path` pairs. Host-less rules report `*`.
pub fn rules_of(ingress: &Ingress) -> Vec<IngressRule> {
    let mut out = Vec::new();
    let rules = ingress.spec.as_ref().and_then(|s| s.rules.as_ref());
    for rule in rules.into_iter().flatten() {
        let host = rule.host.clone().unwrap_or_else(|| "*".to_string());
        for p in rule.http.iter().flat_map(|h| h.paths.iter()) {
            out.push(IngressRule { host: host.clone(), path: p.path.clone().unwrap_or_else(|| "/".to_string()) });
        }
    }
    out
}

pub async fn ingress_rules(client: &Client, namespace: &str) -> Result<Vec<IngressRule>, HubError> {
    let api: Api<Ingress> = Api::namespaced(client.clone(), namespace);
    let list = api.list(&ListParams::default()).await?;
    Ok(list.items.iter().flat_map(rules_of).collect())
}

/// Ready when a `ContainersReady`/`Ready` condition is true, or the pod already completed.
pub fn pod_is_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else { return false };
    if status.phase.as_deref() == Some("Succeeded") {
        return true;
    }
    status
        .conditions
        .iter()
        .flatten()
        .any(|c| (c.type_ == "ContainersReady" || c.type_ == "Ready") && c.status == "True")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PodReadiness {
    pub total: usize,
    pub ready: usize,
}

impl PodReadiness {
    /// No pods yet counts as not ready.
    pub fn all_ready(&self) -> bool {
        self.total > 0 && self.ready == self.total
    }
}

/// One readiness probe; callers own the polling loop.
pub async fn pods_ready(client: &Client, namespace: &str) -> Result<PodReadiness, HubError> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let pods = api.list(&ListParams::default()).await?;
    Ok(PodReadiness { total: pods.items.len(), ready: pods.items.iter().filter(|p| pod_is_ready(p)).count() })
}

/// Plural used on raw paths: `ingress` -> `ingresses`, otherwise `<kind>s`.
pub fn pluralize(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower == "ingress" {
        "ingresses".to_string()
    } else {
        format!("{}s", lower)
    }
}

pub fn split_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// A kind as the server serves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKind {
    pub resource: ApiResource,
    pub namespaced: bool,
}

/// ApiResource built without asking the server, using [`pluralize`].
pub fn pinned_kind(api_version: &str, kind: &str, namespaced: bool) -> ResolvedKind {
    let (group, version) = split_api_version(api_version);
    ResolvedKind {
        resource: ApiResource {
            group,
            version,
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            plural: pluralize(kind),
        },
        namespaced,
    }
}

/// Ask the server for `kind` in `api_version`. `None` when the group/version does not (yet)
/// serve it, which is normal right after a CRD was created.
pub async fn resolve_kind(client: &Client, api_version: &str, kind: &str) -> Result<Option<ResolvedKind>, HubError> {
    let (group, version) = split_api_version(api_version);
    let gvk = GroupVersionKind { group, version, kind: kind.to_string() };
    match kube::discovery::pinned_kind(client, &gvk).await {
        Ok((resource, caps)) => Ok(Some(ResolvedKind { resource, namespaced: matches!(caps.scope, Scope::Namespaced) })),
        Err(kube::Error::Discovery(e)) => {
            debug!(api_version, kind, error = %e, "kind not served");
            Ok(None)
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}
