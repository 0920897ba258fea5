//! The seam between the reconciler and a control plane.

use std::fmt;

use deck_core::Json;
use deck_kubehub::{pinned_kind, resolve_kind, HubError, ResolvedKind};
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    core::DynamicObject,
    Client,
};
use tracing::debug;

use crate::target::{ResourceTarget, Scope};

/// How a failed call should be treated by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Already exists.
    Conflict,
    /// Rejected by validation (e.g. an immutable field changed).
    Invalid,
    /// The kind or object is not there (yet).
    NotFound,
    /// Server-side error, usually an extension that is still starting.
    Unavailable,
    /// The object does not fit this server's API version.
    Skew,
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Conflict => "conflict",
            FailureKind::Invalid => "invalid",
            FailureKind::NotFound => "not found",
            FailureKind::Unavailable => "unavailable",
            FailureKind::Skew => "version skew",
            FailureKind::Other => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ApiFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ApiFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn from_status(code: u16, message: &str) -> Self {
        let kind = match code {
            409 => FailureKind::Conflict,
            422 => FailureKind::Invalid,
            404 => FailureKind::NotFound,
            500..=599 => FailureKind::Unavailable,
            400 if is_skew_message(message) => FailureKind::Skew,
            _ => FailureKind::Other,
        };
        Self::new(kind, format!("{} ({})", message, code))
    }

    /// "Not yet registered": worth another attempt after a delay.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, FailureKind::NotFound | FailureKind::Unavailable)
    }
}

fn is_skew_message(message: &str) -> bool {
    let m = message.to_lowercase();
    m.contains("unknown field") || m.contains("no kind") || m.contains("no matches for kind")
}

pub fn classify(e: kube::Error) -> ApiFailure {
    match e {
        kube::Error::Api(ae) => ApiFailure::from_status(ae.code, &ae.message),
        kube::Error::SerdeError(se) => ApiFailure::new(FailureKind::Skew, se.to_string()),
        other => ApiFailure::new(FailureKind::Other, other.to_string()),
    }
}

fn classify_hub(e: HubError) -> ApiFailure {
    match e {
        HubError::Api(ke) => classify(ke),
        other => ApiFailure::new(FailureKind::Other, other.to_string()),
    }
}

/// Object identity reported by a successful create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Created {
    pub uid: Option<String>,
}

#[async_trait::async_trait]
pub trait ResourceClient: Send + Sync {
    async fn create(&self, target: &ResourceTarget, body: &Json, scope: &Scope) -> Result<Created, ApiFailure>;
    async fn patch(&self, target: &ResourceTarget, body: &Json, scope: &Scope) -> Result<(), ApiFailure>;
    async fn delete(&self, target: &ResourceTarget, scope: &Scope) -> Result<(), ApiFailure>;
    async fn create_namespace(&self, name: &str) -> Result<(), ApiFailure>;
}

#[async_trait::async_trait]
impl<T: ResourceClient + ?Sized> ResourceClient for std::sync::Arc<T> {
    async fn create(&self, target: &ResourceTarget, body: &Json, scope: &Scope) -> Result<Created, ApiFailure> {
        (**self).create(target, body, scope).await
    }
    async fn patch(&self, target: &ResourceTarget, body: &Json, scope: &Scope) -> Result<(), ApiFailure> {
        (**self).patch(target, body, scope).await
    }
    async fn delete(&self, target: &ResourceTarget, scope: &Scope) -> Result<(), ApiFailure> {
        (**self).delete(target, scope).await
    }
    async fn create_namespace(&self, name: &str) -> Result<(), ApiFailure> {
        (**self).create_namespace(name).await
    }
}

/// [`ResourceClient`] over a live API server using dynamic objects.
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
}

impl KubeResourceClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn resolve(&self, target: &ResourceTarget, scope: &Scope) -> Result<ResolvedKind, ApiFailure> {
        if !target.is_registered() {
            return Ok(pinned_kind(&target.api_version, &target.kind, scope.namespace().is_some()));
        }
        match resolve_kind(&self.client, &target.api_version, &target.kind).await.map_err(classify_hub)? {
            Some(k) => Ok(k),
            None => Err(ApiFailure::new(FailureKind::NotFound, format!("{} {} is not served", target.api_version, target.kind))),
        }
    }

    async fn api(&self, target: &ResourceTarget, scope: &Scope) -> Result<Api<DynamicObject>, ApiFailure> {
        let kind = self.resolve(target, scope).await?;
        let api = match scope.namespace() {
            Some(ns) if kind.namespaced => Api::namespaced_with(self.client.clone(), ns, &kind.resource),
            _ => Api::all_with(self.client.clone(), &kind.resource),
        };
        debug!(surface = %target.surface, plural = %kind.resource.plural, namespaced = kind.namespaced, "api selected");
        Ok(api)
    }
}

fn to_object(body: &Json) -> Result<DynamicObject, ApiFailure> {
    serde_json::from_value(body.clone()).map_err(|e| ApiFailure::new(FailureKind::Skew, e.to_string()))
}

#[async_trait::async_trait]
impl ResourceClient for KubeResourceClient {
    async fn create(&self, target: &ResourceTarget, body: &Json, scope: &Scope) -> Result<Created, ApiFailure> {
        let api = self.api(target, scope).await?;
        let obj = api.create(&PostParams::default(), &to_object(body)?).await.map_err(classify)?;
        Ok(Created { uid: obj.metadata.uid })
    }

    async fn patch(&self, target: &ResourceTarget, body: &Json, scope: &Scope) -> Result<(), ApiFailure> {
        let api = self.api(target, scope).await?;
        let pp = PatchParams::default();
        if target.is_registered() {
            api.patch(&target.name, &pp, &Patch::Strategic(body)).await.map_err(classify)?;
        } else {
            api.patch(&target.name, &pp, &Patch::Merge(body)).await.map_err(classify)?;
        }
        Ok(())
    }

    async fn delete(&self, target: &ResourceTarget, scope: &Scope) -> Result<(), ApiFailure> {
        let api = self.api(target, scope).await?;
        api.delete(&target.name, &DeleteParams::default()).await.map_err(classify)?;
        Ok(())
    }

    async fn create_namespace(&self, name: &str) -> Result<(), ApiFailure> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let mut ns = Namespace::default();
        ns.metadata.name = Some(name.to_string());
        api.create(&PostParams::default(), &ns).await.map_err(classify)?;
        Ok(())
    }
}
