//! Live backend: real providers and kube-rs sessions.

use std::sync::Arc;

use anyhow::Result;
use deck_apply::{ApiFailure, Created, KubeResourceClient, ResourceClient, ResourceTarget, Scope};
use deck_core::{ClusterSpec, DeckConfig, Exec, Json, KubeconfigHandle};
use deck_kubehub::{IngressRule, PodReadiness};
use deck_provider::{create_provider, kubectl::KubectlCtx, Provider, ProviderArgs};
use tracing::debug;

use crate::{Backend, ClusterSession};

pub struct KubeBackend {
    config: DeckConfig,
    exec: Arc<dyn Exec>,
}

impl KubeBackend {
    pub fn new(config: DeckConfig, exec: Arc<dyn Exec>) -> Self {
        Self { config, exec }
    }
}

#[async_trait::async_trait]
impl Backend for KubeBackend {
    fn provider(&self, spec: Option<&ClusterSpec>) -> Result<Box<dyn Provider>> {
        let Some(spec) = spec else {
            return Ok(Box::new(KubectlCtx::new(None)));
        };
        let args = ProviderArgs {
            name: spec.name.clone(),
            native_config: spec.native_config.clone(),
            config: self.config.clone(),
            exec: self.exec.clone(),
        };
        Ok(create_provider(&spec.provider, args)?)
    }

    async fn connect(&self, handle: &KubeconfigHandle) -> Result<Arc<dyn ClusterSession>> {
        let client = deck_kubehub::connect(handle).await?;
        debug!(kubeconfig = %handle, "kube client ready");
        Ok(Arc::new(KubeSession::new(client)))
    }

    fn current_context(&self) -> Result<String> {
        Ok(deck_kubehub::current_context()?)
    }
}

/// One connected cluster.
pub struct KubeSession {
    resources: KubeResourceClient,
}

impl KubeSession {
    pub fn new(client: kube::Client) -> Self {
        Self { resources: KubeResourceClient::new(client) }
    }

    fn client(&self) -> &kube::Client {
        self.resources.client()
    }
}

#[async_trait::async_trait]
impl ResourceClient for KubeSession {
    async fn create(&self, target: &ResourceTarget, body: &Json, scope: &Scope) -> Result<Created, ApiFailure> {
        self.resources.create(target, body, scope).await
    }
    async fn patch(&self, target: &ResourceTarget, body: &Json, scope: &Scope) -> Result<(), ApiFailure> {
        self.resources.patch(target, body, scope).await
    }
    async fn delete(&self, target: &ResourceTarget, scope: &Scope) -> Result<(), ApiFailure> {
        self.resources.delete(target, scope).await
    }
    async fn create_namespace(&self, name: &str) -> Result<(), ApiFailure> {
        self.resources.create_namespace(name).await
    }
}

#[async_trait::async_trait]
impl ClusterSession for KubeSession {
    async fn server_version(&self) -> Result<String> {
        Ok(deck_kubehub::server_version(self.client()).await?)
    }

    async fn ingress_rules(&self, namespace: &str) -> Result<Vec<IngressRule>> {
        Ok(deck_kubehub::ingress_rules(self.client(), namespace).await?)
    }

    async fn pods_ready(&self, namespace: &str) -> Result<PodReadiness> {
        Ok(deck_kubehub::pods_ready(self.client(), namespace).await?)
    }
}
