//! kind backend. Start/stop drive the node containers directly through docker,
//! since kind itself has no such verbs.

use std::sync::Arc;

use deck_core::{cluster_name, CommandSpec, DeckConfig, Exec, Json, KubeconfigHandle};
use tracing::{debug, info, warn};

use crate::cache::{ClusterCache, ClusterEntry};
use crate::cli;
use crate::{Provider, ProviderArgs, ProviderError, ToolVersion};

pub const TAG: &str = "kind";
const INSTALL_SCRIPT: &str = "curl -Lo ./kind https://kind.sigs.k8s.io/dl/v0.14.0/kind-linux-amd64; chmod +x ./kind; sudo mv ./kind /usr/local/bin/kind";

pub struct Kind {
    cluster: String,
    native_config: Option<Json>,
    config: DeckConfig,
    exec: Arc<dyn Exec>,
    cache: ClusterCache,
}

/// `kind get nodes --name X` prints one container per line. Deck clusters carry exactly
/// two nodes: a worker (agent) then the control plane (server).
pub fn parse_nodes(name: &str, stdout: &str) -> Option<ClusterEntry> {
    let nodes: Vec<&str> = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    match nodes.as_slice() {
        [agent, server] => Some(ClusterEntry { name: name.to_string(), servers: (*server).to_string(), agents: (*agent).to_string() }),
        _ => None,
    }
}

impl Kind {
    pub fn new(args: ProviderArgs) -> Self {
        Self {
            cluster: cluster_name(&args.config.cluster_prefix, &args.name),
            native_config: args.native_config,
            config: args.config,
            exec: args.exec,
            cache: ClusterCache::default(),
        }
    }

    pub(crate) fn boxed(args: ProviderArgs) -> Result<Box<dyn Provider>, ProviderError> {
        Ok(Box::new(Self::new(args)))
    }

    async fn clusters(&self) -> Result<Vec<ClusterEntry>, ProviderError> {
        if let Some(c) = self.cache.get() {
            return Ok(c);
        }
        let exec = self.exec.as_ref();
        let out = cli::run_checked(exec, TAG, "list clusters", CommandSpec::new("kind").args(["get", "clusters"])).await?;
        let mut entries = Vec::new();
        for name in out.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let nodes = exec.run(&CommandSpec::new("kind").args(["get", "nodes", "--name", name])).await?;
            match parse_nodes(name, &nodes.stdout) {
                Some(e) => entries.push(e),
                None => debug!(cluster = name, "skipping kind cluster with unexpected node layout"),
            }
        }
        self.cache.store(entries.clone());
        Ok(entries)
    }

    async fn docker_nodes(&self, verb: &'static str) -> Result<(), ProviderError> {
        let Some(entry) = self.clusters().await?.into_iter().find(|c| c.name == self.cluster) else {
            warn!(cluster = %self.cluster, verb, "kind cluster not found");
            return Ok(());
        };
        for node in [&entry.servers, &entry.agents] {
            cli::run_checked(self.exec.as_ref(), TAG, verb, CommandSpec::new("docker").args([verb, node.as_str()])).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Provider for Kind {
    fn tag(&self) -> &'static str { TAG }

    fn cluster_name(&self) -> &str { &self.cluster }

    async fn exists(&self) -> Result<bool, ProviderError> {
        Ok(self.clusters().await?.iter().any(|c| c.name == self.cluster))
    }

    async fn create(&self) -> Result<(), ProviderError> {
        info!(cluster = %self.cluster, "creating kind cluster");
        let config_file = cli::native_config_file(TAG, self.native_config.as_ref())?;
        let mut spec = CommandSpec::new("kind").args(["create", "cluster", "--name", self.cluster.as_str()]);
        if let Some(f) = &config_file {
            spec = spec.arg("--config").arg(f.path().display().to_string());
        }
        let res = cli::run_checked(self.exec.as_ref(), TAG, "create", spec).await;
        self.cache.invalidate();
        res.map(|_| ())
    }

    async fn start(&self) -> Result<(), ProviderError> {
        self.docker_nodes("start").await
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        info!(cluster = %self.cluster, "stopping kind cluster");
        self.docker_nodes("stop").await
    }

    async fn delete(&self) -> Result<(), ProviderError> {
        if !self.exists().await? {
            debug!(cluster = %self.cluster, "kind cluster already gone");
            return Ok(());
        }
        info!(cluster = %self.cluster, "deleting kind cluster");
        let res = cli::run_checked(
            self.exec.as_ref(),
            TAG,
            "delete",
            CommandSpec::new("kind").args(["delete", "cluster", "--name", self.cluster.as_str()]),
        )
        .await;
        self.cache.invalidate();
        res.map(|_| ())
    }

    async fn get_kubeconfig(&self) -> Result<KubeconfigHandle, ProviderError> {
        let exec = self.exec.clone();
        let cluster = self.cluster.clone();
        let contents = cli::poll_kubeconfig(&self.config, &self.cluster, || {
            let exec = exec.clone();
            let spec = CommandSpec::new("kind").args(["get", "kubeconfig", "--name", cluster.as_str()]);
            async move { exec.run(&spec).await.map_err(ProviderError::from) }
        })
        .await?;
        let path = cli::write_kubeconfig(&self.config, &self.cluster, &contents).await?;
        Ok(KubeconfigHandle::File(path))
    }

    async fn version(&self) -> Result<ToolVersion, ProviderError> {
        cli::cli_version(self.exec.as_ref(), TAG, "kind").await
    }

    async fn install(&self) -> Result<(), ProviderError> {
        cli::install_script(self.exec.as_ref(), TAG, INSTALL_SCRIPT).await
    }

    fn ports(&self) -> Vec<String> {
        cli::ports_from_native(self.native_config.as_ref())
    }
}
