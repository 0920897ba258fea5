//! Beiboot backend: ephemeral clusters hosted by a remote Beiboot operator, managed
//! through `beibootctl` against a kubeconfig context named in the native config.
//!
//! Cluster names get a `-<host>-<user>` suffix so developers sharing one operator do not
//! collide. The kubeconfig only becomes available once the remote cluster is up, so it is
//! polled.

use std::sync::Arc;

use deck_core::{cluster_name, CommandSpec, DeckConfig, Exec, Json, KubeconfigHandle};
use serde::Deserialize;
use tracing::{debug, info};

use crate::cli;
use crate::{Provider, ProviderArgs, ProviderError, ToolVersion};

pub const TAG: &str = "beiboot";

#[derive(Debug, Clone, Deserialize)]
struct NativeConfig {
    context: String,
    #[serde(default)]
    ports: Option<Vec<PortConfig>>,
}

#[derive(Debug, Clone, Deserialize)]
struct PortConfig {
    port: String,
}

pub struct Beiboot {
    cluster: String,
    native: NativeConfig,
    config: DeckConfig,
    exec: Arc<dyn Exec>,
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

fn username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .map(|u| u.trim().to_string())
        .ok()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "deck".to_string())
}

/// Names reported by `beibootctl cluster list`; header and blank rows are skipped.
pub fn parse_cluster_names(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|l| l.split_whitespace().next())
        .filter(|n| !n.eq_ignore_ascii_case("name"))
        .map(str::to_string)
        .collect()
}

impl Beiboot {
    pub fn new(args: ProviderArgs) -> Result<Self, ProviderError> {
        let raw = args.native_config.clone().unwrap_or(Json::Null);
        let native: NativeConfig = serde_json::from_value(raw).map_err(|e| ProviderError::Config {
            provider: TAG.to_string(),
            reason: format!("{} (a 'context' naming the Beiboot kubeconfig context is required)", e),
        })?;
        let base = cluster_name(&args.config.cluster_prefix, &args.name);
        let cluster = cluster_name("", &format!("{}-{}-{}", base, hostname(), username()));
        Ok(Self { cluster, native, config: args.config, exec: args.exec })
    }

    pub(crate) fn boxed(args: ProviderArgs) -> Result<Box<dyn Provider>, ProviderError> {
        Ok(Box::new(Self::new(args)?))
    }

    fn ctl(&self) -> CommandSpec {
        CommandSpec::new("beibootctl").args(["--context", self.native.context.as_str(), "cluster"])
    }

    fn refuse(operation: &'static str) -> ProviderError {
        ProviderError::NotSupported { provider: TAG.to_string(), operation }
    }
}

#[async_trait::async_trait]
impl Provider for Beiboot {
    fn tag(&self) -> &'static str { TAG }

    fn cluster_name(&self) -> &str { &self.cluster }

    async fn exists(&self) -> Result<bool, ProviderError> {
        let out = cli::run_checked(self.exec.as_ref(), TAG, "list clusters", self.ctl().arg("list")).await?;
        Ok(parse_cluster_names(&out.stdout).iter().any(|n| n == &self.cluster))
    }

    async fn create(&self) -> Result<(), ProviderError> {
        info!(cluster = %self.cluster, context = %self.native.context, "creating Beiboot cluster; this can take a while");
        let mut spec = self.ctl().args(["create", self.cluster.as_str()]);
        for p in self.ports() {
            spec = spec.arg("--port").arg(p);
        }
        cli::run_checked(self.exec.as_ref(), TAG, "create", spec).await?;
        Ok(())
    }

    async fn start(&self) -> Result<(), ProviderError> {
        debug!(cluster = %self.cluster, "connecting to Beiboot cluster");
        cli::run_checked(self.exec.as_ref(), TAG, "connect", self.ctl().args(["connect", self.cluster.as_str()])).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), ProviderError> { Err(Self::refuse("stop")) }

    async fn delete(&self) -> Result<(), ProviderError> {
        if !self.exists().await? {
            return Ok(());
        }
        info!(cluster = %self.cluster, "deleting Beiboot cluster");
        cli::run_checked(self.exec.as_ref(), TAG, "delete", self.ctl().args(["delete", self.cluster.as_str()])).await?;
        Ok(())
    }

    async fn get_kubeconfig(&self) -> Result<KubeconfigHandle, ProviderError> {
        let exec = self.exec.clone();
        let contents = cli::poll_kubeconfig(&self.config, &self.cluster, || {
            let exec = exec.clone();
            let spec = self.ctl().args(["kubeconfig", self.cluster.as_str()]);
            async move { exec.run(&spec).await.map_err(ProviderError::from) }
        })
        .await?;
        let path = cli::write_kubeconfig(&self.config, &self.cluster, &contents).await?;
        info!(path = %path.display(), "Beiboot kubeconfig written; export KUBECONFIG to work with the cluster");
        Ok(KubeconfigHandle::File(path))
    }

    async fn version(&self) -> Result<ToolVersion, ProviderError> {
        cli::cli_version(self.exec.as_ref(), TAG, "beibootctl").await
    }

    async fn install(&self) -> Result<(), ProviderError> { Err(Self::refuse("install")) }

    async fn update(&self) -> Result<(), ProviderError> { Err(Self::refuse("update")) }

    fn ports(&self) -> Vec<String> {
        self.native.ports.as_deref().unwrap_or_default().iter().map(|p| p.port.clone()).collect()
    }
}
