//! k3d backend: k3s-in-docker clusters driven through the `k3d` CLI.

use std::sync::Arc;

use deck_core::{cluster_name, CommandSpec, DeckConfig, Exec, Json, KubeconfigHandle};
use tracing::{debug, info};

use crate::cache::{ClusterCache, ClusterEntry};
use crate::cli;
use crate::{Provider, ProviderArgs, ProviderError, ToolVersion};

pub const TAG: &str = "k3d";
const INSTALL_SCRIPT: &str = "curl -s https://raw.githubusercontent.com/k3d-io/k3d/main/install.sh | bash";

pub struct K3d {
    cluster: String,
    native_config: Option<Json>,
    config: DeckConfig,
    exec: Arc<dyn Exec>,
    cache: ClusterCache,
}

/// Rows of `k3d cluster list --no-headers`: `NAME SERVERS AGENTS LOADBALANCER`.
/// Short or malformed rows are skipped.
pub fn parse_cluster_list(stdout: &str) -> Vec<ClusterEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            match cols.as_slice() {
                [name, servers, agents, _lb, ..] => Some(ClusterEntry {
                    name: (*name).to_string(),
                    servers: (*servers).to_string(),
                    agents: (*agents).to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

impl K3d {
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
        let out = cli::run_checked(
            self.exec.as_ref(),
            TAG,
            "list clusters",
            CommandSpec::new("k3d").args(["cluster", "list", "--no-headers"]),
        )
        .await?;
        let entries = parse_cluster_list(&out.stdout);
        self.cache.store(entries.clone());
        Ok(entries)
    }

    async fn cluster_cmd(&self, operation: &'static str, verb: &str) -> Result<(), ProviderError> {
        let res = cli::run_checked(
            self.exec.as_ref(),
            TAG,
            operation,
            CommandSpec::new("k3d").args(["cluster", verb, self.cluster.as_str()]),
        )
        .await;
        self.cache.invalidate();
        res.map(|_| ())
    }
}

#[async_trait::async_trait]
impl Provider for K3d {
    fn tag(&self) -> &'static str { TAG }

    fn cluster_name(&self) -> &str { &self.cluster }

    async fn exists(&self) -> Result<bool, ProviderError> {
        Ok(self.clusters().await?.iter().any(|c| c.name == self.cluster))
    }

    async fn create(&self) -> Result<(), ProviderError> {
        info!(cluster = %self.cluster, "creating k3d cluster");
        let config_file = cli::native_config_file(TAG, self.native_config.as_ref())?;
        let mut spec = CommandSpec::new("k3d").args(["cluster", "create", self.cluster.as_str()]);
        if let Some(f) = &config_file {
            debug!(path = %f.path().display(), "k3d config");
            spec = spec.arg("--config").arg(f.path().display().to_string());
        }
        let res = cli::run_checked(self.exec.as_ref(), TAG, "create", spec).await;
        self.cache.invalidate();
        res.map(|_| ())
    }

    async fn start(&self) -> Result<(), ProviderError> {
        self.cluster_cmd("start", "start").await
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        info!(cluster = %self.cluster, "stopping k3d cluster");
        self.cluster_cmd("stop", "stop").await
    }

    async fn delete(&self) -> Result<(), ProviderError> {
        if !self.exists().await? {
            debug!(cluster = %self.cluster, "k3d cluster already gone");
            return Ok(());
        }
        info!(cluster = %self.cluster, "deleting k3d cluster");
        self.cluster_cmd("delete", "delete").await
    }

    async fn get_kubeconfig(&self) -> Result<KubeconfigHandle, ProviderError> {
        let exec = self.exec.clone();
        let cluster = self.cluster.clone();
        let contents = cli::poll_kubeconfig(&self.config, &self.cluster, || {
            let exec = exec.clone();
            let spec = CommandSpec::new("k3d").args(["kubeconfig", "get", cluster.as_str()]);
            async move { exec.run(&spec).await.map_err(ProviderError::from) }
        })
        .await?;
        let path = cli::write_kubeconfig(&self.config, &self.cluster, &contents).await?;
        Ok(KubeconfigHandle::File(path))
    }

    async fn version(&self) -> Result<ToolVersion, ProviderError> {
        cli::cli_version(self.exec.as_ref(), TAG, "k3d").await
    }

    async fn install(&self) -> Result<(), ProviderError> {
        cli::install_script(self.exec.as_ref(), TAG, INSTALL_SCRIPT).await
    }

    fn ports(&self) -> Vec<String> {
        cli::ports_from_native(self.native_config.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedExec;
    use deck_core::CommandOutput;

    fn k3d(exec: Arc<ScriptedExec>, dir: &std::path::Path) -> K3d {
        let mut config = DeckConfig::default();
        config.kubeconfig_dir = dir.to_path_buf();
        config.kubeconfig_retry_delay = std::time::Duration::ZERO;
        K3d::new(ProviderArgs {
            name: "Demo Deck".into(),
            native_config: Some(serde_json::json!({"ports": [{"port": "8080:80@loadbalancer"}]})),
            config,
            exec,
        })
    }

    #[test]
    fn list_parsing_skips_malformed_rows() {
        let out = "demo-deck   1/1       0/0      true\nbroken line\n\nother 1/1 2/2 false\n";
        let rows = parse_cluster_list(out);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "demo-deck");
        assert_eq!(rows[1].agents, "2/2");
    }

    #[tokio::test]
    async fn exists_uses_cache_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExec::default().on("k3d cluster list", CommandOutput::ok("demo-deck 1/1 0/0 true\n")));
        let p = k3d(exec.clone(), dir.path());
        assert_eq!(p.cluster_name(), "demo-deck");
        assert!(p.exists().await.unwrap());
        assert!(p.exists().await.unwrap());
        assert_eq!(exec.calls().len(), 1);
        p.stop().await.unwrap();
        assert!(p.exists().await.unwrap());
        assert_eq!(exec.calls().iter().filter(|c| c.starts_with("k3d cluster list")).count(), 2);
    }

    #[tokio::test]
    async fn create_passes_native_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExec::default());
        let p = k3d(exec.clone(), dir.path());
        p.create().await.unwrap();
        let calls = exec.calls();
        assert!(calls[0].starts_with("k3d cluster create demo-deck --config "), "{:?}", calls);
        assert_eq!(p.ports(), vec!["8080:80@loadbalancer"]);
    }

    #[tokio::test]
    async fn delete_of_missing_cluster_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExec::default().on("k3d cluster list", CommandOutput::ok("")));
        let p = k3d(exec.clone(), dir.path());
        p.delete().await.unwrap();
        assert_eq!(exec.calls(), vec!["k3d cluster list --no-headers"]);
    }

    #[tokio::test]
    async fn start_or_create_reports_creation() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExec::default().on("k3d cluster list", CommandOutput::ok("")));
        assert!(k3d(exec.clone(), dir.path()).start_or_create().await.unwrap());
        let exec = Arc::new(ScriptedExec::default().on("k3d cluster list", CommandOutput::ok("demo-deck 1/1 0/0 true")));
        assert!(!k3d(exec.clone(), dir.path()).start_or_create().await.unwrap());
        assert!(exec.calls().contains(&"k3d cluster start demo-deck".to_string()));
    }

    #[tokio::test]
    async fn kubeconfig_is_retried_then_written() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(
            ScriptedExec::default()
                .on("k3d kubeconfig get", CommandOutput::failed(1, "not ready"))
                .on("k3d kubeconfig get", CommandOutput::ok("apiVersion: v1\nkind: Config\n")),
        );
        let p = k3d(exec.clone(), dir.path());
        let handle = p.get_kubeconfig().await.unwrap();
        assert_eq!(handle, KubeconfigHandle::File(dir.path().join("demo-deck").join("kubeconfig.yaml")));
        assert_eq!(exec.calls().len(), 2);
    }

    #[tokio::test]
    async fn failing_create_surfaces_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExec::default().on("k3d cluster create", CommandOutput::failed(1, "port taken")));
        let e = k3d(exec, dir.path()).create().await.unwrap_err();
        assert!(e.to_string().contains("port taken"), "{}", e);
    }
}
