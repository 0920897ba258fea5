//! Deck API façade (in-process).
//!
//! The [`Orchestrator`] drives one invocation end to end: Deckfile → cluster provider →
//! source rendering → reconciliation → post-deploy checks. Everything that touches the
//! outside world goes through a [`Backend`], so frontends use [`KubeBackend`] and tests
//! plug in fakes.

#![forbid(unsafe_code)]

mod live;

pub use crate::live::{KubeBackend, KubeSession};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use deck_apply::{ApplySummary, Reconciler, ResourceClient};
use deck_core::{ClusterSpec, DeckConfig, Exec, ExecError, KubeconfigHandle, TimeoutError};
use deck_kubehub::{IngressRule, PodReadiness};
use deck_provider::{assess, ensure_provider, Assessment, GateOutcome, InstallPolicy, Provider, ProviderError};
use deck_sources::{load_deckfile, LoadedDeckfile, Pipeline, SourceError};
use metrics::counter;
use tracing::{debug, info, warn};

/// A connected cluster: reconciler target plus the read-only probes used after a deploy.
#[async_trait::async_trait]
pub trait ClusterSession: ResourceClient {
    /// Server `major.minor`.
    async fn server_version(&self) -> Result<String>;
    async fn ingress_rules(&self, namespace: &str) -> Result<Vec<IngressRule>>;
    async fn pods_ready(&self, namespace: &str) -> Result<PodReadiness>;
}

/// Everything the orchestrator needs from the outside world.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Provider for `spec`; `None` attaches to the current kubeconfig context.
    fn provider(&self, spec: Option<&ClusterSpec>) -> Result<Box<dyn Provider>>;
    async fn connect(&self, handle: &KubeconfigHandle) -> Result<Arc<dyn ClusterSession>>;
    fn current_context(&self) -> Result<String>;
}

/// A loaded Deckfile bound to its provider, before anything was changed.
pub struct Prepared {
    pub deckfile: LoadedDeckfile,
    pub provider: Box<dyn Provider>,
    pub assessment: Assessment,
}

impl Prepared {
    /// Operating on the user's current context rather than a Deckfile cluster.
    pub fn attached(&self) -> bool {
        self.provider.tag() == deck_provider::kubectl::TAG
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub deck_name: Option<String>,
    pub policy: InstallPolicy,
    /// Wait for all pods of the deck namespace, up to this long.
    pub wait: Option<Duration>,
}

/// What `get` did, for the frontend to report.
#[derive(Debug, Clone)]
pub struct DeckReport {
    pub deck: String,
    pub namespace: String,
    pub cluster_created: bool,
    pub gate: GateOutcome,
    pub summary: ApplySummary,
    pub ingress: Vec<IngressRule>,
    pub ports: Vec<String>,
    pub notes: String,
    pub hosts: Vec<String>,
}

pub struct Orchestrator<B> {
    backend: B,
    config: DeckConfig,
    exec: Arc<dyn Exec>,
    http: reqwest::Client,
}

/// Interrupts leave the cluster in place even when it was just created.
pub fn is_interrupt(e: &anyhow::Error) -> bool {
    e.chain().any(|c| {
        matches!(c.downcast_ref::<SourceError>(), Some(SourceError::Interrupted(_)))
            || matches!(c.downcast_ref::<ProviderError>(), Some(ProviderError::Interrupted(_)))
            || matches!(c.downcast_ref::<ExecError>(), Some(ExecError::Interrupted { .. }))
    })
}

impl<B: Backend> Orchestrator<B> {
    pub fn new(backend: B, config: DeckConfig, exec: Arc<dyn Exec>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.http_timeout).build().context("building http client")?;
        Ok(Self { backend, config, exec, http })
    }

    pub fn config(&self) -> &DeckConfig {
        &self.config
    }

    pub async fn load(&self, location: &str) -> Result<LoadedDeckfile> {
        let t0 = Instant::now();
        let loaded = load_deckfile(location, self.exec.as_ref(), &self.http)
            .await
            .with_context(|| format!("cannot read Deckfile from {}", location))?;
        debug!(location, took_ms = %t0.elapsed().as_millis(), "api: load ok");
        Ok(loaded)
    }

    pub async fn list_decks(&self, location: &str) -> Result<Vec<String>> {
        let t0 = Instant::now();
        let names = self.load(location).await?.deckfile.deck_names();
        debug!(count = names.len(), took_ms = %t0.elapsed().as_millis(), "api: list ok");
        Ok(names)
    }

    pub fn current_context(&self) -> Result<String> {
        self.backend.current_context()
    }

    fn provider_for(&self, loaded: &LoadedDeckfile, ignore_cluster: bool) -> Result<Box<dyn Provider>> {
        let spec = if ignore_cluster { None } else { loaded.deckfile.cluster.as_ref() };
        self.backend.provider(spec)
    }

    /// Load the Deckfile and assess its provider without changing anything.
    pub async fn prepare(&self, location: &str, ignore_cluster: bool) -> Result<Prepared> {
        let deckfile = self.load(location).await?;
        let provider = self.provider_for(&deckfile, ignore_cluster)?;
        let min_version = if ignore_cluster { None } else { deckfile.deckfile.cluster.as_ref().and_then(|c| c.min_version.as_deref()) };
        let assessment = assess(provider.as_ref(), min_version).await?;
        debug!(provider = provider.tag(), assessment = ?assessment, "api: provider assessed");
        Ok(Prepared { deckfile, provider, assessment })
    }

    /// `get`: provision or start the cluster, render and apply the deck. A cluster created
    /// by this call is deleted again when connecting, rendering or applying fails. The
    /// readiness wait runs afterwards; its timeout leaves cluster and deck in place.
    pub async fn run_deck(&self, prepared: &Prepared, opts: &RunOptions) -> Result<DeckReport> {
        let t0 = Instant::now();
        let deck = prepared.deckfile.deckfile.get_deck(opts.deck_name.as_deref())?;
        let provider = prepared.provider.as_ref();
        let gate = ensure_provider(provider, &prepared.assessment, opts.policy).await?;
        let created = provider.start_or_create().await?;

        let res = self.deploy(prepared, deck).await;
        let (session, summary, ingress, namespace) = match res {
            Ok(v) => v,
            Err(e) => {
                if created && !is_interrupt(&e) {
                    warn!(cluster = %provider.cluster_name(), "There was an error installing the workload. Now removing the cluster.");
                    counter!("deck_rollback", 1u64);
                    if let Err(de) = provider.delete().await {
                        warn!(error = %de, "removing the cluster failed");
                    }
                }
                return Err(e);
            }
        };
        counter!("deck_get_ok", 1u64);
        info!(deck = %deck.name, took_ms = %t0.elapsed().as_millis(), "All workloads from Deck {} applied", deck.name);
        for rule in &ingress {
            info!(host = %rule.host, path = %rule.path, "Ingress: {} -> {}", rule.host, rule.path);
        }
        let ports = provider.ports();
        if !ports.is_empty() {
            info!(ports = ?ports, "Published ports: {}", ports.join(", "));
        }
        if !deck.notes.trim().is_empty() {
            info!("{}", deck.notes.trim());
        }
        if let Some(timeout) = opts.wait {
            self.wait_ready(session.as_ref(), &namespace, timeout).await?;
        }
        Ok(DeckReport {
            deck: deck.name.clone(),
            namespace,
            cluster_created: created,
            gate,
            summary,
            ingress,
            ports,
            notes: deck.notes.clone(),
            hosts: deck.hosts.clone(),
        })
    }

    async fn connect(&self, provider: &dyn Provider) -> Result<Arc<dyn ClusterSession>> {
        let handle = provider.get_kubeconfig().await?;
        self.backend.connect(&handle).await.with_context(|| format!("cannot connect to cluster {}", provider.cluster_name()))
    }

    fn pipeline(&self, base_dir: PathBuf) -> Result<Pipeline> {
        Ok(Pipeline::new(self.exec.clone(), &self.config, base_dir)?)
    }

    async fn deploy(&self, prepared: &Prepared, deck: &deck_core::Deck) -> Result<(Arc<dyn ClusterSession>, ApplySummary, Vec<IngressRule>, String)> {
        let session = self.connect(prepared.provider.as_ref()).await?;
        let mut pipeline = self.pipeline(prepared.deckfile.base_dir.clone())?;
        match session.server_version().await {
            Ok(v) => pipeline.set_kube_version(Some(v)),
            Err(e) => warn!(error = %e, "cannot read the server version"),
        }
        let generated = pipeline.generate(deck).await.with_context(|| format!("cannot render Deck {}", deck.name))?;
        info!(deck = %generated.name, "Applying Deck {}", generated.name);

        let reconciler = Reconciler::from_config(session.clone(), &self.config);
        let summary = reconciler.apply_deck(&generated).await?;

        let ingress = match session.ingress_rules(&generated.namespace).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "cannot list ingress rules");
                Vec::new()
            }
        };
        Ok((session, summary, ingress, generated.namespace))
    }

    /// Poll until every pod in `namespace` is ready. Listing errors, slow listings and an
    /// empty namespace count as "not yet"; no single poll outlives the budget.
    pub async fn wait_ready(&self, session: &dyn ClusterSession, namespace: &str, timeout: Duration) -> Result<()> {
        info!(namespace, timeout_s = timeout.as_secs(), "Now waiting for all Pods in namespace '{}' to become ready", namespace);
        let t0 = Instant::now();
        let mut polls: u64 = 0;
        loop {
            let remaining = timeout.saturating_sub(t0.elapsed());
            let poll = tokio::time::timeout(remaining, session.pods_ready(namespace)).await;
            match poll.unwrap_or_else(|_| Err(anyhow::anyhow!("pod listing timed out"))) {
                Ok(r) if r.all_ready() => {
                    debug!(namespace, pods = r.total, took_ms = %t0.elapsed().as_millis(), "api: pods ready");
                    return Ok(());
                }
                Ok(r) => debug!(namespace, ready = r.ready, total = r.total, "pods not ready"),
                Err(e) => debug!(namespace, error = %e, "pod listing failed"),
            }
            if t0.elapsed() >= timeout {
                return Err(TimeoutError { what: format!("Pods in namespace '{}'", namespace), elapsed: t0.elapsed(), budget: timeout }.into());
            }
            polls += 1;
            if polls % 10 == 0 {
                info!("Waiting for all Pods of the Deck to become ready ({} s / {} s)", t0.elapsed().as_secs(), timeout.as_secs());
            }
            tokio::time::sleep(self.config.ready_poll_interval).await;
        }
    }

    /// `remove`: delete the deck's objects, last applied first. A missing cluster is a no-op.
    pub async fn remove_deck(&self, location: &str, deck_name: Option<&str>, ignore_cluster: bool) -> Result<usize> {
        let t0 = Instant::now();
        let loaded = self.load(location).await?;
        let provider = self.provider_for(&loaded, ignore_cluster)?;
        if !provider.exists().await? {
            info!(cluster = %provider.cluster_name(), "Cluster does not exist");
            return Ok(0);
        }
        let deck = loaded.deckfile.get_deck(deck_name)?;
        let session = self.connect(provider.as_ref()).await?;
        let mut pipeline = self.pipeline(loaded.base_dir.clone())?;
        if let Ok(v) = session.server_version().await {
            pipeline.set_kube_version(Some(v));
        }
        let generated = pipeline.generate(deck).await.with_context(|| format!("cannot render Deck {}", deck.name))?;
        info!(deck = %generated.name, "Removing Deck {}", generated.name);
        let deleted = Reconciler::from_config(session, &self.config).delete_deck(&generated).await?;
        debug!(deleted, took_ms = %t0.elapsed().as_millis(), "api: remove deck ok");
        Ok(deleted)
    }

    /// `remove --cluster`. Returns whether a cluster was actually deleted.
    pub async fn remove_cluster(&self, location: &str, ignore_cluster: bool) -> Result<bool> {
        let t0 = Instant::now();
        let loaded = self.load(location).await?;
        let provider = self.provider_for(&loaded, ignore_cluster)?;
        let removed = if provider.exists().await? {
            provider.delete().await?;
            info!(cluster = %provider.cluster_name(), "cluster removed");
            true
        } else {
            info!(cluster = %provider.cluster_name(), "Cluster does not exist");
            false
        };
        debug!(took_ms = %t0.elapsed().as_millis(), "api: remove cluster ok");
        Ok(removed)
    }

    pub async fn stop_cluster(&self, location: &str, ignore_cluster: bool) -> Result<()> {
        let t0 = Instant::now();
        let loaded = self.load(location).await?;
        let provider = self.provider_for(&loaded, ignore_cluster)?;
        info!(cluster = %provider.cluster_name(), "Stopping cluster");
        provider.stop().await?;
        debug!(took_ms = %t0.elapsed().as_millis(), "api: stop ok");
        Ok(())
    }

    /// Ingress hosts declared by the deck.
    pub async fn hosts(&self, location: &str, deck_name: Option<&str>) -> Result<Vec<String>> {
        let loaded = self.load(location).await?;
        Ok(loaded.deckfile.get_deck(deck_name)?.hosts.clone())
    }
}

pub fn version() -> &'static str {
    deck_core::VERSION
}
