//! Deck apply: reconciles rendered manifests against a cluster.
//!
//! Each manifest walks a fixed ladder: create; on conflict patch; when the patch is
//! rejected by validation, delete and create again. Kinds that are not served yet (CRDs
//! still registering, webhooks starting) are retried with a fixed delay, first namespaced
//! and then cluster-scoped. Objects that do not fit the server's API version are skipped.

#![forbid(unsafe_code)]

pub mod client;
pub mod target;

pub use client::{classify, ApiFailure, Created, FailureKind, KubeResourceClient, ResourceClient};
pub use target::{api_surface_name, ResourceTarget, Scope, REGISTERED_SURFACES};

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use deck_core::{DeckConfig, GeneratedDeck, K8sSourceFile};
use metrics::{counter, histogram};
use tracing::{debug, error, info, warn};

pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("manifest {manifest} is invalid: {reason}")]
    InvalidManifest { manifest: String, reason: String },
    #[error("Kubernetes: {op} of {manifest} failed: {failure}")]
    Api { manifest: String, op: &'static str, failure: ApiFailure },
    #[error("Kubernetes: replacing {manifest} failed: {failure}")]
    Replace { manifest: String, failure: ApiFailure },
    #[error("Kubernetes: {manifest} was not accepted after {attempts} attempts: {last}")]
    Exhausted { manifest: String, attempts: u32, last: ApiFailure },
    #[error("Kubernetes: cannot create namespace {namespace}: {failure}")]
    Namespace { namespace: String, failure: ApiFailure },
}

/// What happened to one manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created(Created),
    Patched,
    Recreated,
    /// Left out because of an API version skew.
    Skipped(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub created: usize,
    pub patched: usize,
    pub recreated: usize,
    pub skipped: usize,
}

impl ApplySummary {
    fn record(&mut self, o: &ApplyOutcome) {
        match o {
            ApplyOutcome::Created(_) => self.created += 1,
            ApplyOutcome::Patched => self.patched += 1,
            ApplyOutcome::Recreated => self.recreated += 1,
            ApplyOutcome::Skipped(_) => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.patched + self.recreated + self.skipped
    }
}

pub struct Reconciler<C> {
    client: C,
    retry: u32,
    retry_delay: Duration,
    ensured: Mutex<HashSet<String>>,
}

impl<C: ResourceClient> Reconciler<C> {
    pub fn new(client: C, retry: u32, retry_delay: Duration) -> Self {
        Self { client, retry: retry.max(1), retry_delay, ensured: Mutex::new(HashSet::new()) }
    }

    pub fn from_config(client: C, config: &DeckConfig) -> Self {
        Self::new(client, config.object_retry, config.object_retry_delay)
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn target(file: &K8sSourceFile) -> Result<ResourceTarget, ApplyError> {
        ResourceTarget::of(file).map_err(|reason| ApplyError::InvalidManifest { manifest: file.name.clone(), reason })
    }

    pub async fn apply(&self, file: &K8sSourceFile) -> Result<ApplyOutcome, ApplyError> {
        let t0 = Instant::now();
        let target = Self::target(file)?;
        let body = target.body(&file.content);
        let scope = Scope::Namespaced(file.target_namespace().to_string());
        let res = self.apply_target(&target, &body, &scope).await;
        histogram!("deck_apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        match &res {
            Ok(ApplyOutcome::Created(c)) => {
                counter!("deck_apply_created", 1u64);
                debug!(manifest = %target, uid = ?c.uid, "Kubernetes: created");
            }
            Ok(ApplyOutcome::Patched) => counter!("deck_apply_patched", 1u64),
            Ok(ApplyOutcome::Recreated) => counter!("deck_apply_recreated", 1u64),
            Ok(ApplyOutcome::Skipped(reason)) => {
                counter!("deck_apply_skipped", 1u64);
                warn!(manifest = %target, reason = %reason, "skipped, probably caused by a skew in the Kubernetes version");
            }
            Err(e) => {
                counter!("deck_apply_err", 1u64);
                error!(manifest = %target, error = %e, "apply failed");
            }
        }
        res
    }

    async fn apply_target(&self, target: &ResourceTarget, body: &deck_core::Json, scope: &Scope) -> Result<ApplyOutcome, ApplyError> {
        let mut last = None;
        for attempt in 1..=self.retry {
            let failure = match self.client.create(target, body, scope).await {
                Ok(c) => return Ok(ApplyOutcome::Created(c)),
                Err(f) => f,
            };
            match failure.kind {
                FailureKind::Conflict => return self.patch_or_replace(target, body, scope).await,
                FailureKind::Skew => return Ok(ApplyOutcome::Skipped(failure.message)),
                FailureKind::NotFound | FailureKind::Unavailable => {
                    debug!(manifest = %target, attempt, failure = %failure, "not accepted yet, trying cluster-scoped");
                    match self.client.create(target, body, &Scope::Cluster).await {
                        Ok(c) => return Ok(ApplyOutcome::Created(c)),
                        Err(f) if f.kind == FailureKind::Conflict => {
                            return self.patch_or_replace(target, body, &Scope::Cluster).await
                        }
                        Err(f) => debug!(manifest = %target, failure = %f, "cluster-scoped create failed"),
                    }
                    last = Some(failure);
                    if attempt < self.retry {
                        debug!(manifest = %target, "This is attempt {} (of {}), trying again", attempt, self.retry);
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
                FailureKind::Invalid | FailureKind::Other => {
                    return Err(ApplyError::Api { manifest: target.to_string(), op: "create", failure })
                }
            }
        }
        Err(ApplyError::Exhausted {
            manifest: target.to_string(),
            attempts: self.retry,
            last: last.unwrap_or_else(|| ApiFailure::new(FailureKind::Other, "no attempt made")),
        })
    }

    async fn patch_or_replace(&self, target: &ResourceTarget, body: &deck_core::Json, scope: &Scope) -> Result<ApplyOutcome, ApplyError> {
        match self.client.patch(target, body, scope).await {
            Ok(()) => {
                debug!(manifest = %target, "Kubernetes: patched");
                Ok(ApplyOutcome::Patched)
            }
            Err(f) if f.kind == FailureKind::Invalid => {
                debug!(manifest = %target, "Kubernetes: replacing failed, attempting deletion and recreation");
                let replace_err = |failure| ApplyError::Replace { manifest: target.to_string(), failure };
                self.client.delete(target, scope).await.map_err(replace_err)?;
                let created = self.client.create(target, body, scope).await.map_err(replace_err)?;
                debug!(manifest = %target, uid = ?created.uid, "Kubernetes: recreated");
                Ok(ApplyOutcome::Recreated)
            }
            Err(f) if f.kind == FailureKind::Skew => Ok(ApplyOutcome::Skipped(f.message)),
            Err(failure) => Err(ApplyError::Api { manifest: target.to_string(), op: "patch", failure }),
        }
    }

    /// `true` when deleted, `false` when it was already gone.
    pub async fn delete(&self, file: &K8sSourceFile) -> Result<bool, ApplyError> {
        let target = Self::target(file)?;
        let scope = Scope::Namespaced(file.target_namespace().to_string());
        match self.client.delete(&target, &scope).await {
            Ok(()) => {
                debug!(manifest = %target, "Kubernetes: deleted");
                Ok(true)
            }
            Err(f) if f.kind == FailureKind::NotFound => {
                debug!(manifest = %target, "Kubernetes: does not exist");
                Ok(false)
            }
            Err(failure) => Err(ApplyError::Api { manifest: target.to_string(), op: "delete", failure }),
        }
    }

    /// Create `namespace` unless this run already did; "already exists" is fine.
    pub async fn ensure_namespace(&self, namespace: &str) -> Result<(), ApplyError> {
        if namespace == DEFAULT_NAMESPACE || self.is_ensured(namespace) {
            return Ok(());
        }
        match self.client.create_namespace(namespace).await {
            Ok(()) => info!(namespace, "namespace created"),
            Err(f) if f.kind == FailureKind::Conflict => debug!(namespace, "namespace exists"),
            Err(failure) => return Err(ApplyError::Namespace { namespace: namespace.to_string(), failure }),
        }
        if let Ok(mut set) = self.ensured.lock() {
            set.insert(namespace.to_string());
        }
        Ok(())
    }

    fn is_ensured(&self, namespace: &str) -> bool {
        self.ensured.lock().map(|s| s.contains(namespace)).unwrap_or(false)
    }

    /// Apply every file in order. The first fatal error stops the deck.
    pub async fn apply_deck(&self, deck: &GeneratedDeck) -> Result<ApplySummary, ApplyError> {
        info!(deck = %deck.name, files = deck.files.len(), "Installing {} file(s)", deck.files.len());
        self.ensure_namespace(&deck.namespace).await?;
        let mut summary = ApplySummary::default();
        for file in &deck.files {
            self.ensure_namespace(file.target_namespace()).await?;
            let outcome = self.apply(file).await?;
            summary.record(&outcome);
        }
        info!(deck = %deck.name, created = summary.created, patched = summary.patched, recreated = summary.recreated, skipped = summary.skipped, "deck applied");
        Ok(summary)
    }

    /// Delete every file, last applied first. Returns how many objects were actually deleted.
    pub async fn delete_deck(&self, deck: &GeneratedDeck) -> Result<usize, ApplyError> {
        let mut deleted = 0;
        for file in deck.files.iter().rev() {
            if self.delete(file).await? {
                deleted += 1;
            }
        }
        info!(deck = %deck.name, deleted, "deck removed");
        Ok(deleted)
    }
}
