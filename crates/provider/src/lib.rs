//! Deck cluster providers: one lifecycle contract over several local-cluster backends.
//!
//! Backends are registered in a static table (`tag -> constructor`) and picked by the
//! Deckfile's `cluster.provider`. Lifecycle calls never prompt; install/update decisions
//! arrive pre-resolved through [`ensure::InstallPolicy`].

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use deck_core::{DeckConfig, Exec, ExecError, Json, KubeconfigHandle, TimeoutError};
use once_cell::sync::Lazy;
use regex::Regex;

pub mod beiboot;
pub mod cache;
mod cli;
pub mod ensure;
pub mod k3d;
pub mod kind;
pub mod kubectl;

pub use cache::{ClusterCache, ClusterEntry};
pub use ensure::{assess, ensure_provider, Assessment, GateOutcome, InstallPolicy};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("unknown cluster provider '{0}'")]
    Unknown(String),
    #[error("{provider} is not installed")]
    NotInstalled { provider: String },
    #[error("{operation} is not supported by {provider}")]
    NotSupported { provider: String, operation: &'static str },
    #[error("{provider}: {operation} failed: {detail}")]
    Command { provider: String, operation: &'static str, detail: String },
    #[error("{provider}: invalid native config: {reason}")]
    Config { provider: String, reason: String },
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error("{0} was interrupted")]
    Interrupted(String),
    #[error("{context}: {source}")]
    Io { context: String, #[source] source: std::io::Error },
}

impl From<ExecError> for ProviderError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::NotFound { program } => ProviderError::NotInstalled { provider: program },
            ExecError::Interrupted { program } => ProviderError::Interrupted(program),
            ExecError::Io { program, source } => ProviderError::Io { context: format!("running {}", program), source },
        }
    }
}

impl ProviderError {
    pub fn is_not_supported(&self) -> bool { matches!(self, ProviderError::NotSupported { .. }) }
    pub fn is_not_installed(&self) -> bool { matches!(self, ProviderError::NotInstalled { .. }) }
}

/// `major.minor.patch` of a backend tool. Missing components read as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ToolVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)").expect("static regex"));

impl ToolVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self { Self { major, minor, patch } }

    /// First `x.y.z` found in free-form tool output (`k3d version v5.4.6`).
    pub fn extract(text: &str) -> Option<Self> {
        let c = VERSION_RE.captures(text)?;
        Some(Self { major: c[1].parse().ok()?, minor: c[2].parse().ok()?, patch: c[3].parse().ok()? })
    }
}

impl FromStr for ToolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let core = s.trim().trim_start_matches('v');
        let core = core.split(['-', '+']).next().unwrap_or(core);
        let mut parts = core.split('.').map(|p| p.parse::<u64>());
        let mut next = |required: bool| -> Result<u64, String> {
            match parts.next() {
                Some(Ok(n)) => Ok(n),
                Some(Err(_)) => Err(format!("invalid version '{}'", s)),
                None if required => Err(format!("invalid version '{}'", s)),
                None => Ok(0),
            }
        };
        let v = Self { major: next(true)?, minor: next(false)?, patch: next(false)? };
        Ok(v)
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Uniform lifecycle over a cluster backend, bound to one logical cluster name.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Registry tag, e.g. `k3d`.
    fn tag(&self) -> &'static str;
    fn cluster_name(&self) -> &str;

    async fn exists(&self) -> Result<bool, ProviderError>;
    /// Only valid when `exists()` is false. No rollback on partial failure.
    async fn create(&self) -> Result<(), ProviderError>;
    async fn start(&self) -> Result<(), ProviderError>;
    async fn stop(&self) -> Result<(), ProviderError>;
    /// Deleting an absent cluster succeeds.
    async fn delete(&self) -> Result<(), ProviderError>;
    async fn get_kubeconfig(&self) -> Result<KubeconfigHandle, ProviderError>;
    async fn version(&self) -> Result<ToolVersion, ProviderError>;
    async fn install(&self) -> Result<(), ProviderError>;
    async fn update(&self) -> Result<(), ProviderError> { self.install().await }
    fn ports(&self) -> Vec<String>;

    /// Start an existing cluster or create a new one. Returns whether it was created.
    async fn start_or_create(&self) -> Result<bool, ProviderError> {
        if self.exists().await? {
            tracing::info!(provider = self.tag(), cluster = %self.cluster_name(), "cluster exists; starting");
            self.start().await?;
            Ok(false)
        } else {
            tracing::info!(provider = self.tag(), cluster = %self.cluster_name(), "creating cluster");
            self.create().await?;
            Ok(true)
        }
    }
}

/// Everything a backend constructor receives.
#[derive(Clone)]
pub struct ProviderArgs {
    pub name: String,
    pub native_config: Option<Json>,
    pub config: DeckConfig,
    pub exec: Arc<dyn Exec>,
}

type Constructor = fn(ProviderArgs) -> Result<Box<dyn Provider>, ProviderError>;

static REGISTRY: &[(&str, Constructor)] = &[
    (k3d::TAG, k3d::K3d::boxed),
    (kind::TAG, kind::Kind::boxed),
    (beiboot::TAG, beiboot::Beiboot::boxed),
    (kubectl::TAG, kubectl::KubectlCtx::boxed),
];

pub fn registered_tags() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(t, _)| *t)
}

/// Build the backend registered under `tag` (case-insensitive).
pub fn create_provider(tag: &str, args: ProviderArgs) -> Result<Box<dyn Provider>, ProviderError> {
    let ctor = REGISTRY
        .iter()
        .find(|(t, _)| t.eq_ignore_ascii_case(tag.trim()))
        .map(|(_, c)| *c)
        .ok_or_else(|| ProviderError::Unknown(tag.to_string()))?;
    ctor(args)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted subprocess double shared by the backend tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use deck_core::{CommandOutput, CommandSpec, Exec, ExecError};

    #[derive(Default)]
    pub struct ScriptedExec {
        rules: Mutex<Vec<(String, VecDeque<Result<CommandOutput, ()>>)>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedExec {
        /// Replies for commands whose display starts with `prefix`. The last reply repeats.
        pub fn on(self, prefix: &str, out: CommandOutput) -> Self {
            self.push(prefix, Ok(out))
        }

        /// Commands starting with `prefix` behave as if the binary were missing.
        pub fn missing(self, prefix: &str) -> Self {
            self.push(prefix, Err(()))
        }

        fn push(self, prefix: &str, r: Result<CommandOutput, ()>) -> Self {
            {
                let mut rules = self.rules.lock().unwrap();
                match rules.iter_mut().find(|(p, _)| p == prefix) {
                    Some((_, q)) => q.push_back(r),
                    None => rules.push((prefix.to_string(), VecDeque::from([r]))),
                }
            }
            self
        }

        pub fn calls(&self) -> Vec<String> { self.calls.lock().unwrap().clone() }
    }

    #[async_trait::async_trait]
    impl Exec for ScriptedExec {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
            let line = spec.display();
            self.calls.lock().unwrap().push(line.clone());
            let mut rules = self.rules.lock().unwrap();
            let best = rules
                .iter_mut()
                .filter(|(p, _)| line.starts_with(p.as_str()))
                .max_by_key(|(p, _)| p.len());
            let reply = match best {
                Some((_, q)) if q.len() > 1 => q.pop_front(),
                Some((_, q)) => q.front().cloned(),
                None => None,
            };
            match reply {
                Some(Ok(out)) => Ok(out),
                Some(Err(())) => Err(ExecError::NotFound { program: spec.program.clone() }),
                None => Ok(CommandOutput::ok("")),
            }
        }
    }
}
