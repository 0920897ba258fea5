//! Deck core types: Deckfile model, generated manifests, runtime configuration and the
//! subprocess capability shared by providers and renderers.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

pub mod config;
pub mod deckfile;
pub mod exec;
pub mod manifest;

pub use config::DeckConfig;
pub use deckfile::{
    ClusterSpec, Deck, Deckfile, DeckfileError, DirectorySource, FileSource, HelmParameter, HelmSource,
    InlineSource, KustomizeSource, Source, SourceRef,
};
pub use exec::{CommandOutput, CommandSpec, Exec, ExecError, SystemExec};
pub use manifest::{GeneratedDeck, K8sSourceFile};

pub type Json = serde_json::Value;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Credentials for reaching a cluster's API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KubeconfigHandle {
    /// Kubeconfig file written by a provider.
    File(PathBuf),
    /// The user's own kubeconfig, optionally pinned to a context.
    CurrentContext { context: Option<String> },
}

impl std::fmt::Display for KubeconfigHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KubeconfigHandle::File(p) => write!(f, "{}", p.display()),
            KubeconfigHandle::CurrentContext { context: Some(c) } => write!(f, "context {}", c),
            KubeconfigHandle::CurrentContext { context: None } => f.write_str("current context"),
        }
    }
}

/// A bounded wait ran out. Kept distinct from hard failures so callers can report it as such.
#[derive(Debug, Clone, thiserror::Error)]
#[error("timed out waiting for {what} after {elapsed:?} (budget {budget:?})")]
pub struct TimeoutError {
    pub what: String,
    pub elapsed: Duration,
    pub budget: Duration,
}

/// Cluster names are lower-cased and must not contain spaces.
pub fn cluster_name(prefix: &str, name: &str) -> String {
    format!("{}{}", prefix, name).to_lowercase().replace(' ', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_name_is_lowercase_and_dashed() {
        assert_eq!(cluster_name("", "My Cluster"), "my-cluster");
        assert_eq!(cluster_name("deck-", "Demo"), "deck-demo");
    }

    #[test]
    fn timeout_error_reports_budget() {
        let e = TimeoutError { what: "pods".into(), elapsed: Duration::from_secs(3), budget: Duration::from_secs(2) };
        let s = e.to_string();
        assert!(s.contains("pods") && s.contains("3s") && s.contains("2s"), "{}", s);
    }
}
