//! Rendered manifests as handed to the reconciler.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// One rendered Kubernetes object plus where it came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct K8sSourceFile {
    /// Origin, for diagnostics only (file name, `Deckfile`, `Kind_name.yaml`).
    pub name: String,
    pub namespace: String,
    pub content: Json,
}

impl K8sSourceFile {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, content: Json) -> Self {
        Self { name: name.into(), namespace: namespace.into(), content }
    }

    pub fn kind(&self) -> Option<&str> {
        self.content.get("kind").and_then(Json::as_str)
    }

    pub fn object_name(&self) -> Option<&str> {
        self.content.get("metadata").and_then(|m| m.get("name")).and_then(Json::as_str)
    }

    /// `metadata.namespace` on the object itself, which beats the deck namespace.
    pub fn object_namespace(&self) -> Option<&str> {
        self.content
            .get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(Json::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn target_namespace(&self) -> &str {
        self.object_namespace().unwrap_or(&self.namespace)
    }

    /// `Kind 'name'` when both are known, otherwise the origin name.
    pub fn describe(&self) -> String {
        match (self.kind(), self.object_name()) {
            (Some(k), Some(n)) => format!("{} '{}'", k, n),
            _ => self.name.clone(),
        }
    }
}

/// A fully rendered deck, in apply order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GeneratedDeck {
    pub name: String,
    pub namespace: String,
    pub files: Vec<K8sSourceFile>,
}

impl GeneratedDeck {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: namespace.into(), files: Vec::new() }
    }

    /// Namespaces targeted by the deck's objects, first-seen order.
    pub fn namespaces(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for f in &self.files {
            let ns = f.target_namespace();
            if !out.iter().any(|n| n == ns) {
                out.push(ns.to_string());
            }
        }
        out
    }
}
