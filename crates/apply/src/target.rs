//! Where a manifest goes: API surface, kind and identity.

use deck_core::{Json, K8sSourceFile};
use serde::{Deserialize, Serialize};

/// Surfaces with typed support (discovery-backed plural/scope, strategic-merge patch).
pub const REGISTERED_SURFACES: &[&str] = &[
    "CoreV1",
    "AppsV1",
    "BatchV1",
    "RbacAuthorizationV1",
    "NetworkingV1",
    "ApiextensionsV1",
    "AdmissionregistrationV1",
    "PolicyV1",
    "StorageV1",
    "AutoscalingV2",
    "SchedulingV1",
    "CoordinationV1",
    "DiscoveryV1",
];

fn capitalize(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        Some(f) => f.to_uppercase().chain(c).collect(),
        None => String::new(),
    }
}

/// `rbac.authorization.k8s.io/v1` -> `RbacAuthorizationV1`, `v1` -> `CoreV1`.
pub fn api_surface_name(api_version: &str) -> String {
    let (group, version) = match api_version.split_once('/') {
        Some((g, v)) => (g, v),
        None => ("core", api_version),
    };
    let group = group.strip_suffix(".k8s.io").unwrap_or(group);
    let group: String = group.split('.').map(capitalize).collect();
    format!("{}{}", group, capitalize(version))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTarget {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub surface: String,
}

impl ResourceTarget {
    pub fn parse(content: &Json) -> Result<Self, String> {
        let api_version = content
            .get("apiVersion")
            .and_then(Json::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("v1")
            .to_string();
        let kind = content
            .get("kind")
            .and_then(Json::as_str)
            .filter(|s| !s.is_empty())
            .ok_or("missing kind")?
            .to_string();
        let name = content
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Json::as_str)
            .filter(|s| !s.is_empty())
            .ok_or("missing metadata.name")?
            .to_string();
        let surface = api_surface_name(&api_version);
        Ok(Self { api_version, kind, name, surface })
    }

    pub fn of(file: &K8sSourceFile) -> Result<Self, String> {
        Self::parse(&file.content)
    }

    pub fn is_registered(&self) -> bool {
        REGISTERED_SURFACES.contains(&self.surface.as_str())
    }

    /// The body sent to the server: `apiVersion` filled in when the manifest omitted it.
    pub fn body(&self, content: &Json) -> Json {
        let mut body = content.clone();
        if let Some(obj) = body.as_object_mut() {
            obj.entry("apiVersion").or_insert_with(|| Json::String(self.api_version.clone()));
        }
        body
    }
}

impl std::fmt::Display for ResourceTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}

/// Namespaced under a name, or cluster-wide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Namespaced(String),
    Cluster,
}

impl Scope {
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Scope::Namespaced(ns) => Some(ns),
            Scope::Cluster => None,
        }
    }
}
