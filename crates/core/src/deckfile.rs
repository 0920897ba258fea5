//! Deckfile model and parser.
//!
//! A Deckfile is parsed once per invocation and not mutated afterwards. Every source is
//! validated here, so a Deck that parses never needs to re-check required fields later.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::warn;

/// File names probed, in order, when a Deckfile location is a directory.
pub const DECKFILE_NAMES: &[&str] = &["deck.yaml", "deck.yml"];
pub const SUPPORTED_VERSIONS: &[&str] = &["latest", "1", "1.0"];

#[derive(Debug, thiserror::Error)]
pub enum DeckfileError {
    #[error("cannot read Deckfile {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },
    #[error("Deckfile is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Deckfile has an invalid structure: {0}")]
    Structure(String),
    #[error("This Deckfile version {0} is not supported")]
    UnsupportedVersion(String),
    #[error("Deckfile declares no decks")]
    NoDecks,
    #[error("deck '{0}' not found in Deckfile")]
    DeckNotFound(String),
    #[error("deck '{deck}': source #{index} has no type")]
    MissingSourceType { deck: String, index: usize },
    #[error("deck '{deck}': source #{index} has unknown type '{kind}'")]
    UnknownSourceType { deck: String, index: usize, kind: String },
    #[error("deck '{deck}': {kind} source #{index} is invalid: {reason}")]
    InvalidSource { deck: String, index: usize, kind: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub provider: String,
    pub name: String,
    #[serde(default)]
    pub min_version: Option<String>,
    #[serde(default)]
    pub native_config: Option<Json>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Deck {
    pub name: String,
    pub namespace: String,
    pub notes: String,
    pub hosts: Vec<String>,
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Deckfile {
    pub version: String,
    pub cluster: Option<ClusterSpec>,
    pub decks: Vec<Deck>,
}

/// Fields every source may carry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    #[serde(rename = "ref", default)]
    pub locator: Option<String>,
    #[serde(default)]
    pub target_revision: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InlineSource {
    #[serde(flatten)]
    pub origin: SourceRef,
    pub content: Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileSource {
    #[serde(flatten)]
    pub origin: SourceRef,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirectorySource {
    #[serde(flatten)]
    pub origin: SourceRef,
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HelmParameter {
    pub name: String,
    pub value: Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HelmSource {
    #[serde(flatten)]
    pub origin: SourceRef,
    #[serde(default)]
    pub chart: Option<String>,
    #[serde(default)]
    pub release_name: String,
    #[serde(default)]
    pub parameters: Vec<HelmParameter>,
    #[serde(default = "default_value_files")]
    pub value_files: Vec<String>,
    #[serde(default)]
    pub helm_args: Vec<String>,
    #[serde(default)]
    pub helm_plugins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KustomizeSource {
    #[serde(flatten)]
    pub origin: SourceRef,
}

/// One declared origin of manifests. The set is closed; dispatch matches it exhaustively.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Source {
    Inline(InlineSource),
    File(FileSource),
    Directory(DirectorySource),
    Helm(HelmSource),
    Kustomize(KustomizeSource),
}

fn default_value_files() -> Vec<String> { vec!["values.yaml".to_string()] }

fn default_namespace() -> String { "default".to_string() }

impl Source {
    pub fn type_name(&self) -> &'static str {
        match self {
            Source::Inline(_) => "inline",
            Source::File(_) => "file",
            Source::Directory(_) => "directory",
            Source::Helm(_) => "helm",
            Source::Kustomize(_) => "kustomize",
        }
    }

    pub fn origin(&self) -> &SourceRef {
        match self {
            Source::Inline(s) => &s.origin,
            Source::File(s) => &s.origin,
            Source::Directory(s) => &s.origin,
            Source::Helm(s) => &s.origin,
            Source::Kustomize(s) => &s.origin,
        }
    }

    pub fn locator(&self) -> Option<&str> {
        self.origin().locator.as_deref().filter(|s| !s.trim().is_empty())
    }

    pub fn content(&self) -> Option<&Json> {
        match self {
            Source::Inline(s) => Some(&s.content),
            _ => None,
        }
    }

    /// Short label for logs and errors.
    pub fn describe(&self) -> String {
        match self.locator() {
            Some(l) => format!("{} {}", self.type_name(), l),
            None => self.type_name().to_string(),
        }
    }

    fn validate(&self) -> Result<(), String> {
        if let Source::Inline(s) = self {
            if !s.content.is_object() {
                return Err("content must be a mapping".into());
            }
            return Ok(());
        }
        if self.locator().is_none() {
            return Err("source has neither a ref nor inline content".into());
        }
        if let Source::Helm(h) = self {
            if h.release_name.trim().is_empty() {
                return Err("releaseName is required".into());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RawDeck {
    name: String,
    #[serde(default = "default_namespace")]
    namespace: String,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    hosts: Option<Vec<String>>,
    #[serde(default)]
    sources: Vec<Json>,
}

#[derive(Debug, Deserialize)]
struct RawDeckfile {
    #[serde(default)]
    version: Option<serde_yaml::Value>,
    #[serde(default)]
    cluster: Option<ClusterSpec>,
    #[serde(default)]
    decks: Vec<RawDeck>,
}

fn version_string(v: Option<serde_yaml::Value>) -> Result<String, DeckfileError> {
    match v {
        None | Some(serde_yaml::Value::Null) => Ok("latest".to_string()),
        Some(serde_yaml::Value::String(s)) => Ok(s),
        Some(serde_yaml::Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(DeckfileError::Structure(format!("version must be a string, got {:?}", other))),
    }
}

fn parse_source(deck: &str, index: usize, raw: Json) -> Result<Source, DeckfileError> {
    let kind = raw
        .get("type")
        .and_then(Json::as_str)
        .map(|s| s.to_ascii_lowercase())
        .ok_or_else(|| DeckfileError::MissingSourceType { deck: deck.to_string(), index })?;
    let has_content = raw.get("content").map_or(false, |c| !c.is_null());
    let kind = if kind == "file" && has_content {
        warn!(deck, index, "source type 'file' with inline content is deprecated, treating it as 'inline'");
        "inline".to_string()
    } else {
        kind
    };
    let invalid = |kind: &'static str, e: serde_json::Error| DeckfileError::InvalidSource {
        deck: deck.to_string(),
        index,
        kind,
        reason: e.to_string(),
    };
    let source = match kind.as_str() {
        "inline" => Source::Inline(serde_json::from_value(raw).map_err(|e| invalid("inline", e))?),
        "file" => Source::File(serde_json::from_value(raw).map_err(|e| invalid("file", e))?),
        "directory" => Source::Directory(serde_json::from_value(raw).map_err(|e| invalid("directory", e))?),
        "helm" => Source::Helm(serde_json::from_value(raw).map_err(|e| invalid("helm", e))?),
        "kustomize" => Source::Kustomize(serde_json::from_value(raw).map_err(|e| invalid("kustomize", e))?),
        _ => return Err(DeckfileError::UnknownSourceType { deck: deck.to_string(), index, kind }),
    };
    source.validate().map_err(|reason| DeckfileError::InvalidSource {
        deck: deck.to_string(),
        index,
        kind: source.type_name(),
        reason,
    })?;
    Ok(source)
}

impl Deckfile {
    pub fn from_yaml_str(text: &str) -> Result<Self, DeckfileError> {
        let raw: RawDeckfile = serde_yaml::from_str(text)?;
        let version = version_string(raw.version)?;
        if !SUPPORTED_VERSIONS.contains(&version.as_str()) {
            return Err(DeckfileError::UnsupportedVersion(version));
        }
        if raw.decks.is_empty() {
            return Err(DeckfileError::NoDecks);
        }
        let mut decks = Vec::with_capacity(raw.decks.len());
        for d in raw.decks {
            let mut sources = Vec::with_capacity(d.sources.len());
            for (i, s) in d.sources.into_iter().enumerate() {
                sources.push(parse_source(&d.name, i, s)?);
            }
            decks.push(Deck {
                name: d.name,
                namespace: d.namespace,
                notes: d.notes.unwrap_or_default(),
                hosts: d.hosts.unwrap_or_default(),
                sources,
            });
        }
        Ok(Deckfile { version, cluster: raw.cluster, decks })
    }

    pub fn load(path: &Path) -> Result<Self, DeckfileError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| DeckfileError::Read { path: path.display().to_string(), source })?;
        Self::from_yaml_str(&text)
    }

    /// Picks a deck by name (case-insensitive). Without a name, the deck called "default"
    /// wins, otherwise the first one declared.
    pub fn get_deck(&self, name: Option<&str>) -> Result<&Deck, DeckfileError> {
        match name {
            Some(n) => self
                .decks
                .iter()
                .find(|d| d.name.eq_ignore_ascii_case(n))
                .ok_or_else(|| DeckfileError::DeckNotFound(n.to_string())),
            None => self
                .decks
                .iter()
                .find(|d| d.name.eq_ignore_ascii_case("default"))
                .or_else(|| self.decks.first())
                .ok_or(DeckfileError::NoDecks),
        }
    }

    pub fn deck_names(&self) -> Vec<String> {
        self.decks.iter().map(|d| d.name.clone()).collect()
    }
}
