//! Render strategies, one per declared source type.

pub mod file;
pub mod helm;
pub mod inline;
pub mod kustomize;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use deck_core::{Exec, Json, K8sSourceFile, Source};
use serde::Deserialize;
use walkdir::WalkDir;

use crate::fetch::FetchedSource;
use crate::tooler::ToolRunner;
use crate::SourceError;

#[derive(Clone)]
pub struct RenderContext {
    pub exec: Arc<dyn Exec>,
    pub tools: ToolRunner,
    /// Live cluster `major.minor`, passed to helm when known.
    pub kube_version: Option<String>,
}

pub async fn render(
    ctx: &RenderContext,
    source: &Source,
    fetched: &FetchedSource,
    namespace: &str,
) -> Result<Vec<K8sSourceFile>, SourceError> {
    match source {
        Source::Inline(_) => inline::render(source, fetched, namespace),
        Source::File(_) => file::render_file(source, fetched, namespace),
        Source::Directory(d) => file::render_directory(source, fetched, namespace, d.recursive),
        Source::Helm(h) => helm::render(ctx, source, h, fetched, namespace).await,
        Source::Kustomize(_) => kustomize::render(ctx, source, fetched, namespace).await,
    }
}

/// Split a multi-document YAML stream. Empty and null documents are dropped.
pub fn parse_documents(text: &str, origin: &str, namespace: &str) -> Result<Vec<K8sSourceFile>, String> {
    let mut out = Vec::new();
    for (i, doc) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = Json::deserialize(doc).map_err(|e| format!("{}: document {}: {}", origin, i, e))?;
        match value {
            Json::Null => continue,
            Json::Object(_) => out.push(K8sSourceFile::new(origin, namespace, value)),
            _ => return Err(format!("{}: document {} is not a mapping", origin, i)),
        }
    }
    Ok(out)
}

fn is_yaml(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml"))
}

/// `*.yaml` / `*.yml` under `dir`, files before subdirectories, each level name-sorted.
pub fn collect_yaml_files(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, walkdir::Error> {
    let mut walker = WalkDir::new(dir)
        .min_depth(1)
        .sort_by(|a, b| a.file_type().is_dir().cmp(&b.file_type().is_dir()).then_with(|| a.file_name().cmp(b.file_name())));
    if !recursive {
        walker = walker.max_depth(1);
    }
    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file() && is_yaml(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Read and parse every file, naming each manifest after the file path relative to `root`.
pub(crate) fn parse_files(files: &[PathBuf], root: &Path, origin: &str, namespace: &str) -> Result<Vec<K8sSourceFile>, SourceError> {
    let mut out = Vec::new();
    for f in files {
        let text = std::fs::read_to_string(f).map_err(|e| SourceError::render(origin, format!("{}: {}", f.display(), e)))?;
        let name = f.strip_prefix(root).unwrap_or(f).display().to_string();
        out.extend(parse_documents(&text, &name, namespace).map_err(|e| SourceError::render(origin, e))?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_empty_and_null_documents() {
        let text = "---\nkind: A\nmetadata:\n  name: a\n---\n---\nnull\n---\nkind: B\nmetadata:\n  name: b\n";
        let docs = parse_documents(text, "x.yaml", "ns").unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].kind(), Some("A"));
        assert_eq!(docs[1].object_name(), Some("b"));
        assert!(docs.iter().all(|d| d.namespace == "ns" && d.name == "x.yaml"));
    }

    #[test]
    fn scalar_document_is_rejected() {
        assert!(parse_documents("just a string\n", "x.yaml", "default").is_err());
        assert!(parse_documents("", "x.yaml", "default").unwrap().is_empty());
    }

    #[test]
    fn collects_sorted_files_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a-sub")).unwrap();
        std::fs::write(dir.path().join("a-sub/inner.yaml"), "").unwrap();
        std::fs::write(dir.path().join("b.yml"), "").unwrap();
        std::fs::write(dir.path().join("a.yaml"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let flat = collect_yaml_files(dir.path(), false).unwrap();
        assert_eq!(flat, vec![dir.path().join("a.yaml"), dir.path().join("b.yml")]);

        let deep = collect_yaml_files(dir.path(), true).unwrap();
        assert_eq!(deep, vec![dir.path().join("a.yaml"), dir.path().join("b.yml"), dir.path().join("a-sub/inner.yaml")]);
    }
}
