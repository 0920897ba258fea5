//! `file` and `directory` sources: plain YAML read straight from the fetched location.

use deck_core::{K8sSourceFile, Source};

use super::{collect_yaml_files, parse_files};
use crate::fetch::FetchedSource;
use crate::SourceError;

/// A single YAML stream, or every top-level YAML file when the location is a directory.
pub fn render_file(source: &Source, fetched: &FetchedSource, namespace: &str) -> Result<Vec<K8sSourceFile>, SourceError> {
    let origin = source.describe();
    let path = fetched
        .local_path()
        .ok_or_else(|| SourceError::render(&origin, "file sources need a local, git or http location"))?;
    if path.is_dir() {
        let files = collect_yaml_files(&path, false).map_err(|e| SourceError::render(&origin, e))?;
        parse_files(&files, &path, &origin, namespace)
    } else {
        let root = path.parent().map(|p| p.to_path_buf()).unwrap_or_default();
        parse_files(std::slice::from_ref(&path), &root, &origin, namespace)
    }
}

pub fn render_directory(
    source: &Source,
    fetched: &FetchedSource,
    namespace: &str,
    recursive: bool,
) -> Result<Vec<K8sSourceFile>, SourceError> {
    let origin = source.describe();
    let dir = fetched
        .local_path()
        .filter(|p| p.is_dir())
        .ok_or_else(|| SourceError::render(&origin, "location is not a directory"))?;
    let files = collect_yaml_files(&dir, recursive).map_err(|e| SourceError::render(&origin, e))?;
    parse_files(&files, &dir, &origin, namespace)
}
