use deck_core::{K8sSourceFile, Source};

use crate::fetch::{FetchedSource, Resolved};
use crate::SourceError;

/// Origin name of manifests written directly into the Deckfile.
pub const INLINE_ORIGIN: &str = "Deckfile";

pub fn render(source: &Source, fetched: &FetchedSource, namespace: &str) -> Result<Vec<K8sSourceFile>, SourceError> {
    match &fetched.resolved {
        Resolved::Content(c) => Ok(vec![K8sSourceFile::new(INLINE_ORIGIN, namespace, c.clone())]),
        _ => Err(SourceError::render(source.describe(), "inline source without content")),
    }
}
