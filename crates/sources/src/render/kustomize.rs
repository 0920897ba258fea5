//! Kustomize overlays rendered with `kubectl kustomize` through the tool runner.

use deck_core::{K8sSourceFile, Source};
use tracing::debug;

use super::{parse_documents, RenderContext};
use crate::fetch::{FetchedSource, Resolved};
use crate::tooler::{quote, ToolWorkspace};
use crate::SourceError;

pub const OUTPUT_FILE: &str = "manifest.yaml";

pub fn kustomize_script(target: &str, output: &str) -> String {
    format!("kubectl kustomize {} > {}/{}", quote(target), quote(output.trim_end_matches('/')), OUTPUT_FILE)
}

/// `Kind_name.yaml`, the origin name of each rendered document.
fn document_name(file: &K8sSourceFile) -> String {
    format!("{}_{}.yaml", file.kind().unwrap_or("Unknown"), file.object_name().unwrap_or("unnamed"))
}

pub async fn render(ctx: &RenderContext, source: &Source, fetched: &FetchedSource, namespace: &str) -> Result<Vec<K8sSourceFile>, SourceError> {
    let origin = source.describe();
    let ws = ToolWorkspace::new().map_err(|e| SourceError::render(&origin, e))?;
    let staged = ws.stage(fetched).map_err(|e| SourceError::render(&origin, e))?;
    let paths = ctx.tools.paths(&ws);
    let target = match (&fetched.resolved, staged) {
        (Resolved::Remote(url), _) => url.clone(),
        (_, Some(rel)) => paths.source(&rel),
        _ => return Err(SourceError::render(&origin, "kustomize sources need a git, http or local location")),
    };
    ctx.tools.run(ctx.exec.as_ref(), &kustomize_script(&target, &paths.output), &ws, &origin).await?;

    let text = std::fs::read_to_string(ws.output().join(OUTPUT_FILE)).map_err(|e| SourceError::render(&origin, e))?;
    let mut files = parse_documents(&text, OUTPUT_FILE, namespace).map_err(|e| SourceError::render(&origin, e))?;
    for f in &mut files {
        f.name = document_name(f);
        debug!(origin = %origin, name = %f.name, "kustomize document");
    }
    Ok(files)
}
