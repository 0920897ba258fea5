//! Helm charts rendered with `helm template` through the tool runner.

use deck_core::{HelmSource, Json, K8sSourceFile, Source};
use tracing::debug;

use super::{collect_yaml_files, parse_files, RenderContext};
use crate::fetch::{FetchedSource, Resolved};
use crate::tooler::{quote, ToolPaths, ToolWorkspace};
use crate::SourceError;

/// Where `helm template` finds the chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChartLocation {
    /// Chart directory as seen by the tool.
    Path(String),
    /// Chart `name` inside the repository at `url`, added as `this`.
    Repository { url: String, chart: String },
}

fn set_value(v: &Json) -> String {
    match v {
        Json::Bool(b) => b.to_string(),
        Json::String(s) => s.clone(),
        Json::Null => String::new(),
        other => other.to_string(),
    }
}

/// The full `bash -c` script: preparation, then `helm template`.
pub fn helm_script(source: &HelmSource, chart: &ChartLocation, namespace: &str, output: &str, kube_version: Option<&str>) -> String {
    let mut prep: Vec<String> = Vec::new();
    let mut cmd: Vec<String> = vec!["helm".into()];
    cmd.extend(source.helm_plugins.iter().cloned());
    cmd.extend(["template".into(), source.release_name.clone()]);
    match chart {
        ChartLocation::Path(path) => {
            prep.extend(["helm".into(), "dep".into(), "up".into(), path.clone()]);
            cmd.extend([path.clone(), "--include-crds".into(), "--namespace".into(), namespace.into()]);
            for vf in &source.value_files {
                cmd.extend(["--values".into(), format!("{}/{}", path.trim_end_matches('/'), vf)]);
            }
        }
        ChartLocation::Repository { url, chart } => {
            prep.extend(["helm".into(), "repo".into(), "add".into(), "this".into(), url.clone()]);
            cmd.extend([format!("this/{}", chart), "--include-crds".into(), "--namespace".into(), namespace.into()]);
        }
    }
    for p in &source.parameters {
        cmd.extend(["--set".into(), format!("{}={}", p.name, set_value(&p.value))]);
    }
    cmd.extend(["--output-dir".into(), output.into()]);
    if let Some(v) = kube_version {
        cmd.extend(["--kube-version".into(), v.into(), "--api-versions".into(), v.into()]);
    }
    cmd.extend(source.helm_args.iter().cloned());

    let join = |parts: &[String]| parts.iter().map(|p| quote(p).into_owned()).collect::<Vec<_>>().join(" ");
    format!("{} && {}", join(&prep), join(&cmd))
}

fn chart_location(source: &HelmSource, fetched: &FetchedSource, staged: Option<&std::path::Path>, paths: &ToolPaths) -> Result<ChartLocation, String> {
    match (&fetched.resolved, staged) {
        (Resolved::Remote(url), _) => {
            let chart = source
                .chart
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .ok_or("chart is required for chart repositories")?;
            Ok(ChartLocation::Repository { url: url.clone(), chart: chart.to_string() })
        }
        (_, Some(rel)) => Ok(ChartLocation::Path(paths.source(rel))),
        _ => Err("helm sources need a git, http or local location".into()),
    }
}

pub async fn render(
    ctx: &RenderContext,
    source: &Source,
    helm: &HelmSource,
    fetched: &FetchedSource,
    namespace: &str,
) -> Result<Vec<K8sSourceFile>, SourceError> {
    let origin = source.describe();
    let ws = ToolWorkspace::new().map_err(|e| SourceError::render(&origin, e))?;
    let staged = ws.stage(fetched).map_err(|e| SourceError::render(&origin, e))?;
    let paths = ctx.tools.paths(&ws);
    let chart = chart_location(helm, fetched, staged.as_deref(), &paths).map_err(|e| SourceError::render(&origin, e))?;
    let script = helm_script(helm, &chart, namespace, &paths.output, ctx.kube_version.as_deref());
    ctx.tools.run(ctx.exec.as_ref(), &script, &ws, &origin).await?;

    let files = collect_yaml_files(ws.output(), true).map_err(|e| SourceError::render(&origin, e))?;
    debug!(origin = %origin, files = files.len(), "helm output collected");
    parse_files(&files, ws.output(), &origin, namespace)
}
