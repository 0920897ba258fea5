//! Helpers shared by the CLI-driven backends (k3d, kind, beiboot).

use std::future::Future;
use std::path::PathBuf;
use std::time::Instant;

use deck_core::{CommandOutput, CommandSpec, DeckConfig, Exec, ExecError, Json, TimeoutError};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::{ProviderError, ToolVersion};

/// Run and require a zero exit code.
pub(crate) async fn run_checked(
    exec: &dyn Exec,
    provider: &str,
    operation: &'static str,
    spec: CommandSpec,
) -> Result<CommandOutput, ProviderError> {
    let out = exec.run(&spec).await?;
    if !out.success {
        return Err(ProviderError::Command { provider: provider.to_string(), operation, detail: out.diagnostics() });
    }
    Ok(out)
}

/// `<program> --version`, first `x.y.z` in the output. A missing binary or failing
/// invocation both mean "not installed".
pub(crate) async fn cli_version(exec: &dyn Exec, provider: &str, program: &str) -> Result<ToolVersion, ProviderError> {
    let out = match exec.run(&CommandSpec::new(program).arg("--version")).await {
        Ok(o) => o,
        Err(ExecError::NotFound { .. }) => return Err(ProviderError::NotInstalled { provider: provider.to_string() }),
        Err(e) => return Err(e.into()),
    };
    if !out.success {
        return Err(ProviderError::NotInstalled { provider: provider.to_string() });
    }
    ToolVersion::extract(&out.stdout)
        .or_else(|| ToolVersion::extract(&out.stderr))
        .ok_or_else(|| ProviderError::Command {
            provider: provider.to_string(),
            operation: "version",
            detail: format!("unrecognized version output: {}", out.stdout.trim()),
        })
}

/// Native config serialized to a scoped temp file for `--config`. Removed on drop.
pub(crate) fn native_config_file(provider: &str, native: Option<&Json>) -> Result<Option<NamedTempFile>, ProviderError> {
    let Some(native) = native.filter(|n| !n.is_null()) else { return Ok(None) };
    let yaml = serde_yaml::to_string(native)
        .map_err(|e| ProviderError::Config { provider: provider.to_string(), reason: e.to_string() })?;
    let io = |source| ProviderError::Io { context: format!("writing {} config", provider), source };
    let mut file = tempfile::Builder::new().prefix("deck-").suffix(".yaml").tempfile().map_err(io)?;
    std::io::Write::write_all(&mut file, yaml.as_bytes()).map_err(io)?;
    debug!(provider, path = %file.path().display(), "native config written");
    Ok(Some(file))
}

/// `nativeConfig.ports[*].port`, numbers or strings.
pub(crate) fn ports_from_native(native: Option<&Json>) -> Vec<String> {
    native
        .and_then(|n| n.get("ports"))
        .and_then(Json::as_array)
        .map(|ports| {
            ports
                .iter()
                .filter_map(|p| match p.get("port") {
                    Some(Json::String(s)) => Some(s.clone()),
                    Some(Json::Number(n)) => Some(n.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) async fn write_kubeconfig(config: &DeckConfig, cluster: &str, contents: &str) -> Result<PathBuf, ProviderError> {
    let path = config.kubeconfig_path(cluster);
    let io = |source| ProviderError::Io { context: format!("writing kubeconfig for {}", cluster), source };
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await.map_err(io)?;
    }
    tokio::fs::write(&path, contents.trim()).await.map_err(io)?;
    Ok(path)
}

/// Poll `fetch` until it yields a non-empty kubeconfig or the configured budget runs out.
pub(crate) async fn poll_kubeconfig<F, Fut>(config: &DeckConfig, cluster: &str, mut fetch: F) -> Result<String, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<CommandOutput, ProviderError>>,
{
    let t0 = Instant::now();
    let attempts = config.kubeconfig_retry.max(1);
    let mut last = String::new();
    for attempt in 1..=attempts {
        match fetch().await {
            Ok(out) if out.success && !out.stdout.trim().is_empty() => return Ok(out.stdout),
            Ok(out) => last = out.diagnostics(),
            Err(ProviderError::Interrupted(p)) => return Err(ProviderError::Interrupted(p)),
            Err(e) => last = e.to_string(),
        }
        debug!(cluster, attempt, attempts, last = %last, "kubeconfig not available yet");
        if attempt < attempts {
            tokio::time::sleep(config.kubeconfig_retry_delay).await;
        }
    }
    Err(TimeoutError {
        what: format!("kubeconfig of {} ({})", cluster, last),
        elapsed: t0.elapsed(),
        budget: config.kubeconfig_retry_delay * attempts.saturating_sub(1),
    }
    .into())
}

/// Run an installer shell pipeline. Refused on Windows.
pub(crate) async fn install_script(exec: &dyn Exec, provider: &str, script: &str) -> Result<(), ProviderError> {
    if cfg!(windows) {
        return Err(ProviderError::NotSupported { provider: provider.to_string(), operation: "install on Windows" });
    }
    info!(provider, "installing");
    run_checked(exec, provider, "install", CommandSpec::new("bash").args(["-c", script])).await?;
    info!(provider, "installed");
    Ok(())
}
