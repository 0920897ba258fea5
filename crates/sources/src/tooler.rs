//! Runs render tools (helm, kubectl kustomize) either inside the tooler container or
//! directly on the host.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use deck_core::{CommandOutput, CommandSpec, DeckConfig, Exec};
use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;

use crate::fetch::{FetchedSource, Resolved};
use crate::SourceError;

/// Mount points inside the tooler container.
pub const SANDBOX_SOURCES: &str = "/sources";
pub const SANDBOX_OUTPUT: &str = "/output";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRunner {
    Sandbox { image: String },
    Host,
}

impl ToolRunner {
    pub fn from_config(config: &DeckConfig) -> Self {
        if config.sandbox {
            ToolRunner::Sandbox { image: config.tooler_image.clone() }
        } else {
            ToolRunner::Host
        }
    }

    /// Directories as the tool sees them.
    pub fn paths(&self, ws: &ToolWorkspace) -> ToolPaths {
        match self {
            ToolRunner::Sandbox { .. } => ToolPaths { sources: SANDBOX_SOURCES.into(), output: SANDBOX_OUTPUT.into() },
            ToolRunner::Host => ToolPaths {
                sources: ws.sources().display().to_string(),
                output: ws.output().display().to_string(),
            },
        }
    }

    pub fn command(&self, script: &str, ws: &ToolWorkspace) -> CommandSpec {
        match self {
            ToolRunner::Host => CommandSpec::new("bash").args(["-c", script]).cwd(ws.sources()),
            ToolRunner::Sandbox { image } => {
                let mut cmd = CommandSpec::new("docker").args(["run", "--rm"]);
                if let Some(user) = owner_of(ws.sources()) {
                    cmd = cmd.args(["--user", user.as_str()]);
                }
                cmd.arg("-v")
                    .arg(format!("{}:{}", ws.sources().display(), SANDBOX_SOURCES))
                    .arg("-v")
                    .arg(format!("{}:{}", ws.output().display(), SANDBOX_OUTPUT))
                    .args(["-w", SANDBOX_SOURCES, "-e", "HELM_DATA_HOME=/usr/local/share/helm"])
                    .arg(image.clone())
                    .args(["bash", "-c", script])
            }
        }
    }

    pub async fn run(&self, exec: &dyn Exec, script: &str, ws: &ToolWorkspace, origin: &str) -> Result<CommandOutput, SourceError> {
        let cmd = self.command(script, ws);
        debug!(origin, command = %cmd.display(), "running render tool");
        let out = exec.run(&cmd).await.map_err(|e| SourceError::from_exec_render(origin, e))?;
        if !out.success {
            return Err(SourceError::render(origin, out.diagnostics()));
        }
        Ok(out)
    }
}

#[cfg(unix)]
fn owner_of(path: &Path) -> Option<String> {
    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::metadata(path).ok()?;
    Some(format!("{}:{}", meta.uid(), meta.gid()))
}

#[cfg(not(unix))]
fn owner_of(_path: &Path) -> Option<String> {
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub sources: String,
    pub output: String,
}

impl ToolPaths {
    /// `rel` inside the sources dir; the sources dir itself for an empty path.
    pub fn source(&self, rel: &Path) -> String {
        if rel.as_os_str().is_empty() {
            self.sources.clone()
        } else {
            format!("{}/{}", self.sources.trim_end_matches('/'), rel.display())
        }
    }
}

/// Scratch sources and output dirs for one render call.
#[derive(Debug)]
pub struct ToolWorkspace {
    sources: TempDir,
    output: TempDir,
}

impl ToolWorkspace {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            sources: tempfile::Builder::new().prefix("deck-src-").tempdir()?,
            output: tempfile::Builder::new().prefix("deck-out-").tempdir()?,
        })
    }

    pub fn sources(&self) -> &Path { self.sources.path() }
    pub fn output(&self) -> &Path { self.output.path() }

    /// Copy the fetched bytes into the sources dir. Returns the path of the source relative
    /// to it, or `None` when there is nothing local to copy.
    pub fn stage(&self, fetched: &FetchedSource) -> std::io::Result<Option<PathBuf>> {
        match &fetched.resolved {
            Resolved::Tree { root, relative } => {
                copy_tree(root, self.sources())?;
                Ok(Some(relative.clone()))
            }
            Resolved::File(p) => {
                let name = p.file_name().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("source"));
                std::fs::copy(p, self.sources().join(&name))?;
                Ok(Some(name))
            }
            Resolved::Content(_) | Resolved::Remote(_) => Ok(None),
        }
    }
}

/// Recursive copy that leaves VCS metadata behind.
pub fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    let walker = WalkDir::new(from).min_depth(1).into_iter().filter_entry(|e| e.file_name() != ".git");
    for entry in walker {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry.path().strip_prefix(from).map_err(std::io::Error::other)?;
        let target = to.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Shell-quote one token for a `bash -c` script.
pub fn quote(s: &str) -> Cow<'_, str> {
    shell_escape::unix::escape(Cow::Borrowed(s))
}
