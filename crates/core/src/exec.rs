//! Subprocess capability.
//!
//! Everything that shells out (cluster CLIs, git, helm, docker) goes through [`Exec`], so
//! tests can script the stdout/return-code contract without touching the host. Ctrl-C while
//! a child runs kills it, waits a bounded grace period and reports [`ExecError::Interrupted`].

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), ..Default::default() }
    }

    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    pub fn args<I, S>(mut self, it: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(it.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// `program arg1 arg2`, for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { success: true, code: Some(0), stdout: stdout.into(), stderr: String::new() }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self { success: false, code: Some(code), stdout: String::new(), stderr: stderr.into() }
    }

    /// Trimmed stderr, falling back to stdout when stderr is empty.
    pub fn diagnostics(&self) -> String {
        let err = self.stderr.trim();
        if err.is_empty() { self.stdout.trim().to_string() } else { err.to_string() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("{program} is not installed or not on PATH")]
    NotFound { program: String },
    #[error("{program} was interrupted")]
    Interrupted { program: String },
    #[error("failed to run {program}: {source}")]
    Io { program: String, #[source] source: std::io::Error },
}

#[async_trait::async_trait]
pub trait Exec: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError>;
}

/// Runs commands on the host through `tokio::process`.
#[derive(Debug, Clone)]
pub struct SystemExec {
    grace: Duration,
}

impl SystemExec {
    pub fn new(grace: Duration) -> Self { Self { grace } }
}

impl Default for SystemExec {
    fn default() -> Self { Self::new(Duration::from_secs(5)) }
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut r) = reader {
        let _ = r.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[async_trait::async_trait]
impl Exec for SystemExec {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        debug!(cmd = %spec.display(), "exec");
        let program = spec.program.clone();
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(if spec.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        let mut child = cmd.spawn().map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => ExecError::NotFound { program: program.clone() },
            _ => ExecError::Io { program: program.clone(), source },
        })?;

        let out = tokio::spawn(drain(child.stdout.take()));
        let err = tokio::spawn(drain(child.stderr.take()));
        if let (Some(input), Some(mut sin)) = (spec.stdin.as_ref(), child.stdin.take()) {
            sin.write_all(input).await.map_err(|source| ExecError::Io { program: program.clone(), source })?;
        }

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|source| ExecError::Io { program: program.clone(), source })?;
                let stdout = out.await.unwrap_or_default();
                let stderr = err.await.unwrap_or_default();
                Ok(CommandOutput { success: status.success(), code: status.code(), stdout, stderr })
            }
            _ = tokio::signal::ctrl_c() => {
                warn!(cmd = %spec.display(), "interrupt received; terminating child process");
                let _ = child.start_kill();
                if tokio::time::timeout(self.grace, child.wait()).await.is_err() {
                    warn!(program = %program, grace = ?self.grace, "child did not exit within grace period");
                }
                Err(ExecError::Interrupted { program })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_builder_and_display() {
        let s = CommandSpec::new("k3d").args(["cluster", "list"]).arg("--no-headers");
        assert_eq!(s.display(), "k3d cluster list --no-headers");
        assert!(s.stdin.is_none());
    }

    #[test]
    fn diagnostics_prefer_stderr() {
        let mut o = CommandOutput::failed(1, "  boom \n");
        assert_eq!(o.diagnostics(), "boom");
        o.stderr.clear();
        o.stdout = "from stdout".into();
        assert_eq!(o.diagnostics(), "from stdout");
    }

    #[tokio::test]
    async fn missing_binary_is_not_found() {
        let e = SystemExec::default().run(&CommandSpec::new("deck-definitely-not-a-binary")).await.unwrap_err();
        assert!(matches!(e, ExecError::NotFound { .. }), "{:?}", e);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let exec = SystemExec::default();
        let ok = exec.run(&CommandSpec::new("sh").args(["-c", "echo hi"])).await.unwrap();
        assert!(ok.success);
        assert_eq!(ok.stdout.trim(), "hi");
        let bad = exec.run(&CommandSpec::new("sh").args(["-c", "echo nope >&2; exit 3"])).await.unwrap();
        assert!(!bad.success);
        assert_eq!(bad.code, Some(3));
        assert_eq!(bad.diagnostics(), "nope");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdin_is_forwarded() {
        let out = SystemExec::default().run(&CommandSpec::new("cat").stdin("payload")).await.unwrap();
        assert_eq!(out.stdout, "payload");
    }
}
