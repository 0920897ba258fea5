//! Fetch strategies. Every temp allocation is owned by the returned [`FetchedSource`] and
//! released when it is dropped, including on early returns.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use deck_core::{CommandSpec, DeckConfig, Exec, Json, Source};
use futures::StreamExt;
use tempfile::{TempDir, TempPath};
use tracing::{debug, info};

use crate::protocol::{split_revision, FetchStrategy};
use crate::SourceError;

/// Where a fetched source's bytes live.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// Inline manifest, no I/O happened.
    Content(Json),
    /// A directory tree and the source's path inside it (empty for the root).
    Tree { root: PathBuf, relative: PathBuf },
    /// A single file.
    File(PathBuf),
    /// Locator handed untouched to a renderer that fetches by itself (chart repositories,
    /// remote kustomize overlays).
    Remote(String),
}

#[derive(Debug)]
pub(crate) enum TempResource {
    Dir(TempDir),
    File(TempPath),
}

impl TempResource {
    pub(crate) fn path(&self) -> &Path {
        match self {
            TempResource::Dir(d) => d.path(),
            TempResource::File(p) => p,
        }
    }
}

#[derive(Debug)]
pub struct FetchedSource {
    pub strategy: FetchStrategy,
    pub resolved: Resolved,
    temp: Option<TempResource>,
}

impl FetchedSource {
    pub fn new(strategy: FetchStrategy, resolved: Resolved) -> Self {
        Self { strategy, resolved, temp: None }
    }

    pub(crate) fn with_temp(mut self, temp: TempResource) -> Self {
        self.temp = Some(temp);
        self
    }

    /// Temp allocation owned by this handle, if any.
    pub fn temp_path(&self) -> Option<&Path> {
        self.temp.as_ref().map(TempResource::path)
    }

    /// Full local path of the source, when it has one.
    pub fn local_path(&self) -> Option<PathBuf> {
        match &self.resolved {
            Resolved::Tree { root, relative } if relative.as_os_str().is_empty() => Some(root.clone()),
            Resolved::Tree { root, relative } => Some(root.join(relative)),
            Resolved::File(p) => Some(p.clone()),
            Resolved::Content(_) | Resolved::Remote(_) => None,
        }
    }
}

/// Shared handles for fetching. `base_dir` anchors relative local locators (the
/// Deckfile's directory).
#[derive(Clone)]
pub struct FetchContext {
    pub exec: Arc<dyn Exec>,
    pub http: reqwest::Client,
    pub base_dir: PathBuf,
}

impl FetchContext {
    pub fn new(exec: Arc<dyn Exec>, config: &DeckConfig, base_dir: PathBuf) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| SourceError::acquisition("http client", e))?;
        Ok(Self { exec, http, base_dir })
    }
}

/// Clone `url` into a fresh temp dir, checking out `revision` when given.
pub async fn clone_repository(exec: &dyn Exec, url: &str, revision: Option<&str>) -> Result<TempDir, SourceError> {
    let dir = tempfile::Builder::new()
        .prefix("deck-git-")
        .tempdir()
        .map_err(|e| SourceError::acquisition(url, e))?;
    let target = dir.path().display().to_string();
    info!(url, revision = ?revision, "cloning");
    let out = exec
        .run(&CommandSpec::new("git").args(["clone", "--quiet", url, target.as_str()]))
        .await
        .map_err(|e| SourceError::from_exec_fetch(url, e))?;
    if !out.success {
        return Err(SourceError::acquisition(url, format!("git clone failed: {}", out.diagnostics())));
    }
    if let Some(rev) = revision {
        let out = exec
            .run(&CommandSpec::new("git").args(["-C", target.as_str(), "checkout", "--quiet", rev]))
            .await
            .map_err(|e| SourceError::from_exec_fetch(url, e))?;
        if !out.success {
            return Err(SourceError::acquisition(url, format!("git checkout {} failed: {}", rev, out.diagnostics())));
        }
    }
    Ok(dir)
}

/// Stream `url` into a fresh temp file.
pub async fn download(client: &reqwest::Client, url: &str) -> Result<TempPath, SourceError> {
    debug!(url, "downloading");
    let resp = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| SourceError::acquisition(url, e))?;
    let mut file = tempfile::Builder::new()
        .prefix("deck-http-")
        .tempfile()
        .map_err(|e| SourceError::acquisition(url, e))?;
    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| SourceError::acquisition(url, e))?;
        file.write_all(&chunk).map_err(|e| SourceError::acquisition(url, e))?;
    }
    file.flush().map_err(|e| SourceError::acquisition(url, e))?;
    Ok(file.into_temp_path())
}

/// Expand `~` and anchor relative paths at `base`.
pub fn resolve_local(base: &Path, locator: &str) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(locator.trim()).into_owned());
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded.strip_prefix("./").unwrap_or(&expanded))
    }
}

fn sub_path(source: &Source) -> PathBuf {
    source
        .origin()
        .path
        .as_deref()
        .map(|p| p.trim().trim_start_matches("./").trim_matches('/'))
        .filter(|p| !p.is_empty() && *p != ".")
        .map(PathBuf::from)
        .unwrap_or_default()
}

pub async fn fetch(ctx: &FetchContext, source: &Source, strategy: FetchStrategy) -> Result<FetchedSource, SourceError> {
    let origin = source.describe();
    match strategy {
        FetchStrategy::Content => {
            let content = source
                .content()
                .cloned()
                .ok_or_else(|| SourceError::acquisition(&origin, "no inline content"))?;
            Ok(FetchedSource::new(strategy, Resolved::Content(content)))
        }
        FetchStrategy::Git => {
            let locator = source.locator().unwrap_or_default();
            let (url, suffix_rev) = split_revision(locator);
            let revision = source.origin().target_revision.as_deref().filter(|r| !r.trim().is_empty()).or(suffix_rev);
            let dir = clone_repository(ctx.exec.as_ref(), url, revision).await?;
            let relative = sub_path(source);
            if !dir.path().join(&relative).exists() {
                return Err(SourceError::acquisition(&origin, format!("path '{}' not found in repository", relative.display())));
            }
            let root = dir.path().to_path_buf();
            Ok(FetchedSource::new(strategy, Resolved::Tree { root, relative }).with_temp(TempResource::Dir(dir)))
        }
        FetchStrategy::Http => {
            let url = source.locator().unwrap_or_default();
            if matches!(source, Source::Helm(_) | Source::Kustomize(_)) {
                return Ok(FetchedSource::new(strategy, Resolved::Remote(url.to_string())));
            }
            let file = download(&ctx.http, url).await?;
            let path = file.to_path_buf();
            Ok(FetchedSource::new(strategy, Resolved::File(path)).with_temp(TempResource::File(file)))
        }
        FetchStrategy::Local => {
            let path = resolve_local(&ctx.base_dir, source.locator().unwrap_or_default());
            if path.is_dir() {
                let relative = sub_path(source);
                if !path.join(&relative).exists() {
                    return Err(SourceError::acquisition(&origin, format!("path '{}' not found", path.join(&relative).display())));
                }
                Ok(FetchedSource::new(strategy, Resolved::Tree { root: path, relative }))
            } else if path.is_file() {
                Ok(FetchedSource::new(strategy, Resolved::File(path)))
            } else {
                Err(SourceError::acquisition(&origin, format!("{} does not exist", path.display())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_core::{CommandOutput, ExecError, FileSource, SourceRef};

    struct NoExec;

    #[async_trait::async_trait]
    impl Exec for NoExec {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
            Err(ExecError::NotFound { program: spec.program.clone() })
        }
    }

    /// Pretends to clone by creating the target dir's contents.
    #[derive(Default)]
    struct FakeGit {
        cloned_into: std::sync::Mutex<Option<PathBuf>>,
    }

    #[async_trait::async_trait]
    impl Exec for FakeGit {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
            if spec.args.first().map(String::as_str) == Some("clone") {
                let target = PathBuf::from(spec.args.last().cloned().unwrap_or_default());
                *self.cloned_into.lock().unwrap() = Some(target.clone());
                std::fs::create_dir_all(target.join("manifests")).unwrap();
                std::fs::write(target.join("manifests/a.yaml"), "kind: ConfigMap\n").unwrap();
            }
            Ok(CommandOutput::ok(""))
        }
    }

    fn ctx(exec: Arc<dyn Exec>, base: &Path) -> FetchContext {
        FetchContext::new(exec, &DeckConfig::default(), base.to_path_buf()).unwrap()
    }

    fn file_source(locator: &str, path: Option<&str>) -> Source {
        Source::File(FileSource {
            origin: SourceRef { locator: Some(locator.into()), path: path.map(Into::into), ..Default::default() },
        })
    }

    #[test]
    fn local_paths_anchor_at_base() {
        let base = Path::new("/decks/shop");
        assert_eq!(resolve_local(base, "./manifests"), PathBuf::from("/decks/shop/manifests"));
        assert_eq!(resolve_local(base, "/abs/x.yaml"), PathBuf::from("/abs/x.yaml"));
        assert!(resolve_local(base, "~/x").is_absolute());
    }

    #[tokio::test]
    async fn local_file_and_dir_resolution() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), "kind: A\n").unwrap();
        let c = ctx(Arc::new(NoExec), dir.path());
        let f = fetch(&c, &file_source("./a.yaml", None), FetchStrategy::Local).await.unwrap();
        assert_eq!(f.resolved, Resolved::File(dir.path().join("a.yaml")));
        assert!(f.temp_path().is_none());
        let d = fetch(&c, &file_source("./", None), FetchStrategy::Local).await.unwrap();
        assert!(matches!(d.resolved, Resolved::Tree { .. }));
        let missing = fetch(&c, &file_source("./nope.yaml", None), FetchStrategy::Local).await.unwrap_err();
        assert!(matches!(missing, SourceError::Acquisition { .. }));
    }

    #[tokio::test]
    async fn git_clone_is_released_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let c = ctx(Arc::new(FakeGit::default()), base.path());
        let f = fetch(&c, &file_source("https://example.org/repo.git", Some("manifests")), FetchStrategy::Git).await.unwrap();
        let tmp = f.temp_path().unwrap().to_path_buf();
        assert!(tmp.exists());
        assert_eq!(f.local_path(), Some(tmp.join("manifests")));
        drop(f);
        assert!(!tmp.exists());
    }

    #[tokio::test]
    async fn git_clone_is_released_on_error() {
        let base = tempfile::tempdir().unwrap();
        let git = Arc::new(FakeGit::default());
        let c = ctx(git.clone(), base.path());
        let e = fetch(&c, &file_source("https://example.org/repo.git", Some("missing")), FetchStrategy::Git).await.unwrap_err();
        assert!(e.to_string().contains("not found in repository"), "{}", e);
        let cloned = git.cloned_into.lock().unwrap().clone().unwrap();
        assert!(!cloned.exists());
    }

    #[tokio::test]
    async fn missing_git_binary_is_an_acquisition_error() {
        let base = tempfile::tempdir().unwrap();
        let c = ctx(Arc::new(NoExec), base.path());
        let e = fetch(&c, &file_source("git@host:org/repo.git", None), FetchStrategy::Git).await.unwrap_err();
        assert!(matches!(e, SourceError::Acquisition { .. }));
    }

    #[tokio::test]
    async fn remote_renderers_skip_download() {
        let base = tempfile::tempdir().unwrap();
        let c = ctx(Arc::new(NoExec), base.path());
        let helm = Source::Kustomize(deck_core::KustomizeSource {
            origin: SourceRef { locator: Some("https://github.com/org/overlay?ref=main".into()), ..Default::default() },
        });
        let f = fetch(&c, &helm, FetchStrategy::Http).await.unwrap();
        assert_eq!(f.resolved, Resolved::Remote("https://github.com/org/overlay?ref=main".into()));
        assert!(f.temp_path().is_none());
    }
}
