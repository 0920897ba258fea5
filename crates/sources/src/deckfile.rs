//! Deckfile acquisition from local paths, git repositories and http(s) URLs.

use std::path::{Path, PathBuf};

use deck_core::deckfile::DECKFILE_NAMES;
use deck_core::{Deckfile, Exec};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::fetch::{clone_repository, download};
use crate::protocol::{sniff_protocol, split_revision, Protocol};
use crate::SourceError;

/// A parsed Deckfile plus the directory its relative sources resolve against. A cloned
/// repository stays on disk for as long as this value lives.
#[derive(Debug)]
pub struct LoadedDeckfile {
    pub deckfile: Deckfile,
    pub path: String,
    pub base_dir: PathBuf,
    _checkout: Option<TempDir>,
}

/// `deck.yaml`, then `deck.yml`, inside `dir`.
pub fn find_in_dir(dir: &Path) -> Option<PathBuf> {
    DECKFILE_NAMES.iter().map(|n| dir.join(n)).find(|p| p.is_file())
}

fn current_dir() -> Result<PathBuf, SourceError> {
    std::env::current_dir().map_err(|e| SourceError::acquisition("current directory", e))
}

pub async fn load_deckfile(location: &str, exec: &dyn Exec, http: &reqwest::Client) -> Result<LoadedDeckfile, SourceError> {
    let location = location.trim();
    if location.is_empty() || location == "." {
        return load_local(&current_dir()?);
    }
    match sniff_protocol(location) {
        Some(Protocol::Git) => {
            let (url, rev) = split_revision(location);
            let checkout = clone_repository(exec, url, rev).await?;
            let path = find_in_dir(checkout.path())
                .ok_or_else(|| SourceError::acquisition(location, "repository contains no deck.yaml"))?;
            info!(location, "Deckfile read from repository");
            let deckfile = Deckfile::load(&path)?;
            Ok(LoadedDeckfile {
                deckfile,
                path: location.to_string(),
                base_dir: checkout.path().to_path_buf(),
                _checkout: Some(checkout),
            })
        }
        Some(Protocol::Http) => {
            let file = download(http, location).await?;
            let deckfile = Deckfile::load(&file)?;
            debug!(location, "Deckfile downloaded");
            Ok(LoadedDeckfile { deckfile, path: location.to_string(), base_dir: current_dir()?, _checkout: None })
        }
        Some(Protocol::Local) | None => {
            let p = PathBuf::from(shellexpand::tilde(location).into_owned());
            let p = if p.is_absolute() { p } else { current_dir()?.join(p) };
            load_local(&p)
        }
    }
}

fn load_local(path: &Path) -> Result<LoadedDeckfile, SourceError> {
    let file = if path.is_dir() {
        find_in_dir(path).ok_or_else(|| SourceError::acquisition(path.display().to_string(), "no deck.yaml or deck.yml found"))?
    } else if path.is_file() {
        path.to_path_buf()
    } else {
        return Err(SourceError::acquisition(path.display().to_string(), "cannot identify this location as a Deckfile"));
    };
    let deckfile = Deckfile::load(&file)?;
    let base_dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok(LoadedDeckfile { deckfile, path: file.display().to_string(), base_dir, _checkout: None })
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_core::{CommandOutput, CommandSpec, ExecError};

    const DECK: &str = "version: \"1\"\ndecks:\n  - name: demo\n    sources: []\n";

    struct NoExec;

    #[async_trait::async_trait]
    impl Exec for NoExec {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
            Err(ExecError::NotFound { program: spec.program.clone() })
        }
    }

    /// Clones a repository holding a single `deck.yml`.
    struct FakeClone;

    #[async_trait::async_trait]
    impl Exec for FakeClone {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
            if spec.args.first().map(String::as_str) == Some("clone") {
                let target = PathBuf::from(spec.args.last().cloned().unwrap_or_default());
                std::fs::write(target.join("deck.yml"), DECK).unwrap();
            }
            Ok(CommandOutput::ok(""))
        }
    }

    #[tokio::test]
    async fn directory_detection_prefers_yaml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("deck.yml"), DECK.replace("demo", "yml")).unwrap();
        std::fs::write(dir.path().join("deck.yaml"), DECK).unwrap();
        let loaded = load_deckfile(&dir.path().display().to_string(), &NoExec, &reqwest::Client::new()).await.unwrap();
        assert_eq!(loaded.deckfile.deck_names(), vec!["demo".to_string()]);
        assert_eq!(loaded.base_dir, dir.path());
    }

    #[tokio::test]
    async fn explicit_file_sets_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("custom.yaml");
        std::fs::write(&f, DECK).unwrap();
        let loaded = load_deckfile(&f.display().to_string(), &NoExec, &reqwest::Client::new()).await.unwrap();
        assert_eq!(loaded.base_dir, dir.path());
    }

    #[tokio::test]
    async fn git_checkout_lives_with_the_deckfile() {
        let loaded = load_deckfile("https://github.com/org/decks.git#main", &FakeClone, &reqwest::Client::new()).await.unwrap();
        let base = loaded.base_dir.clone();
        assert!(base.join("deck.yml").is_file());
        drop(loaded);
        assert!(!base.exists());
    }

    #[tokio::test]
    async fn missing_location_fails() {
        let e = load_deckfile("/definitely/not/here/deck.yaml", &NoExec, &reqwest::Client::new()).await.unwrap_err();
        assert!(matches!(e, SourceError::Acquisition { .. }));
    }

    #[tokio::test]
    async fn bad_version_surfaces_deckfile_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("deck.yaml"), "version: \"9\"\ndecks: []\n").unwrap();
        let e = load_deckfile(&dir.path().display().to_string(), &NoExec, &reqwest::Client::new()).await.unwrap_err();
        assert!(e.to_string().contains("version 9 is not supported"), "{}", e);
    }
}
