//! Backend version gate.
//!
//! [`assess`] only queries; [`ensure_provider`] acts on a decision the caller already
//! made (prompting, `--no-input`, ...), so nothing here blocks on user input.

use tracing::{info, warn};

use crate::{Provider, ProviderError, ToolVersion};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assessment {
    /// The backend cannot report a version; the gate is skipped.
    NotSupported,
    Satisfied(ToolVersion),
    BelowMinimum { installed: ToolVersion, required: ToolVersion },
    NotInstalled,
}

impl Assessment {
    /// Whether acting on this assessment could install or update something.
    pub fn needs_decision(&self) -> bool {
        matches!(self, Assessment::BelowMinimum { .. } | Assessment::NotInstalled)
    }
}

/// Pre-resolved answers to "install it?" and "update it?".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallPolicy {
    pub install: bool,
    pub update: bool,
}

impl InstallPolicy {
    pub const fn allow_all() -> Self { Self { install: true, update: true } }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Skipped,
    Satisfied(ToolVersion),
    /// Running below `minVersion` because no update was allowed.
    BelowMinimum(ToolVersion),
    Updated,
    Installed,
}

pub async fn assess(provider: &dyn Provider, min_version: Option<&str>) -> Result<Assessment, ProviderError> {
    let required = match min_version.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Some(s.parse::<ToolVersion>().map_err(|reason| ProviderError::Config {
            provider: provider.tag().to_string(),
            reason: format!("minVersion: {}", reason),
        })?),
        None => None,
    };
    match provider.version().await {
        Ok(installed) => match required {
            Some(required) if installed < required => Ok(Assessment::BelowMinimum { installed, required }),
            _ => Ok(Assessment::Satisfied(installed)),
        },
        Err(e) if e.is_not_supported() => Ok(Assessment::NotSupported),
        Err(e) if e.is_not_installed() => Ok(Assessment::NotInstalled),
        Err(e) => Err(e),
    }
}

pub async fn ensure_provider(
    provider: &dyn Provider,
    assessment: &Assessment,
    policy: InstallPolicy,
) -> Result<GateOutcome, ProviderError> {
    let tag = provider.tag();
    match assessment {
        Assessment::NotSupported => Ok(GateOutcome::Skipped),
        Assessment::Satisfied(v) => Ok(GateOutcome::Satisfied(*v)),
        Assessment::BelowMinimum { installed, required } => {
            warn!(provider = tag, installed = %installed, required = %required, "installed version is below the Deckfile's minVersion");
            if policy.update {
                provider.update().await?;
                info!(provider = tag, "updated");
                Ok(GateOutcome::Updated)
            } else {
                Ok(GateOutcome::BelowMinimum(*installed))
            }
        }
        Assessment::NotInstalled => {
            warn!(provider = tag, "cluster provider is not installed");
            if policy.install {
                provider.install().await?;
                Ok(GateOutcome::Installed)
            } else {
                Err(ProviderError::NotInstalled { provider: tag.to_string() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubectl::KubectlCtx;
    use crate::testing::ScriptedExec;
    use crate::{k3d::K3d, ProviderArgs};
    use deck_core::{CommandOutput, DeckConfig};
    use std::sync::Arc;

    fn k3d(exec: Arc<ScriptedExec>) -> K3d {
        K3d::new(ProviderArgs { name: "x".into(), native_config: None, config: DeckConfig::default(), exec })
    }

    #[tokio::test]
    async fn unsupported_version_skips_the_gate() {
        let p = KubectlCtx::new(None);
        let a = assess(&p, Some("1.0.0")).await.unwrap();
        assert_eq!(a, Assessment::NotSupported);
        assert_eq!(ensure_provider(&p, &a, InstallPolicy::default()).await.unwrap(), GateOutcome::Skipped);
    }

    #[tokio::test]
    async fn below_minimum_updates_only_when_allowed() {
        let exec = Arc::new(ScriptedExec::default().on("k3d --version", CommandOutput::ok("k3d version v4.4.7")));
        let p = k3d(exec.clone());
        let a = assess(&p, Some("4.4.8")).await.unwrap();
        assert!(a.needs_decision());
        assert_eq!(ensure_provider(&p, &a, InstallPolicy::default()).await.unwrap(), GateOutcome::BelowMinimum(ToolVersion::new(4, 4, 7)));
        assert!(!exec.calls().iter().any(|c| c.starts_with("bash")));
        assert_eq!(ensure_provider(&p, &a, InstallPolicy::allow_all()).await.unwrap(), GateOutcome::Updated);
        assert!(exec.calls().iter().any(|c| c.starts_with("bash -c curl")));
    }

    #[tokio::test]
    async fn satisfied_without_minimum() {
        let exec = Arc::new(ScriptedExec::default().on("k3d --version", CommandOutput::ok("k3d version v5.4.6")));
        let a = assess(&k3d(exec), None).await.unwrap();
        assert_eq!(a, Assessment::Satisfied(ToolVersion::new(5, 4, 6)));
        assert!(!a.needs_decision());
    }

    #[tokio::test]
    async fn missing_backend_fails_without_install() {
        let exec = Arc::new(ScriptedExec::default().missing("k3d"));
        let p = k3d(exec);
        let a = assess(&p, None).await.unwrap();
        assert_eq!(a, Assessment::NotInstalled);
        let e = ensure_provider(&p, &a, InstallPolicy::default()).await.unwrap_err();
        assert!(e.is_not_installed());
    }

    #[tokio::test]
    async fn invalid_min_version_is_a_config_error() {
        let exec = Arc::new(ScriptedExec::default());
        let e = assess(&k3d(exec), Some("latest")).await.unwrap_err();
        assert!(matches!(e, ProviderError::Config { .. }));
    }
}
