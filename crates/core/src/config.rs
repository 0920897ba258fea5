//! Runtime configuration, read once from `DECK_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct DeckConfig {
    /// Prepended to every cluster name.
    pub cluster_prefix: String,
    /// Provider kubeconfigs land in `<dir>/<cluster>/kubeconfig.yaml`.
    pub kubeconfig_dir: PathBuf,
    pub object_retry: u32,
    pub object_retry_delay: Duration,
    pub kubeconfig_retry: u32,
    pub kubeconfig_retry_delay: Duration,
    pub ready_poll_interval: Duration,
    pub http_timeout: Duration,
    pub interrupt_grace: Duration,
    pub tooler_image: String,
    /// Render Helm/Kustomize inside the tooler container instead of on the host.
    pub sandbox: bool,
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            cluster_prefix: String::new(),
            kubeconfig_dir: default_kubeconfig_dir(),
            object_retry: 30,
            object_retry_delay: Duration::from_secs(2),
            kubeconfig_retry: 10,
            kubeconfig_retry_delay: Duration::from_secs(1),
            ready_poll_interval: Duration::from_secs(1),
            http_timeout: Duration::from_secs(10),
            interrupt_grace: Duration::from_secs(5),
            tooler_image: format!("quay.io/getdeck/tooler:{}", crate::VERSION),
            sandbox: true,
        }
    }
}

fn default_kubeconfig_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(std::env::temp_dir).join(".deck")
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| {
        let v = v.trim();
        v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
    })
}

impl DeckConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            cluster_prefix: std::env::var("DECK_CLUSTER_PREFIX").unwrap_or(d.cluster_prefix),
            kubeconfig_dir: std::env::var("DECK_KUBECONFIG_DIR").map(PathBuf::from).unwrap_or(d.kubeconfig_dir),
            object_retry: env_parse::<u32>("DECK_OBJECT_RETRY").unwrap_or(d.object_retry).max(1),
            object_retry_delay: env_secs("DECK_OBJECT_RETRY_DELAY_SECS").unwrap_or(d.object_retry_delay),
            kubeconfig_retry: env_parse::<u32>("DECK_KUBECONFIG_RETRY").unwrap_or(d.kubeconfig_retry).max(1),
            kubeconfig_retry_delay: env_secs("DECK_KUBECONFIG_RETRY_DELAY_SECS").unwrap_or(d.kubeconfig_retry_delay),
            ready_poll_interval: env_secs("DECK_READY_POLL_SECS").unwrap_or(d.ready_poll_interval),
            http_timeout: env_secs("DECK_HTTP_TIMEOUT_SECS").unwrap_or(d.http_timeout),
            interrupt_grace: env_secs("DECK_INTERRUPT_GRACE_SECS").unwrap_or(d.interrupt_grace),
            tooler_image: std::env::var("DECK_TOOLER_IMAGE").unwrap_or(d.tooler_image),
            sandbox: env_flag("DECK_SANDBOX").unwrap_or(d.sandbox),
        }
    }

    pub fn kubeconfig_path(&self, cluster: &str) -> PathBuf {
        self.kubeconfig_dir.join(cluster).join("kubeconfig.yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = DeckConfig::default();
        assert_eq!(c.object_retry, 30);
        assert_eq!(c.object_retry_delay, Duration::from_secs(2));
        assert!(c.sandbox);
        assert!(c.tooler_image.starts_with("quay.io/getdeck/tooler:"));
        assert!(c.kubeconfig_path("demo").ends_with(".deck/demo/kubeconfig.yaml"));
    }

    #[test]
    fn env_overrides_are_read() {
        std::env::set_var("DECK_OBJECT_RETRY", "3");
        std::env::set_var("DECK_SANDBOX", "0");
        std::env::set_var("DECK_KUBECONFIG_DIR", "/tmp/deck-cfg-test");
        let c = DeckConfig::from_env();
        std::env::remove_var("DECK_OBJECT_RETRY");
        std::env::remove_var("DECK_SANDBOX");
        std::env::remove_var("DECK_KUBECONFIG_DIR");
        assert_eq!(c.object_retry, 3);
        assert!(!c.sandbox);
        assert_eq!(c.kubeconfig_path("x"), PathBuf::from("/tmp/deck-cfg-test/x/kubeconfig.yaml"));
    }
}
