use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use deck_api::{Backend, ClusterSession, Orchestrator, RunOptions};
use deck_apply::{ApiFailure, Created, FailureKind, ResourceClient, ResourceTarget, Scope};
use deck_core::{ClusterSpec, DeckConfig, Json, KubeconfigHandle, SystemExec, TimeoutError};
use deck_kubehub::{IngressRule, PodReadiness};
use deck_provider::{InstallPolicy, Provider, ProviderError, ToolVersion};

/// Shared record of everything the fakes were asked to do.
#[derive(Default)]
struct World {
    exists: Mutex<bool>,
    calls: Mutex<Vec<String>>,
    objects: Mutex<HashMap<String, Json>>,
    reject_creates: bool,
    ready_after: Mutex<Option<u32>>,
    /// pod listings never answer
    stalled: bool,
}

impl World {
    fn log(&self, s: impl Into<String>) {
        self.calls.lock().unwrap().push(s.into());
    }
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

struct FakeProvider {
    tag: &'static str,
    world: Arc<World>,
}

#[async_trait::async_trait]
impl Provider for FakeProvider {
    fn tag(&self) -> &'static str {
        self.tag
    }
    fn cluster_name(&self) -> &str {
        "demo"
    }
    async fn exists(&self) -> Result<bool, ProviderError> {
        self.world.log("exists");
        Ok(*self.world.exists.lock().unwrap())
    }
    async fn create(&self) -> Result<(), ProviderError> {
        self.world.log("create");
        *self.world.exists.lock().unwrap() = true;
        Ok(())
    }
    async fn start(&self) -> Result<(), ProviderError> {
        self.world.log("start");
        Ok(())
    }
    async fn stop(&self) -> Result<(), ProviderError> {
        self.world.log("stop");
        Ok(())
    }
    async fn delete(&self) -> Result<(), ProviderError> {
        self.world.log("delete");
        *self.world.exists.lock().unwrap() = false;
        Ok(())
    }
    async fn get_kubeconfig(&self) -> Result<KubeconfigHandle, ProviderError> {
        Ok(KubeconfigHandle::CurrentContext { context: None })
    }
    async fn version(&self) -> Result<ToolVersion, ProviderError> {
        Err(ProviderError::NotSupported { provider: self.tag.into(), operation: "version" })
    }
    async fn install(&self) -> Result<(), ProviderError> {
        Ok(())
    }
    fn ports(&self) -> Vec<String> {
        vec!["8080:80".into()]
    }
}

struct FakeSession {
    world: Arc<World>,
}

fn key(target: &ResourceTarget, scope: &Scope) -> String {
    format!("{}/{}/{}", target.kind, scope.namespace().unwrap_or(""), target.name)
}

#[async_trait::async_trait]
impl ResourceClient for FakeSession {
    async fn create(&self, target: &ResourceTarget, body: &Json, scope: &Scope) -> Result<Created, ApiFailure> {
        if self.world.reject_creates {
            return Err(ApiFailure::new(FailureKind::Other, "forbidden"));
        }
        let mut objects = self.world.objects.lock().unwrap();
        let k = key(target, scope);
        if objects.contains_key(&k) {
            return Err(ApiFailure::new(FailureKind::Conflict, "exists"));
        }
        objects.insert(k, body.clone());
        Ok(Created::default())
    }
    async fn patch(&self, target: &ResourceTarget, body: &Json, scope: &Scope) -> Result<(), ApiFailure> {
        self.world.objects.lock().unwrap().insert(key(target, scope), body.clone());
        Ok(())
    }
    async fn delete(&self, target: &ResourceTarget, scope: &Scope) -> Result<(), ApiFailure> {
        match self.world.objects.lock().unwrap().remove(&key(target, scope)) {
            Some(_) => Ok(()),
            None => Err(ApiFailure::new(FailureKind::NotFound, "gone")),
        }
    }
    async fn create_namespace(&self, _name: &str) -> Result<(), ApiFailure> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl ClusterSession for FakeSession {
    async fn server_version(&self) -> Result<String> {
        Ok("1.27".into())
    }
    async fn ingress_rules(&self, _namespace: &str) -> Result<Vec<IngressRule>> {
        Ok(vec![IngressRule { host: "shop.127.0.0.1.nip.io".into(), path: "/".into() }])
    }
    async fn pods_ready(&self, _namespace: &str) -> Result<PodReadiness> {
        if self.world.stalled {
            std::future::pending::<()>().await;
        }
        let mut left = self.world.ready_after.lock().unwrap();
        match left.as_mut() {
            Some(0) => Ok(PodReadiness { total: 1, ready: 1 }),
            Some(n) => {
                *n -= 1;
                Ok(PodReadiness { total: 1, ready: 0 })
            }
            None => Ok(PodReadiness::default()),
        }
    }
}

struct FakeBackend {
    world: Arc<World>,
}

#[async_trait::async_trait]
impl Backend for FakeBackend {
    fn provider(&self, spec: Option<&ClusterSpec>) -> Result<Box<dyn Provider>> {
        let tag = if spec.is_some() { "k3d" } else { "kubectlctx" };
        Ok(Box::new(FakeProvider { tag, world: self.world.clone() }))
    }
    async fn connect(&self, _handle: &KubeconfigHandle) -> Result<Arc<dyn ClusterSession>> {
        Ok(Arc::new(FakeSession { world: self.world.clone() }))
    }
    fn current_context(&self) -> Result<String> {
        Ok("kind-dev".into())
    }
}

const DECKFILE: &str = r#"
version: "1"
cluster:
  provider: k3d
  name: demo
decks:
  - name: shop
    namespace: shop
    notes: "Open the shop in your browser"
    hosts:
      - shop.127.0.0.1.nip.io
    sources:
      - type: inline
        content:
          apiVersion: v1
          kind: ConfigMap
          metadata:
            name: settings
          data:
            mode: demo
"#;

const CLUSTERLESS: &str = r#"
version: "1"
decks:
  - name: tools
    sources:
      - type: inline
        content:
          apiVersion: v1
          kind: ConfigMap
          metadata:
            name: tooling
"#;

fn write_deck(text: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("deck.yaml"), text).unwrap();
    dir
}

fn deck_dir() -> tempfile::TempDir {
    write_deck(DECKFILE)
}

fn orchestrator(world: Arc<World>) -> Orchestrator<FakeBackend> {
    let config = DeckConfig { ready_poll_interval: Duration::from_millis(1), object_retry: 1, ..DeckConfig::default() };
    Orchestrator::new(FakeBackend { world }, config, Arc::new(SystemExec::default())).unwrap()
}

fn location(dir: &Path) -> String {
    dir.display().to_string()
}

#[tokio::test]
async fn list_names_every_deck() {
    let dir = deck_dir();
    let o = orchestrator(Arc::default());
    assert_eq!(o.list_decks(&location(dir.path())).await.unwrap(), vec!["shop".to_string()]);
}

#[tokio::test]
async fn attached_get_applies_inline_manifest() {
    let dir = deck_dir();
    let world = Arc::new(World { exists: Mutex::new(true), ..Default::default() });
    let o = orchestrator(world.clone());
    let prepared = o.prepare(&location(dir.path()), true).await.unwrap();
    assert!(prepared.attached());
    let report = o.run_deck(&prepared, &RunOptions::default()).await.unwrap();
    assert_eq!(report.deck, "shop");
    assert_eq!(report.namespace, "shop");
    assert_eq!(report.summary.created, 1);
    assert!(!report.cluster_created);
    assert_eq!(report.ingress.len(), 1);
    assert_eq!(report.hosts, vec!["shop.127.0.0.1.nip.io".to_string()]);
    assert!(world.objects.lock().unwrap().contains_key("ConfigMap/shop/settings"));
}

#[tokio::test]
async fn failed_apply_removes_a_fresh_cluster() {
    let dir = deck_dir();
    let world = Arc::new(World { reject_creates: true, ..Default::default() });
    let o = orchestrator(world.clone());
    let prepared = o.prepare(&location(dir.path()), false).await.unwrap();
    assert!(!prepared.attached());
    let opts = RunOptions { policy: InstallPolicy::allow_all(), ..Default::default() };
    o.run_deck(&prepared, &opts).await.unwrap_err();
    assert_eq!(world.calls(), vec!["exists", "create", "delete"]);
}

#[tokio::test]
async fn failed_apply_keeps_an_existing_cluster() {
    let dir = deck_dir();
    let world = Arc::new(World { exists: Mutex::new(true), reject_creates: true, ..Default::default() });
    let o = orchestrator(world.clone());
    let prepared = o.prepare(&location(dir.path()), false).await.unwrap();
    o.run_deck(&prepared, &RunOptions::default()).await.unwrap_err();
    assert_eq!(world.calls(), vec!["exists", "start"]);
}

#[tokio::test]
async fn removing_a_missing_cluster_only_checks_existence() {
    let dir = deck_dir();
    let world = Arc::new(World::default());
    let o = orchestrator(world.clone());
    assert!(!o.remove_cluster(&location(dir.path()), false).await.unwrap());
    assert_eq!(world.calls(), vec!["exists"]);
}

#[tokio::test]
async fn remove_deck_deletes_what_get_applied() {
    let dir = deck_dir();
    let world = Arc::new(World { exists: Mutex::new(true), ..Default::default() });
    let o = orchestrator(world.clone());
    let prepared = o.prepare(&location(dir.path()), false).await.unwrap();
    o.run_deck(&prepared, &RunOptions::default()).await.unwrap();
    assert_eq!(o.remove_deck(&location(dir.path()), Some("shop"), false).await.unwrap(), 1);
    assert!(world.objects.lock().unwrap().is_empty());
}

#[tokio::test]
async fn wait_succeeds_once_pods_are_ready() {
    let dir = deck_dir();
    let world = Arc::new(World { exists: Mutex::new(true), ready_after: Mutex::new(Some(3)), ..Default::default() });
    let o = orchestrator(world);
    let prepared = o.prepare(&location(dir.path()), true).await.unwrap();
    let opts = RunOptions { wait: Some(Duration::from_secs(5)), ..Default::default() };
    o.run_deck(&prepared, &opts).await.unwrap();
}

#[tokio::test]
async fn empty_namespace_times_out() {
    let world = Arc::new(World::default());
    let o = orchestrator(world.clone());
    let session = FakeSession { world };
    let e = o.wait_ready(&session, "shop", Duration::from_millis(20)).await.unwrap_err();
    assert!(e.downcast_ref::<TimeoutError>().is_some());
}

#[tokio::test]
async fn hosts_come_from_the_deck() {
    let dir = deck_dir();
    let o = orchestrator(Arc::default());
    let hosts = o.hosts(&location(dir.path()), None).await.unwrap();
    assert_eq!(hosts, vec!["shop.127.0.0.1.nip.io".to_string()]);
}

#[tokio::test]
async fn deckfile_without_cluster_attaches_to_current_context() {
    let dir = write_deck(CLUSTERLESS);
    let world = Arc::new(World { exists: Mutex::new(true), ..Default::default() });
    let o = orchestrator(world.clone());
    assert_eq!(o.list_decks(&location(dir.path())).await.unwrap(), vec!["tools".to_string()]);
    let prepared = o.prepare(&location(dir.path()), false).await.unwrap();
    assert!(prepared.attached());
    let report = o.run_deck(&prepared, &RunOptions::default()).await.unwrap();
    assert_eq!(report.summary.created, 1);
    let objects = world.objects.lock().unwrap();
    assert_eq!(objects.len(), 1);
    assert!(objects.contains_key("ConfigMap/default/tooling"));
}

#[tokio::test]
async fn readiness_timeout_keeps_a_fresh_cluster() {
    let dir = deck_dir();
    let world = Arc::new(World::default());
    let o = orchestrator(world.clone());
    let prepared = o.prepare(&location(dir.path()), false).await.unwrap();
    let opts = RunOptions { policy: InstallPolicy::allow_all(), wait: Some(Duration::from_millis(20)), ..Default::default() };
    let e = o.run_deck(&prepared, &opts).await.unwrap_err();
    assert!(e.downcast_ref::<TimeoutError>().is_some(), "{e:#}");
    assert_eq!(world.calls(), vec!["exists", "create"]);
    assert_eq!(world.objects.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn stalled_pod_listing_is_cut_at_the_budget() {
    let world = Arc::new(World { stalled: true, ..Default::default() });
    let o = orchestrator(world.clone());
    let session = FakeSession { world };
    let waited = tokio::time::timeout(Duration::from_secs(5), o.wait_ready(&session, "shop", Duration::from_millis(30))).await;
    let e = waited.expect("wait_ready must honour its budget").unwrap_err();
    assert!(e.downcast_ref::<TimeoutError>().is_some());
}
