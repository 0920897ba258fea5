use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use deck_api::{DeckReport, KubeBackend, Orchestrator, Prepared, RunOptions};
use deck_core::{DeckConfig, ExecError, SystemExec};
use deck_provider::{Assessment, InstallPolicy};
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "deck", version, about = "Run Decks of Kubernetes workloads on local or remote clusters")]
struct Cli {
    /// Log at debug level (overrides DECK_LOG)
    #[arg(long = "debug", global = true, action = ArgAction::SetTrue)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the Decks of a Deckfile
    List {
        #[arg(default_value = ".")]
        deckfile: String,
    },
    /// Set up the cluster and install a Deck
    Get {
        #[arg(default_value = ".")]
        deckfile: String,
        /// Deck to install (default: "default", else the first one)
        #[arg(long = "name")]
        name: Option<String>,
        /// Use the current kubeconfig context instead of the Deckfile's cluster
        #[arg(short = 'I', long = "ignore-cluster", action = ArgAction::SetTrue)]
        ignore_cluster: bool,
        /// Wait for all Pods of the Deck to become ready
        #[arg(long = "wait", action = ArgAction::SetTrue)]
        wait: bool,
        /// Seconds to wait with --wait
        #[arg(long = "timeout", default_value_t = 120)]
        timeout: u64,
        /// Never prompt; install and update cluster tools when needed
        #[arg(long = "no-input", action = ArgAction::SetTrue)]
        no_input: bool,
    },
    /// Remove a Deck, or the whole cluster with --cluster
    Remove {
        #[arg(default_value = ".")]
        deckfile: String,
        #[arg(long = "name")]
        name: Option<String>,
        /// Delete the cluster instead of the Deck's objects
        #[arg(long = "cluster", action = ArgAction::SetTrue)]
        cluster: bool,
        #[arg(short = 'I', long = "ignore-cluster", action = ArgAction::SetTrue)]
        ignore_cluster: bool,
        #[arg(long = "no-input", action = ArgAction::SetTrue)]
        no_input: bool,
    },
    /// Stop the Deckfile's cluster
    Stop {
        #[arg(default_value = ".")]
        deckfile: String,
        #[arg(short = 'I', long = "ignore-cluster", action = ArgAction::SetTrue)]
        ignore_cluster: bool,
    },
    /// Inspect the hostnames of a Deck
    Hosts {
        #[command(subcommand)]
        command: HostsCommand,
    },
    /// Print the version
    Version,
}

#[derive(Subcommand, Debug)]
enum HostsCommand {
    /// List the Deck's hostnames and whether they resolve to 127.0.0.1
    List {
        #[arg(default_value = ".")]
        deckfile: String,
        #[arg(long = "name")]
        name: Option<String>,
    },
}

fn init_tracing(debug: bool) {
    let env = if debug { "debug".to_string() } else { std::env::var("DECK_LOG").unwrap_or_else(|_| "info".to_string()) };
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("DECK_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid DECK_METRICS_ADDR; expected host:port");
        }
    }
}

async fn confirm(prompt: String, default: bool) -> Result<bool> {
    tokio::task::spawn_blocking(move || dialoguer::Confirm::new().with_prompt(prompt).default(default).interact())
        .await
        .context("prompt task failed")?
        .context("cannot read the answer")
}

/// Turn the provider assessment into install/update answers, asking only when needed.
async fn resolve_policy(prepared: &Prepared, no_input: bool) -> Result<InstallPolicy> {
    if no_input {
        return Ok(InstallPolicy::allow_all());
    }
    let tag = prepared.provider.tag();
    let policy = match &prepared.assessment {
        Assessment::NotInstalled => {
            InstallPolicy { install: confirm(format!("Cluster provider {} is not installed. Install it now?", tag), true).await?, update: false }
        }
        Assessment::BelowMinimum { installed, required } => InstallPolicy {
            install: false,
            update: confirm(format!("{} {} is older than the required {}. Update it now?", tag, installed, required), true).await?,
        },
        _ => InstallPolicy::default(),
    };
    Ok(policy)
}

fn resolves_locally(addrs: &[IpAddr]) -> bool {
    addrs.iter().any(|a| *a == IpAddr::V4(Ipv4Addr::LOCALHOST))
}

async fn lookup(host: &str) -> Vec<IpAddr> {
    match tokio::net::lookup_host((host, 0)).await {
        Ok(it) => it.map(|s| s.ip()).collect(),
        Err(_) => Vec::new(),
    }
}

async fn check_hosts(hosts: &[String]) -> Vec<(String, bool)> {
    let mut out = Vec::with_capacity(hosts.len());
    for h in hosts {
        out.push((h.clone(), resolves_locally(&lookup(h).await)));
    }
    out
}

async fn print_report(report: &DeckReport) {
    println!("Deck '{}' is ready in namespace '{}'", report.deck, report.namespace);
    for rule in &report.ingress {
        println!("  {} -> {}", rule.host, rule.path);
    }
    if !report.ports.is_empty() {
        println!("Published ports: {}", report.ports.join(", "));
    }
    if !report.notes.trim().is_empty() {
        println!("{}", report.notes.trim());
    }
    let unresolved: Vec<_> = check_hosts(&report.hosts).await.into_iter().filter(|(_, ok)| !ok).map(|(h, _)| h).collect();
    if !unresolved.is_empty() {
        println!("Hint: these hosts do not resolve to 127.0.0.1; add them to your hosts file:");
        for h in unresolved {
            println!("  127.0.0.1 {}", h);
        }
    }
}

/// Race `work` against `interrupt`. After an interrupt, `work` keeps running for up to
/// `grace` so a running subprocess is stopped and reaped before the error comes back.
async fn interruptible<T>(work: impl Future<Output = Result<T>>, interrupt: impl Future<Output = ()>, grace: Duration) -> Result<T> {
    tokio::pin!(work);
    tokio::pin!(interrupt);
    tokio::select! {
        res = &mut work => res,
        _ = &mut interrupt => {
            warn!(grace = ?grace, "interrupt received; waiting for running commands to stop");
            match tokio::time::timeout(grace, &mut work).await {
                Ok(res) => res,
                Err(_) => Err(ExecError::Interrupted { program: "deck".into() }.into()),
            }
        }
    }
}

async fn get(o: &Orchestrator<KubeBackend>, deckfile: &str, name: Option<String>, ignore_cluster: bool, wait: Option<Duration>, no_input: bool) -> Result<()> {
    let prepared = o.prepare(deckfile, ignore_cluster).await?;
    if prepared.attached() && !no_input {
        let ctx = o.current_context()?;
        if !confirm(format!("Install the Deck into the current context '{}'?", ctx), false).await? {
            info!("aborted");
            return Ok(());
        }
    }
    let policy = resolve_policy(&prepared, no_input).await?;
    let opts = RunOptions { deck_name: name, policy, wait };
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    match interruptible(o.run_deck(&prepared, &opts), ctrl_c, o.config().interrupt_grace).await {
        Ok(report) => {
            print_report(&report).await;
            Ok(())
        }
        Err(e) if deck_api::is_interrupt(&e) => {
            warn!(cluster = %prepared.provider.cluster_name(), "interrupted; the cluster is left in place");
            Err(e)
        }
        Err(e) => Err(e),
    }
}

async fn remove(o: &Orchestrator<KubeBackend>, deckfile: &str, name: Option<String>, cluster: bool, ignore_cluster: bool, no_input: bool) -> Result<()> {
    if cluster {
        if !no_input && !confirm("Remove the whole cluster?".to_string(), false).await? {
            info!("aborted");
            return Ok(());
        }
        o.remove_cluster(deckfile, ignore_cluster).await?;
    } else {
        let deleted = o.remove_deck(deckfile, name.as_deref(), ignore_cluster).await?;
        println!("{} object(s) removed", deleted);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    init_metrics();

    let config = DeckConfig::from_env();
    let exec = Arc::new(SystemExec::new(config.interrupt_grace));
    let backend = KubeBackend::new(config.clone(), exec.clone());
    let o = Orchestrator::new(backend, config, exec)?;

    match cli.command {
        Commands::List { deckfile } => {
            for name in o.list_decks(&deckfile).await? {
                println!("{}", name);
            }
        }
        Commands::Get { deckfile, name, ignore_cluster, wait, timeout, no_input } => {
            let wait = wait.then(|| Duration::from_secs(timeout));
            if let Err(e) = get(&o, &deckfile, name, ignore_cluster, wait, no_input).await {
                if deck_api::is_interrupt(&e) {
                    eprintln!("Error: {:#}", e);
                    std::process::exit(130);
                }
                return Err(e);
            }
        }
        Commands::Remove { deckfile, name, cluster, ignore_cluster, no_input } => {
            remove(&o, &deckfile, name, cluster, ignore_cluster, no_input).await?;
        }
        Commands::Stop { deckfile, ignore_cluster } => o.stop_cluster(&deckfile, ignore_cluster).await?,
        Commands::Hosts { command: HostsCommand::List { deckfile, name } } => {
            for (host, ok) in check_hosts(&o.hosts(&deckfile, name.as_deref()).await?).await {
                let state = if ok { "ok" } else { "does not resolve to 127.0.0.1" };
                println!("{:<40} {}", host, state);
            }
        }
        Commands::Version => println!("deck {}", deck_api::version()),
    }
    Ok(())
}
