//! Deck-level aggregation: fetch and render each source in declared order.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use deck_core::{Deck, DeckConfig, Exec, GeneratedDeck, Source};
use tracing::{debug, info, warn};

use crate::fetch::{fetch, FetchContext};
use crate::protocol::{select_fetch_strategy, FetchStrategy};
use crate::render::{render, RenderContext};
use crate::tooler::ToolRunner;
use crate::SourceError;

pub const DEFAULT_NAMESPACE: &str = "default";

pub struct Pipeline {
    fetch: FetchContext,
    render: RenderContext,
}

impl Pipeline {
    pub fn new(exec: Arc<dyn Exec>, config: &DeckConfig, base_dir: PathBuf) -> Result<Self, SourceError> {
        Ok(Self {
            fetch: FetchContext::new(exec.clone(), config, base_dir)?,
            render: RenderContext { exec, tools: ToolRunner::from_config(config), kube_version: None },
        })
    }

    pub fn from_parts(fetch: FetchContext, render: RenderContext) -> Self {
        Self { fetch, render }
    }

    pub fn with_kube_version(mut self, version: impl Into<String>) -> Self {
        self.render.kube_version = Some(version.into());
        self
    }

    pub fn set_kube_version(&mut self, version: Option<String>) {
        self.render.kube_version = version;
    }

    /// Render every source of `deck`. The first failure aborts the whole deck.
    pub async fn generate(&self, deck: &Deck) -> Result<GeneratedDeck, SourceError> {
        let deck_ns = deck.namespace.trim();
        let deck_ns = if deck_ns.is_empty() { DEFAULT_NAMESPACE } else { deck_ns };
        let mut generated = GeneratedDeck::new(&deck.name, deck_ns);
        let started = Instant::now();

        for (i, source) in deck.sources.iter().enumerate() {
            let Some(strategy) = strategy_for(source) else {
                warn!(deck = %deck.name, index = i, source = %source.describe(), "source location is not supported, skipping");
                continue;
            };
            let namespace = source
                .origin()
                .namespace
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(deck_ns);
            let t = Instant::now();
            // fetched temp data lives until the end of this iteration
            let fetched = fetch(&self.fetch, source, strategy).await?;
            let files = render(&self.render, source, &fetched, namespace).await?;
            drop(fetched);
            info!(deck = %deck.name, source = %source.describe(), manifests = files.len(), "source rendered");
            debug!(source = %source.describe(), elapsed_ms = t.elapsed().as_millis() as u64, "render time");
            generated.files.extend(files);
        }
        debug!(deck = %deck.name, files = generated.files.len(), elapsed_ms = started.elapsed().as_millis() as u64, "deck generated");
        Ok(generated)
    }
}

/// Inline sources never touch the network, whatever their `ref` says.
fn strategy_for(source: &Source) -> Option<FetchStrategy> {
    match source {
        Source::Inline(_) => Some(FetchStrategy::Content),
        other => select_fetch_strategy(other.locator(), other.content().is_some()),
    }
}
