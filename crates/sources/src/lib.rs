//! Deck source resolution: turn a Deck's declared sources into an ordered list of
//! namespace-tagged manifests.
//!
//! Each source is fetched (inline content, git clone, http download or local path), rendered
//! by its declared type, and its temporary resources are dropped before the next source is
//! touched. Any fetch or render failure aborts the whole deck.

#![forbid(unsafe_code)]

pub mod deckfile;
pub mod fetch;
pub mod pipeline;
pub mod protocol;
pub mod render;
pub mod tooler;

pub use deckfile::{load_deckfile, LoadedDeckfile};
pub use fetch::{FetchContext, FetchedSource, Resolved};
pub use pipeline::Pipeline;
pub use protocol::{select_fetch_strategy, sniff_protocol, split_revision, FetchStrategy, Protocol};
pub use render::RenderContext;
pub use tooler::ToolRunner;

use deck_core::{DeckfileError, ExecError};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("could not fetch {origin}: {reason}")]
    Acquisition { origin: String, reason: String },
    #[error("could not render {origin}: {reason}")]
    Render { origin: String, reason: String },
    #[error(transparent)]
    Deckfile(#[from] DeckfileError),
    #[error("{0} was interrupted")]
    Interrupted(String),
}

impl SourceError {
    pub(crate) fn acquisition(origin: impl Into<String>, reason: impl ToString) -> Self {
        SourceError::Acquisition { origin: origin.into(), reason: reason.to_string() }
    }

    pub(crate) fn render(origin: impl Into<String>, reason: impl ToString) -> Self {
        SourceError::Render { origin: origin.into(), reason: reason.to_string() }
    }

    /// Interrupts keep their own variant; everything else becomes an acquisition failure.
    pub(crate) fn from_exec_fetch(origin: &str, e: ExecError) -> Self {
        match e {
            ExecError::Interrupted { program } => SourceError::Interrupted(program),
            other => Self::acquisition(origin, other),
        }
    }

    pub(crate) fn from_exec_render(origin: &str, e: ExecError) -> Self {
        match e {
            ExecError::Interrupted { program } => SourceError::Interrupted(program),
            other => Self::render(origin, other),
        }
    }
}
