//! Index CLI commands.

use crate::cli::args::IndexUpdateArgs;
use crate::cli::output::Output;
use crate::config::Config;
use crate::error::{Result, SearchError};
use crate::index::{self, IndexQueue, IndexStatus, InvertedIndex, OpKind, PendingOp};
use crate::store::{DocumentKey, PageStore, WikiDir};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Show index status.
pub fn status(config: &Config, wiki: &WikiDir, output: &Output) -> Result<()> {
    let status: IndexStatus = index::status(&config.index_dir(wiki.root()));
    output.print(&status)
}

/// Rebuild the index from every page and attachment.
pub fn rebuild(config: &Config, wiki: &WikiDir, output: &Output) -> Result<()> {
    let index_dir = config.index_dir(wiki.root());
    output.info(&format!("Indexing {}", wiki.root().display()));

    let mut index = InvertedIndex::build(wiki, &config.wiki.language_default, config.search.stemming)?;
    index.save(&index_dir)?;

    output.print(&RebuildResult {
        documents: index.len(),
        terms: index.term_count(),
        index_dir,
    })
}

/// Clear the index.
pub fn clear(config: &Config, wiki: &WikiDir, output: &Output) -> Result<()> {
    let index_dir = config.index_dir(wiki.root());
    index::clear_index(&index_dir)?;

    output.print(&ClearResult {
        cleared: true,
        index_dir,
    })
}

/// Queue one document change and apply it immediately.
pub fn update(config: &Config, wiki: &WikiDir, args: &IndexUpdateArgs, output: &Output) -> Result<()> {
    let index_dir = config.index_dir(wiki.root());
    let current = InvertedIndex::load(&index_dir)?;

    let key = DocumentKey::new(args.page.clone(), args.attachment.clone());
    let kind = if args.delete {
        OpKind::Delete
    } else if wiki.load_document(&key)?.is_none() {
        return Err(SearchError::PageNotFound(key.to_string()));
    } else if current.get(&key).is_some() {
        OpKind::Update
    } else {
        OpKind::Add
    };

    let queue = IndexQueue::persistent(Arc::new(wiki.clone()), current, index_dir.clone());
    queue.enqueue(PendingOp::new(kind, args.page.clone(), args.attachment.clone()))?;
    let applied = queue.flush()?;

    output.print(&UpdateResult {
        operation: kind,
        document: key.to_string(),
        applied,
        documents: queue.snapshot().len(),
        index_dir,
    })
}

#[derive(Debug, Serialize)]
struct RebuildResult {
    documents: usize,
    terms: usize,
    index_dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct ClearResult {
    cleared: bool,
    index_dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct UpdateResult {
    operation: OpKind,
    document: String,
    applied: usize,
    documents: usize,
    index_dir: PathBuf,
}
