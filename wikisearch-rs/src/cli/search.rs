//! Search command implementation.

use crate::cli::args::SearchArgs;
use crate::cli::output::Output;
use crate::config::Config;
use crate::error::{Result, SearchError};
use crate::index::InvertedIndex;
use crate::search::{search_with, EngineChoice, Hit, ParseOptions, SearchOptions};
use crate::store::WikiDir;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub total: usize,
    pub offset: usize,
    pub hits: Vec<Hit>,
}

/// Load the index for `choice`, or `None` when the linear scan will be used.
///
/// A missing index is only an error when the index engine was requested.
pub fn load_index(config: &Config, wiki: &WikiDir, choice: EngineChoice) -> Result<Option<Arc<InvertedIndex>>> {
    let wanted = match choice {
        EngineChoice::Linear => false,
        EngineChoice::Index => true,
        EngineChoice::Auto => config.search.use_index,
    };
    if !wanted {
        return Ok(None);
    }

    match InvertedIndex::load(&config.index_dir(wiki.root())) {
        Ok(index) => Ok(Some(Arc::new(index))),
        Err(e @ SearchError::IndexUnavailable(_)) if choice == EngineChoice::Auto => {
            tracing::info!("{}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

pub fn run(config: &Config, wiki: &WikiDir, args: &SearchArgs, output: &Output) -> Result<()> {
    let index = load_index(config, wiki, args.engine)?;
    let options = SearchOptions {
        parse: ParseOptions {
            title_search: args.titles,
        },
        engine: args.engine,
    };

    let results = search_with(
        config,
        &args.query,
        options,
        wiki,
        wiki,
        args.identity.as_deref(),
        index,
    )?;
    let total = results.len();
    let results = results.paginate(args.offset, args.limit);

    output.print(&SearchResponse {
        query: results.query,
        total,
        offset: args.offset,
        hits: results.hits,
    })
}
