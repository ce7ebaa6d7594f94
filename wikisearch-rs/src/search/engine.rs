//! Engine selection and the search entry point.

use crate::config::Config;
use crate::error::{Result, SearchError};
use crate::index::InvertedIndex;
use crate::search::analyzer::Analyzer;
use crate::search::indexed::IndexedSearch;
use crate::search::matcher::LinearScan;
use crate::search::parser::{parse_query_with, ParseOptions};
use crate::search::types::{Query, SearchResults};
use crate::store::{AccessControl, PageStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A search backend.
pub trait Evaluator {
    /// Short name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Evaluate a parsed query into ranked hits.
    fn evaluate(&self, query: &Query) -> Result<SearchResults>;
}

/// Which backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineChoice {
    /// The index when enabled and present, else a linear scan.
    #[default]
    Auto,
    Linear,
    Index,
}

impl FromStr for EngineChoice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(EngineChoice::Auto),
            "linear" => Ok(EngineChoice::Linear),
            "index" => Ok(EngineChoice::Index),
            other => Err(format!(
                "unknown engine '{}' (expected auto, linear or index)",
                other
            )),
        }
    }
}

impl fmt::Display for EngineChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineChoice::Auto => "auto",
            EngineChoice::Linear => "linear",
            EngineChoice::Index => "index",
        };
        f.write_str(name)
    }
}

/// Pick the backend for one search.
///
/// `Auto` falls back to a linear scan when the index is disabled or missing.
/// Asking for `Index` without one is an error.
pub fn select_evaluator<'a>(
    config: &Config,
    choice: EngineChoice,
    store: &'a dyn PageStore,
    index: Option<Arc<InvertedIndex>>,
) -> Result<Box<dyn Evaluator + 'a>> {
    let linear = || -> Box<dyn Evaluator + 'a> {
        Box::new(LinearScan::new(
            store,
            Analyzer::new(&config.wiki.language_default, config.search.stemming),
        ))
    };

    match (choice, index) {
        (EngineChoice::Linear, _) => Ok(linear()),
        (EngineChoice::Index, Some(index)) => Ok(Box::new(IndexedSearch::new(index))),
        (EngineChoice::Index, None) => Err(SearchError::IndexUnavailable(
            "no search index loaded".to_string(),
        )),
        (EngineChoice::Auto, Some(index)) if config.search.use_index => {
            Ok(Box::new(IndexedSearch::new(index)))
        }
        (EngineChoice::Auto, index) => {
            if config.search.use_index && index.is_none() {
                tracing::info!("Search index unavailable, falling back to linear scan");
            }
            Ok(linear())
        }
    }
}

/// Options for [`search_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub parse: ParseOptions,
    pub engine: EngineChoice,
}

/// Parse and run `query`, keeping only hits `identity` may read.
pub fn search(
    config: &Config,
    query: &str,
    store: &dyn PageStore,
    acl: &dyn AccessControl,
    identity: Option<&str>,
    index: Option<Arc<InvertedIndex>>,
) -> Result<SearchResults> {
    search_with(config, query, SearchOptions::default(), store, acl, identity, index)
}

/// [`search`] with explicit parser and engine options.
pub fn search_with(
    config: &Config,
    query: &str,
    options: SearchOptions,
    store: &dyn PageStore,
    acl: &dyn AccessControl,
    identity: Option<&str>,
    index: Option<Arc<InvertedIndex>>,
) -> Result<SearchResults> {
    let parsed = parse_query_with(query, options.parse)?;
    let evaluator = select_evaluator(config, options.engine, store, index)?;
    tracing::debug!("Evaluating {} with the {} engine", parsed, evaluator.name());

    let mut results = evaluator.evaluate(&parsed)?;
    let before = results.len();
    results
        .hits
        .retain(|hit| acl.may_read(identity, &hit.page_name));
    if results.len() < before {
        tracing::debug!("Access control hid {} hits", before - results.len());
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::store::{AllowAll, MemoryStore, PageDocument};
    use pretty_assertions::assert_eq;

    struct HideSecrets;

    impl AccessControl for HideSecrets {
        fn may_read(&self, identity: Option<&str>, page_name: &str) -> bool {
            !page_name.starts_with("Secret") || identity == Some("admin")
        }
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.put(PageDocument::page("FrontPage", "shared words"));
        store.put(PageDocument::page("SecretPlans", "shared plans"));
        store.put(PageDocument::page("SharedNotes", "notes"));
        store
    }

    fn index_of(store: &MemoryStore) -> Arc<InvertedIndex> {
        Arc::new(InvertedIndex::build(store, "en", false).unwrap())
    }

    #[test]
    fn test_auto_prefers_index() {
        let store = store();
        let config = Config::default();
        let evaluator =
            select_evaluator(&config, EngineChoice::Auto, &store, Some(index_of(&store))).unwrap();
        assert_eq!(evaluator.name(), "index");
    }

    #[test]
    fn test_auto_falls_back_without_index() {
        let store = store();
        let config = Config::default();
        let evaluator = select_evaluator(&config, EngineChoice::Auto, &store, None).unwrap();
        assert_eq!(evaluator.name(), "linear");
    }

    #[test]
    fn test_auto_respects_disabled_index() {
        let store = store();
        let mut config = Config::default();
        config.search.use_index = false;
        let evaluator =
            select_evaluator(&config, EngineChoice::Auto, &store, Some(index_of(&store))).unwrap();
        assert_eq!(evaluator.name(), "linear");
    }

    #[test]
    fn test_index_required() {
        let store = store();
        let result = select_evaluator(&Config::default(), EngineChoice::Index, &store, None);
        assert!(matches!(result, Err(SearchError::IndexUnavailable(_))));
    }

    #[test]
    fn test_search_filters_by_acl() {
        let store = store();
        let config = Config::default();

        let anonymous = search(&config, "shared", &store, &HideSecrets, None, None).unwrap();
        assert_eq!(
            anonymous.keys(),
            vec![
                ("FrontPage".to_string(), String::new()),
                ("SharedNotes".to_string(), String::new()),
            ]
        );

        let admin = search(&config, "shared", &store, &HideSecrets, Some("admin"), None).unwrap();
        assert_eq!(admin.len(), 3);
    }

    #[test]
    fn test_search_engines_agree() {
        let store = store();
        let config = Config::default();
        let index = index_of(&store);
        let by_engine = |engine| {
            let options = SearchOptions {
                engine,
                ..SearchOptions::default()
            };
            let mut keys = search_with(&config, "shared -plans", options, &store, &AllowAll, None, Some(index.clone()))
                .unwrap()
                .keys();
            // ranking differs between engines, the matched set does not
            keys.sort();
            keys
        };
        let linear = by_engine(EngineChoice::Linear);
        assert_eq!(linear.len(), 2);
        assert_eq!(linear, by_engine(EngineChoice::Index));
    }

    #[test]
    fn test_title_search_option() {
        let store = store();
        let options = SearchOptions {
            parse: ParseOptions { title_search: true },
            engine: EngineChoice::Linear,
        };
        let results =
            search_with(&Config::default(), "notes", options, &store, &AllowAll, None, None).unwrap();
        assert_eq!(results.keys(), vec![("SharedNotes".to_string(), String::new())]);
    }

    #[test]
    fn test_query_errors_surface() {
        let store = store();
        let result = search(&Config::default(), "(a or b", &store, &AllowAll, None, None);
        assert!(matches!(
            result,
            Err(SearchError::Query(QueryError::UnmatchedOpen { .. }))
        ));
    }

    #[test]
    fn test_engine_choice_from_str() {
        assert_eq!("Index".parse::<EngineChoice>().unwrap(), EngineChoice::Index);
        assert_eq!(EngineChoice::Linear.to_string(), "linear");
        assert!("fast".parse::<EngineChoice>().is_err());
    }
}
