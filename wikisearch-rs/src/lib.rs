//! wikisearch - structured full-text search over a wiki.
//!
//! # Overview
//!
//! wikisearch answers queries such as `title:Help -domain:underlay` against
//! the pages and attachments of a wiki:
//! - A query language with field modifiers, regexes, negation and grouping
//! - A linear scan that needs no index
//! - A persistent inverted index, kept current by a maintenance queue
//! - Optional stemming and CamelCase-aware tokenization
//!
//! # Example
//!
//! ```no_run
//! use wikisearch::{search, AllowAll, Config, WikiDir};
//!
//! let config = Config::default();
//! let wiki = WikiDir::open("/path/to/wiki").unwrap();
//!
//! let results = search(&config, "title:Help -domain:underlay", &wiki, &AllowAll, None, None).unwrap();
//! for hit in &results.hits {
//!     println!("{} ({:.2})", hit.page_name, hit.weight);
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod index;
pub mod logging;
pub mod search;
pub mod store;

// Re-export main types at crate root
pub use config::Config;
pub use error::{QueryError, Result, SearchError};
pub use index::{IndexQueue, InvertedIndex, OpKind, PendingOp};
pub use search::{
    parse_query, search, search_with, EngineChoice, Evaluator, Hit, Query, SearchOptions,
    SearchResults,
};
pub use store::{AccessControl, AllowAll, DocumentKey, MemoryStore, PageDocument, PageStore, WikiDir};
