//! Query parsing and evaluation.
//!
//! A query string is parsed into a [`Query`] tree, evaluated by one of two
//! backends behind the [`Evaluator`] trait, and the per-field match records
//! are folded into ranked [`Hit`]s.

pub mod aggregate;
pub mod analyzer;
pub mod engine;
pub mod indexed;
pub mod matcher;
pub mod parser;
pub mod types;

pub use aggregate::aggregate;
pub use analyzer::{Analyzer, Token};
pub use engine::{search, search_with, select_evaluator, EngineChoice, Evaluator, SearchOptions};
pub use indexed::IndexedSearch;
pub use matcher::LinearScan;
pub use parser::{parse_query, parse_query_with, ParseOptions};
pub use types::*;
