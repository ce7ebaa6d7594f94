//! Error types and exit codes for wikisearch.

use thiserror::Error;

/// Process exit codes used by the CLI.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const PAGE_NOT_FOUND: i32 = 2;
    pub const QUERY_ERROR: i32 = 3;
    pub const INDEX_UNAVAILABLE: i32 = 4;
}

/// A malformed query string.
///
/// Every variant names the offending construct so callers can tell an
/// unmatched bracket from an empty term without parsing the message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Empty search query")]
    EmptyQuery,

    #[error("Search term '{modifiers}' has modifiers but no text")]
    EmptyTerm { modifiers: String },

    #[error("Empty quoted string at position {position}")]
    EmptyQuote { position: usize },

    #[error("Unmatched '(' at position {position}")]
    UnmatchedOpen { position: usize },

    #[error("Unmatched ')' at position {position}")]
    UnmatchedClose { position: usize },

    #[error("Empty group '()' at position {position}")]
    EmptyGroup { position: usize },

    #[error("Modifier '{modifier}' used twice in one term")]
    DuplicateModifier { modifier: String },

    #[error("Term cannot be scoped to both '{first}' and '{second}'")]
    ConflictingField { first: String, second: String },

    #[error("Invalid regular expression '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },
}

/// Main error type for wikisearch operations.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Search index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Failed to read {page}: {message}")]
    DocumentRead { page: String, message: String },

    #[error("Page not found: {0}")]
    PageNotFound(String),

    #[error("Wiki not found at: {0}")]
    WikiNotFound(std::path::PathBuf),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Index error: {0}")]
    IndexError(String),

    #[error("{deferred} index operations kept for retry: {message}")]
    FlushIncomplete { deferred: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("Glob pattern error: {0}")]
    GlobPattern(#[from] glob::PatternError),
}

impl SearchError {
    /// Returns the appropriate exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            SearchError::PageNotFound(_) => exit_code::PAGE_NOT_FOUND,
            SearchError::Query(_) => exit_code::QUERY_ERROR,
            SearchError::IndexUnavailable(_) => exit_code::INDEX_UNAVAILABLE,
            _ => exit_code::GENERAL_ERROR,
        }
    }
}

/// Result type alias for wikisearch operations.
pub type Result<T> = std::result::Result<T, SearchError>;
