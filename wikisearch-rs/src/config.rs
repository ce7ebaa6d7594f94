//! Configuration loaded from `config.toml`.
//!
//! Lookup order: `$WIKISEARCH_CONFIG`, then
//! `<config_dir>/wikisearch/config.toml`. A missing file yields the
//! defaults; every field is optional.

use crate::error::{Result, SearchError};
use crate::store::markup::DEFAULT_CATEGORY_PATTERN;
use crate::store::wiki_dir::DEFAULT_SYSTEM_PAGES;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "WIKISEARCH_CONFIG";

/// Where the wiki lives and how its pages are read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WikiConfig {
    /// Default wiki directory.
    pub root: Option<PathBuf>,
    /// Read-only underlay directory.
    pub underlay: Option<PathBuf>,
    /// Language of pages without a `#language` instruction.
    pub language_default: String,
    /// Regex a link target must match to count as a category.
    pub category_pattern: String,
    /// Extension of page files.
    pub page_extension: String,
    /// Pages searchable as `domain:system`.
    pub system_pages: Vec<String>,
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            root: None,
            underlay: None,
            language_default: "en".to_string(),
            category_pattern: DEFAULT_CATEGORY_PATTERN.to_string(),
            page_extension: "wiki".to_string(),
            system_pages: DEFAULT_SYSTEM_PAGES.iter().map(|name| name.to_string()).collect(),
        }
    }
}

/// Search engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Prefer the inverted index when it is available.
    pub use_index: bool,
    /// Match terms by stem as well as by text.
    pub stemming: bool,
    /// Index location; `<wiki>/.wikisearch/index` when unset.
    pub index_dir: Option<PathBuf>,
    /// How often the background worker checks for queued updates.
    pub worker_interval_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            use_index: true,
            stemming: false,
            index_dir: None,
            worker_interval_ms: 1000,
        }
    }
}

impl SearchConfig {
    /// Background worker interval, at least one millisecond.
    pub fn worker_interval(&self) -> Duration {
        Duration::from_millis(self.worker_interval_ms.max(1))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub wiki: WikiConfig,
    pub search: SearchConfig,
}

impl Config {
    /// Path of the config file that [`Config::load`] reads.
    pub fn config_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join("wikisearch").join("config.toml"))
    }

    /// Load the configuration, falling back to defaults if no file exists.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.is_file() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load the configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SearchError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Resolve the wiki directory: the CLI override wins over the config.
    pub fn resolve_wiki_root(&self, cli_override: Option<&Path>) -> Result<PathBuf> {
        let root = match (cli_override, &self.wiki.root) {
            (Some(path), _) => path.to_path_buf(),
            (None, Some(path)) => expand_home(path),
            (None, None) => {
                return Err(SearchError::ConfigError(
                    "No wiki specified. Use --wiki or set [wiki] root in the config file"
                        .to_string(),
                ));
            }
        };
        if !root.is_dir() {
            return Err(SearchError::WikiNotFound(root));
        }
        Ok(root)
    }

    /// Directory holding the persisted index for the wiki at `wiki_root`.
    pub fn index_dir(&self, wiki_root: &Path) -> PathBuf {
        match &self.search.index_dir {
            Some(dir) => expand_home(dir),
            None => wiki_root.join(".wikisearch").join("index"),
        }
    }
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
