//! A wiki stored as plain files in a directory.
//!
//! Layout:
//! ```text
//! <root>/FrontPage.wiki
//! <root>/HelpOnEditing/SubPages.wiki      page "HelpOnEditing/SubPages"
//! <root>/FrontPage.attachments/logo.png   attachment of FrontPage
//! ```
//! An optional underlay directory with the same layout supplies pages of the
//! `underlay` domain. A page in the main directory hides the underlay page
//! of the same name. Pages named in the system page list are in the `system`
//! domain as well, wherever they are stored.

use crate::config::Config;
use crate::error::{Result, SearchError};
use crate::store::markup::{self, DEFAULT_CATEGORY_PATTERN};
use crate::store::{
    AccessControl, DocumentKey, PageDocument, PageStore, DOMAIN_STANDARD, DOMAIN_UNDERLAY,
};
use glob::glob;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

const ATTACHMENTS_SUFFIX: &str = ".attachments";

/// Pages the wiki itself provides.
pub const DEFAULT_SYSTEM_PAGES: &[&str] = &[
    "FindPage",
    "HelpContents",
    "HelpIndex",
    "RecentChanges",
    "SiteNavigation",
    "SystemInfo",
    "TitleIndex",
    "WordIndex",
];

/// Filesystem-backed [`PageStore`].
#[derive(Debug, Clone)]
pub struct WikiDir {
    root: PathBuf,
    underlay: Option<PathBuf>,
    extension: String,
    default_language: String,
    category_pattern: Regex,
    system_pages: BTreeSet<String>,
}

impl WikiDir {
    /// Open a wiki directory with default settings.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(SearchError::WikiNotFound(root));
        }
        Ok(Self {
            root,
            underlay: None,
            extension: "wiki".to_string(),
            default_language: "en".to_string(),
            category_pattern: Regex::new(DEFAULT_CATEGORY_PATTERN)?,
            system_pages: DEFAULT_SYSTEM_PAGES.iter().map(|name| name.to_string()).collect(),
        })
    }

    /// Open the wiki at `root` using the `[wiki]` settings of `config`.
    pub fn from_config(root: impl Into<PathBuf>, config: &Config) -> Result<Self> {
        let mut wiki = Self::open(root)?
            .with_extension(&config.wiki.page_extension)
            .with_default_language(&config.wiki.language_default)
            .with_category_pattern(&config.wiki.category_pattern)?
            .with_system_pages(config.wiki.system_pages.as_slice());
        if let Some(underlay) = &config.wiki.underlay {
            wiki = wiki.with_underlay(underlay);
        }
        Ok(wiki)
    }

    pub fn with_underlay(mut self, underlay: impl Into<PathBuf>) -> Self {
        let underlay = underlay.into();
        if underlay.is_dir() {
            self.underlay = Some(underlay);
        } else {
            tracing::warn!("Underlay {} is not a directory, ignoring", underlay.display());
        }
        self
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    pub fn with_default_language(mut self, language: &str) -> Self {
        self.default_language = language.to_string();
        self
    }

    pub fn with_category_pattern(mut self, pattern: &str) -> Result<Self> {
        self.category_pattern = Regex::new(pattern)?;
        Ok(self)
    }

    /// Replace the list of system page names.
    pub fn with_system_pages<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.system_pages = names.iter().map(|name| name.as_ref().to_string()).collect();
        self
    }

    pub fn is_system_page(&self, page_name: &str) -> bool {
        self.system_pages.contains(page_name)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn roots(&self) -> Vec<(&Path, &'static str)> {
        let mut roots = vec![(self.root.as_path(), DOMAIN_STANDARD)];
        if let Some(underlay) = &self.underlay {
            roots.push((underlay.as_path(), DOMAIN_UNDERLAY));
        }
        roots
    }

    fn page_file(&self, root: &Path, page_name: &str) -> PathBuf {
        root.join(format!("{}.{}", page_name, self.extension))
    }

    fn attachments_dir(&self, root: &Path, page_name: &str) -> PathBuf {
        root.join(format!("{}{}", page_name, ATTACHMENTS_SUFFIX))
    }

    /// Find the file holding `page_name` and the domain it belongs to.
    fn locate(&self, page_name: &str) -> Option<(PathBuf, &'static str)> {
        if page_name.is_empty() || !is_safe_name(page_name) {
            return None;
        }
        self.roots().into_iter().find_map(|(root, domain)| {
            let path = self.page_file(root, page_name);
            path.is_file().then_some((path, domain))
        })
    }

    /// Names of all pages, sorted.
    pub fn list_pages(&self) -> Result<Vec<String>> {
        let mut pages = BTreeSet::new();

        for (root, _) in self.roots() {
            let pattern = root.join(format!("**/*.{}", self.extension));
            let pattern_str = pattern.to_string_lossy();

            for entry in glob(&pattern_str)? {
                match entry {
                    Ok(path) => {
                        if let Some(name) = self.page_name_for(root, &path) {
                            pages.insert(name);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Glob error while listing pages: {}", e);
                    }
                }
            }
        }

        Ok(pages.into_iter().collect())
    }

    /// Page name for a page file, `None` for hidden files and files inside
    /// attachment directories.
    fn page_name_for(&self, root: &Path, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(root).ok()?;
        let mut parts = Vec::new();
        for component in relative.components() {
            let Component::Normal(part) = component else {
                return None;
            };
            let part = part.to_string_lossy();
            if part.starts_with('.') || part.ends_with(ATTACHMENTS_SUFFIX) {
                return None;
            }
            parts.push(part.into_owned());
        }
        let last = parts.pop()?;
        let stem = last.strip_suffix(&format!(".{}", self.extension))?;
        parts.push(stem.to_string());
        Some(parts.join("/"))
    }

    /// Attachment file names of a page, sorted.
    pub fn list_attachments(&self, page_name: &str) -> Result<Vec<String>> {
        let Some((_, domain)) = self.locate(page_name) else {
            return Ok(Vec::new());
        };
        let root = if domain == DOMAIN_UNDERLAY {
            self.underlay.as_deref().unwrap_or(&self.root)
        } else {
            &self.root
        };
        let dir = self.attachments_dir(root, page_name);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !entry.file_type()?.is_file() {
                continue;
            }
            files.push(name);
        }
        files.sort();
        Ok(files)
    }

    fn read_error(key: &DocumentKey, e: std::io::Error) -> SearchError {
        SearchError::DocumentRead {
            page: key.to_string(),
            message: e.to_string(),
        }
    }

    fn load_page(&self, key: &DocumentKey) -> Result<Option<PageDocument>> {
        let Some((path, domain)) = self.locate(&key.page_name) else {
            return Ok(None);
        };
        let raw = fs::read(&path).map_err(|e| Self::read_error(key, e))?;
        let text = String::from_utf8_lossy(&raw);
        let (pi, body) = markup::split_processing_instructions(&text);

        let links = markup::parse_links(body);
        let categories = markup::categories(&links, &self.category_pattern);

        Ok(Some(PageDocument {
            page_name: key.page_name.clone(),
            attachment: String::new(),
            title: key.page_name.clone(),
            text: body.to_string(),
            mimetype: pi.mimetype(),
            language: pi.language.unwrap_or_else(|| self.default_language.clone()),
            domain: domain.to_string(),
            system: self.is_system_page(&key.page_name),
            links,
            categories,
            mtime: mtime_nanos(&path).map_err(|e| Self::read_error(key, e))?,
        }))
    }

    fn load_attachment(&self, key: &DocumentKey) -> Result<Option<PageDocument>> {
        if !is_safe_name(&key.attachment) || key.attachment.contains('/') {
            return Ok(None);
        }
        let Some(page) = self.load_page(&DocumentKey::page(&key.page_name))? else {
            return Ok(None);
        };
        let root = if page.domain == DOMAIN_UNDERLAY {
            self.underlay.as_deref().unwrap_or(&self.root)
        } else {
            &self.root
        };
        let path = self.attachments_dir(root, &key.page_name).join(&key.attachment);
        if !path.is_file() {
            return Ok(None);
        }

        let mimetype = markup::mimetype_for(&key.attachment);
        let text = if mimetype.starts_with("text/") {
            let raw = fs::read(&path).map_err(|e| Self::read_error(key, e))?;
            String::from_utf8_lossy(&raw).into_owned()
        } else {
            String::new()
        };

        Ok(Some(PageDocument {
            page_name: key.page_name.clone(),
            attachment: key.attachment.clone(),
            title: key.attachment.clone(),
            text,
            mimetype: mimetype.to_string(),
            language: page.language,
            domain: page.domain,
            system: page.system,
            links: Vec::new(),
            categories: Vec::new(),
            mtime: mtime_nanos(&path).map_err(|e| Self::read_error(key, e))?,
        }))
    }

    fn read_acl(&self, page_name: &str) -> Result<Option<String>> {
        let Some((path, _)) = self.locate(page_name) else {
            return Ok(None);
        };
        let raw = fs::read(&path)?;
        let text = String::from_utf8_lossy(&raw);
        let (pi, _) = markup::split_processing_instructions(&text);
        Ok(pi.acl)
    }
}

/// Rejects names that would escape the wiki directory.
fn is_safe_name(name: &str) -> bool {
    Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}

fn mtime_nanos(path: &Path) -> std::io::Result<u64> {
    let modified = fs::metadata(path)?.modified()?;
    let nanos = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    Ok(u64::try_from(nanos).unwrap_or(u64::MAX))
}

impl PageStore for WikiDir {
    fn list_documents(&self) -> Result<Vec<DocumentKey>> {
        let mut keys = Vec::new();
        for page in self.list_pages()? {
            let attachments = self.list_attachments(&page)?;
            keys.push(DocumentKey::page(page.clone()));
            keys.extend(
                attachments
                    .into_iter()
                    .map(|file| DocumentKey::attachment(page.clone(), file)),
            );
        }
        Ok(keys)
    }

    fn load_document(&self, key: &DocumentKey) -> Result<Option<PageDocument>> {
        if key.is_attachment() {
            self.load_attachment(key)
        } else {
            self.load_page(key)
        }
    }
}

impl AccessControl for WikiDir {
    fn may_read(&self, identity: Option<&str>, page_name: &str) -> bool {
        match self.read_acl(page_name) {
            Ok(Some(acl)) => markup::acl_allows_read(&acl, identity),
            Ok(None) => true,
            Err(e) => {
                tracing::warn!("Cannot read ACL of {}: {}", page_name, e);
                false
            }
        }
    }
}
