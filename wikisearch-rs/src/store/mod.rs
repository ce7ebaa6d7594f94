//! Page storage as seen by the search engines.
//!
//! The engines never touch files directly: they enumerate and load documents
//! through [`PageStore`] and ask an [`AccessControl`] whether a hit may be
//! shown.

pub mod markup;
pub mod wiki_dir;

use crate::error::Result;
use crate::search::types::FieldScope;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use wiki_dir::WikiDir;

/// Domain of pages stored in the primary data directory.
pub const DOMAIN_STANDARD: &str = "standard";
/// Domain of pages shipped in the read-only underlay.
pub const DOMAIN_UNDERLAY: &str = "underlay";
/// Extra domain of the wiki's own system pages, on top of where they live.
pub const DOMAIN_SYSTEM: &str = "system";
/// Mimetype of wiki markup pages.
pub const WIKI_MIMETYPE: &str = "text/wiki";

/// Identifies one searchable document: a page or one of its attachments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    pub page_name: String,
    /// Attachment file name, empty for the page itself.
    pub attachment: String,
}

impl DocumentKey {
    pub fn page(page_name: impl Into<String>) -> Self {
        Self {
            page_name: page_name.into(),
            attachment: String::new(),
        }
    }

    pub fn attachment(page_name: impl Into<String>, attachment: impl Into<String>) -> Self {
        Self {
            page_name: page_name.into(),
            attachment: attachment.into(),
        }
    }

    pub fn new(page_name: impl Into<String>, attachment: Option<String>) -> Self {
        Self {
            page_name: page_name.into(),
            attachment: attachment.unwrap_or_default(),
        }
    }

    pub fn is_attachment(&self) -> bool {
        !self.attachment.is_empty()
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_attachment() {
            write!(f, "{} (attachment {})", self.page_name, self.attachment)
        } else {
            f.write_str(&self.page_name)
        }
    }
}

/// A loaded page or attachment with every field the engines search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDocument {
    pub page_name: String,
    /// Attachment file name, empty for the page itself.
    pub attachment: String,
    pub title: String,
    pub text: String,
    pub mimetype: String,
    pub language: String,
    pub domain: String,
    /// System pages also match `domain:system`.
    #[serde(default)]
    pub system: bool,
    /// Link targets, in order of appearance.
    pub links: Vec<String>,
    pub categories: Vec<String>,
    /// Modification stamp; a changed value means the document is stale.
    pub mtime: u64,
}

impl PageDocument {
    /// A wiki page with default metadata; the title is the page name.
    pub fn page(page_name: impl Into<String>, text: impl Into<String>) -> Self {
        let page_name = page_name.into();
        Self {
            title: page_name.clone(),
            page_name,
            attachment: String::new(),
            text: text.into(),
            mimetype: WIKI_MIMETYPE.to_string(),
            language: "en".to_string(),
            domain: DOMAIN_STANDARD.to_string(),
            system: false,
            links: Vec::new(),
            categories: Vec::new(),
            mtime: 0,
        }
    }

    /// An attachment of `page_name`; the title is the file name.
    pub fn attachment(
        page_name: impl Into<String>,
        file_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let file_name = file_name.into();
        Self {
            page_name: page_name.into(),
            title: file_name.clone(),
            mimetype: markup::mimetype_for(&file_name).to_string(),
            attachment: file_name,
            text: text.into(),
            language: "en".to_string(),
            domain: DOMAIN_STANDARD.to_string(),
            system: false,
            links: Vec::new(),
            categories: Vec::new(),
            mtime: 0,
        }
    }

    pub fn with_links(mut self, links: &[&str]) -> Self {
        self.links = links.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_categories(mut self, categories: &[&str]) -> Self {
        self.categories = categories.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = domain.to_string();
        self
    }

    pub fn as_system_page(mut self) -> Self {
        self.system = true;
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn with_mimetype(mut self, mimetype: &str) -> Self {
        self.mimetype = mimetype.to_string();
        self
    }

    pub fn key(&self) -> DocumentKey {
        DocumentKey {
            page_name: self.page_name.clone(),
            attachment: self.attachment.clone(),
        }
    }

    /// The values a term scoped to `field` is matched against.
    ///
    /// Full text covers the title as well as the body.
    pub fn field_values(&self, field: FieldScope) -> Vec<&str> {
        match field {
            FieldScope::FullText => vec![self.title.as_str(), self.text.as_str()],
            FieldScope::Title => vec![self.title.as_str()],
            FieldScope::Category => self.categories.iter().map(String::as_str).collect(),
            FieldScope::LinkTo => self.links.iter().map(String::as_str).collect(),
            FieldScope::MimeType => vec![self.mimetype.as_str()],
            FieldScope::Language => vec![self.language.as_str()],
            FieldScope::Domain => {
                let mut domains = vec![self.domain.as_str()];
                if self.system {
                    domains.push(DOMAIN_SYSTEM);
                }
                domains
            }
        }
    }
}

/// Source of searchable documents.
pub trait PageStore: Send + Sync {
    /// Every page and attachment currently in the wiki.
    fn list_documents(&self) -> Result<Vec<DocumentKey>>;

    /// Load one document. `Ok(None)` when it no longer exists.
    fn load_document(&self, key: &DocumentKey) -> Result<Option<PageDocument>>;
}

impl<S: PageStore + ?Sized> PageStore for std::sync::Arc<S> {
    fn list_documents(&self) -> Result<Vec<DocumentKey>> {
        (**self).list_documents()
    }

    fn load_document(&self, key: &DocumentKey) -> Result<Option<PageDocument>> {
        (**self).load_document(key)
    }
}

/// Decides whether a user may see a page in search results.
pub trait AccessControl {
    /// `identity` is `None` for anonymous users.
    fn may_read(&self, identity: Option<&str>, page_name: &str) -> bool;
}

/// Lets everyone read everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn may_read(&self, _identity: Option<&str>, _page_name: &str) -> bool {
        true
    }
}

/// Thread-safe in-memory [`PageStore`].
///
/// Every write bumps a store-wide revision which becomes the document's
/// modification stamp, so rewriting identical text still marks it stale.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    revision: u64,
    documents: BTreeMap<DocumentKey, PageDocument>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document. Returns its new modification stamp.
    pub fn put(&self, mut document: PageDocument) -> u64 {
        let mut inner = self.inner.write();
        inner.revision += 1;
        document.mtime = inner.revision;
        let revision = inner.revision;
        inner.documents.insert(document.key(), document);
        revision
    }

    /// Remove a document, returning it if it existed.
    pub fn remove(&self, key: &DocumentKey) -> Option<PageDocument> {
        let mut inner = self.inner.write();
        inner.revision += 1;
        inner.documents.remove(key)
    }

    /// Remove a page together with all of its attachments.
    pub fn remove_page(&self, page_name: &str) -> Vec<DocumentKey> {
        let mut inner = self.inner.write();
        inner.revision += 1;
        let keys: Vec<DocumentKey> = inner
            .documents
            .keys()
            .filter(|key| key.page_name == page_name)
            .cloned()
            .collect();
        for key in &keys {
            inner.documents.remove(key);
        }
        keys
    }

    pub fn len(&self) -> usize {
        self.inner.read().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().documents.is_empty()
    }
}

impl PageStore for MemoryStore {
    fn list_documents(&self) -> Result<Vec<DocumentKey>> {
        Ok(self.inner.read().documents.keys().cloned().collect())
    }

    fn load_document(&self, key: &DocumentKey) -> Result<Option<PageDocument>> {
        Ok(self.inner.read().documents.get(key).cloned())
    }
}
