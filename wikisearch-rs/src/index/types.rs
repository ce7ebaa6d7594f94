//! Index data structures.

use crate::search::analyzer::{self, Analyzer};
use crate::search::types::FieldScope;
use crate::store::{DocumentKey, PageDocument};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Stable document identifier, kept across updates until deletion.
pub type DocId = u32;

/// Index metadata (`meta.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    /// Index format version.
    pub version: u32,
    /// Whether stems were recorded for text fields.
    pub stemming: bool,
    /// Language of the stemmer.
    pub language: String,
    /// Number of indexed documents.
    pub documents: usize,
    /// Number of distinct vocabulary entries over all fields.
    pub terms: usize,
    /// Time of the last save (RFC 3339).
    pub last_update: Option<String>,
    /// wikisearch version that wrote this index.
    pub wikisearch_version: String,
}

impl IndexMeta {
    pub fn new(language: &str, stemming: bool) -> Self {
        Self {
            version: super::INDEX_VERSION,
            stemming,
            language: language.to_string(),
            documents: 0,
            terms: 0,
            last_update: None,
            wikisearch_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// One indexed page or attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: DocId,
    pub page_name: String,
    /// Attachment file name, empty for the page itself.
    pub attachment: String,
    /// Modification stamp of the indexed revision.
    pub mtime: u64,
    /// Surface word (original case) to frequency, per field.
    ///
    /// Text fields hold the alphanumeric words of their values plus the
    /// whole title; metadata fields hold whole values.
    pub words: BTreeMap<FieldScope, BTreeMap<String, u32>>,
    /// Analyzed stems of the text fields, empty when built without stemming.
    pub stems: BTreeMap<FieldScope, BTreeSet<String>>,
    /// Word count of title and body, for length normalization.
    pub length: u32,
    /// Raw title and body. Needles spanning several words are checked here.
    pub title: String,
    pub text: String,
}

impl IndexDocument {
    /// Extract every field of `doc` into index form.
    pub fn build(id: DocId, doc: &PageDocument, analyzer: &Analyzer) -> Self {
        let mut words: BTreeMap<FieldScope, BTreeMap<String, u32>> = BTreeMap::new();
        let mut stems: BTreeMap<FieldScope, BTreeSet<String>> = BTreeMap::new();
        let mut length = 0u32;

        for field in FieldScope::ALL {
            let values = doc.field_values(field);
            let mut counts: BTreeMap<String, u32> = BTreeMap::new();

            if field.is_textual() {
                for value in &values {
                    for word in analyzer::words(value) {
                        *counts.entry(word.to_string()).or_insert(0) += 1;
                        if field == FieldScope::FullText {
                            length += 1;
                        }
                    }
                }
                // the whole title lets substrings and patterns span its words
                if !counts.contains_key(&doc.title) && !doc.title.is_empty() {
                    counts.insert(doc.title.clone(), 1);
                }

                if analyzer.stemming() {
                    let field_stems: BTreeSet<String> = values
                        .iter()
                        .flat_map(|value| analyzer.tokenize(value))
                        .map(|token| token.effective_stem().to_string())
                        .collect();
                    if !field_stems.is_empty() {
                        stems.insert(field, field_stems);
                    }
                }
            } else {
                for value in values.iter().filter(|v| !v.is_empty()) {
                    *counts.entry(value.to_string()).or_insert(0) += 1;
                }
            }

            if !counts.is_empty() {
                words.insert(field, counts);
            }
        }

        Self {
            id,
            page_name: doc.page_name.clone(),
            attachment: doc.attachment.clone(),
            mtime: doc.mtime,
            words,
            stems,
            length,
            title: doc.title.clone(),
            text: doc.text.clone(),
        }
    }

    pub fn key(&self) -> DocumentKey {
        DocumentKey {
            page_name: self.page_name.clone(),
            attachment: self.attachment.clone(),
        }
    }

    /// Check if the indexed revision differs from the stored one.
    pub fn is_stale(&self, mtime: u64) -> bool {
        self.mtime != mtime
    }
}

/// Summary of an index directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    pub available: bool,
    pub documents: usize,
    pub terms: usize,
    pub stemming: bool,
    pub language: String,
    pub last_update: Option<String>,
    pub index_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_build_text_fields() {
        let doc = PageDocument::page("HelpOnEditing", "Edit the page. Edit again!");
        let indexed = IndexDocument::build(7, &doc, &Analyzer::new("en", false));

        let full_text = &indexed.words[&FieldScope::FullText];
        assert_eq!(full_text["Edit"], 2);
        assert_eq!(full_text["HelpOnEditing"], 1);
        assert_eq!(full_text["page"], 1);

        let title = &indexed.words[&FieldScope::Title];
        assert_eq!(title.len(), 1);
        assert!(indexed.stems.is_empty());
        assert_eq!(indexed.length, 6);
        assert_eq!(indexed.id, 7);
        assert_eq!(indexed.text, "Edit the page. Edit again!");
    }

    #[test]
    fn test_build_keeps_whole_title() {
        let doc = PageDocument::page("Help On/Sub Page", "");
        let indexed = IndexDocument::build(1, &doc, &Analyzer::default());
        let title = &indexed.words[&FieldScope::Title];
        assert!(title.contains_key("Help On/Sub Page"));
        assert!(title.contains_key("Sub"));
    }

    #[test]
    fn test_build_metadata_fields() {
        let doc = PageDocument::page("HomePageWiki", "text")
            .with_links(&["CategoryHomepage", "FrontPage"])
            .with_categories(&["CategoryHomepage"])
            .with_domain("underlay");
        let indexed = IndexDocument::build(1, &doc, &Analyzer::default());

        assert_eq!(indexed.words[&FieldScope::LinkTo].len(), 2);
        assert!(indexed.words[&FieldScope::Category].contains_key("CategoryHomepage"));
        assert!(indexed.words[&FieldScope::Domain].contains_key("underlay"));
        assert!(indexed.words[&FieldScope::MimeType].contains_key("text/wiki"));
        assert!(indexed.words[&FieldScope::Language].contains_key("en"));
    }

    #[test]
    fn test_build_stems() {
        let doc = PageDocument::page("TestOnEditing", "");
        let indexed = IndexDocument::build(1, &doc, &Analyzer::new("en", true));
        let title_stems = &indexed.stems[&FieldScope::Title];
        assert!(title_stems.contains("edit"));
        assert!(title_stems.contains("test"));
    }

    #[test]
    fn test_is_stale() {
        let mut doc = PageDocument::page("A", "x");
        doc.mtime = 10;
        let indexed = IndexDocument::build(1, &doc, &Analyzer::default());
        assert!(!indexed.is_stale(10));
        assert!(indexed.is_stale(11));
    }
}
