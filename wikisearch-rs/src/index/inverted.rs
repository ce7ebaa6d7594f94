//! The inverted index: documents plus per-field posting lists.

use super::types::*;
use super::{
    acquire_lock, ensure_index_dir, index_exists, load_json, save_json, INDEX_FILE, INDEX_VERSION,
    META_FILE,
};
use crate::error::{Result, SearchError};
use crate::search::analyzer::Analyzer;
use crate::search::types::FieldScope;
use crate::store::{DocumentKey, PageDocument, PageStore};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::path::Path;
use std::time::Instant;

/// Word → (document → frequency).
pub type Postings = BTreeMap<String, BTreeMap<DocId, u32>>;

/// What `index.json` holds. Posting lists are derived on load.
#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexData {
    next_id: DocId,
    documents: Vec<IndexDocument>,
}

/// Documents and posting lists of one wiki.
#[derive(Debug, Clone)]
pub struct InvertedIndex {
    meta: IndexMeta,
    next_id: DocId,
    documents: BTreeMap<DocId, IndexDocument>,
    keys: HashMap<DocumentKey, DocId>,
    words: BTreeMap<FieldScope, Postings>,
    stems: BTreeMap<FieldScope, BTreeMap<String, BTreeSet<DocId>>>,
    total_length: u64,
}

impl InvertedIndex {
    /// Create an empty index.
    pub fn new(language: &str, stemming: bool) -> Self {
        Self {
            meta: IndexMeta::new(language, stemming),
            next_id: 1,
            documents: BTreeMap::new(),
            keys: HashMap::new(),
            words: BTreeMap::new(),
            stems: BTreeMap::new(),
            total_length: 0,
        }
    }

    /// Index every document of `store` from scratch.
    pub fn build(store: &dyn PageStore, language: &str, stemming: bool) -> Result<Self> {
        let start = Instant::now();
        let mut index = Self::new(language, stemming);
        let analyzer = index.analyzer();
        let mut skipped = 0usize;

        for key in store.list_documents()? {
            match store.load_document(&key) {
                Ok(Some(doc)) => {
                    index.insert(&doc, &analyzer);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Not indexing {}: {}", key, e);
                    skipped += 1;
                }
            }
        }

        tracing::info!(
            "Built search index: {} documents, {} terms, {} skipped in {:?}",
            index.len(),
            index.term_count(),
            skipped,
            start.elapsed()
        );
        Ok(index)
    }

    /// Load the index stored in `index_dir`.
    ///
    /// Fails with [`SearchError::IndexUnavailable`] when there is no index or
    /// it was written by an incompatible version.
    pub fn load(index_dir: &Path) -> Result<Self> {
        if !index_exists(index_dir) {
            return Err(SearchError::IndexUnavailable(format!(
                "no index in {}",
                index_dir.display()
            )));
        }

        let meta: IndexMeta = load_json(index_dir, META_FILE)
            .map_err(|e| SearchError::IndexUnavailable(e.to_string()))?;
        if meta.version != INDEX_VERSION {
            return Err(SearchError::IndexUnavailable(format!(
                "index version {} is not supported (expected {})",
                meta.version, INDEX_VERSION
            )));
        }

        let data: IndexData = load_json(index_dir, INDEX_FILE)
            .map_err(|e| SearchError::IndexUnavailable(e.to_string()))?;

        let mut index = Self::new(&meta.language, meta.stemming);
        index.meta = meta;
        for document in data.documents {
            index.add_postings(&document);
            index.keys.insert(document.key(), document.id);
            index.documents.insert(document.id, document);
        }
        index.next_id = data
            .next_id
            .max(index.documents.keys().next_back().map_or(1, |id| id + 1));

        tracing::debug!(
            "Loaded search index from {}: {} documents",
            index_dir.display(),
            index.len()
        );
        Ok(index)
    }

    /// Save the index to `index_dir` under the index lock.
    pub fn save(&mut self, index_dir: &Path) -> Result<()> {
        ensure_index_dir(index_dir)?;
        let _lock = acquire_lock(index_dir)?;

        self.meta.documents = self.documents.len();
        self.meta.terms = self.term_count();
        self.meta.last_update = Some(chrono::Utc::now().to_rfc3339());

        let data = IndexData {
            next_id: self.next_id,
            documents: self.documents.values().cloned().collect(),
        };
        // index first: a crash in between leaves the old meta pointing at new data
        save_json(index_dir, INDEX_FILE, &data)?;
        save_json(index_dir, META_FILE, &self.meta)?;
        Ok(())
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn stemming(&self) -> bool {
        self.meta.stemming
    }

    pub fn language(&self) -> &str {
        &self.meta.language
    }

    /// Analyzer matching the settings the index was built with.
    pub fn analyzer(&self) -> Analyzer {
        Analyzer::new(&self.meta.language, self.meta.stemming)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Distinct vocabulary entries, counted per field.
    pub fn term_count(&self) -> usize {
        self.words.values().map(BTreeMap::len).sum()
    }

    pub fn get(&self, key: &DocumentKey) -> Option<&IndexDocument> {
        self.keys.get(key).and_then(|id| self.documents.get(id))
    }

    pub fn document(&self, id: DocId) -> Option<&IndexDocument> {
        self.documents.get(&id)
    }

    /// All documents in id order.
    pub fn documents(&self) -> impl Iterator<Item = &IndexDocument> {
        self.documents.values()
    }

    /// Every document id; the universe negations are taken against.
    pub fn doc_ids(&self) -> BTreeSet<DocId> {
        self.documents.keys().copied().collect()
    }

    /// Mean document length, at least one.
    pub fn average_length(&self) -> f32 {
        if self.documents.is_empty() {
            1.0
        } else {
            (self.total_length as f32 / self.documents.len() as f32).max(1.0)
        }
    }

    /// Insert or replace a document. The id of an existing document is kept.
    pub fn insert(&mut self, doc: &PageDocument, analyzer: &Analyzer) -> DocId {
        let key = doc.key();
        let id = match self.keys.get(&key).copied() {
            Some(id) => {
                self.remove_by_id(id);
                id
            }
            None => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
        };

        let document = IndexDocument::build(id, doc, analyzer);
        self.add_postings(&document);
        self.keys.insert(key, id);
        self.documents.insert(id, document);
        id
    }

    /// Remove a document by key.
    pub fn remove(&mut self, key: &DocumentKey) -> Option<IndexDocument> {
        let id = self.keys.get(key).copied()?;
        self.remove_by_id(id)
    }

    /// Remove a document by id.
    pub fn remove_by_id(&mut self, id: DocId) -> Option<IndexDocument> {
        let document = self.documents.remove(&id)?;
        self.keys.remove(&document.key());
        self.remove_postings(&document);
        Some(document)
    }

    /// Remove a page together with all of its indexed attachments.
    pub fn remove_page(&mut self, page_name: &str) -> Vec<IndexDocument> {
        let ids: Vec<DocId> = self
            .documents
            .values()
            .filter(|doc| doc.page_name == page_name)
            .map(|doc| doc.id)
            .collect();
        ids.into_iter().filter_map(|id| self.remove_by_id(id)).collect()
    }

    /// Vocabulary of one field.
    pub fn postings(&self, field: FieldScope) -> Option<&Postings> {
        self.words.get(&field)
    }

    /// Vocabulary entries of `field` starting with `prefix`.
    pub fn terms_with_prefix<'a>(
        &'a self,
        field: FieldScope,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a BTreeMap<DocId, u32>)> + 'a {
        self.words
            .get(&field)
            .into_iter()
            .flat_map(move |postings| {
                postings
                    .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
                    .take_while(move |(word, _)| word.starts_with(prefix))
            })
            .map(|(word, docs)| (word.as_str(), docs))
    }

    /// Vocabulary entries of `field` matched by `regex`.
    pub fn terms_matching<'a>(
        &'a self,
        field: FieldScope,
        regex: &'a Regex,
    ) -> impl Iterator<Item = (&'a str, &'a BTreeMap<DocId, u32>)> + 'a {
        self.words
            .get(&field)
            .into_iter()
            .flat_map(|postings| postings.iter())
            .filter(move |(word, _)| regex.is_match(word))
            .map(|(word, docs)| (word.as_str(), docs))
    }

    /// Documents whose analyzed `field` contains `stem`.
    pub fn stem_postings(&self, field: FieldScope, stem: &str) -> Option<&BTreeSet<DocId>> {
        self.stems.get(&field).and_then(|stems| stems.get(stem))
    }

    fn add_postings(&mut self, document: &IndexDocument) {
        for (field, counts) in &document.words {
            let postings = self.words.entry(*field).or_default();
            for (word, count) in counts {
                postings
                    .entry(word.clone())
                    .or_default()
                    .insert(document.id, *count);
            }
        }
        for (field, stems) in &document.stems {
            let postings = self.stems.entry(*field).or_default();
            for stem in stems {
                postings.entry(stem.clone()).or_default().insert(document.id);
            }
        }
        self.total_length += u64::from(document.length);
    }

    fn remove_postings(&mut self, document: &IndexDocument) {
        for (field, counts) in &document.words {
            if let Some(postings) = self.words.get_mut(field) {
                for word in counts.keys() {
                    if let Some(docs) = postings.get_mut(word) {
                        docs.remove(&document.id);
                        if docs.is_empty() {
                            postings.remove(word);
                        }
                    }
                }
            }
        }
        for (field, stems) in &document.stems {
            if let Some(postings) = self.stems.get_mut(field) {
                for stem in stems {
                    if let Some(docs) = postings.get_mut(stem) {
                        docs.remove(&document.id);
                        if docs.is_empty() {
                            postings.remove(stem);
                        }
                    }
                }
            }
        }
        self.total_length = self.total_length.saturating_sub(u64::from(document.length));
    }
}
