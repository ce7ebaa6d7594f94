//! Query evaluation against the inverted index.
//!
//! Terms become sets of document ids looked up in the field vocabulary, And
//! and Or become intersection and union, and negation is the difference
//! against every indexed document. Full-text needles that do not fit inside
//! one word are narrowed through the vocabulary and then checked against the
//! stored text. Regex terms only see whole vocabulary entries, never text
//! spanning several words.

use crate::error::Result;
use crate::index::{DocId, InvertedIndex, Postings};
use crate::search::aggregate::aggregate;
use crate::search::analyzer::{self, Analyzer};
use crate::search::engine::Evaluator;
use crate::search::matcher::TermMatcher;
use crate::search::types::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Evaluates queries against an index snapshot.
#[derive(Debug)]
pub struct IndexedSearch {
    index: Arc<InvertedIndex>,
    analyzer: Analyzer,
}

/// A query node with its document set resolved.
enum Evaluated<'q> {
    Term {
        node: &'q TermNode,
        /// Documents the term itself matched, with term frequency.
        hits: BTreeMap<DocId, u32>,
        effective: BTreeSet<DocId>,
    },
    And {
        negated: bool,
        children: Vec<Evaluated<'q>>,
        effective: BTreeSet<DocId>,
    },
    Or {
        negated: bool,
        left: Box<Evaluated<'q>>,
        right: Box<Evaluated<'q>>,
        effective: BTreeSet<DocId>,
    },
}

/// A positive term satisfied by one document.
struct TermHit<'q> {
    node: &'q TermNode,
    frequency: u32,
    documents: usize,
}

impl<'q> Evaluated<'q> {
    fn effective(&self) -> &BTreeSet<DocId> {
        match self {
            Evaluated::Term { effective, .. }
            | Evaluated::And { effective, .. }
            | Evaluated::Or { effective, .. } => effective,
        }
    }

    /// Report the terms that matched `id` along satisfied branches.
    fn collect(&self, id: DocId, out: &mut Vec<TermHit<'q>>) {
        match self {
            Evaluated::Term { node, hits, .. } => {
                if node.negated {
                    return;
                }
                if let Some(&frequency) = hits.get(&id) {
                    out.push(TermHit {
                        node: *node,
                        frequency,
                        documents: hits.len(),
                    });
                }
            }
            Evaluated::And {
                negated: false,
                children,
                effective,
            } => {
                if effective.contains(&id) {
                    for child in children {
                        child.collect(id, out);
                    }
                }
            }
            Evaluated::Or {
                negated: false,
                left,
                right,
                ..
            } => {
                for side in [left, right] {
                    if side.effective().contains(&id) {
                        side.collect(id, out);
                    }
                }
            }
            Evaluated::And { negated: true, .. } | Evaluated::Or { negated: true, .. } => {}
        }
    }
}

fn apply_negation(negated: bool, matched: BTreeSet<DocId>, universe: &BTreeSet<DocId>) -> BTreeSet<DocId> {
    if negated {
        universe.difference(&matched).copied().collect()
    } else {
        matched
    }
}

/// Whether `text` is a single alphanumeric run, so that vocabulary words
/// decide substring matches exactly.
fn within_one_word(text: &str) -> bool {
    let mut runs = analyzer::words(text);
    matches!((runs.next(), runs.next()), (Some(run), None) if run == text)
}

/// Documents whose vocabulary in `postings` contains `needle` as a substring.
fn substring_docs(postings: &Postings, needle: &str, case_sensitive: bool) -> BTreeSet<DocId> {
    let needle = if case_sensitive {
        needle.to_string()
    } else {
        needle.to_lowercase()
    };
    postings
        .iter()
        .filter(|(word, _)| {
            if case_sensitive {
                word.contains(needle.as_str())
            } else {
                word.to_lowercase().contains(needle.as_str())
            }
        })
        .flat_map(|(_, docs)| docs.keys().copied())
        .collect()
}

impl IndexedSearch {
    pub fn new(index: Arc<InvertedIndex>) -> Self {
        let analyzer = index.analyzer();
        Self { index, analyzer }
    }

    pub fn index(&self) -> &InvertedIndex {
        &self.index
    }

    /// Evaluate `query` into per-term match records.
    pub fn evaluate_records(&self, query: &Query) -> Result<Vec<MatchRecord>> {
        let universe = self.index.doc_ids();
        let root = self.evaluate_node(&query.root, &universe)?;

        let mut records = Vec::new();
        for &id in root.effective() {
            let Some(document) = self.index.document(id) else {
                continue;
            };

            let mut matched = Vec::new();
            root.collect(id, &mut matched);

            if matched.is_empty() {
                records.push(MatchRecord {
                    page_name: document.page_name.clone(),
                    attachment: document.attachment.clone(),
                    field: FieldScope::FullText,
                    term: None,
                    weight: 0.0,
                });
            }
            for hit in matched {
                records.push(MatchRecord {
                    page_name: document.page_name.clone(),
                    attachment: document.attachment.clone(),
                    field: hit.node.field,
                    term: Some(hit.node.text.clone()),
                    weight: self.weight(hit.frequency, hit.documents, document.length),
                });
            }
        }
        Ok(records)
    }

    fn evaluate_node<'q>(
        &self,
        node: &'q QueryNode,
        universe: &BTreeSet<DocId>,
    ) -> Result<Evaluated<'q>> {
        Ok(match node {
            QueryNode::Term(term) => {
                let matcher = TermMatcher::compile(term, &self.analyzer)?;
                let hits = self.term_hits(term, &matcher);
                let matched = hits.keys().copied().collect();
                Evaluated::Term {
                    node: term,
                    effective: apply_negation(term.negated, matched, universe),
                    hits,
                }
            }
            QueryNode::And(and) => {
                let children = and
                    .children
                    .iter()
                    .map(|child| self.evaluate_node(child, universe))
                    .collect::<Result<Vec<_>>>()?;
                let mut matched: Option<BTreeSet<DocId>> = None;
                for child in &children {
                    matched = Some(match matched {
                        None => child.effective().clone(),
                        Some(acc) => acc.intersection(child.effective()).copied().collect(),
                    });
                }
                let matched = matched.unwrap_or_else(|| universe.clone());
                Evaluated::And {
                    negated: and.negated,
                    effective: apply_negation(and.negated, matched, universe),
                    children,
                }
            }
            QueryNode::Or(or) => {
                let left = self.evaluate_node(&or.left, universe)?;
                let right = self.evaluate_node(&or.right, universe)?;
                let matched = left.effective().union(right.effective()).copied().collect();
                Evaluated::Or {
                    negated: or.negated,
                    effective: apply_negation(or.negated, matched, universe),
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }
        })
    }

    /// Documents matching a single term, ignoring its negation.
    fn term_hits(&self, term: &TermNode, matcher: &TermMatcher) -> BTreeMap<DocId, u32> {
        let mut hits: BTreeMap<DocId, u32> = if term.field == FieldScope::FullText
            && !term.is_regex
            && !within_one_word(&term.text)
        {
            self.spanning_hits(term, matcher)
        } else {
            self.vocabulary_hits(term, matcher)
        };

        if let (Some(stem), true) = (matcher.stem(), self.index.stemming()) {
            if let Some(docs) = self.index.stem_postings(term.field, stem) {
                for &id in docs {
                    hits.entry(id).or_insert(1);
                }
            }
        }

        hits
    }

    fn vocabulary_hits(&self, term: &TermNode, matcher: &TermMatcher) -> BTreeMap<DocId, u32> {
        let mut hits: BTreeMap<DocId, u32> = BTreeMap::new();
        let mut add = |word_docs: &BTreeMap<DocId, u32>| {
            for (&id, &count) in word_docs {
                *hits.entry(id).or_insert(0) += count;
            }
        };

        match matcher.regex() {
            Some(regex) => {
                for (_, docs) in self.index.terms_matching(term.field, regex) {
                    add(docs);
                }
            }
            None => {
                if let Some(postings) = self.index.postings(term.field) {
                    for (word, docs) in postings {
                        if matcher.matches(word) {
                            add(docs);
                        }
                    }
                }
            }
        }
        hits
    }

    /// Needles spanning words or punctuation. Every word of the needle must
    /// occur in a candidate, and the needle itself in its title or body.
    fn spanning_hits(&self, term: &TermNode, matcher: &TermMatcher) -> BTreeMap<DocId, u32> {
        let mut candidates: Option<BTreeSet<DocId>> = None;
        for run in analyzer::words(&term.text) {
            let docs = match self.index.postings(FieldScope::FullText) {
                Some(postings) => substring_docs(postings, run, term.case_sensitive),
                None => BTreeSet::new(),
            };
            candidates = Some(match candidates {
                None => docs,
                Some(acc) => acc.intersection(&docs).copied().collect(),
            });
        }

        candidates
            .unwrap_or_else(|| self.index.doc_ids())
            .into_iter()
            .filter_map(|id| {
                let document = self.index.document(id)?;
                let count = [document.title.as_str(), document.text.as_str()]
                    .into_iter()
                    .filter(|value| matcher.matches(value))
                    .count() as u32;
                (count > 0).then_some((id, count))
            })
            .collect()
    }

    fn weight(&self, frequency: u32, documents: usize, length: u32) -> f32 {
        let total = self.index.len() as f32;
        let norm = (length as f32 / self.index.average_length()).max(0.5);
        let tf = (frequency as f32 / norm).max(1.0);
        (1.0 + tf.ln()) * (1.0 + total / documents.max(1) as f32).ln()
    }
}

impl Evaluator for IndexedSearch {
    fn name(&self) -> &'static str {
        "index"
    }

    fn evaluate(&self, query: &Query) -> Result<SearchResults> {
        let records = self.evaluate_records(query)?;
        Ok(aggregate(&query.text, records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::matcher::LinearScan;
    use crate::search::parser::parse_query;
    use crate::store::{MemoryStore, PageDocument};
    use pretty_assertions::assert_eq;

    fn wiki() -> MemoryStore {
        let store = MemoryStore::new();
        store.put(PageDocument::page("TestEdit", "some text"));
        store.put(PageDocument::page("TestOnEditing", "how to edit a page"));
        store.put(PageDocument::page("FrontPage", "Welcome to the wiki").with_links(&["TestEdit"]));
        store.put(
            PageDocument::page("HomePageWiki", "personal page")
                .with_links(&["CategoryHomepage"])
                .with_categories(&["CategoryHomepage"]),
        );
        store.put(PageDocument::page("HelpContents", "help text").with_domain("underlay"));
        store.put(PageDocument::attachment("FrontPage", "readme.txt", "attached welcome"));
        store
    }

    fn engine(store: &MemoryStore, stemming: bool) -> IndexedSearch {
        IndexedSearch::new(Arc::new(InvertedIndex::build(store, "en", stemming).unwrap()))
    }

    fn pages(engine: &dyn Evaluator, query: &str) -> Vec<String> {
        let mut pages: Vec<String> = engine
            .evaluate(&parse_query(query).unwrap())
            .unwrap()
            .hits
            .into_iter()
            .map(|hit| {
                if hit.attachment.is_empty() {
                    hit.page_name
                } else {
                    format!("{}/{}", hit.page_name, hit.attachment)
                }
            })
            .collect();
        pages.sort();
        pages
    }

    #[test]
    fn test_title_without_stemming() {
        let store = wiki();
        let engine = engine(&store, false);
        assert_eq!(pages(&engine, "title:edit"), vec!["TestEdit", "TestOnEditing"]);
        assert_eq!(pages(&engine, "title:editing"), vec!["TestOnEditing"]);
    }

    #[test]
    fn test_title_with_stemming() {
        let store = wiki();
        let engine = engine(&store, true);
        assert_eq!(pages(&engine, "title:editing"), vec!["TestEdit", "TestOnEditing"]);
    }

    #[test]
    fn test_negated_missing_title_returns_everything() {
        let store = wiki();
        let engine = engine(&store, false);
        let results = engine
            .evaluate(&parse_query("-title:DoesNotExist").unwrap())
            .unwrap();
        assert_eq!(results.len(), 6);
        assert!(results.hits.iter().all(|hit| hit.weight == 0.0 && hit.terms.is_empty()));
    }

    #[test]
    fn test_metadata_fields() {
        let store = wiki();
        let engine = engine(&store, false);
        assert_eq!(pages(&engine, "linkto:TestEdit"), vec!["FrontPage"]);
        assert_eq!(pages(&engine, "category:CategoryHomepage"), vec!["HomePageWiki"]);
        assert_eq!(pages(&engine, "domain:underlay"), vec!["HelpContents"]);
        assert_eq!(pages(&engine, "mimetype:text/plain"), vec!["FrontPage/readme.txt"]);
    }

    #[test]
    fn test_boolean_structure() {
        let store = wiki();
        let engine = engine(&store, false);
        assert_eq!(pages(&engine, "welcome -title:readme"), vec!["FrontPage"]);
        assert_eq!(
            pages(&engine, "personal or help"),
            vec!["HelpContents", "HomePageWiki"]
        );
        assert_eq!(pages(&engine, "-(edit or welcome) page"), vec!["HomePageWiki"]);
    }

    #[test]
    fn test_regex_sees_vocabulary() {
        let store = wiki();
        let engine = engine(&store, false);
        assert_eq!(pages(&engine, "title:re:^Test"), vec!["TestEdit", "TestOnEditing"]);
        // words are indexed separately, so a pattern spanning two never matches
        assert!(pages(&engine, "re:\"edit a page\"").is_empty());
    }

    #[test]
    fn test_phrase_matches_documents_with_every_word() {
        let store = wiki();
        let engine = engine(&store, false);
        assert_eq!(pages(&engine, "\"edit a page\""), vec!["TestOnEditing"]);
    }

    #[test]
    fn test_phrase_and_punctuation_follow_stored_text() {
        let store = MemoryStore::new();
        store.put(PageDocument::page("Alpha", "about page here"));
        store.put(PageDocument::page("Beta", "Wow! great"));
        let indexed = engine(&store, false);
        let linear = LinearScan::new(&store, Analyzer::default());

        assert!(pages(&indexed, "\"page about\"").is_empty());
        assert!(pages(&indexed, "\"here.\"").is_empty());
        assert_eq!(pages(&indexed, "!"), vec!["Beta"]);
        assert_eq!(pages(&indexed, "\"bout page he\""), vec!["Alpha"]);
        assert_eq!(pages(&indexed, "-\"page about\""), vec!["Alpha", "Beta"]);
        for query in ["\"page about\"", "\"here.\"", "!", "\"bout page he\"", "-!"] {
            assert_eq!(pages(&indexed, query), pages(&linear, query), "query {query}");
        }
    }

    #[test]
    fn test_same_keys_as_linear_scan() {
        let store = wiki();
        let indexed = engine(&store, false);
        let linear = LinearScan::new(&store, Analyzer::default());
        for query in [
            "edit",
            "title:Page",
            "case:Welcome",
            "-welcome",
            "linkto:CategoryHomepage",
            "page or help",
            "-domain:underlay text",
            "title:editing",
            "\"edit a page\"",
            "\"a page edit\"",
            "\"the wiki\"",
            "\"Welcome to\"",
            "case:\"welcome to\"",
        ] {
            assert_eq!(pages(&indexed, query), pages(&linear, query), "query {query}");
        }
    }

    #[test]
    fn test_weight_grows_with_frequency() {
        let store = MemoryStore::new();
        store.put(PageDocument::page("A", "alpha alpha alpha beta"));
        store.put(PageDocument::page("B", "alpha gamma delta epsilon"));
        let engine = engine(&store, false);

        let results = engine.evaluate(&parse_query("alpha").unwrap()).unwrap();
        assert_eq!(results.keys()[0].0, "A");
        assert!(results.hits[0].weight > results.hits[1].weight);
        assert!(results.hits[1].weight > 0.0);
    }
}
