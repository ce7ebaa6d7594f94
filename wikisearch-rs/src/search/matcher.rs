//! Term matching and the linear-scan engine.
//!
//! [`TermMatcher`] decides whether a single field value satisfies a term; the
//! indexed engine reuses it against vocabulary entries. [`LinearScan`] walks
//! every document of a [`PageStore`] and evaluates the whole tree per
//! document, without any persistent index.

use crate::error::{QueryError, Result};
use crate::search::aggregate::aggregate;
use crate::search::analyzer::{self, Analyzer};
use crate::search::engine::Evaluator;
use crate::search::types::*;
use crate::store::{PageDocument, PageStore};
use regex::{Regex, RegexBuilder};
use std::cell::OnceCell;
use std::collections::HashSet;

// ============================================================================
// Term matching
// ============================================================================

#[derive(Debug)]
enum Pattern {
    /// Needle is already lowercased when the match ignores case.
    Substring { needle: String, case_sensitive: bool },
    Regex(Regex),
}

/// A compiled term: how to test a value, plus the stem to compare when
/// stemming applies.
#[derive(Debug)]
pub(crate) struct TermMatcher {
    pattern: Pattern,
    stem: Option<String>,
}

impl TermMatcher {
    pub(crate) fn compile(term: &TermNode, analyzer: &Analyzer) -> Result<Self> {
        let pattern = if term.is_regex {
            let regex = RegexBuilder::new(&term.text)
                .case_insensitive(!term.case_sensitive)
                .build()
                .map_err(|e| QueryError::InvalidRegex {
                    pattern: term.text.clone(),
                    message: e.to_string(),
                })?;
            Pattern::Regex(regex)
        } else if term.case_sensitive {
            Pattern::Substring {
                needle: term.text.clone(),
                case_sensitive: true,
            }
        } else {
            Pattern::Substring {
                needle: term.text.to_lowercase(),
                case_sensitive: false,
            }
        };

        let stem = if term.allows_stemming() && analyzer.stemming() {
            query_stem(&term.text, analyzer)
        } else {
            None
        };

        Ok(Self { pattern, stem })
    }

    /// Whether `value` satisfies the term's text or pattern.
    pub(crate) fn matches(&self, value: &str) -> bool {
        match &self.pattern {
            Pattern::Substring {
                needle,
                case_sensitive: true,
            } => value.contains(needle.as_str()),
            Pattern::Substring { needle, .. } => value.to_lowercase().contains(needle.as_str()),
            Pattern::Regex(regex) => regex.is_match(value),
        }
    }

    /// The compiled pattern of a regex term.
    pub(crate) fn regex(&self) -> Option<&Regex> {
        match &self.pattern {
            Pattern::Regex(regex) => Some(regex),
            Pattern::Substring { .. } => None,
        }
    }

    /// Stem to compare against analyzed field stems, if stemming applies.
    pub(crate) fn stem(&self) -> Option<&str> {
        self.stem.as_deref()
    }
}

/// The stem of a single-word query text. Phrases are never stem-matched.
fn query_stem(text: &str, analyzer: &Analyzer) -> Option<String> {
    let mut words = analyzer::words(text);
    let word = words.next()?;
    if words.next().is_some() {
        return None;
    }
    let token = analyzer.tokenize(word).next()?;
    Some(token.effective_stem().to_string())
}

// ============================================================================
// Compiled query
// ============================================================================

enum Compiled<'q> {
    Term {
        node: &'q TermNode,
        matcher: TermMatcher,
    },
    And {
        negated: bool,
        children: Vec<Compiled<'q>>,
    },
    Or {
        negated: bool,
        left: Box<Compiled<'q>>,
        right: Box<Compiled<'q>>,
    },
}

impl<'q> Compiled<'q> {
    fn new(node: &'q QueryNode, analyzer: &Analyzer) -> Result<Self> {
        Ok(match node {
            QueryNode::Term(term) => Compiled::Term {
                node: term,
                matcher: TermMatcher::compile(term, analyzer)?,
            },
            QueryNode::And(and) => Compiled::And {
                negated: and.negated,
                children: and
                    .children
                    .iter()
                    .map(|child| Compiled::new(child, analyzer))
                    .collect::<Result<_>>()?,
            },
            QueryNode::Or(or) => Compiled::Or {
                negated: or.negated,
                left: Box::new(Compiled::new(&or.left, analyzer)?),
                right: Box::new(Compiled::new(&or.right, analyzer)?),
            },
        })
    }

    /// Effective match of this node against one document.
    ///
    /// Terms that matched with positive polarity along satisfied branches are
    /// pushed to `out`. Nothing under a negation is reported.
    fn evaluate(&self, doc: &Candidate<'_>, out: &mut Vec<&'q TermNode>) -> bool {
        match self {
            Compiled::Term { node, matcher } => {
                let matched = doc.term_matches(node.field, matcher);
                if matched && !node.negated {
                    out.push(*node);
                }
                matched != node.negated
            }
            Compiled::And {
                negated: true,
                children,
            } => {
                let mut ignored = Vec::new();
                !children.iter().all(|child| child.evaluate(doc, &mut ignored))
            }
            Compiled::And {
                negated: false,
                children,
            } => {
                let mark = out.len();
                for child in children {
                    if !child.evaluate(doc, out) {
                        out.truncate(mark);
                        return false;
                    }
                }
                true
            }
            Compiled::Or {
                negated: true,
                left,
                right,
            } => {
                let mut ignored = Vec::new();
                !(left.evaluate(doc, &mut ignored) || right.evaluate(doc, &mut ignored))
            }
            Compiled::Or {
                negated: false,
                left,
                right,
            } => {
                // both sides are evaluated so every satisfied term is reported
                let mark = out.len();
                let left_matched = left.evaluate(doc, out);
                if !left_matched {
                    out.truncate(mark);
                }
                let mark = out.len();
                let right_matched = right.evaluate(doc, out);
                if !right_matched {
                    out.truncate(mark);
                }
                left_matched || right_matched
            }
        }
    }
}

// ============================================================================
// Candidates
// ============================================================================

/// A document under evaluation, with stems of its text fields computed on
/// first use.
struct Candidate<'d> {
    doc: &'d PageDocument,
    analyzer: &'d Analyzer,
    full_text_stems: OnceCell<HashSet<String>>,
    title_stems: OnceCell<HashSet<String>>,
}

impl<'d> Candidate<'d> {
    fn new(doc: &'d PageDocument, analyzer: &'d Analyzer) -> Self {
        Self {
            doc,
            analyzer,
            full_text_stems: OnceCell::new(),
            title_stems: OnceCell::new(),
        }
    }

    fn stems(&self, field: FieldScope) -> Option<&HashSet<String>> {
        let cell = match field {
            FieldScope::FullText => &self.full_text_stems,
            FieldScope::Title => &self.title_stems,
            _ => return None,
        };
        Some(cell.get_or_init(|| {
            self.doc
                .field_values(field)
                .into_iter()
                .flat_map(|value| self.analyzer.tokenize(value))
                .map(|token| token.effective_stem().to_string())
                .collect()
        }))
    }

    fn term_matches(&self, field: FieldScope, matcher: &TermMatcher) -> bool {
        if self
            .doc
            .field_values(field)
            .iter()
            .any(|value| matcher.matches(value))
        {
            return true;
        }
        match (matcher.stem(), self.stems(field)) {
            (Some(stem), Some(stems)) => stems.contains(stem),
            _ => false,
        }
    }
}

// ============================================================================
// Linear scan engine
// ============================================================================

/// Evaluates queries by loading and testing every document.
pub struct LinearScan<'a> {
    store: &'a dyn PageStore,
    analyzer: Analyzer,
}

impl<'a> LinearScan<'a> {
    pub fn new(store: &'a dyn PageStore, analyzer: Analyzer) -> Self {
        Self { store, analyzer }
    }

    /// Evaluate `query` against explicit candidates.
    ///
    /// Candidates that failed to load are logged and skipped. A matching
    /// document that satisfied only negations yields one record without a
    /// term.
    pub fn evaluate_documents<I>(&self, query: &Query, candidates: I) -> Result<Vec<MatchRecord>>
    where
        I: IntoIterator<Item = Result<PageDocument>>,
    {
        let compiled = Compiled::new(&query.root, &self.analyzer)?;
        let mut records = Vec::new();
        let mut skipped = 0usize;

        for candidate in candidates {
            let doc = match candidate {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!("Skipping unreadable document: {}", e);
                    skipped += 1;
                    continue;
                }
            };

            let mut matched_terms = Vec::new();
            if !compiled.evaluate(&Candidate::new(&doc, &self.analyzer), &mut matched_terms) {
                continue;
            }

            if matched_terms.is_empty() {
                records.push(MatchRecord {
                    page_name: doc.page_name.clone(),
                    attachment: doc.attachment.clone(),
                    field: FieldScope::FullText,
                    term: None,
                    weight: 0.0,
                });
            }
            for term in matched_terms {
                records.push(MatchRecord {
                    page_name: doc.page_name.clone(),
                    attachment: doc.attachment.clone(),
                    field: term.field,
                    term: Some(term.text.clone()),
                    weight: 1.0,
                });
            }
        }

        if skipped > 0 {
            tracing::debug!("Linear scan skipped {} unreadable documents", skipped);
        }
        Ok(records)
    }
}

impl Evaluator for LinearScan<'_> {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn evaluate(&self, query: &Query) -> Result<SearchResults> {
        let keys = self.store.list_documents()?;
        let candidates = keys
            .iter()
            .filter_map(|key| self.store.load_document(key).transpose());
        let records = self.evaluate_documents(query, candidates)?;
        Ok(aggregate(&query.text, records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchError;
    use crate::search::parser::parse_query;
    use crate::store::{DocumentKey, MemoryStore};
    use pretty_assertions::assert_eq;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.put(
            PageDocument::page("SearchTestPage", "This is a test page about apples.")
                .with_links(&["FrontPage"]),
        );
        store.put(PageDocument::page("TestEdit", "TestEdit"));
        store.put(PageDocument::page("TestOnEditing", "another test page"));
        store.put(
            PageDocument::page("HomePageWiki", "Some homepage text")
                .with_categories(&["CategoryHomepage"])
                .with_links(&["CategoryHomepage"]),
        );
        store.put(PageDocument::page("HelpContents", "help").with_domain("underlay"));
        store
    }

    fn pages(store: &MemoryStore, query: &str, analyzer: Analyzer) -> Vec<String> {
        let engine = LinearScan::new(store, analyzer);
        let query = parse_query(query).unwrap();
        let mut pages: Vec<String> = engine
            .evaluate(&query)
            .unwrap()
            .hits
            .into_iter()
            .map(|hit| hit.page_name)
            .collect();
        pages.sort();
        pages
    }

    fn plain() -> Analyzer {
        Analyzer::new("en", false)
    }

    #[test]
    fn test_fulltext_substring_ignores_case() {
        let store = store();
        assert_eq!(pages(&store, "APPLES", plain()), vec!["SearchTestPage"]);
    }

    #[test]
    fn test_fulltext_includes_title() {
        let store = store();
        assert_eq!(pages(&store, "HomePageWiki", plain()), vec!["HomePageWiki"]);
    }

    #[test]
    fn test_title_search_without_stemming() {
        let store = store();
        assert_eq!(pages(&store, "title:edit", plain()), vec!["TestEdit", "TestOnEditing"]);
        assert_eq!(pages(&store, "title:editing", plain()), vec!["TestOnEditing"]);
    }

    #[test]
    fn test_title_search_with_stemming() {
        let store = store();
        let stemmed = || Analyzer::new("en", true);
        assert_eq!(pages(&store, "title:edit", stemmed()), vec!["TestEdit", "TestOnEditing"]);
        assert_eq!(pages(&store, "title:editing", stemmed()), vec!["TestEdit", "TestOnEditing"]);
    }

    #[test]
    fn test_case_sensitive_title() {
        let store = store();
        assert_eq!(pages(&store, "title:case:SearchTestPage", plain()), vec!["SearchTestPage"]);
        assert!(pages(&store, "title:case:searchtestpage", plain()).is_empty());
    }

    #[test]
    fn test_regex_title() {
        let store = store();
        assert_eq!(pages(&store, r"title:re:\bTest", plain()), vec!["TestEdit", "TestOnEditing"]);
        assert!(pages(&store, r"title:case:re:\btestedit\b", plain()).is_empty());
    }

    #[test]
    fn test_linkto_and_category() {
        let store = store();
        assert_eq!(pages(&store, "linkto:FrontPage", plain()), vec!["SearchTestPage"]);
        assert!(pages(&store, "linkto:SearchTestNotExisting", plain()).is_empty());
        assert_eq!(pages(&store, "category:CategoryHomepage", plain()), vec!["HomePageWiki"]);
    }

    #[test]
    fn test_negated_missing_title_returns_everything() {
        let store = store();
        assert_eq!(pages(&store, "-title:DoesNotExist", plain()).len(), store.len());
    }

    #[test]
    fn test_domain_exclusion() {
        let store = store();
        let found = pages(&store, "-domain:underlay help", plain());
        assert!(found.is_empty());
        assert_eq!(pages(&store, "domain:underlay", plain()), vec!["HelpContents"]);
    }

    #[test]
    fn test_or_and_grouping() {
        let store = store();
        assert_eq!(
            pages(&store, "apples or homepage", plain()),
            vec!["HomePageWiki", "SearchTestPage"]
        );
        assert_eq!(pages(&store, "(apples or homepage) -title:Home", plain()), vec!["SearchTestPage"]);
    }

    #[test]
    fn test_matched_terms_exclude_negations() {
        let store = store();
        let engine = LinearScan::new(&store, plain());
        let query = parse_query("apples -title:Home").unwrap();
        let results = engine.evaluate(&query).unwrap();
        assert_eq!(results.len(), 1);
        let terms: Vec<&str> = results.hits[0].terms.iter().map(String::as_str).collect();
        assert_eq!(terms, vec!["apples"]);
    }

    #[test]
    fn test_unreadable_candidates_are_skipped() {
        let store = MemoryStore::new();
        let engine = LinearScan::new(&store, plain());
        let query = parse_query("page").unwrap();
        let candidates = vec![
            Err(SearchError::DocumentRead {
                page: "Broken".to_string(),
                message: "denied".to_string(),
            }),
            Ok(PageDocument::page("Good", "a page")),
        ];
        let records = engine.evaluate_documents(&query, candidates).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].page_name, "Good");
    }

    #[test]
    fn test_attachments_are_hits() {
        let store = store();
        store.put(PageDocument::attachment("SearchTestPage", "notes.txt", "pears and plums"));
        let engine = LinearScan::new(&store, plain());
        let results = engine.evaluate(&parse_query("plums").unwrap()).unwrap();
        assert_eq!(
            results.keys(),
            vec![("SearchTestPage".to_string(), "notes.txt".to_string())]
        );
        assert!(store.load_document(&DocumentKey::attachment("SearchTestPage", "notes.txt")).unwrap().is_some());
    }
}
