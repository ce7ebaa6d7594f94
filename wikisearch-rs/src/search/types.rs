//! Query tree and result types for wiki search.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The part of a document a term is matched against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldScope {
    /// Page title and body text.
    #[default]
    FullText,
    Title,
    Category,
    LinkTo,
    MimeType,
    Language,
    Domain,
}

impl FieldScope {
    /// All scopes, in the order they are stored in the index.
    pub const ALL: [FieldScope; 7] = [
        FieldScope::FullText,
        FieldScope::Title,
        FieldScope::Category,
        FieldScope::LinkTo,
        FieldScope::MimeType,
        FieldScope::Language,
        FieldScope::Domain,
    ];

    /// The modifier name used in query strings, `None` for full text.
    pub fn modifier(&self) -> Option<&'static str> {
        match self {
            FieldScope::FullText => None,
            FieldScope::Title => Some("title"),
            FieldScope::Category => Some("category"),
            FieldScope::LinkTo => Some("linkto"),
            FieldScope::MimeType => Some("mimetype"),
            FieldScope::Language => Some("language"),
            FieldScope::Domain => Some("domain"),
        }
    }

    /// Whether the field holds prose that the analyzer splits into words.
    ///
    /// Metadata fields (links, categories, mimetype...) are matched against
    /// whole values instead.
    pub fn is_textual(&self) -> bool {
        matches!(self, FieldScope::FullText | FieldScope::Title)
    }
}

impl fmt::Display for FieldScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.modifier().unwrap_or("fulltext"))
    }
}

/// A single search term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermNode {
    pub field: FieldScope,
    pub text: String,
    pub case_sensitive: bool,
    pub is_regex: bool,
    pub negated: bool,
}

impl TermNode {
    /// A plain, case-insensitive full-text term.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            field: FieldScope::FullText,
            text: text.into(),
            case_sensitive: false,
            is_regex: false,
            negated: false,
        }
    }

    /// Whether stem equality may be used when matching this term.
    pub fn allows_stemming(&self) -> bool {
        !self.is_regex && !self.case_sensitive && self.field.is_textual()
    }
}

/// Every child must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AndNode {
    pub children: Vec<QueryNode>,
    pub negated: bool,
}

impl AndNode {
    pub fn new(children: Vec<QueryNode>) -> Self {
        Self {
            children,
            negated: false,
        }
    }
}

/// Either side must match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrNode {
    pub left: Box<QueryNode>,
    pub right: Box<QueryNode>,
    pub negated: bool,
}

impl OrNode {
    pub fn new(left: QueryNode, right: QueryNode) -> Self {
        Self {
            left: Box::new(left),
            right: Box::new(right),
            negated: false,
        }
    }
}

/// A node of the parsed query tree.
///
/// Negation is a flag carried by each node rather than a node kind of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryNode {
    Term(TermNode),
    And(AndNode),
    Or(OrNode),
}

impl QueryNode {
    pub fn is_negated(&self) -> bool {
        match self {
            QueryNode::Term(term) => term.negated,
            QueryNode::And(and) => and.negated,
            QueryNode::Or(or) => or.negated,
        }
    }

    /// Visit every leaf term, depth first, left to right.
    pub fn for_each_term<'a>(&'a self, visit: &mut impl FnMut(&'a TermNode)) {
        match self {
            QueryNode::Term(term) => visit(term),
            QueryNode::And(and) => {
                for child in &and.children {
                    child.for_each_term(visit);
                }
            }
            QueryNode::Or(or) => {
                or.left.for_each_term(visit);
                or.right.for_each_term(visit);
            }
        }
    }
}

impl fmt::Display for TermNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("-")?;
        }
        if let Some(modifier) = self.field.modifier() {
            write!(f, "{}:", modifier)?;
        }
        if self.is_regex {
            f.write_str("re:")?;
        }
        if self.case_sensitive {
            f.write_str("case:")?;
        }
        write!(f, "\"{}\"", self.text)
    }
}

impl fmt::Display for QueryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryNode::Term(term) => term.fmt(f),
            QueryNode::And(and) => {
                if and.negated {
                    f.write_str("-")?;
                }
                f.write_str("[")?;
                for (i, child) in and.children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    child.fmt(f)?;
                }
                f.write_str("]")
            }
            QueryNode::Or(or) => {
                if or.negated {
                    f.write_str("-")?;
                }
                write!(f, "[{} or {}]", or.left, or.right)
            }
        }
    }
}

/// A parsed query: the original text plus its tree.
///
/// The root is always an AND sequence, even for a single term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub root: QueryNode,
}

impl Query {
    /// All leaf terms of the query, in query order.
    pub fn terms(&self) -> Vec<&TermNode> {
        let mut terms = Vec::new();
        self.root.for_each_term(&mut |term| terms.push(term));
        terms
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root.fmt(f)
    }
}

/// One field of one document matched one term.
///
/// Evaluators emit these; the aggregator folds them into [`Hit`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub page_name: String,
    pub attachment: String,
    pub field: FieldScope,
    /// The matched term text. `None` when the document only satisfied a
    /// negation and no positive term applies.
    pub term: Option<String>,
    pub weight: f32,
}

/// A matching page or attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub page_name: String,
    /// Attachment file name, empty for the page itself.
    pub attachment: String,
    pub terms: BTreeSet<String>,
    pub weight: f32,
}

impl Hit {
    pub fn is_attachment(&self) -> bool {
        !self.attachment.is_empty()
    }
}

/// Ordered hits for one search call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub query: String,
    pub hits: Vec<Hit>,
}

impl SearchResults {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Keep `limit` hits starting at `offset`; no limit keeps the rest.
    pub fn paginate(mut self, offset: usize, limit: Option<usize>) -> Self {
        let hits: Vec<Hit> = self.hits.into_iter().skip(offset).collect();
        self.hits = match limit {
            Some(limit) => hits.into_iter().take(limit).collect(),
            None => hits,
        };
        self
    }

    /// (page, attachment) keys in result order.
    pub fn keys(&self) -> Vec<(String, String)> {
        self.hits
            .iter()
            .map(|hit| (hit.page_name.clone(), hit.attachment.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(page: &str) -> Hit {
        Hit {
            page_name: page.to_string(),
            attachment: String::new(),
            terms: BTreeSet::new(),
            weight: 1.0,
        }
    }

    #[test]
    fn test_term_display_orders_modifiers() {
        let term = TermNode {
            field: FieldScope::Title,
            text: "ccc".to_string(),
            case_sensitive: true,
            is_regex: true,
            negated: true,
        };
        assert_eq!(term.to_string(), "-title:re:case:\"ccc\"");
    }

    #[test]
    fn test_and_or_display() {
        let or = QueryNode::Or(OrNode::new(
            QueryNode::And(AndNode::new(vec![QueryNode::Term(TermNode::new("a"))])),
            QueryNode::And(AndNode::new(vec![QueryNode::Term(TermNode::new("b"))])),
        ));
        let root = QueryNode::And(AndNode::new(vec![or]));
        assert_eq!(root.to_string(), "[[[\"a\"] or [\"b\"]]]");
    }

    #[test]
    fn test_language_field_display() {
        let mut term = TermNode::new("de");
        term.field = FieldScope::Language;
        assert_eq!(term.to_string(), "language:\"de\"");
    }

    #[test]
    fn test_paginate() {
        let results = SearchResults {
            query: "x".to_string(),
            hits: vec![hit("A"), hit("B"), hit("C")],
        };
        let page = results.clone().paginate(1, Some(1));
        assert_eq!(page.keys(), vec![("B".to_string(), String::new())]);

        let rest = results.paginate(1, None);
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn test_terms_in_query_order() {
        let root = QueryNode::And(AndNode::new(vec![
            QueryNode::Term(TermNode::new("a")),
            QueryNode::Or(OrNode::new(
                QueryNode::Term(TermNode::new("b")),
                QueryNode::Term(TermNode::new("c")),
            )),
        ]));
        let query = Query {
            text: "a b or c".to_string(),
            root,
        };
        let texts: Vec<&str> = query.terms().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }
}
