//! Text analysis: splitting page text into search terms.
//!
//! A word is a maximal run of alphanumeric characters. Words written in
//! CamelCase are compounds: the whole word is emitted first, followed by each
//! of its parts, so `HelpOnEditing` yields `helponediting`, `help`, `on` and
//! `editing`. All terms are lowercased. No stop words are removed.

use rust_stemmers::{Algorithm, Stemmer};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// A single analyzed term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Token {
    /// Lowercased word or compound part.
    pub term: String,
    /// Stemmed form, empty when stemming is off or the stem equals the term.
    pub stem: String,
}

impl Token {
    /// The form used for stem comparisons: the stem if there is one.
    pub fn effective_stem(&self) -> &str {
        if self.stem.is_empty() {
            &self.term
        } else {
            &self.stem
        }
    }
}

/// Maps a wiki language code to a stemming algorithm.
fn algorithm_for(language: &str) -> Option<Algorithm> {
    let code = language.split(['-', '_']).next().unwrap_or("").to_lowercase();
    let algorithm = match code.as_str() {
        "ar" => Algorithm::Arabic,
        "da" => Algorithm::Danish,
        "nl" => Algorithm::Dutch,
        "en" => Algorithm::English,
        "fi" => Algorithm::Finnish,
        "fr" => Algorithm::French,
        "de" => Algorithm::German,
        "el" => Algorithm::Greek,
        "hu" => Algorithm::Hungarian,
        "it" => Algorithm::Italian,
        "no" | "nb" | "nn" => Algorithm::Norwegian,
        "pt" => Algorithm::Portuguese,
        "ro" => Algorithm::Romanian,
        "ru" => Algorithm::Russian,
        "es" => Algorithm::Spanish,
        "sv" => Algorithm::Swedish,
        "ta" => Algorithm::Tamil,
        "tr" => Algorithm::Turkish,
        _ => return None,
    };
    Some(algorithm)
}

/// Splits text into [`Token`]s, optionally stemming them.
pub struct Analyzer {
    language: String,
    stemmer: Option<Stemmer>,
}

impl fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analyzer")
            .field("language", &self.language)
            .field("stemming", &self.stemming())
            .finish()
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new("en", false)
    }
}

impl Analyzer {
    /// Create an analyzer for `language`. Stemming is silently disabled for
    /// languages without a stemmer.
    pub fn new(language: &str, stemming: bool) -> Self {
        let stemmer = if stemming {
            algorithm_for(language).map(Stemmer::create)
        } else {
            None
        };
        if stemming && stemmer.is_none() {
            tracing::debug!("No stemmer for language '{}', stemming disabled", language);
        }
        Self {
            language: language.to_string(),
            stemmer,
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn stemming(&self) -> bool {
        self.stemmer.is_some()
    }

    /// Stem a lowercased term. Empty if stemming is off or nothing changes.
    pub fn stem(&self, term: &str) -> String {
        match &self.stemmer {
            Some(stemmer) => {
                let stem = stemmer.stem(term);
                if stem == term {
                    String::new()
                } else {
                    stem.into_owned()
                }
            }
            None => String::new(),
        }
    }

    /// Lazily analyze `text`. Calling it again restarts from the beginning.
    pub fn tokenize<'a>(&'a self, text: &'a str) -> Tokens<'a> {
        Tokens {
            analyzer: self,
            words: words(text),
            pending: VecDeque::new(),
        }
    }

    /// Analyze raw bytes, replacing invalid UTF-8 sequences.
    pub fn tokenize_lossy(&self, bytes: &[u8]) -> Vec<Token> {
        let text = String::from_utf8_lossy(bytes);
        self.tokenize(&text).collect()
    }

    fn token(&self, term: String) -> Token {
        let stem = self.stem(&term);
        Token { term, stem }
    }
}

/// Iterator returned by [`Analyzer::tokenize`].
pub struct Tokens<'a> {
    analyzer: &'a Analyzer,
    words: Words<'a>,
    pending: VecDeque<Token>,
}

impl Iterator for Tokens<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if let Some(token) = self.pending.pop_front() {
            return Some(token);
        }

        let word = self.words.next()?;
        let parts = split_compound(word);
        if parts.len() > 1 {
            for part in parts {
                self.pending.push_back(self.analyzer.token(part.to_lowercase()));
            }
        }
        Some(self.analyzer.token(word.to_lowercase()))
    }
}

/// Maximal alphanumeric runs of `text`, in their original case.
pub fn words(text: &str) -> Words<'_> {
    Words { rest: text }
}

/// Iterator returned by [`words`].
#[derive(Debug, Clone)]
pub struct Words<'a> {
    rest: &'a str,
}

impl<'a> Iterator for Words<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let start = self.rest.find(char::is_alphanumeric)?;
        let tail = &self.rest[start..];
        let end = tail
            .find(|c: char| !c.is_alphanumeric())
            .unwrap_or(tail.len());
        self.rest = &tail[end..];
        Some(&tail[..end])
    }
}

/// Split a word at every lowercase-or-digit to uppercase transition.
pub fn split_compound(word: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut prev: Option<char> = None;

    for (i, ch) in word.char_indices() {
        if let Some(p) = prev {
            if (p.is_lowercase() || p.is_numeric()) && ch.is_uppercase() {
                parts.push(&word[start..i]);
                start = i;
            }
        }
        prev = Some(ch);
    }
    if start < word.len() {
        parts.push(&word[start..]);
    }
    parts
}
