//! Tokenizer and recursive descent parser for wiki search queries.
//!
//! Grammar:
//! ```text
//! query    = sequence
//! sequence = unary (["and"] unary)* ["or" sequence]
//! unary    = "-" atom | atom
//! atom     = "(" sequence ")" | term
//! term     = (MODIFIER ":")* (QUOTED | WORD)
//! ```
//!
//! A sequence is an implicit AND. `or` binds loosest: everything before it
//! in the current sequence becomes the left operand and the remainder of the
//! sequence the right one, so chains nest to the right.

use crate::error::QueryError;
use crate::search::types::*;
use regex::RegexBuilder;

// ============================================================================
// Tokens
// ============================================================================

/// A term as written, before modifiers are resolved.
#[derive(Debug, Clone, PartialEq)]
struct RawTerm {
    /// Modifier names exactly as typed, without the colon.
    modifiers: Vec<String>,
    text: String,
    /// Whether the text came from a quoted literal.
    quoted: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    OpenParen,
    CloseParen,
    /// Negation prefix (a leading `-`).
    Not,
    Term(RawTerm),
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    /// Character offset in the query string.
    position: usize,
}

// ============================================================================
// Tokenizer
// ============================================================================

const QUOTES: [char; 2] = ['"', '\''];

fn ends_word(ch: char) -> bool {
    ch.is_whitespace() || ch == '(' || ch == ')'
}

fn tokenize(input: &str) -> Result<Vec<Token>, QueryError> {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < len {
        let ch = chars[i];

        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        if ch == '(' || ch == ')' {
            let kind = if ch == '(' {
                TokenKind::OpenParen
            } else {
                TokenKind::CloseParen
            };
            tokens.push(Token { kind, position: i });
            i += 1;
            continue;
        }

        // `-` negates only when a term or group follows directly
        if ch == '-' && chars.get(i + 1).is_some_and(|&next| !next.is_whitespace() && next != ')') {
            tokens.push(Token {
                kind: TokenKind::Not,
                position: i,
            });
            i += 1;
            if chars[i] == '(' {
                continue;
            }
        }

        let position = i;
        let mut modifiers = Vec::new();
        while let Some((name, next)) = modifier_at(&chars, i) {
            modifiers.push(name);
            i = next;
        }

        let (text, quoted, next) = read_value(&chars, i)?;
        i = next;
        tokens.push(Token {
            kind: TokenKind::Term(RawTerm {
                modifiers,
                text,
                quoted,
            }),
            position,
        });
    }

    Ok(tokens)
}

/// A recognized modifier name followed by `:` starting at `start`.
///
/// Returns the name and the offset just past the colon.
fn modifier_at(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut i = start;
    while i < chars.len() && chars[i].is_ascii_alphabetic() {
        i += 1;
    }
    if i == start || chars.get(i) != Some(&':') {
        return None;
    }
    let name: String = chars[start..i].iter().collect();
    resolve_modifier(&name)?;
    Some((name, i + 1))
}

/// Read a quoted literal or a bare word starting at `start`.
///
/// An unterminated quote is not an error: the text is then read as a bare
/// word, quote character included.
fn read_value(chars: &[char], start: usize) -> Result<(String, bool, usize), QueryError> {
    let len = chars.len();

    if let Some(&quote) = chars.get(start).filter(|c| QUOTES.contains(c)) {
        let mut text = String::new();
        let mut i = start + 1;
        while i < len {
            if chars[i] == quote {
                if chars.get(i + 1) == Some(&quote) {
                    // doubled quote is a literal quote
                    text.push(quote);
                    i += 2;
                    continue;
                }
                if text.is_empty() {
                    return Err(QueryError::EmptyQuote { position: start });
                }
                return Ok((text, true, i + 1));
            }
            text.push(chars[i]);
            i += 1;
        }
    }

    let mut i = start;
    while i < len && !ends_word(chars[i]) {
        i += 1;
    }
    Ok((chars[start..i].iter().collect(), false, i))
}

// ============================================================================
// Modifiers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modifier {
    Field(FieldScope),
    Regex,
    Case,
}

impl Modifier {
    fn name(&self) -> &'static str {
        match self {
            Modifier::Field(field) => field.modifier().unwrap_or("fulltext"),
            Modifier::Regex => "regex",
            Modifier::Case => "case",
        }
    }
}

/// Modifier names in the order abbreviations are resolved. `c` is `case`
/// and `l` is `linkto` because they come first.
const MODIFIERS: [(&str, Modifier); 8] = [
    ("title", Modifier::Field(FieldScope::Title)),
    ("regex", Modifier::Regex),
    ("case", Modifier::Case),
    ("linkto", Modifier::Field(FieldScope::LinkTo)),
    ("category", Modifier::Field(FieldScope::Category)),
    ("mimetype", Modifier::Field(FieldScope::MimeType)),
    ("language", Modifier::Field(FieldScope::Language)),
    ("domain", Modifier::Field(FieldScope::Domain)),
];

fn resolve_modifier(name: &str) -> Option<Modifier> {
    let lower = name.to_lowercase();
    MODIFIERS
        .iter()
        .find(|(full, _)| full.starts_with(lower.as_str()))
        .map(|(_, modifier)| *modifier)
}

// ============================================================================
// Parser
// ============================================================================

/// Options that change how a query string is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// Treat unprefixed terms as title terms.
    pub title_search: bool,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    options: ParseOptions,
}

impl Parser {
    fn new(tokens: Vec<Token>, options: ParseOptions) -> Self {
        Self {
            tokens,
            pos: 0,
            options,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Whether the current token is the given keyword in a position where it
    /// joins terms. At the end of input or before `)` it is plain text.
    fn at_keyword(&self, keyword: &str) -> bool {
        let is_keyword = match self.peek() {
            Some(Token {
                kind: TokenKind::Term(raw),
                ..
            }) => raw.modifiers.is_empty() && !raw.quoted && raw.text.eq_ignore_ascii_case(keyword),
            _ => false,
        };
        let joins = match self.tokens.get(self.pos + 1) {
            Some(next) => next.kind != TokenKind::CloseParen,
            None => false,
        };
        is_keyword && joins
    }

    /// sequence = unary (["and"] unary)* ["or" sequence]
    fn parse_sequence(&mut self) -> Result<AndNode, QueryError> {
        let mut children = Vec::new();

        while let Some(token) = self.peek() {
            if token.kind == TokenKind::CloseParen {
                break;
            }
            if !children.is_empty() && self.at_keyword("or") {
                self.advance(); // consume or
                let left = QueryNode::And(AndNode::new(children));
                let right = QueryNode::And(self.parse_sequence()?);
                return Ok(AndNode::new(vec![QueryNode::Or(OrNode::new(left, right))]));
            }
            if !children.is_empty() && self.at_keyword("and") {
                self.advance(); // consume and
                continue;
            }
            children.push(self.parse_unary()?);
        }

        Ok(AndNode::new(children))
    }

    /// unary = "-" atom | atom
    fn parse_unary(&mut self) -> Result<QueryNode, QueryError> {
        let negated = matches!(self.peek(), Some(Token { kind: TokenKind::Not, .. }));
        if negated {
            self.advance(); // consume -
        }

        let mut node = self.parse_atom()?;
        if negated {
            match &mut node {
                QueryNode::Term(term) => term.negated = true,
                QueryNode::And(and) => and.negated = true,
                QueryNode::Or(or) => or.negated = true,
            }
        }
        Ok(node)
    }

    /// atom = "(" sequence ")" | term
    fn parse_atom(&mut self) -> Result<QueryNode, QueryError> {
        match self.advance() {
            Some(Token {
                kind: TokenKind::OpenParen,
                position,
            }) => {
                let group = self.parse_sequence()?;
                match self.advance() {
                    Some(Token {
                        kind: TokenKind::CloseParen,
                        ..
                    }) if group.children.is_empty() => Err(QueryError::EmptyGroup { position }),
                    Some(Token {
                        kind: TokenKind::CloseParen,
                        ..
                    }) => Ok(QueryNode::And(group)),
                    _ => Err(QueryError::UnmatchedOpen { position }),
                }
            }
            Some(Token {
                kind: TokenKind::CloseParen,
                position,
            }) => Err(QueryError::UnmatchedClose { position }),
            Some(Token {
                kind: TokenKind::Term(raw),
                ..
            }) => self.build_term(raw).map(QueryNode::Term),
            // the tokenizer always follows a negation with a term or group
            Some(Token {
                kind: TokenKind::Not,
                ..
            })
            | None => Err(QueryError::EmptyTerm {
                modifiers: "-".to_string(),
            }),
        }
    }

    fn build_term(&self, raw: RawTerm) -> Result<TermNode, QueryError> {
        let mut field: Option<FieldScope> = None;
        let mut is_regex = false;
        let mut case_sensitive = false;

        for name in &raw.modifiers {
            let Some(modifier) = resolve_modifier(name) else {
                continue;
            };
            match modifier {
                Modifier::Field(scope) => match field {
                    Some(existing) if existing == scope => {
                        return Err(QueryError::DuplicateModifier {
                            modifier: modifier.name().to_string(),
                        });
                    }
                    Some(existing) => {
                        return Err(QueryError::ConflictingField {
                            first: existing.to_string(),
                            second: scope.to_string(),
                        });
                    }
                    None => field = Some(scope),
                },
                Modifier::Regex if is_regex => {
                    return Err(QueryError::DuplicateModifier {
                        modifier: modifier.name().to_string(),
                    });
                }
                Modifier::Regex => is_regex = true,
                Modifier::Case if case_sensitive => {
                    return Err(QueryError::DuplicateModifier {
                        modifier: modifier.name().to_string(),
                    });
                }
                Modifier::Case => case_sensitive = true,
            }
        }

        if raw.text.is_empty() {
            let modifiers: Vec<String> = raw.modifiers.iter().map(|m| format!("{}:", m)).collect();
            return Err(QueryError::EmptyTerm {
                modifiers: modifiers.concat(),
            });
        }

        if is_regex {
            RegexBuilder::new(&raw.text)
                .case_insensitive(!case_sensitive)
                .build()
                .map_err(|e| QueryError::InvalidRegex {
                    pattern: raw.text.clone(),
                    message: e.to_string(),
                })?;
        }

        let default_field = if self.options.title_search {
            FieldScope::Title
        } else {
            FieldScope::FullText
        };

        Ok(TermNode {
            field: field.unwrap_or(default_field),
            text: raw.text,
            case_sensitive,
            is_regex,
            negated: false,
        })
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Parse a search query string into a [`Query`] tree.
pub fn parse_query(input: &str) -> Result<Query, QueryError> {
    parse_query_with(input, ParseOptions::default())
}

/// Parse a search query string with explicit [`ParseOptions`].
pub fn parse_query_with(input: &str, options: ParseOptions) -> Result<Query, QueryError> {
    if input.trim().is_empty() {
        return Err(QueryError::EmptyQuery);
    }

    let tokens = tokenize(input)?;
    let mut parser = Parser::new(tokens, options);
    let root = parser.parse_sequence()?;

    // parse_sequence only stops early at a closing bracket
    if let Some(token) = parser.peek() {
        return Err(QueryError::UnmatchedClose {
            position: token.position,
        });
    }
    if root.children.is_empty() {
        return Err(QueryError::EmptyQuery);
    }

    Ok(Query {
        text: input.to_string(),
        root: QueryNode::And(root),
    })
}

// ============================================================================
// Tests
// ============================================================================
