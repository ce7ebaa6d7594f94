//! Metadata extraction from wiki markup.
//!
//! Only what search needs is parsed: the processing instructions at the top
//! of a page, link targets and the categories among them.

use regex::Regex;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::LazyLock;

// Bracketed link: [[Target]] or [[Target|label]]
static BRACKET_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[([^\]\|]+)(?:\|[^\]]*)?\]\]").unwrap()
});

// CamelCase word with optional sub-page parts: FrontPage, HelpOnEditing/SubPage
static WIKI_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[A-Z][a-z0-9]+){2,}(?:/(?:[A-Z][a-z0-9]+){2,})*\b").unwrap()
});

static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[a-zA-Z][a-zA-Z0-9+.-]*://\S+").unwrap()
});

// Preformatted section: {{{ ... }}}
static PREFORMATTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{\{\{.*?\}\}\}").unwrap()
});

/// The default category pattern.
pub const DEFAULT_CATEGORY_PATTERN: &str = "^Category[A-Z]";

/// Category pages that are templates, not categories.
const CATEGORY_TEMPLATE: &str = "CategoryTemplate";

/// Settings read from the processing instructions at the top of a page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingInstructions {
    pub language: Option<String>,
    /// Markup format name, `wiki` when absent.
    pub format: Option<String>,
    /// Raw `#acl` line contents.
    pub acl: Option<String>,
}

impl ProcessingInstructions {
    pub fn mimetype(&self) -> String {
        format!("text/{}", self.format.as_deref().unwrap_or("wiki"))
    }
}

/// Split a page into its processing instructions and its body.
///
/// Instructions are the leading lines starting with `#`; `##` lines are
/// comments. The body starts at the first line that is not an instruction.
pub fn split_processing_instructions(text: &str) -> (ProcessingInstructions, &str) {
    let mut pi = ProcessingInstructions::default();
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let Some(rest) = line.strip_prefix('#') else {
            break;
        };
        offset += line.len();

        if rest.starts_with('#') {
            continue;
        }
        let rest = rest.trim();
        let (verb, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        let args = args.trim();
        match verb.to_lowercase().as_str() {
            "language" if !args.is_empty() => pi.language = Some(args.to_string()),
            "format" if !args.is_empty() => {
                let name = args.split_whitespace().next().unwrap_or("wiki");
                pi.format = Some(name.to_lowercase());
            }
            "acl" => pi.acl = Some(args.to_string()),
            _ => {}
        }
    }

    (pi, &text[offset..])
}

fn in_ranges(pos: usize, ranges: &[Range<usize>]) -> bool {
    ranges.iter().any(|r| r.contains(&pos))
}

/// Extract link targets from a page body, deduplicated in order.
///
/// Preformatted sections are skipped, as are URLs, `attachment:` links and
/// WikiWords escaped with `!`.
pub fn parse_links(body: &str) -> Vec<String> {
    let preformatted: Vec<Range<usize>> = PREFORMATTED.find_iter(body).map(|m| m.range()).collect();

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    let mut push = |target: &str| {
        if seen.insert(target.to_string()) {
            links.push(target.to_string());
        }
    };

    // WikiWords are not searched inside brackets or URLs
    let mut excluded = preformatted.clone();
    excluded.extend(URL.find_iter(body).map(|m| m.range()));

    // Bracketed links and WikiWords sorted by position keep document order
    let mut found: Vec<(usize, String)> = Vec::new();

    for cap in BRACKET_LINK.captures_iter(body) {
        let Some(whole) = cap.get(0) else { continue };
        excluded.push(whole.range());
        if in_ranges(whole.start(), &preformatted) {
            continue;
        }
        let target = cap.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        if target.is_empty() || target.starts_with("attachment:") || target.contains("://") {
            continue;
        }
        // drop anchors: [[Page#section]]
        let target = target.split('#').next().unwrap_or(target).trim();
        if !target.is_empty() {
            found.push((whole.start(), target.to_string()));
        }
    }

    for m in WIKI_WORD.find_iter(body) {
        if in_ranges(m.start(), &excluded) {
            continue;
        }
        if body[..m.start()].ends_with('!') {
            continue;
        }
        found.push((m.start(), m.as_str().to_string()));
    }

    found.sort_by_key(|(pos, _)| *pos);
    for (_, target) in &found {
        push(target);
    }
    links
}

/// The links that name category pages.
pub fn categories(links: &[String], pattern: &Regex) -> Vec<String> {
    links
        .iter()
        .filter(|link| link.as_str() != CATEGORY_TEMPLATE && pattern.is_match(link))
        .cloned()
        .collect()
}

/// Guess a mimetype from a file name's extension.
pub fn mimetype_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "text" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "xml" => "text/xml",
        "css" => "text/css",
        "py" => "text/x-python",
        "rs" => "text/x-rust",
        "c" | "h" => "text/x-c",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Whether `identity` may read a page with the given `#acl` line.
///
/// Entries are `Name:right,right`; the first entry naming the user, `Known`
/// (any logged-in user) or `All` decides. Pages without a matching entry
/// are readable.
pub fn acl_allows_read(acl: &str, identity: Option<&str>) -> bool {
    for entry in acl.split_whitespace() {
        let Some((name, rights)) = entry.split_once(':') else {
            continue;
        };
        let applies = match name {
            "All" => true,
            "Known" => identity.is_some(),
            _ => identity == Some(name),
        };
        if applies {
            return rights.split(',').any(|right| right.trim() == "read");
        }
    }
    true
}
