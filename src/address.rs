use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::trace;

/// Street-type suffixes used by Amsterdam street names.
const STREET_SUFFIXES: &str = "straat|gracht|laan|plein|weg|dam|kade|singel|steeg|dijk";

/// A house number such as `35`, `12a`, `35-H` or `12-14`.
const HOUSE_NUMBER: &str = r"\d+[A-Za-z]?(?:-\d+[A-Za-z]?|-[A-Za-z]+)?";

/// Optional `, 1015 MN Amsterdam` tail.
const POSTAL_TAIL: &str = r"(?:\s*,\s*\d{4}\s*[A-Za-z]{2}\s+(?i:amsterdam))?";

/// An address found in a piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedAddress {
    /// Normalized address text.
    pub text: String,
    /// Byte offset of the first occurrence in the source text.
    pub offset: usize,
    /// Byte offset just past the first occurrence.
    pub end: usize,
}

fn patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let sources = [
            // Suffixed street names, with or without postal code
            format!(r"\b[A-Z][a-z]*(?i:{STREET_SUFFIXES})\s+{HOUSE_NUMBER}\b{POSTAL_TAIL}"),
            // Any capitalized name followed by a number
            format!(r"\b[A-Z][a-z]+\s+{HOUSE_NUMBER}\b{POSTAL_TAIL}"),
            // Names with a `de` infix, e.g. "Willem de Zwijgerlaan 12"
            format!(
                r"\b[A-Z][a-z]+\s+(?i:de)\s+[A-Z][a-z]+(?i:{STREET_SUFFIXES})?\s+{HOUSE_NUMBER}\b{POSTAL_TAIL}"
            ),
            // Singel has no suffix of its own
            format!(r"\bSingel\s+{HOUSE_NUMBER}\b{POSTAL_TAIL}"),
        ];

        sources
            .iter()
            .filter_map(|source| match Regex::new(source) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::error!("Invalid address pattern {}: {}", source, e);
                    None
                }
            })
            .collect()
    })
}

fn whitespace() -> &'static Regex {
    static WS: OnceLock<Regex> = OnceLock::new();
    WS.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

fn comma() -> &'static Regex {
    static COMMA: OnceLock<Regex> = OnceLock::new();
    COMMA.get_or_init(|| Regex::new(r"\s*,\s*").expect("static regex"))
}

/// Collapse whitespace runs and normalize the spacing of the first comma to `", "`.
pub fn normalize(raw: &str) -> String {
    let collapsed = whitespace().replace_all(raw.trim(), " ");
    comma().replacen(&collapsed, 1, ", ").into_owned()
}

/// Extract addresses from `text`, deduplicated and ordered by first occurrence.
pub fn extract(text: &str) -> Vec<String> {
    extract_spans(text).into_iter().map(|a| a.text).collect()
}

/// Like [`extract`], but keeps the offsets of each first occurrence.
///
/// Every pattern runs over the whole text independently. Matches are keyed by
/// their normalized text and only the earliest occurrence is retained, so
/// overlapping matches of different patterns (`Willem de Zwijgerlaan 12` and
/// `Zwijgerlaan 12`) are both reported.
pub fn extract_spans(text: &str) -> Vec<ExtractedAddress> {
    let mut matches: Vec<(usize, usize, String)> = Vec::new();
    for pattern in patterns() {
        for m in pattern.find_iter(text) {
            matches.push((m.start(), m.end(), normalize(m.as_str())));
        }
    }

    let mut earliest: HashMap<String, (usize, usize)> = HashMap::new();
    for (start, end, address) in matches {
        match earliest.get(&address) {
            Some((seen, _)) if *seen <= start => {}
            _ => {
                earliest.insert(address, (start, end));
            }
        }
    }

    let mut found: Vec<ExtractedAddress> = earliest
        .into_iter()
        .map(|(text, (offset, end))| ExtractedAddress { text, offset, end })
        .collect();
    found.sort_by(|a, b| a.offset.cmp(&b.offset).then_with(|| a.text.cmp(&b.text)));

    trace!(
        "Detected {} address(es): {:?}",
        found.len(),
        found.iter().map(|a| a.text.as_str()).collect::<Vec<_>>()
    );
    found
}

/// Extract addresses from the completed lines of a text that is still growing.
///
/// Only text up to the last newline is considered, so an address that is
/// still being streamed (`Westerstraat 3` on its way to `Westerstraat 35`)
/// is never reported early.
pub fn extract_settled(text: &str) -> Vec<String> {
    match text.rfind('\n') {
        Some(pos) => extract(&text[..=pos]),
        None => Vec::new(),
    }
}
