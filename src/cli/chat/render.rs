use crossterm::style::{style, Stylize};

use super::conversation_state::{Message, Role};
use crate::address;

/// A run of assistant text, either plain or a detected address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Address(&'a str),
}

/// Split `content` around `addresses`.
///
/// Each address is searched for after the end of the previous one, so the
/// list must be in order of appearance (as [`address::extract`] returns it).
/// Addresses that cannot be found verbatim are skipped.
pub fn highlight<'a>(content: &'a str, addresses: &[String]) -> Vec<Segment<'a>> {
    let mut segments = Vec::new();
    let mut last = 0;

    for address in addresses {
        let Some(found) = content[last..].find(address.as_str()) else {
            continue;
        };
        let start = last + found;
        if start > last {
            segments.push(Segment::Text(&content[last..start]));
        }
        let end = start + address.len();
        segments.push(Segment::Address(&content[start..end]));
        last = end;
    }

    if last < content.len() {
        segments.push(Segment::Text(&content[last..]));
    }
    segments
}

/// Assistant text with its addresses underlined.
pub fn render_highlighted(content: &str) -> String {
    let addresses = address::extract(content);
    highlight(content, &addresses)
        .into_iter()
        .map(|segment| match segment {
            Segment::Text(text) => text.to_string(),
            Segment::Address(text) => style(text).underlined().cyan().to_string(),
        })
        .collect()
}

pub fn address_summary(addresses: &[String]) -> Option<String> {
    if addresses.is_empty() {
        return None;
    }
    Some(format!(
        "{} {}",
        style(format!("Found {} address(es):", addresses.len())).dark_grey(),
        addresses.join("; ")
    ))
}

/// The visible conversation, one labelled block per message.
pub fn render_transcript<'a>(messages: impl Iterator<Item = &'a Message>) -> String {
    let mut out = String::new();
    for message in messages {
        let (label, body) = match message.role() {
            Role::User => (style("You").bold().to_string(), message.content().to_string()),
            Role::Assistant => (
                style("Assistant").bold().cyan().to_string(),
                render_highlighted(message.content()),
            ),
            Role::System => continue,
        };
        out.push_str(&format!(
            "{} {}\n{}\n\n",
            label,
            style(message.created_at().format("%H:%M:%S")).dark_grey(),
            body
        ));
    }
    out
}
