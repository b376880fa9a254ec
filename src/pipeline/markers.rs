//! Marker vocabulary shared by the tagger, the reformatter and the renderer.
//!
//! Two families of markers exist:
//!
//! * **Structural tags** wrap spans of the tagged document: `<h>`, `<li>`,
//!   `<p>` and `<fn>`, each with a matching closing tag. The strings are
//!   bit-exact; the extraction regexes only recognise these spellings.
//! * **Correlation markers** pair an inline footnote reference with its
//!   definition after renumbering:
//!   `{{footnotenumberN}}…{{-footnotenumberN}}` in the body and
//!   `{{footnoteN}}…{{-footnoteN}}` in the footnote section. Both carry the
//!   number `N` in their literal text so a renderer can pair them without
//!   re-parsing the document.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// The four structural span kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagKind {
    Heading,
    ListItem,
    Paragraph,
    Footnote,
}

impl TagKind {
    pub const ALL: [TagKind; 4] = [
        TagKind::Heading,
        TagKind::ListItem,
        TagKind::Paragraph,
        TagKind::Footnote,
    ];

    /// Tag name as it appears between angle brackets.
    pub fn name(self) -> &'static str {
        match self {
            TagKind::Heading => "h",
            TagKind::ListItem => "li",
            TagKind::Paragraph => "p",
            TagKind::Footnote => "fn",
        }
    }

    pub fn open(self) -> &'static str {
        match self {
            TagKind::Heading => "<h>",
            TagKind::ListItem => "<li>",
            TagKind::Paragraph => "<p>",
            TagKind::Footnote => "<fn>",
        }
    }

    pub fn close(self) -> &'static str {
        match self {
            TagKind::Heading => "</h>",
            TagKind::ListItem => "</li>",
            TagKind::Paragraph => "</p>",
            TagKind::Footnote => "</fn>",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        TagKind::ALL.into_iter().find(|k| k.name() == name)
    }
}

/// Matches any of the eight structural tag strings.
pub(crate) static RE_ANY_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(/?)(h|li|p|fn)>").unwrap());

/// Remove every structural tag string, keeping the text between them.
pub fn strip_tags(text: &str) -> String {
    RE_ANY_TAG.replace_all(text, "").into_owned()
}

// ── Positional placeholders ──────────────────────────────────────────────────
//
// Private-use delimiters. Tagged text may already contain them (a PUA glyph
// deep inside a page passes the quality checks), so the reformatter escapes
// existing U+E000 / U+E001 before it inserts placeholders and restores them
// once the placeholders are gone.

pub(crate) static RE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x{E000}FN_REF:(\d+)\x{E001}").unwrap());

/// Placeholder left in the body where the footnote with this 1-based
/// encounter index was extracted.
pub(crate) fn placeholder(index: usize) -> String {
    format!("\u{E000}FN_REF:{index}\u{E001}")
}

const ESCAPE: char = '\u{E002}';

/// Replace U+E000, U+E001 and the escape char itself with two-char escape
/// sequences so no placeholder can be forged by the input.
pub(crate) fn escape_delimiters(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{E000}' => out.extend([ESCAPE, '0']),
            '\u{E001}' => out.extend([ESCAPE, '1']),
            ESCAPE => out.extend([ESCAPE, '2']),
            _ => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape_delimiters`]. A dangling escape char is kept as is.
pub(crate) fn unescape_delimiters(text: &str) -> String {
    if !text.contains(ESCAPE) {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != ESCAPE {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('\u{E000}'),
            Some('1') => out.push('\u{E001}'),
            Some('2') => out.push(ESCAPE),
            Some(other) => out.extend([ESCAPE, other]),
            None => out.push(ESCAPE),
        }
    }
    out
}

// ── Correlation markers ──────────────────────────────────────────────────────

static RE_REFERENCE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\{\{footnotenumber(\d+)\}\}(.*?)\{\{-footnotenumber\d+\}\}").unwrap()
});

static RE_DEFINITION_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{\{footnote(\d+)\}\}(.*?)\{\{-footnote\d+\}\}").unwrap());

/// Body-side marker: footnote `number`, displayed as `display`.
pub fn reference_marker(number: usize, display: &str) -> String {
    format!("{{{{footnotenumber{number}}}}}{display}{{{{-footnotenumber{number}}}}}")
}

/// Section-side marker wrapping the full definition text.
pub fn definition_marker(number: usize, content: &str) -> String {
    format!("{{{{footnote{number}}}}}{content}{{{{-footnote{number}}}}}")
}

/// Footnote numbers of every reference marker, in encounter order.
pub fn reference_numbers(text: &str) -> Vec<usize> {
    RE_REFERENCE_MARKER
        .captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

/// Footnote numbers of every definition marker, in encounter order.
pub fn definition_numbers(text: &str) -> Vec<usize> {
    RE_DEFINITION_MARKER
        .captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

/// Renumber existing correlation markers to `1..N` by reference order.
///
/// Each distinct reference number gets the next number on its first
/// appearance in the text; repeated references to one footnote share it.
/// Definitions follow their reference through the old number and the
/// definition slots are refilled in the new order, so a reference moved by
/// hand keeps pointing at its own note. Display text and definition content
/// are preserved.
///
/// A definition whose reference was deleted is kept, numbered after every
/// referenced footnote, and logged. A reference without a definition keeps
/// its new number and is logged.
pub fn renumber_correlation_markers(text: &str) -> String {
    let mut renumbered: HashMap<usize, usize> = HashMap::new();
    let mut next = 0usize;
    let body = RE_REFERENCE_MARKER.replace_all(text, |caps: &Captures<'_>| {
        let number = match caps[1].parse::<usize>() {
            Ok(old) => *renumbered.entry(old).or_insert_with(|| {
                next += 1;
                next
            }),
            Err(_) => {
                next += 1;
                next
            }
        };
        reference_marker(number, &caps[2])
    });

    let mut referenced: Vec<(usize, String)> = Vec::new();
    let mut orphans: Vec<(usize, String)> = Vec::new();
    for caps in RE_DEFINITION_MARKER.captures_iter(&body) {
        let old = caps[1].parse::<usize>().ok();
        match old.and_then(|n| renumbered.get(&n)) {
            Some(&number) => referenced.push((number, caps[2].to_string())),
            None => orphans.push((old.unwrap_or(0), caps[2].to_string())),
        }
    }
    // Stable: duplicate definitions of one footnote keep their order.
    referenced.sort_by_key(|(number, _)| *number);

    let defined: HashSet<usize> = referenced.iter().map(|(n, _)| *n).collect();
    let undefined = (1..=next).filter(|n| !defined.contains(n)).count();
    if undefined > 0 {
        warn!("{} footnote reference(s) have no definition", undefined);
    }

    let mut slots: Vec<String> = referenced
        .iter()
        .map(|(number, content)| definition_marker(*number, content))
        .collect();
    for (i, (old, content)) in orphans.iter().enumerate() {
        let number = next + i + 1;
        warn!(
            "Footnote definition {} has no reference; kept as {}",
            old, number
        );
        slots.push(definition_marker(number, content));
    }

    let mut slots = slots.into_iter();
    RE_DEFINITION_MARKER
        .replace_all(&body, |caps: &Captures<'_>| {
            slots.next().unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
