//! Deterministic reformatting of tagged text.
//!
//! No LLM is involved here: everything below is exact text transformation,
//! so the same tagged input always yields byte-identical output.
//!
//! ## Steps (order matters)
//!
//! 1. [`extract_footnotes`] — pull every `<fn>…</fn>` span out of the body,
//!    in encounter order, leaving a positional placeholder behind. This runs
//!    first because footnote spans may contain structural markup that has to
//!    travel with the footnote rather than be flattened into the body.
//! 2. [`flatten_structure`] — turn `<h>`, `<li>` and `<p>` spans into plain
//!    [`StructuralBlock`]s. Text outside every recognised span is dropped:
//!    untagged fragments are treated as noise.
//! 3. [`finalize`] — number footnotes `1..N` by encounter index, recover each
//!    footnote's original display marker, and swap placeholders for
//!    correlation markers.
//!
//! A footnote placeholder that sits outside every span would be dropped with
//! the surrounding noise in step 2. Such references are recorded as
//! [`DetachedReference`]s and re-anchored to the end of the preceding block
//! (or the start of the first block), so that every definition in the
//! footnote section keeps exactly one reference in the body.

use crate::pipeline::markers::{
    definition_marker, escape_delimiters, placeholder, reference_marker, strip_tags,
    unescape_delimiters, RE_PLACEHOLDER,
};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Kind of a flattened body block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    Heading,
    ListItem,
    Paragraph,
}

/// One untagged block of the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralBlock {
    pub kind: BlockKind,
    pub text: String,
}

/// An extracted footnote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Footnote {
    /// 1-based encounter order; also the final footnote number.
    pub original_index: usize,
    /// Definition text, tags stripped and line breaks collapsed.
    pub content: String,
    /// Leading marker recovered from the content, or a synthesized `[n]`.
    pub original_marker: String,
}

/// Reconstructed document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalDocument {
    /// Flattened blocks with inline reference markers.
    pub body: String,
    /// One definition marker per line, in encounter order.
    pub footnote_section: String,
    pub footnotes: Vec<Footnote>,
}

impl FinalDocument {
    /// Body, a blank line, then the footnote section; trimmed.
    pub fn final_text(&self) -> String {
        if self.footnote_section.is_empty() {
            self.body.trim().to_string()
        } else {
            format!("{}\n\n{}", self.body, self.footnote_section)
                .trim()
                .to_string()
        }
    }
}

/// Audit data reported upward; not used internally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FootnoteAnalysis {
    pub count: usize,
}

/// Result of [`reformat`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReformatOutput {
    pub final_text: String,
    pub footnote_analysis: FootnoteAnalysis,
    pub document: FinalDocument,
}

/// Body with footnotes replaced by placeholders, plus the raw footnote spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFootnotes {
    pub body: String,
    /// Inner content of each `<fn>` span, trimmed, in encounter order.
    pub footnotes: Vec<String>,
}

/// A footnote reference found outside every structural span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetachedReference {
    /// Index of the last block emitted before the reference, if any.
    pub after_block: Option<usize>,
    /// 1-based footnote index.
    pub footnote: usize,
}

/// Output of [`flatten_structure`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlattenedBody {
    pub blocks: Vec<StructuralBlock>,
    pub detached: Vec<DetachedReference>,
}

impl FlattenedBody {
    /// Blocks joined with a blank line.
    pub fn text(&self) -> String {
        join_blocks(self.blocks.iter().map(|b| b.text.as_str()))
    }
}

/// Run all three steps.
pub fn reformat(tagged: &str) -> ReformatOutput {
    let extracted = extract_footnotes(tagged);
    let flattened = flatten_structure(&extracted.body);
    let document = finalize(flattened, &extracted.footnotes);
    ReformatOutput {
        final_text: document.final_text(),
        footnote_analysis: FootnoteAnalysis {
            count: document.footnotes.len(),
        },
        document,
    }
}

// ── Step 1: extraction ───────────────────────────────────────────────────────

static RE_FOOTNOTE_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<fn>(.*?)</fn>").unwrap());

/// Replace every `<fn>…</fn>` span with a placeholder carrying its 1-based
/// encounter index. An unmatched `<fn>` is left in place.
///
/// Placeholder delimiters already present in `tagged` are escaped first, so
/// body and footnotes stay escaped until [`finalize`] restores them.
pub fn extract_footnotes(tagged: &str) -> ExtractedFootnotes {
    let escaped = escape_delimiters(tagged);
    let mut footnotes = Vec::new();
    let body = RE_FOOTNOTE_SPAN
        .replace_all(&escaped, |caps: &Captures<'_>| {
            footnotes.push(caps[1].trim().to_string());
            placeholder(footnotes.len())
        })
        .into_owned();
    ExtractedFootnotes { body, footnotes }
}

// ── Step 2: structural flattening ────────────────────────────────────────────

static RE_BLOCK_SPAN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<h>(?P<h>.*?)</h>|<li>(?P<li>.*?)</li>|<p>(?P<p>.*?)</p>").unwrap()
});

static RE_LINE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\n\s*").unwrap());

/// Strip tags, collapse internal line breaks to single spaces, trim.
fn clean_span(text: &str) -> String {
    let stripped = strip_tags(text);
    RE_LINE_BREAK.replace_all(&stripped, " ").trim().to_string()
}

fn join_blocks<'a>(blocks: impl Iterator<Item = &'a str>) -> String {
    blocks.collect::<Vec<_>>().join("\n\n")
}

/// Turn heading / list-item / paragraph spans into blocks, in document
/// order. Anything outside a recognised span is dropped, apart from
/// footnote placeholders, which are recorded as detached references.
pub fn flatten_structure(body: &str) -> FlattenedBody {
    let mut flat = FlattenedBody::default();
    let mut last_end = 0usize;

    for caps in RE_BLOCK_SPAN.captures_iter(body) {
        let Some(whole) = caps.get(0) else { continue };
        record_detached(&body[last_end..whole.start()], &mut flat);
        last_end = whole.end();

        let (kind, inner) = if let Some(m) = caps.name("h") {
            (BlockKind::Heading, m.as_str())
        } else if let Some(m) = caps.name("li") {
            (BlockKind::ListItem, m.as_str())
        } else if let Some(m) = caps.name("p") {
            (BlockKind::Paragraph, m.as_str())
        } else {
            continue;
        };

        let text = clean_span(inner);
        if !text.is_empty() {
            flat.blocks.push(StructuralBlock { kind, text });
        }
    }
    record_detached(&body[last_end..], &mut flat);

    flat
}

fn record_detached(gap: &str, flat: &mut FlattenedBody) {
    for caps in RE_PLACEHOLDER.captures_iter(gap) {
        if let Ok(footnote) = caps[1].parse::<usize>() {
            flat.detached.push(DetachedReference {
                after_block: flat.blocks.len().checked_sub(1),
                footnote,
            });
        }
    }
}

// ── Step 3: footnote finalization ────────────────────────────────────────────

// Alternatives are tried in order and the first one that matches wins:
// bracketed digits, parenthesized digits, digits with a closing paren,
// superscript digits, small roman numerals in parens, then `N.` followed by
// whitespace. A footnote whose text merely starts with an unrelated number
// is indistinguishable from a marked one; no attempt is made to tell them
// apart.
static RE_LEADING_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(?:(?P<marker>\[\d{1,4}\]|\(\d{1,4}\)|\d{1,4}\)|[⁰¹²³⁴⁵⁶⁷⁸⁹]{1,4}",
        r"|\([ivx]{1,5}\)|[ivx]{1,5}\))",
        r"|(?P<dotted>\d{1,4}\.)(?:\s|$))",
    ))
    .unwrap()
});

/// Recover the display marker a footnote carried in the source.
pub fn recover_marker(content: &str) -> Option<String> {
    let caps = RE_LEADING_MARKER.captures(content.trim_start())?;
    caps.name("marker")
        .or_else(|| caps.name("dotted"))
        .map(|m| m.as_str().to_string())
}

/// Number footnotes, swap placeholders for reference markers and build the
/// footnote section.
pub fn finalize(flat: FlattenedBody, footnotes: &[String]) -> FinalDocument {
    let footnotes: Vec<Footnote> = footnotes
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let number = i + 1;
            let content = unescape_delimiters(&clean_span(raw));
            let original_marker =
                recover_marker(&content).unwrap_or_else(|| format!("[{number}]"));
            Footnote {
                original_index: number,
                content,
                original_marker,
            }
        })
        .collect();

    let mut blocks: Vec<String> = flat.blocks.into_iter().map(|b| b.text).collect();
    let mut leading = String::new();
    for detached in &flat.detached {
        let token = placeholder(detached.footnote);
        match detached.after_block.and_then(|i| blocks.get_mut(i)) {
            Some(block) => block.push_str(&token),
            None => leading.push_str(&token),
        }
    }
    if !leading.is_empty() {
        match blocks.first_mut() {
            Some(first) => first.insert_str(0, &leading),
            None => blocks.push(leading),
        }
    }

    let body_with_placeholders = join_blocks(blocks.iter().map(String::as_str));
    let body = RE_PLACEHOLDER
        .replace_all(&body_with_placeholders, |caps: &Captures<'_>| {
            let index: usize = caps[1].parse().unwrap_or(0);
            match index.checked_sub(1).and_then(|i| footnotes.get(i)) {
                Some(f) => reference_marker(f.original_index, &f.original_marker),
                None => caps[0].to_string(),
            }
        })
        .into_owned();
    let body = unescape_delimiters(&body);

    let footnote_section = footnotes
        .iter()
        .map(|f| definition_marker(f.original_index, &f.content))
        .collect::<Vec<_>>()
        .join("\n");

    FinalDocument {
        body,
        footnote_section,
        footnotes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::markers::{definition_numbers, reference_numbers};

    fn assert_correlated(doc: &FinalDocument) {
        let n = doc.footnotes.len();
        let expected: Vec<usize> = (1..=n).collect();
        assert_eq!(reference_numbers(&doc.body), expected, "body: {}", doc.body);
        assert_eq!(definition_numbers(&doc.footnote_section), expected);
    }

    #[test]
    fn reformat_heading_paragraph_and_footnote() {
        let tagged = "<h>Article 1</h><p>Body text.</p><fn>1) Note text.</fn>";

        let extracted = extract_footnotes(tagged);
        assert_eq!(extracted.footnotes, vec!["1) Note text."]);
        let flat = flatten_structure(&extracted.body);
        assert_eq!(flat.text(), "Article 1\n\nBody text.");
        assert_eq!(flat.blocks[0].kind, BlockKind::Heading);
        assert_eq!(flat.blocks[1].kind, BlockKind::Paragraph);

        let out = reformat(tagged);
        assert_eq!(out.footnote_analysis.count, 1);
        let footnote = &out.document.footnotes[0];
        assert_eq!(footnote.original_index, 1);
        assert_eq!(footnote.original_marker, "1)");
        assert_eq!(
            out.document.body,
            "Article 1\n\nBody text.{{footnotenumber1}}1){{-footnotenumber1}}"
        );
        assert_eq!(
            out.final_text,
            "Article 1\n\nBody text.{{footnotenumber1}}1){{-footnotenumber1}}\n\n\
             {{footnote1}}1) Note text.{{-footnote1}}"
        );
        assert_correlated(&out.document);
    }

    #[test]
    fn inline_footnotes_renumbered_by_encounter() {
        let tagged = "<p>First claim<fn>[7] Source seven.</fn> and second\nclaim<fn>³ Source \
                      three.</fn>.</p>\n<li>Item<fn>Unmarked note.</fn></li>";
        let out = reformat(tagged);
        let doc = &out.document;

        assert_eq!(doc.footnotes.len(), 3);
        assert_eq!(doc.footnotes[0].original_marker, "[7]");
        assert_eq!(doc.footnotes[1].original_marker, "³");
        assert_eq!(doc.footnotes[2].original_marker, "[3]");
        assert!(doc
            .body
            .starts_with("First claim{{footnotenumber1}}[7]{{-footnotenumber1}} and second claim"));
        assert!(doc
            .body
            .ends_with("Item{{footnotenumber3}}[3]{{-footnotenumber3}}"));
        assert_correlated(doc);
    }

    #[test]
    fn nested_markup_travels_with_footnote() {
        let tagged = "<p>Claim<fn><p>(2) Note with\n<li>a list</li></p></fn></p>";
        let out = reformat(tagged);
        assert_eq!(out.document.footnotes[0].content, "(2) Note with a list");
        assert_eq!(out.document.footnotes[0].original_marker, "(2)");
        assert_eq!(
            out.document.body,
            "Claim{{footnotenumber1}}(2){{-footnotenumber1}}"
        );
    }

    #[test]
    fn untagged_text_is_dropped() {
        let flat = flatten_structure("stray header\n<p>Kept.</p>\nstray footer 12");
        assert_eq!(flat.text(), "Kept.");
    }

    #[test]
    fn flattening_its_own_output_drops_everything() {
        let once = flatten_structure("<h>Title</h>\n<p>Line one\nline two</p>").text();
        assert_eq!(once, "Title\n\nLine one line two");
        let twice = flatten_structure(&once);
        assert!(twice.blocks.is_empty());
        assert_eq!(twice.text(), "");
    }

    #[test]
    fn detached_reference_before_first_block() {
        let out = reformat("<fn>1. Leading note.</fn>\n<p>Body.</p>");
        assert_eq!(
            out.document.body,
            "{{footnotenumber1}}1.{{-footnotenumber1}}Body."
        );
        assert_correlated(&out.document);
    }

    #[test]
    fn footnotes_without_any_block() {
        let out = reformat("<fn>[1] Alone.</fn><fn>[2] Also alone.</fn>");
        assert_correlated(&out.document);
        assert_eq!(out.document.footnotes.len(), 2);
    }

    #[test]
    fn unmatched_tags_are_tolerated() {
        let out = reformat("<p>Open paragraph <fn>never closed\n<h>Heading</h>");
        assert_eq!(out.document.body, "Heading");
        assert!(out.document.footnotes.is_empty());
        assert_eq!(out.final_text, "Heading");
    }

    #[test]
    fn empty_input() {
        let out = reformat("");
        assert_eq!(out.final_text, "");
        assert_eq!(out.footnote_analysis.count, 0);
    }

    #[test]
    fn marker_precedence() {
        assert_eq!(recover_marker("[4] text").as_deref(), Some("[4]"));
        assert_eq!(recover_marker("(4) text").as_deref(), Some("(4)"));
        assert_eq!(recover_marker("4) text").as_deref(), Some("4)"));
        assert_eq!(recover_marker("⁴ text").as_deref(), Some("⁴"));
        assert_eq!(recover_marker("(iv) text").as_deref(), Some("(iv)"));
        assert_eq!(recover_marker("iv) text").as_deref(), Some("iv)"));
        assert_eq!(recover_marker("4. text").as_deref(), Some("4."));
        assert_eq!(recover_marker("  12) padded").as_deref(), Some("12)"));
        assert_eq!(recover_marker("4.5 percent"), None);
        assert_eq!(recover_marker("Plain note"), None);
    }

    #[test]
    fn reformat_is_deterministic() {
        let tagged = "<h>A</h><p>b<fn>1) c</fn></p>";
        assert_eq!(reformat(tagged), reformat(tagged));
    }

    #[test]
    fn literal_placeholder_text_is_not_a_reference() {
        let forged = "\u{E000}FN_REF:1\u{E001}";
        let tagged =
            format!("<p>Glyphs {forged} from the page.</p><p>Claim<fn>1) Real note.</fn></p>");
        let out = reformat(&tagged);

        assert_eq!(reference_numbers(&out.document.body), vec![1]);
        assert_eq!(
            out.document.body,
            format!(
                "Glyphs {forged} from the page.\n\nClaim{{{{footnotenumber1}}}}1){{{{-footnotenumber1}}}}"
            )
        );
        assert_correlated(&out.document);
    }

    #[test]
    fn literal_placeholder_text_survives_in_footnote() {
        let tagged = "<p>Claim<fn>1) Mentions \u{E000}FN_REF:9\u{E001} verbatim.</fn></p>";
        let out = reformat(tagged);
        assert_eq!(
            out.document.footnotes[0].content,
            "1) Mentions \u{E000}FN_REF:9\u{E001} verbatim."
        );
        assert!(out.document.body.ends_with("{{-footnotenumber1}}"));
    }
}
