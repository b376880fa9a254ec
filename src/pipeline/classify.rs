//! Line classification: assign a structural role to every physical line.
//!
//! A single forward pass over the document. Each line is classified from its
//! own text plus the classification of the line immediately before it, so a
//! whole document costs O(n) time and O(1) state.
//!
//! ## Rule order
//!
//! [`RULES`] is an ordered table of predicate → verdict pairs and the first
//! rule that returns a verdict wins. Order encodes precedence: a bare `12` is
//! a page number before it can be anything else, and a footnote definition
//! beats a heading even when its body happens to start with a keyword.
//! Every rule is a plain function and can be exercised on its own.
//!
//! Scores are fixed per rule. They let callers threshold or audit weak
//! classifications; they never feed back into the classification itself.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Structural role of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LineType {
    Empty,
    Definition,
    IsolatedSuperscript,
    ReferenceInline,
    Continuation,
    Heading,
    PageNumber,
    Noise,
}

/// A classified line. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub index: usize,
    pub raw: String,
    /// `raw` with superscript digits folded to ASCII digits.
    pub normalized: String,
    #[serde(rename = "type")]
    pub line_type: LineType,
    /// Footnote marker, page number or heading number captured by the rule.
    pub number: Option<String>,
    pub score: f32,
    pub features: BTreeSet<String>,
}

/// Lines in reading order, index-aligned with the source lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedDocument {
    pub lines: Vec<Line>,
}

impl ClassifiedDocument {
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Line> {
        self.lines.iter()
    }
}

/// Per-type counts and the footnote loss-risk proxy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub counts_by_type: BTreeMap<LineType, usize>,
    pub total_lines: usize,
    /// `(definitions + isolated superscripts) / total lines`: how much
    /// footnote material a naive strip of the text would destroy.
    pub potential_loss_risk: f64,
}

/// What a rule decided about a line.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub line_type: LineType,
    pub number: Option<String>,
    pub score: f32,
    pub features: Vec<String>,
}

impl Verdict {
    fn new(line_type: LineType, score: f32) -> Self {
        Self {
            line_type,
            number: None,
            score,
            features: Vec::new(),
        }
    }

    fn number(mut self, number: impl Into<String>) -> Self {
        self.number = Some(number.into());
        self
    }

    fn feature(mut self, feature: impl Into<String>) -> Self {
        self.features.push(feature.into());
        self
    }
}

/// Input handed to every rule.
#[derive(Debug, Clone, Copy)]
pub struct LineContext<'a> {
    /// Trimmed raw text (superscripts intact).
    pub raw: &'a str,
    /// Trimmed normalized text (superscripts folded).
    pub normalized: &'a str,
    pub previous: Option<&'a Line>,
}

/// A named classification rule.
pub struct Rule {
    pub name: &'static str,
    pub apply: fn(&LineContext<'_>) -> Option<Verdict>,
}

/// Classification rules in precedence order. The last rule always matches.
pub const RULES: [Rule; 8] = [
    Rule { name: "empty", apply: rule_empty },
    Rule { name: "page_number", apply: rule_page_number },
    Rule { name: "isolated_superscript", apply: rule_isolated_superscript },
    Rule { name: "definition", apply: rule_definition },
    Rule { name: "continuation", apply: rule_continuation },
    Rule { name: "heading", apply: rule_heading },
    Rule { name: "reference_inline", apply: rule_reference_inline },
    Rule { name: "noise", apply: rule_noise },
];

/// Classify one line given the classification of its predecessor.
pub fn classify(line: &str, index: usize, previous: Option<&Line>) -> Line {
    let normalized = normalize(line);
    let ctx = LineContext {
        raw: line.trim(),
        normalized: normalized.trim(),
        previous,
    };

    let verdict = RULES
        .iter()
        .find_map(|rule| (rule.apply)(&ctx))
        .unwrap_or_else(|| Verdict::new(LineType::Noise, NOISE_SCORE));

    Line {
        index,
        raw: line.to_string(),
        normalized,
        line_type: verdict.line_type,
        number: verdict.number,
        score: verdict.score,
        features: verdict.features.into_iter().collect(),
    }
}

/// Classify every line left to right.
pub fn classify_document<S: AsRef<str>>(lines: &[S]) -> ClassifiedDocument {
    let mut out: Vec<Line> = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        let classified = classify(line.as_ref(), i, out.last());
        out.push(classified);
    }
    ClassifiedDocument { lines: out }
}

/// Split `text` into lines and classify them.
pub fn classify_text(text: &str) -> ClassifiedDocument {
    let lines: Vec<&str> = text.lines().collect();
    classify_document(&lines)
}

/// Count lines per type and compute the loss-risk proxy.
pub fn summarize(doc: &ClassifiedDocument) -> DocumentSummary {
    let mut counts_by_type: BTreeMap<LineType, usize> = BTreeMap::new();
    for line in doc.iter() {
        *counts_by_type.entry(line.line_type).or_insert(0) += 1;
    }

    let total_lines = doc.len();
    let at_risk = counts_by_type.get(&LineType::Definition).copied().unwrap_or(0)
        + counts_by_type
            .get(&LineType::IsolatedSuperscript)
            .copied()
            .unwrap_or(0);
    let potential_loss_risk = if total_lines == 0 {
        0.0
    } else {
        at_risk as f64 / total_lines as f64
    };

    DocumentSummary {
        counts_by_type,
        total_lines,
        potential_loss_risk,
    }
}

// ── Superscript folding ──────────────────────────────────────────────────────

pub(crate) fn fold_superscript(c: char) -> Option<char> {
    Some(match c {
        '⁰' => '0',
        '¹' => '1',
        '²' => '2',
        '³' => '3',
        '⁴' => '4',
        '⁵' => '5',
        '⁶' => '6',
        '⁷' => '7',
        '⁸' => '8',
        '⁹' => '9',
        _ => return None,
    })
}

/// Replace superscript digits with their ASCII counterparts.
pub fn normalize(text: &str) -> String {
    text.chars().map(|c| fold_superscript(c).unwrap_or(c)).collect()
}

// ── Rules ────────────────────────────────────────────────────────────────────

const DEFINITION_SCORE: f32 = 0.92;
const ROMAN_DEFINITION_SCORE: f32 = 0.75;
const NOISE_SCORE: f32 = 0.1;

/// Largest roman numeral still read as a footnote marker. Larger ones are
/// almost always section numbering.
const MAX_FOOTNOTE_ROMAN: u32 = 20;
const MAX_PAGE_NUMBER_CHARS: usize = 12;
const MAX_HEADING_CHARS: usize = 100;
const MAX_CAPS_HEADING_CHARS: usize = 80;

fn rule_empty(ctx: &LineContext<'_>) -> Option<Verdict> {
    ctx.raw.is_empty().then(|| Verdict::new(LineType::Empty, 0.0))
}

static RE_PAGE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:p\.\s*(?P<prefixed>\d{1,4})|(?P<page>\d{1,4})(?P<total>\s*/\s*\d{1,4})?)$")
        .unwrap()
});

fn rule_page_number(ctx: &LineContext<'_>) -> Option<Verdict> {
    if ctx.raw.chars().count() > MAX_PAGE_NUMBER_CHARS {
        return None;
    }
    let caps = RE_PAGE_NUMBER.captures(ctx.raw)?;
    let mut verdict = Verdict::new(LineType::PageNumber, 0.85).feature("page_number");
    if let Some(n) = caps.name("prefixed") {
        verdict = verdict.number(n.as_str()).feature("page_prefix");
    } else if let Some(n) = caps.name("page") {
        verdict = verdict.number(n.as_str());
        if caps.name("total").is_some() {
            verdict = verdict.feature("page_fraction");
        }
    }
    Some(verdict)
}

fn rule_isolated_superscript(ctx: &LineContext<'_>) -> Option<Verdict> {
    let mut chars = ctx.raw.chars();
    let digit = fold_superscript(chars.next()?)?;
    if chars.next().is_some() {
        return None;
    }
    Some(
        Verdict::new(LineType::IsolatedSuperscript, 0.9)
            .number(digit.to_string())
            .feature("superscript"),
    )
}

static RE_DEFINITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(?:",
        r"[\[(]\s*(?P<bracketed>\d{1,3}|[⁰¹²³⁴⁵⁶⁷⁸⁹]{1,3}|[ivxl]{1,5})\s*[\])][.:\-–]?\s*",
        r"|(?P<bare>\d{1,3})[.)\]:][.:\-–]?\s+",
        r"|(?P<sup>[⁰¹²³⁴⁵⁶⁷⁸⁹]{1,3})[.)]?\s*",
        r"|(?P<roman>[ivxl]{1,5})[.)]\s+",
        r")(?P<body>\S.*)$",
    ))
    .unwrap()
});

fn rule_definition(ctx: &LineContext<'_>) -> Option<Verdict> {
    let caps = RE_DEFINITION.captures(ctx.raw)?;

    let (marker, kind) = if let Some(m) = caps.name("bracketed") {
        (m.as_str(), "marker:bracketed")
    } else if let Some(m) = caps.name("bare") {
        (m.as_str(), "marker:numeric")
    } else if let Some(m) = caps.name("sup") {
        (m.as_str(), "marker:superscript")
    } else {
        (caps.name("roman")?.as_str(), "marker:roman")
    };

    let is_roman = marker.chars().all(|c| matches!(c, 'i' | 'v' | 'x' | 'l'));
    if is_roman {
        let value = roman_value(marker)?;
        if value > MAX_FOOTNOTE_ROMAN {
            return None;
        }
        return Some(
            Verdict::new(LineType::Definition, ROMAN_DEFINITION_SCORE)
                .number(marker)
                .feature(kind)
                .feature("roman"),
        );
    }

    Some(
        Verdict::new(LineType::Definition, DEFINITION_SCORE)
            .number(normalize(marker))
            .feature(kind),
    )
}

/// Value of a canonical lowercase roman numeral, `None` if not canonical.
fn roman_value(s: &str) -> Option<u32> {
    let digit = |c: char| match c {
        'i' => Some(1),
        'v' => Some(5),
        'x' => Some(10),
        'l' => Some(50),
        _ => None,
    };
    let values: Vec<u32> = s.chars().map(digit).collect::<Option<_>>()?;
    let mut total: i64 = 0;
    for (i, v) in values.iter().enumerate() {
        if values.get(i + 1).is_some_and(|next| next > v) {
            total -= i64::from(*v);
        } else {
            total += i64::from(*v);
        }
    }
    let total = u32::try_from(total).ok().filter(|t| *t > 0)?;
    (to_roman(total) == s).then_some(total)
}

fn to_roman(mut n: u32) -> String {
    const TABLE: [(u32, &str); 7] = [
        (50, "l"),
        (40, "xl"),
        (10, "x"),
        (9, "ix"),
        (5, "v"),
        (4, "iv"),
        (1, "i"),
    ];
    let mut out = String::new();
    for (value, glyph) in TABLE {
        while n >= value {
            out.push_str(glyph);
            n -= value;
        }
    }
    out
}

fn rule_continuation(ctx: &LineContext<'_>) -> Option<Verdict> {
    let previous = ctx.previous?;
    if !matches!(
        previous.line_type,
        LineType::Definition | LineType::Continuation
    ) {
        return None;
    }
    let first = ctx.normalized.chars().next()?;
    if !(first.is_lowercase() || first.is_ascii_digit()) {
        return None;
    }
    let mut verdict = Verdict::new(LineType::Continuation, 0.6).feature("continues_footnote");
    if let Some(ref n) = previous.number {
        verdict = verdict.number(n.clone());
    }
    Some(verdict)
}

const HEADING_KEYWORDS: &[&str] = &[
    // English
    "chapter", "article", "art.", "annex", "appendix", "title", "section", "part", "book",
    "schedule", "preamble", "contents", "index", "summary",
    // Portuguese / Spanish
    "capítulo", "artigo", "artículo", "anexo", "apêndice", "apéndice", "título", "seção",
    "secção", "sección", "parte", "livro", "libro", "preâmbulo", "preámbulo", "sumário",
    "índice",
    // French / German
    "chapitre", "annexe", "titre", "préambule", "kapitel", "artikel", "anhang", "abschnitt",
    "teil",
];

const HEADING_PHRASES: &[&str] = &["table of contents", "list of contents", "table des matières"];

static RE_HEADING_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\d+(?:\.\d+)*|[IVXLCDM]+|[ivxlcdm]+)[º°o]?$").unwrap());

static RE_NUMBERING_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[IVXLCDM]{1,7}|\d{1,3}(?:\.\d{1,3})+)\.?$").unwrap());

fn rule_heading(ctx: &LineContext<'_>) -> Option<Verdict> {
    let text = ctx.normalized;
    let len = text.chars().count();
    let lower = text.to_lowercase();

    if len <= MAX_HEADING_CHARS {
        if let Some(phrase) = HEADING_PHRASES.iter().find(|p| lower.starts_with(*p)) {
            return Some(
                Verdict::new(LineType::Heading, 0.85).feature(format!("keyword:{phrase}")),
            );
        }

        let mut words = lower.split_whitespace();
        if let Some(first) = words.next() {
            let keyword = first.trim_end_matches([':', '-', '–']);
            let bare = keyword.trim_end_matches('.');
            let matched = HEADING_KEYWORDS
                .iter()
                .find(|k| **k == keyword || **k == bare);
            if let Some(k) = matched {
                let mut verdict =
                    Verdict::new(LineType::Heading, 0.85).feature(format!("keyword:{k}"));
                if let Some(id) = text.split_whitespace().nth(1) {
                    let id = id.trim_end_matches(['.', ':', '-', '–']);
                    if RE_HEADING_ID.is_match(id) {
                        verdict = verdict.number(id);
                    }
                }
                return Some(verdict);
            }
        }
    }

    let letters = text.chars().filter(|c| c.is_alphabetic()).count();
    if len <= MAX_CAPS_HEADING_CHARS
        && letters >= 2
        && !text.chars().any(|c| c.is_lowercase())
    {
        return Some(Verdict::new(LineType::Heading, 0.7).feature("all_caps"));
    }

    RE_NUMBERING_LINE
        .is_match(text)
        .then(|| Verdict::new(LineType::Heading, 0.6).feature("numbering"))
}

static RE_INLINE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\[(?P<bracketed>\d{1,3})\]",
        r"|\((?P<trailing>\d{1,3})\)\s*[.,;:]?\s*$",
        r"|\p{L}[.,;:]?(?P<sup>[⁰¹²³⁴⁵⁶⁷⁸⁹]{1,3})",
    ))
    .unwrap()
});

fn rule_reference_inline(ctx: &LineContext<'_>) -> Option<Verdict> {
    let caps = RE_INLINE_REFERENCE.captures(ctx.raw)?;
    let (number, kind) = if let Some(m) = caps.name("bracketed") {
        (m.as_str(), "reference:bracketed")
    } else if let Some(m) = caps.name("trailing") {
        (m.as_str(), "reference:trailing_paren")
    } else {
        (caps.name("sup")?.as_str(), "reference:superscript")
    };
    Some(
        Verdict::new(LineType::ReferenceInline, 0.4)
            .number(normalize(number))
            .feature(kind),
    )
}

fn rule_noise(_ctx: &LineContext<'_>) -> Option<Verdict> {
    Some(Verdict::new(LineType::Noise, NOISE_SCORE).feature("fallback"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(raw: &'a str, normalized: &'a str, previous: Option<&'a Line>) -> LineContext<'a> {
        LineContext {
            raw,
            normalized,
            previous,
        }
    }

    #[test]
    fn definition_with_paren_marker() {
        let line = classify("1) This is a footnote.", 0, None);
        assert_eq!(line.line_type, LineType::Definition);
        assert_eq!(line.number.as_deref(), Some("1"));
        assert!((line.score - 0.92).abs() < f32::EPSILON);
    }

    #[test]
    fn isolated_superscript_with_padding() {
        let line = classify("  ²  ", 4, None);
        assert_eq!(line.line_type, LineType::IsolatedSuperscript);
        assert_eq!(line.number.as_deref(), Some("2"));
        assert!((line.score - 0.9).abs() < f32::EPSILON);
        assert_eq!(line.normalized, "  2  ");
        assert_eq!(line.index, 4);
    }

    #[test]
    fn blank_line_is_empty_with_zero_score() {
        let doc = classify_document(&["   "]);
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.lines[0].line_type, LineType::Empty);
        assert_eq!(doc.lines[0].score, 0.0);
    }

    #[test]
    fn empty_document_is_empty() {
        let doc = classify_document::<&str>(&[]);
        assert!(doc.is_empty());
        let summary = summarize(&doc);
        assert_eq!(summary.total_lines, 0);
        assert_eq!(summary.potential_loss_risk, 0.0);
    }

    #[test]
    fn page_number_forms() {
        for (input, number) in [("12", "12"), ("3 / 10", "3"), ("p. 7", "7"), ("P.14", "14")] {
            let line = classify(input, 0, None);
            assert_eq!(line.line_type, LineType::PageNumber, "input {input:?}");
            assert_eq!(line.number.as_deref(), Some(number), "input {input:?}");
        }
    }

    #[test]
    fn long_numeric_line_is_not_a_page_number() {
        assert!(rule_page_number(&ctx("12345", "12345", None)).is_none());
        assert!(rule_page_number(&ctx("1 / 2 / 3", "1 / 2 / 3", None)).is_none());
    }

    #[test]
    fn definition_marker_forms() {
        let cases = [
            ("[12] See the annex.", "12", "marker:bracketed"),
            ("(3) Idem, p. 4.", "3", "marker:bracketed"),
            ("4. Cf. article 2.", "4", "marker:numeric"),
            ("¹ Original text of the law.", "1", "marker:superscript"),
            ("¹²Ibid.", "12", "marker:superscript"),
            ("[²] Signed in Geneva.", "2", "marker:bracketed"),
        ];
        for (input, number, feature) in cases {
            let line = classify(input, 0, None);
            assert_eq!(line.line_type, LineType::Definition, "input {input:?}");
            assert_eq!(line.number.as_deref(), Some(number), "input {input:?}");
            assert!(line.features.contains(feature), "input {input:?}");
        }
    }

    #[test]
    fn small_roman_markers_accepted() {
        let line = classify("iv) Amended in 2004.", 0, None);
        assert_eq!(line.line_type, LineType::Definition);
        assert_eq!(line.number.as_deref(), Some("iv"));
        assert!((line.score - ROMAN_DEFINITION_SCORE).abs() < f32::EPSILON);
    }

    #[test]
    fn large_or_malformed_romans_rejected() {
        assert!(rule_definition(&ctx("xl. Forty", "xl. Forty", None)).is_none());
        assert!(rule_definition(&ctx("iiii. Four", "iiii. Four", None)).is_none());
        assert!(rule_definition(&ctx("(l) Fifty", "(l) Fifty", None)).is_none());
    }

    #[test]
    fn decimal_number_is_not_a_definition() {
        assert!(rule_definition(&ctx("1.5 million euros", "1.5 million euros", None)).is_none());
    }

    #[test]
    fn roman_values() {
        assert_eq!(roman_value("i"), Some(1));
        assert_eq!(roman_value("iv"), Some(4));
        assert_eq!(roman_value("xix"), Some(19));
        assert_eq!(roman_value("xx"), Some(20));
        assert_eq!(roman_value("vx"), None);
    }

    #[test]
    fn continuation_follows_definition() {
        let doc = classify_document(&[
            "2) The provision was amended by the",
            "decree of 12 March 1998 and later",
            "1999 consolidated text.",
            "Chapter II",
        ]);
        let types: Vec<LineType> = doc.iter().map(|l| l.line_type).collect();
        assert_eq!(
            types,
            vec![
                LineType::Definition,
                LineType::Continuation,
                LineType::Continuation,
                LineType::Heading,
            ]
        );
        assert_eq!(doc.lines[2].number.as_deref(), Some("2"));
    }

    #[test]
    fn continuation_requires_footnote_predecessor() {
        let previous = classify("Plain body sentence here", 0, None);
        assert!(rule_continuation(&ctx("and more", "and more", Some(&previous))).is_none());
    }

    #[test]
    fn keyword_headings() {
        let line = classify("Article 12 - Scope", 0, None);
        assert_eq!(line.line_type, LineType::Heading);
        assert_eq!(line.number.as_deref(), Some("12"));
        assert!(line.features.contains("keyword:article"));

        let line = classify("CAPÍTULO IV", 0, None);
        assert_eq!(line.line_type, LineType::Heading);
        assert_eq!(line.number.as_deref(), Some("IV"));

        let line = classify("Table of Contents", 0, None);
        assert_eq!(line.line_type, LineType::Heading);
    }

    #[test]
    fn caps_and_numbering_headings() {
        let line = classify("GENERAL PROVISIONS", 0, None);
        assert_eq!(line.line_type, LineType::Heading);
        assert!(line.features.contains("all_caps"));

        let line = classify("2.1", 0, None);
        assert_eq!(line.line_type, LineType::Heading);
        assert!(line.features.contains("numbering"));
    }

    #[test]
    fn inline_references_are_low_confidence() {
        for (input, number) in [
            ("as established in the treaty [4] and", "4"),
            ("the rule applies to all members (7).", "7"),
            ("under the previous law³ the court held", "3"),
        ] {
            let line = classify(input, 0, None);
            assert_eq!(line.line_type, LineType::ReferenceInline, "input {input:?}");
            assert_eq!(line.number.as_deref(), Some(number), "input {input:?}");
            assert!((line.score - 0.4).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn plain_prose_is_noise() {
        let line = classify("the parties agree to cooperate in good faith", 0, None);
        assert_eq!(line.line_type, LineType::Noise);
        assert!(line.features.contains("fallback"));
    }

    #[test]
    fn classification_is_idempotent() {
        let previous = classify("3) First part of the note", 0, None);
        let a = classify("continued here", 1, Some(&previous));
        let b = classify("continued here", 1, Some(&previous));
        assert_eq!(a, b);
    }

    #[test]
    fn rules_table_ends_with_catch_all() {
        let last = RULES.last().map(|r| r.name);
        assert_eq!(last, Some("noise"));
        let c = ctx("anything", "anything", None);
        assert!((RULES[RULES.len() - 1].apply)(&c).is_some());
    }

    #[test]
    fn summary_counts_and_risk() {
        let doc = classify_document(&[
            "Article 1",
            "The body text continues here",
            "¹",
            "1) A footnote definition.",
            "",
        ]);
        let summary = summarize(&doc);
        assert_eq!(summary.total_lines, 5);
        assert_eq!(summary.counts_by_type.get(&LineType::Definition), Some(&1));
        assert_eq!(
            summary.counts_by_type.get(&LineType::IsolatedSuperscript),
            Some(&1)
        );
        assert!((summary.potential_loss_risk - 0.4).abs() < 1e-9);
    }
}
