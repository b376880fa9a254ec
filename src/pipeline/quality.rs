//! Page quality analysis: decide whether extracted text can be trusted.
//!
//! Text pulled out of a PDF text layer is often wrong in ways that are cheap
//! to detect: a page that came back nearly empty, words broken across
//! newlines by a column scan, words glued together, OCR garbage. Sending such
//! a page through structural tagging wastes tokens and produces garbage
//! structure, so each page is scored first and only the defective ones are
//! handed back for re-extraction.
//!
//! Every heuristic is scored independently and any one firing flags the
//! page. The checks are pure functions of the page text; the same text always
//! yields the same report.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Literal marker delimiting pages in a consolidated raw document.
pub const DEFAULT_PAGE_MARKER: &str = "<!-- page-break -->";

/// Tunable limits for the page heuristics.
///
/// The defaults are calibrated for prose-heavy documents (legal texts,
/// reports). Tighten them for clean digital PDFs, loosen them for scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityThresholds {
    /// Pages with fewer characters than this are treated as failed extractions.
    pub min_chars: usize,
    /// Maximum tolerated count of `word-char, newline, word-char` sequences.
    pub max_broken_line_breaks: usize,
    /// Maximum tolerated count of `[a-z][A-Z]` transitions.
    pub max_missing_spaces: usize,
    /// Maximum fraction of characters outside the plain-text set.
    pub max_noise_ratio: f64,
    /// Maximum fraction of 1–2 character words.
    pub max_short_word_ratio: f64,
    /// Fragmentation is only judged on pages with at least this many words.
    pub min_words_for_fragmentation: usize,
    /// Number of leading characters inspected for encoding corruption.
    pub prefix_window: usize,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_chars: 100,
            max_broken_line_breaks: 5,
            max_missing_spaces: 10,
            max_noise_ratio: 0.05,
            max_short_word_ratio: 0.45,
            min_words_for_fragmentation: 20,
            prefix_window: 50,
        }
    }
}

/// Verdict for a single page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageQualityReport {
    /// 0-based position of the page in the consolidated document.
    pub page_index: usize,
    /// One human-readable entry per heuristic that fired, in check order.
    pub issues: Vec<String>,
    pub needs_reextraction: bool,
}

impl PageQualityReport {
    /// 1-based page number, for messages and re-extraction requests.
    pub fn page_number(&self) -> usize {
        self.page_index + 1
    }
}

type Check = fn(&str, &QualityThresholds) -> Option<String>;

/// Heuristics in reporting order.
const CHECKS: [Check; 7] = [
    check_short_text,
    check_broken_line_breaks,
    check_missing_spaces,
    check_noisy_characters,
    check_fragmented_words,
    check_placeholder_glyphs,
    check_non_text_prefix,
];

/// Analyze one page with the default thresholds.
pub fn analyze(page_index: usize, page_text: &str) -> PageQualityReport {
    analyze_with(page_index, page_text, &QualityThresholds::default())
}

/// Analyze one page with explicit thresholds.
pub fn analyze_with(
    page_index: usize,
    page_text: &str,
    thresholds: &QualityThresholds,
) -> PageQualityReport {
    let text = page_text.trim();
    let issues: Vec<String> = CHECKS
        .iter()
        .filter_map(|check| check(text, thresholds))
        .collect();

    PageQualityReport {
        page_index,
        needs_reextraction: !issues.is_empty(),
        issues,
    }
}

/// Split a consolidated document into trimmed pages.
///
/// Empty pages in the middle are kept: they are real pages whose extraction
/// failed. A single empty segment after a final marker is dropped.
pub fn split_pages(raw: &str, marker: &str) -> Vec<String> {
    let mut pages: Vec<String> = if marker.is_empty() {
        vec![raw.trim().to_string()]
    } else {
        raw.split(marker).map(|p| p.trim().to_string()).collect()
    };
    if pages.len() > 1 && pages.last().is_some_and(|p| p.is_empty()) {
        pages.pop();
    }
    pages
}

/// Split `raw` on `marker` and analyze every page.
pub fn analyze_document(
    raw: &str,
    marker: &str,
    thresholds: &QualityThresholds,
) -> Vec<PageQualityReport> {
    split_pages(raw, marker)
        .iter()
        .enumerate()
        .map(|(i, page)| analyze_with(i, page, thresholds))
        .collect()
}

/// 1-based numbers of the pages that need re-extraction.
pub fn flagged_pages(reports: &[PageQualityReport]) -> Vec<usize> {
    reports
        .iter()
        .filter(|r| r.needs_reextraction)
        .map(PageQualityReport::page_number)
        .collect()
}

// ── Heuristics ───────────────────────────────────────────────────────────────

fn check_short_text(text: &str, t: &QualityThresholds) -> Option<String> {
    let len = text.chars().count();
    (len < t.min_chars).then(|| format!("text too short ({len} chars, minimum {})", t.min_chars))
}

static RE_BROKEN_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w\n\w").unwrap());

fn check_broken_line_breaks(text: &str, t: &QualityThresholds) -> Option<String> {
    let count = RE_BROKEN_LINE.find_iter(text).count();
    (count > t.max_broken_line_breaks)
        .then(|| format!("broken line breaks ({count} mid-word newlines)"))
}

static RE_MISSING_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z][A-Z]").unwrap());

fn check_missing_spaces(text: &str, t: &QualityThresholds) -> Option<String> {
    let count = RE_MISSING_SPACE.find_iter(text).count();
    (count > t.max_missing_spaces)
        .then(|| format!("missing spaces ({count} lower-to-upper transitions)"))
}

const PLAIN_PUNCTUATION: &str = ".,;:!?'\"()[]{}-–—/\\%&@#*+=<>$€£§ºª°…«»“”‘’_|";

fn is_plain(c: char) -> bool {
    c.is_alphanumeric() || c.is_whitespace() || PLAIN_PUNCTUATION.contains(c)
}

fn check_noisy_characters(text: &str, t: &QualityThresholds) -> Option<String> {
    let total = text.chars().count();
    if total == 0 {
        return None;
    }
    let noisy = text.chars().filter(|c| !is_plain(*c)).count();
    let ratio = noisy as f64 / total as f64;
    (ratio > t.max_noise_ratio).then(|| {
        format!(
            "noisy characters ({:.1}% outside plain text)",
            ratio * 100.0
        )
    })
}

fn check_fragmented_words(text: &str, t: &QualityThresholds) -> Option<String> {
    let words: Vec<&str> = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
        .collect();
    if words.len() < t.min_words_for_fragmentation.max(1) {
        return None;
    }
    let short = words.iter().filter(|w| w.chars().count() <= 2).count();
    let ratio = short as f64 / words.len() as f64;
    (ratio > t.max_short_word_ratio).then(|| {
        format!(
            "fragmented words ({:.0}% of words have 1-2 characters)",
            ratio * 100.0
        )
    })
}

fn is_placeholder_glyph(c: char) -> bool {
    matches!(
        c,
        '\u{FFFD}' | '\u{FFFC}' | '\u{25A0}' | '\u{25A1}' | '\u{25AF}' | '\u{001A}'
            | '\u{2500}'..='\u{257F}'
    )
}

fn check_placeholder_glyphs(text: &str, _t: &QualityThresholds) -> Option<String> {
    text.chars()
        .find(|c| is_placeholder_glyph(*c))
        .map(|c| format!("placeholder glyphs present (U+{:04X})", c as u32))
}

fn is_non_text(c: char) -> bool {
    (c.is_control() && !c.is_whitespace())
        || matches!(c, '\u{E000}'..='\u{F8FF}' | '\u{FFF0}'..='\u{FFFF}')
}

fn check_non_text_prefix(text: &str, t: &QualityThresholds) -> Option<String> {
    text.chars()
        .take(t.prefix_window)
        .any(is_non_text)
        .then(|| format!("non-text characters within the first {} characters", t.prefix_window))
}
