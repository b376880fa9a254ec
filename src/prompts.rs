//! Instructions sent with structural-tagging and tag-correction calls.
//!
//! Callers can override the tagging default via
//! [`crate::config::ReflowConfig::system_prompt`]; the constant here is used
//! only when no override is provided. The correction instruction is fixed.

use crate::pipeline::review::TagReview;
use std::fmt::Write;

/// Default instruction for wrapping a chunk of raw text in structural tags.
///
/// The tags named here are the exact strings the reformatter extracts; a
/// model that invents other markup produces text that is silently dropped.
pub const DEFAULT_TAGGING_INSTRUCTION: &str = r#"You are a document structure annotator. The text below was extracted from scanned or digital PDF pages. Your only task is to mark up its structure.

Wrap every span in exactly one of these tag pairs:

1. <h>…</h>   headings: chapter, article, section, annex and title lines
2. <li>…</li> list items
3. <p>…</p>   paragraphs of body text
4. <fn>…</fn> footnote definitions, including their leading marker
   such as [1], (2), 3), ³ or (iv)

Follow these rules precisely:

- Do NOT change, add, remove, reorder or translate any word, number or
  punctuation mark
- Do NOT join or split lines; keep every internal line break where it is
- Do NOT summarise, correct spelling or add commentary
- Do NOT use any tag other than the four above, and never nest <fn>
- When a footnote definition continues on the next line, keep both lines
  inside the same <fn>…</fn>
- Page numbers and running headers may be left untagged
- Output ONLY the tagged text, with no code fences"#;

/// Instruction for a call, honouring an override.
pub fn tagging_instruction(custom: Option<&str>) -> &str {
    custom.unwrap_or(DEFAULT_TAGGING_INSTRUCTION)
}

/// Instruction for a correction round over already tagged text.
///
/// Sent together with [`correction_issue_list`] and the current text.
pub const DEFAULT_CORRECTION_INSTRUCTION: &str = r#"You are reviewing structural markup added to text extracted from PDF pages. The markup uses only <h>, <li>, <p> and <fn> tag pairs. An automatic check found the problems listed below.

Follow these rules precisely:

- Fix ONLY the listed problems
- Do NOT rewrite, reorder, translate or drop any text that is already correct
- Do NOT change any word, number or punctuation mark; only add, move or
  remove tags
- Keep every line break where it is
- Never nest <fn> and never use any other tag
- Output ONLY the corrected text, with no code fences or commentary"#;

/// Issues listed in one correction request; the rest are left for the next
/// round.
pub const MAX_LISTED_ISSUES: usize = 25;

/// Numbered problem list for a correction request.
pub fn correction_issue_list(review: &TagReview) -> String {
    let mut out = String::from("DETECTED PROBLEMS:\n");
    for (i, issue) in review.issues.iter().take(MAX_LISTED_ISSUES).enumerate() {
        let _ = write!(
            out,
            "{}. kind={:?} severity={:?} -> {}",
            i + 1,
            issue.kind,
            issue.severity,
            issue.message
        );
        if !issue.snippet.is_empty() {
            let _ = write!(out, " | at: \"{}\"", issue.snippet);
        }
        let _ = writeln!(out, " | fix: {}", issue.suggestion);
    }
    let hidden = review.issues.len().saturating_sub(MAX_LISTED_ISSUES);
    if hidden > 0 {
        let _ = writeln!(out, "({hidden} more not listed)");
    }
    out
}
