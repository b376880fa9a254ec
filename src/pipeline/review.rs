//! Advisory review of tagged text before it is reformatted.
//!
//! The reformatter never fails on malformed markup; it simply drops what it
//! cannot recognise. This module reports *what* will be dropped or misparsed
//! so a caller, or the correction loop in [`crate::pipeline::correct`], can
//! decide whether the tagging is good enough to keep.

use crate::pipeline::markers::{TagKind, RE_ANY_TAG};
use serde::{Deserialize, Serialize};

/// How much a tagging defect is likely to damage the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IssueSeverity {
    Minor,
    Major,
    Critical,
}

/// Kind of tagging defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    /// A closing tag that does not match the innermost open tag.
    OutOfOrderClose,
    /// An opening tag never closed before the end of the text.
    UnclosedTag,
    /// A `<fn>` opened inside another `<fn>`.
    NestedFootnote,
    /// Non-blank text outside every span; flattening drops it.
    UntaggedText,
}

impl IssueKind {
    pub fn severity(self) -> IssueSeverity {
        match self {
            IssueKind::OutOfOrderClose => IssueSeverity::Critical,
            IssueKind::UnclosedTag | IssueKind::NestedFootnote => IssueSeverity::Major,
            IssueKind::UntaggedText => IssueSeverity::Minor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagIssue {
    pub kind: IssueKind,
    pub severity: IssueSeverity,
    pub message: String,
    /// Up to 40 characters of the offending text.
    pub snippet: String,
    pub suggestion: String,
}

/// All issues found in one tagged text, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagReview {
    pub issues: Vec<TagIssue>,
}

impl TagReview {
    pub fn error_count(&self) -> usize {
        self.issues.len()
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Number of issues at or above `severity`.
    pub fn count_at_least(&self, severity: IssueSeverity) -> usize {
        self.issues.iter().filter(|i| i.severity >= severity).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityStatus {
    Perfect,
    Excellent,
    Warning,
    Critical,
}

/// Overall verdict for a tag review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagValidation {
    pub status: QualityStatus,
    /// 0–100.
    pub score: u32,
    pub recommendations: Vec<String>,
}

const SNIPPET_CHARS: usize = 40;

fn check_gap(gap: &str, depth: usize, issues: &mut Vec<TagIssue>) {
    if depth == 0 && gap.chars().any(char::is_alphanumeric) {
        issues.push(issue(
            IssueKind::UntaggedText,
            "text outside any tag will be dropped".into(),
            gap,
            "Wrap the text in <p>…</p> or remove it",
        ));
    }
}

fn snippet(text: &str) -> String {
    text.trim().chars().take(SNIPPET_CHARS).collect()
}

fn issue(kind: IssueKind, message: String, at: &str, suggestion: &str) -> TagIssue {
    TagIssue {
        kind,
        severity: kind.severity(),
        message,
        snippet: snippet(at),
        suggestion: suggestion.to_string(),
    }
}

/// Scan tagged text with a stack of open tags.
pub fn review_tags(tagged: &str) -> TagReview {
    let mut issues = Vec::new();
    let mut open: Vec<(TagKind, usize)> = Vec::new();
    let mut last_end = 0usize;

    for caps in RE_ANY_TAG.captures_iter(tagged) {
        let (Some(whole), Some(kind)) = (caps.get(0), TagKind::from_name(&caps[2])) else {
            continue;
        };
        check_gap(&tagged[last_end..whole.start()], open.len(), &mut issues);
        last_end = whole.end();

        let closing = &caps[1] == "/";
        if !closing {
            if kind == TagKind::Footnote && open.iter().any(|(k, _)| *k == TagKind::Footnote) {
                issues.push(issue(
                    IssueKind::NestedFootnote,
                    "footnote opened inside another footnote".into(),
                    &tagged[whole.start()..],
                    "Close the outer </fn> before opening a new one",
                ));
            }
            open.push((kind, whole.start()));
            continue;
        }

        match open.last() {
            Some((top, _)) if *top == kind => {
                open.pop();
            }
            Some((top, _)) => issues.push(issue(
                IssueKind::OutOfOrderClose,
                format!("{} closes while {} is still open", kind.close(), top.open()),
                &tagged[whole.start()..],
                "Close inner tags before outer ones",
            )),
            None => issues.push(issue(
                IssueKind::OutOfOrderClose,
                format!("{} without a matching {}", kind.close(), kind.open()),
                &tagged[whole.start()..],
                "Remove the stray closing tag",
            )),
        }
    }
    check_gap(&tagged[last_end..], open.len(), &mut issues);

    for (kind, start) in open {
        issues.push(issue(
            IssueKind::UnclosedTag,
            format!("{} is never closed", kind.open()),
            &tagged[start..],
            "Add the missing closing tag",
        ));
    }

    TagReview { issues }
}

/// Grade a review by issue count.
pub fn assess(review: &TagReview) -> TagValidation {
    let count = review.error_count() as u32;
    let (status, score, recommendations): (_, _, &[&str]) = match count {
        0 => (QualityStatus::Perfect, 100, &[]),
        1..=2 => (
            QualityStatus::Excellent,
            95u32.saturating_sub(5 * count).max(70),
            &[],
        ),
        3..=5 => (
            QualityStatus::Warning,
            85u32.saturating_sub(7 * count).max(40),
            &["Review tag formatting and nesting"],
        ),
        _ => (
            QualityStatus::Critical,
            60u32.saturating_sub(4 * count).max(10),
            &[
                "Re-extract the document with better OCR",
                "Check that every tag is closed",
            ],
        ),
    };
    TagValidation {
        status,
        score,
        recommendations: recommendations.iter().map(|s| s.to_string()).collect(),
    }
}
