//! Pipeline stages for document reconstruction.
//!
//! Each submodule implements one transformation step and is testable on its
//! own.
//!
//! ## Data Flow
//!
//! ```text
//! quality ──▶ classify ──▶ tagger ──▶ review ⇄ correct ──▶ reformat
//! (pages)     (lines)      (LLM)      (tags)    (LLM)        (footnotes)
//! ```
//!
//! 1. [`quality`]  — score each page's extracted text and flag the ones that
//!    need re-extraction
//! 2. [`classify`] — single forward pass assigning a structural role to every
//!    line
//! 3. [`tagger`]   — chunked, concurrent tagging calls through [`llm`]; the
//!    only stage with network I/O
//! 4. [`review`]   — check of the tagged text; [`correct`] sends it back
//!    with the problem list for a bounded number of rounds when enabled
//! 5. [`reformat`] — deterministic footnote extraction, flattening and
//!    renumbering, using the vocabulary in [`markers`]

pub mod classify;
pub mod correct;
pub mod llm;
pub mod markers;
pub mod quality;
pub mod reformat;
pub mod review;
pub mod tagger;
