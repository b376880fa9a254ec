//! Result types returned by the reconstruction pipeline.

use crate::error::ChunkError;
use crate::pipeline::classify::DocumentSummary;
use crate::pipeline::quality::PageQualityReport;
use crate::pipeline::reformat::{FinalDocument, FootnoteAnalysis};
use crate::pipeline::review::{TagReview, TagValidation};
use serde::{Deserialize, Serialize};

/// Outcome of one structural-tagging call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    /// 0-based position of the chunk in the document.
    pub index: usize,
    /// Characters in the untagged chunk.
    pub char_count: usize,
    /// Tagged text, or the original chunk text when the call degraded.
    pub tagged: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    /// Set when the chunk degraded to its original text.
    pub error: Option<ChunkError>,
}

impl ChunkResult {
    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

/// Counters for a full run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionStats {
    pub total_pages: usize,
    pub flagged_pages: usize,
    pub reextracted_pages: usize,
    pub total_chunks: usize,
    pub degraded_chunks: usize,
    pub footnote_count: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    /// Tag corrections applied after the review.
    pub correction_iterations: usize,
    /// Final tag review status was acceptable (see
    /// [`crate::pipeline::correct::is_acceptable`]).
    pub accepted: bool,
    /// Wall-clock time of the tagging stage.
    pub tagging_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything produced by [`crate::reconstruct()`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionOutput {
    /// Body, blank line, footnote section.
    pub final_text: String,
    pub document: FinalDocument,
    /// Tagged text that was reformatted: the reassembled chunks after any
    /// applied corrections.
    pub tagged_text: String,
    /// Per-page quality reports, taken before re-extraction.
    pub page_reports: Vec<PageQualityReport>,
    /// 1-based numbers of the flagged pages.
    pub flagged_pages: Vec<usize>,
    pub chunks: Vec<ChunkResult>,
    pub footnote_analysis: FootnoteAnalysis,
    /// Line classification of the consolidated raw document.
    pub classification: DocumentSummary,
    /// Review of [`Self::tagged_text`].
    pub tag_review: TagReview,
    pub tag_validation: TagValidation,
    pub stats: ReconstructionStats,
}

/// Result of [`crate::analyze_only()`]: the LLM-free stages only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentAnalysis {
    pub page_reports: Vec<PageQualityReport>,
    pub flagged_pages: Vec<usize>,
    pub classification: DocumentSummary,
    /// Number of tagging calls a full run would issue.
    pub planned_chunks: usize,
}
