//! Error types for the edgequake-reflow library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`ReflowError`] — **Fatal**: the reconstruction cannot proceed at all
//!   (input missing, provider not configured, every tagging call failed).
//!   Returned as `Err(ReflowError)` from the top-level `reconstruct*`
//!   functions.
//!
//! * [`ChunkError`] — **Non-fatal**: one structural-tagging call failed.
//!   The chunk degrades to its original, untagged text and the error is
//!   stored in [`crate::output::ChunkResult`] for auditing.
//!
//! * [`PageError`] — **Non-fatal**: re-extraction of a flagged page failed.
//!   The page keeps its original text.
//!
//! Extraction-quality defects, malformed tags and unrecoverable footnote
//! markers are not errors at all: they are advisory data carried in the
//! output (page reports, tag review, synthesized markers).

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-reflow library.
#[derive(Debug, Error)]
pub enum ReflowError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Input file exists but could not be read as UTF-8 text.
    #[error("Failed to read input '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Every structural-tagging call failed; the document was never tagged.
    #[error("All {total} tagging calls failed.\nFirst error: {first_error}")]
    AllChunksFailed { total: usize, first_error: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single structural-tagging call.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum ChunkError {
    /// The external call returned an error.
    #[error("Chunk {chunk}: tagging call failed: {detail}")]
    GenerationFailed { chunk: usize, detail: String },

    /// The external call did not settle in time.
    #[error("Chunk {chunk}: tagging call timed out after {secs}s")]
    Timeout { chunk: usize, secs: u64 },

    /// The call succeeded but produced no text.
    #[error("Chunk {chunk}: tagging call returned an empty response")]
    EmptyResponse { chunk: usize },
}

impl ChunkError {
    /// 1-based number of the chunk this error belongs to.
    pub fn chunk(&self) -> usize {
        match self {
            ChunkError::GenerationFailed { chunk, .. }
            | ChunkError::Timeout { chunk, .. }
            | ChunkError::EmptyResponse { chunk } => *chunk,
        }
    }

    /// Re-attribute an error raised by the call boundary to a chunk.
    pub(crate) fn for_chunk(self, chunk_num: usize) -> Self {
        match self {
            ChunkError::GenerationFailed { detail, .. } => ChunkError::GenerationFailed {
                chunk: chunk_num,
                detail,
            },
            ChunkError::Timeout { secs, .. } => ChunkError::Timeout { chunk: chunk_num, secs },
            ChunkError::EmptyResponse { .. } => ChunkError::EmptyResponse { chunk: chunk_num },
        }
    }
}

/// A non-fatal error for a single page.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The re-extraction collaborator failed for a flagged page.
    #[error("Page {page}: re-extraction failed: {detail}")]
    ReextractionFailed { page: usize, detail: String },
}
