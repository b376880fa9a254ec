//! # edgequake-reflow
//!
//! Rebuild clean, structured documents from noisy PDF text extraction.
//!
//! Text pulled from a PDF text layer or an OCR pass loses structure: headings
//! run into paragraphs, footnote definitions land mid-page, numbering is
//! inconsistent. This crate scores each page, asks an LLM to mark up the
//! structure without changing a word, then deterministically pulls the
//! footnotes out and renumbers them so every inline reference points at
//! exactly one definition.
//!
//! ## Pipeline Overview
//!
//! ```text
//! raw text (pages separated by <!-- page-break -->)
//!  │
//!  ├─ 1. Quality   flag pages with extraction defects (re-extract via hook)
//!  ├─ 2. Classify  line roles + footnote loss-risk summary
//!  ├─ 3. Tag       <h> <li> <p> <fn> via concurrent LLM calls per chunk
//!  ├─ 4. Review    check the returned markup, optionally correct it via LLM
//!  └─ 5. Reformat  flatten blocks, extract + renumber footnotes
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_reflow::{reconstruct, ReflowConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let raw = std::fs::read_to_string("extracted.txt")?;
//!     let output = reconstruct(&raw, &ReflowConfig::default()).await?;
//!     println!("{}", output.final_text);
//!     eprintln!("{} footnotes, {} degraded chunks",
//!         output.footnote_analysis.count,
//!         output.stats.degraded_chunks);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `reflow` binary (clap + anyhow + indicatif + tracing-subscriber + glob) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod reconstruct;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ReflowConfig, ReflowConfigBuilder, DEFAULT_MODEL};
pub use error::{ChunkError, PageError, ReflowError};
pub use output::{ChunkResult, DocumentAnalysis, ReconstructionOutput, ReconstructionStats};
pub use pipeline::classify::{classify, classify_document, summarize, LineType};
pub use pipeline::correct::{is_acceptable, CorrectionOutcome, TagCorrector};
pub use pipeline::llm::{
    ContentGenerator, GenerateContentRequest, GeneratedContent, LlmContentGenerator,
};
pub use pipeline::markers::renumber_correlation_markers;
pub use pipeline::quality::{analyze, PageQualityReport, QualityThresholds};
pub use pipeline::reformat::{reformat, FinalDocument, Footnote};
pub use pipeline::tagger::StructuralTagger;
pub use progress::{NoopProgressCallback, ProgressCallback, ReflowProgressCallback};
pub use reconstruct::{
    analyze_only, reconstruct, reconstruct_file, reconstruct_sync, reconstruct_to_file,
    reconstruct_with, resolve_generator, PageReextractor,
};
