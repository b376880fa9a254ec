//! Progress-callback trait for reconstruction events.
//!
//! Inject an [`Arc<dyn ReflowProgressCallback>`] via
//! [`crate::config::ReflowConfigBuilder::progress_callback`] to receive
//! events as the pipeline tags each chunk. The CLI drives an `indicatif`
//! progress bar from it; a server might forward events to a channel.
//!
//! # Example
//!
//! ```rust
//! use edgequake_reflow::{ReflowConfig, ReflowProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     tagged: AtomicUsize,
//! }
//!
//! impl ReflowProgressCallback for CountingCallback {
//!     fn on_chunk_complete(&self, chunk_num: usize, total_chunks: usize, tagged_len: usize) {
//!         self.tagged.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("chunk {}/{} tagged ({} bytes)", chunk_num, total_chunks, tagged_len);
//!     }
//! }
//!
//! let config = ReflowConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { tagged: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the reconstruction pipeline as it moves through its stages.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Chunk events may arrive concurrently and out of
/// order; implementations must synchronise their own state.
pub trait ReflowProgressCallback: Send + Sync {
    /// Called once after pages are split, before they are scored.
    fn on_reconstruction_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called once flagged pages were re-extracted.
    ///
    /// # Arguments
    /// * `flagged`     — pages that failed the quality check
    /// * `reextracted` — pages whose text was actually replaced
    fn on_reextraction_complete(&self, flagged: usize, reextracted: usize) {
        let _ = (flagged, reextracted);
    }

    /// Called before the first tagging call is issued.
    fn on_tagging_start(&self, total_chunks: usize) {
        let _ = total_chunks;
    }

    /// Called just before the tagging call for a chunk is sent.
    ///
    /// `chunk_num` is 1-indexed.
    fn on_chunk_start(&self, chunk_num: usize, total_chunks: usize) {
        let _ = (chunk_num, total_chunks);
    }

    /// Called when a chunk came back tagged.
    ///
    /// # Arguments
    /// * `chunk_num`    — 1-indexed chunk number
    /// * `total_chunks` — total chunks
    /// * `tagged_len`   — byte length of the tagged text
    fn on_chunk_complete(&self, chunk_num: usize, total_chunks: usize, tagged_len: usize) {
        let _ = (chunk_num, total_chunks, tagged_len);
    }

    /// Called when a chunk degraded to its original text.
    fn on_chunk_error(&self, chunk_num: usize, total_chunks: usize, error: &str) {
        let _ = (chunk_num, total_chunks, error);
    }

    /// Called once the tag review settled, after any correction rounds.
    ///
    /// # Arguments
    /// * `iterations` — corrections applied (0 when none were needed or
    ///   allowed)
    /// * `accepted`   — whether the final review status is acceptable
    fn on_correction_complete(&self, iterations: usize, accepted: bool) {
        let _ = (iterations, accepted);
    }

    /// Called once after reformatting.
    ///
    /// # Arguments
    /// * `total_chunks`  — chunks sent for tagging
    /// * `tagged_chunks` — chunks that were tagged without degrading
    fn on_reconstruction_complete(&self, total_chunks: usize, tagged_chunks: usize) {
        let _ = (total_chunks, tagged_chunks);
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl ReflowProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ReflowConfig`].
pub type ProgressCallback = Arc<dyn ReflowProgressCallback>;
