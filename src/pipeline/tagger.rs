//! Chunked structural tagging.
//!
//! A document below the chunk size goes out in a single call. Longer ones
//! are cut into fixed, non-overlapping character windows; every window is
//! sent concurrently and the results are joined back in chunk order once all
//! calls have settled.
//!
//! Windows ignore element boundaries, so a long footnote can be split across
//! two chunks and come back tagged as two fragments. Searching backward for
//! a blank line before each cut would reduce that, at the cost of uneven
//! chunk sizes; it is not attempted.
//!
//! A chunk whose call fails, times out or returns nothing is replaced by its
//! own untagged text. Tagging as a whole never fails; the caller decides
//! what to do when every chunk degraded ([`TaggedDocument::all_failed`]).

use crate::config::{ReflowConfig, DEFAULT_MODEL};
use crate::error::ChunkError;
use crate::output::ChunkResult;
use crate::pipeline::llm::{ContentGenerator, GenerateContentRequest, GenerationConfig};
use crate::progress::ProgressCallback;
use crate::prompts::tagging_instruction;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Reassembled tagging output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaggedDocument {
    /// Chunk outputs joined with a newline, in chunk order.
    pub text: String,
    pub chunks: Vec<ChunkResult>,
}

impl TaggedDocument {
    pub fn degraded_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_degraded()).count()
    }

    pub fn tagged_count(&self) -> usize {
        self.chunks.len() - self.degraded_count()
    }

    /// True when at least one call was made and none succeeded.
    pub fn all_failed(&self) -> bool {
        !self.chunks.is_empty() && self.degraded_count() == self.chunks.len()
    }

    pub fn first_error(&self) -> Option<&ChunkError> {
        self.chunks.iter().find_map(|c| c.error.as_ref())
    }
}

/// Issues tagging calls through a [`ContentGenerator`].
pub struct StructuralTagger {
    generator: Arc<dyn ContentGenerator>,
    model: String,
    instruction: String,
    chunk_size: usize,
    max_concurrent: Option<usize>,
    generation: GenerationConfig,
    progress: Option<ProgressCallback>,
}

impl StructuralTagger {
    pub fn new(generator: Arc<dyn ContentGenerator>, config: &ReflowConfig) -> Self {
        Self {
            generator,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            instruction: tagging_instruction(config.system_prompt.as_deref()).to_string(),
            chunk_size: config.chunk_size.max(1),
            max_concurrent: config.max_concurrent_chunks,
            generation: GenerationConfig::from_config(config),
            progress: config.progress_callback.clone(),
        }
    }

    /// Tag `raw`, degrading failed chunks to their original text.
    pub async fn tag_structurally(&self, raw: &str) -> TaggedDocument {
        if raw.trim().is_empty() {
            return TaggedDocument::default();
        }

        let chunks = split_chunks(raw, self.chunk_size);
        let total = chunks.len();
        info!(
            "Tagging {} chars in {} chunk(s) of ≤{} chars",
            raw.chars().count(),
            total,
            self.chunk_size
        );
        if let Some(cb) = &self.progress {
            cb.on_tagging_start(total);
        }

        let calls = chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| self.tag_chunk(index, total, chunk));

        // Both branches yield results in chunk order, not completion order.
        let results: Vec<ChunkResult> = match self.max_concurrent {
            None => futures::future::join_all(calls).await,
            Some(limit) => stream::iter(calls).buffered(limit.max(1)).collect().await,
        };

        let text = results
            .iter()
            .map(|r| r.tagged.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        TaggedDocument {
            text,
            chunks: results,
        }
    }

    async fn tag_chunk(&self, index: usize, total: usize, chunk: &str) -> ChunkResult {
        let start = Instant::now();
        let chunk_num = index + 1;
        if let Some(cb) = &self.progress {
            cb.on_chunk_start(chunk_num, total);
        }

        let request = GenerateContentRequest::structural_tagging(
            self.model.as_str(),
            &self.instruction,
            chunk,
            Some(self.generation),
        );
        let outcome = match self.generator.generate_content(request).await {
            Ok(generated) if generated.text.trim().is_empty() => {
                Err(ChunkError::EmptyResponse { chunk: chunk_num })
            }
            Ok(generated) => Ok(generated),
            Err(e) => Err(e.for_chunk(chunk_num)),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let char_count = chunk.chars().count();

        match outcome {
            Ok(generated) => {
                debug!(
                    "Chunk {}/{}: tagged {} chars in {}ms",
                    chunk_num, total, char_count, duration_ms
                );
                if let Some(cb) = &self.progress {
                    cb.on_chunk_complete(chunk_num, total, generated.text.len());
                }
                ChunkResult {
                    index,
                    char_count,
                    tagged: generated.text,
                    input_tokens: generated.input_tokens,
                    output_tokens: generated.output_tokens,
                    duration_ms,
                    error: None,
                }
            }
            Err(e) => {
                warn!("{} (keeping original text)", e);
                if let Some(cb) = &self.progress {
                    cb.on_chunk_error(chunk_num, total, &e.to_string());
                }
                ChunkResult {
                    index,
                    char_count,
                    tagged: chunk.to_string(),
                    input_tokens: 0,
                    output_tokens: 0,
                    duration_ms,
                    error: Some(e),
                }
            }
        }
    }
}

/// Number of calls [`StructuralTagger::tag_structurally`] issues for `raw`.
pub fn planned_chunks(raw: &str, chunk_size: usize) -> usize {
    if raw.trim().is_empty() {
        0
    } else {
        split_chunks(raw, chunk_size).len()
    }
}

/// Cut `text` into windows of `size` characters. The last window holds the
/// remainder. Cuts always fall on char boundaries.
pub fn split_chunks(text: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut count = 0usize;

    for (offset, _) in text.char_indices() {
        if count == size {
            chunks.push(&text[start..offset]);
            start = offset;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::GeneratedContent;
    use crate::prompts::DEFAULT_TAGGING_INSTRUCTION;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Wraps the payload in `<p>` unless it starts with `fail_on`.
    #[derive(Default)]
    struct ScriptedGenerator {
        fail_on: Option<char>,
        empty_on: Option<char>,
        /// Sleep `delay_ms / (position + 1)` so early chunks finish last.
        delay_ms: u64,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        requests: Mutex<Vec<GenerateContentRequest>>,
    }

    #[async_trait]
    impl ContentGenerator for ScriptedGenerator {
        async fn generate_content(
            &self,
            request: GenerateContentRequest,
        ) -> Result<GeneratedContent, ChunkError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let position = {
                let mut requests = self.requests.lock().unwrap();
                requests.push(request.clone());
                requests.len() as u64
            };

            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms / position)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let payload = request.payload().unwrap_or_default().to_string();
            let first = payload.chars().next();
            if first.is_some() && first == self.fail_on {
                return Err(ChunkError::GenerationFailed {
                    chunk: 0,
                    detail: "503 Service Unavailable".into(),
                });
            }
            if first.is_some() && first == self.empty_on {
                return Ok(GeneratedContent::text("  \n"));
            }
            Ok(GeneratedContent {
                text: format!("<p>{payload}</p>"),
                input_tokens: 10,
                output_tokens: 12,
            })
        }
    }

    fn tagger(generator: Arc<ScriptedGenerator>, config: &ReflowConfig) -> StructuralTagger {
        StructuralTagger::new(generator, config)
    }

    fn three_chunk_document() -> String {
        format!("{}{}{}", "a".repeat(40_000), "b".repeat(40_000), "c".repeat(20_000))
    }

    #[test]
    fn split_chunks_fixed_windows() {
        let doc = three_chunk_document();
        let chunks = split_chunks(&doc, 40_000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 40_000);
        assert_eq!(chunks[2].len(), 20_000);
        assert_eq!(chunks.concat(), doc);
        assert_eq!(planned_chunks(&doc, 40_000), 3);
        assert_eq!(planned_chunks("  ", 40_000), 0);
    }

    #[test]
    fn split_chunks_respects_char_boundaries() {
        let chunks = split_chunks("ééééé", 2);
        assert_eq!(chunks, vec!["éé", "éé", "é"]);
        assert!(split_chunks("", 10).is_empty());
        assert_eq!(split_chunks("short", 10), vec!["short"]);
    }

    #[tokio::test]
    async fn middle_chunk_failure_degrades_to_original() {
        let generator = Arc::new(ScriptedGenerator {
            fail_on: Some('b'),
            ..Default::default()
        });
        let doc = three_chunk_document();
        let tagged = tagger(generator, &ReflowConfig::default())
            .tag_structurally(&doc)
            .await;

        assert_eq!(tagged.chunks.len(), 3);
        assert_eq!(tagged.degraded_count(), 1);
        assert!(!tagged.all_failed());

        let middle = &tagged.chunks[1];
        assert_eq!(middle.tagged, "b".repeat(40_000));
        assert_eq!(
            middle.error,
            Some(ChunkError::GenerationFailed {
                chunk: 2,
                detail: "503 Service Unavailable".into()
            })
        );
        assert_eq!(tagged.chunks[0].tagged, format!("<p>{}</p>", "a".repeat(40_000)));
        assert_eq!(tagged.chunks[2].tagged, format!("<p>{}</p>", "c".repeat(20_000)));
        assert_eq!(
            tagged.text,
            format!(
                "<p>{}</p>\n{}\n<p>{}</p>",
                "a".repeat(40_000),
                "b".repeat(40_000),
                "c".repeat(20_000)
            )
        );
    }

    #[tokio::test]
    async fn reassembly_follows_chunk_order_not_completion_order() {
        let generator = Arc::new(ScriptedGenerator {
            delay_ms: 60,
            ..Default::default()
        });
        let config = ReflowConfig::builder().chunk_size(3).build().unwrap();
        let tagged = tagger(generator.clone(), &config)
            .tag_structurally("aaabbbccc")
            .await;

        assert_eq!(tagged.text, "<p>aaa</p>\n<p>bbb</p>\n<p>ccc</p>");
        let indices: Vec<_> = tagged.chunks.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        // Unbounded: every call is in flight before the first one settles.
        assert_eq!(generator.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn concurrency_limit_is_honoured() {
        let generator = Arc::new(ScriptedGenerator {
            delay_ms: 10,
            ..Default::default()
        });
        let config = ReflowConfig::builder()
            .chunk_size(2)
            .max_concurrent_chunks(1)
            .build()
            .unwrap();
        let tagged = tagger(generator.clone(), &config)
            .tag_structurally("aabbccdd")
            .await;

        assert_eq!(tagged.chunks.len(), 4);
        assert_eq!(generator.peak.load(Ordering::SeqCst), 1);
        assert_eq!(tagged.text, "<p>aa</p>\n<p>bb</p>\n<p>cc</p>\n<p>dd</p>");
    }

    #[tokio::test]
    async fn short_document_uses_single_call() {
        let generator = Arc::new(ScriptedGenerator::default());
        let tagged = tagger(generator.clone(), &ReflowConfig::default())
            .tag_structurally("Article 1\nBody text.")
            .await;

        assert_eq!(tagged.chunks.len(), 1);
        assert_eq!(tagged.text, "<p>Article 1\nBody text.</p>");
        let requests = generator.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let parts = &requests[0].contents[0].parts;
        assert_eq!(parts[0].text, DEFAULT_TAGGING_INSTRUCTION);
        assert_eq!(parts[1].text, "Article 1\nBody text.");
        assert_eq!(requests[0].config.and_then(|c| c.temperature), Some(0.0));
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let generator = Arc::new(ScriptedGenerator::default());
        let tagged = tagger(generator.clone(), &ReflowConfig::default())
            .tag_structurally(" \n\t ")
            .await;
        assert_eq!(tagged, TaggedDocument::default());
        assert!(!tagged.all_failed());
        assert!(generator.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_response_counts_as_failure() {
        let generator = Arc::new(ScriptedGenerator {
            empty_on: Some('x'),
            ..Default::default()
        });
        let tagged = tagger(generator, &ReflowConfig::default())
            .tag_structurally("xyz")
            .await;
        assert!(tagged.all_failed());
        assert_eq!(tagged.text, "xyz");
        assert_eq!(
            tagged.first_error(),
            Some(&ChunkError::EmptyResponse { chunk: 1 })
        );
    }

    #[tokio::test]
    async fn system_prompt_override_is_sent() {
        let generator = Arc::new(ScriptedGenerator::default());
        let config = ReflowConfig::builder()
            .system_prompt("Tag it.")
            .model("test-model")
            .build()
            .unwrap();
        tagger(generator.clone(), &config)
            .tag_structurally("text")
            .await;
        let requests = generator.requests.lock().unwrap();
        assert_eq!(requests[0].model, "test-model");
        assert_eq!(requests[0].contents[0].parts[0].text, "Tag it.");
    }
}
