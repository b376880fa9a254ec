//! Full-document reconstruction entry points.
//!
//! Stages run strictly forward:
//!
//! ```text
//! raw text ─▶ pages ─▶ quality reports ─▶ (re-extract flagged) ─▶ consolidated
//!          ─▶ line classification ─▶ tagging (LLM) ─▶ tag review
//!          ─▶ (correction rounds, LLM) ─▶ reformat
//! ```
//!
//! Only tagging and tag correction talk to the network. Everything else is
//! pure and deterministic.

use crate::config::{ReflowConfig, DEFAULT_MODEL};
use crate::error::{PageError, ReflowError};
use crate::output::{DocumentAnalysis, ReconstructionOutput, ReconstructionStats};
use crate::pipeline::classify::{classify_text, summarize};
use crate::pipeline::correct::TagCorrector;
use crate::pipeline::llm::{ContentGenerator, LlmContentGenerator};
use crate::pipeline::quality::{analyze_with, flagged_pages, split_pages, PageQualityReport};
use crate::pipeline::reformat::{reformat, ReformatOutput};
use crate::pipeline::tagger::{planned_chunks, StructuralTagger};
use async_trait::async_trait;
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::future::join_all;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Produces fresh text for a page whose extraction was flagged, typically
/// by running OCR on the page image.
///
/// Called only for flagged pages, concurrently.
#[async_trait]
pub trait PageReextractor: Send + Sync {
    async fn reextract(
        &self,
        report: &PageQualityReport,
        current_text: &str,
    ) -> Result<String, PageError>;
}

/// Reconstruct a raw document whose pages are separated by
/// [`ReflowConfig::page_marker`].
///
/// Flagged pages are reported but keep their extracted text; use
/// [`reconstruct_with`] to supply a re-extractor.
///
/// A tag review that is not acceptable triggers up to
/// [`ReflowConfig::max_correction_iterations`] correction rounds; the result
/// is recorded in [`ReconstructionStats::accepted`] and never fails the run.
///
/// # Errors
/// Returns `Err(ReflowError)` only for fatal errors:
/// - No LLM provider could be configured
/// - Every tagging call failed
pub async fn reconstruct(
    raw: &str,
    config: &ReflowConfig,
) -> Result<ReconstructionOutput, ReflowError> {
    reconstruct_with(raw, config, None).await
}

/// [`reconstruct`] with an optional page re-extractor.
pub async fn reconstruct_with(
    raw: &str,
    config: &ReflowConfig,
    reextractor: Option<&dyn PageReextractor>,
) -> Result<ReconstructionOutput, ReflowError> {
    let total_start = Instant::now();
    info!("Starting reconstruction: {} bytes", raw.len());

    // ── Step 1: Resolve the tagging backend ──────────────────────────────
    let generator = resolve_generator(config)?;

    // ── Step 2: Split and score pages ────────────────────────────────────
    let pages = split_pages(raw, &config.page_marker);
    if let Some(ref cb) = config.progress_callback {
        cb.on_reconstruction_start(pages.len());
    }
    let page_reports = analyze_pages(&pages, config);
    let flagged = flagged_pages(&page_reports);
    info!(
        "{} page(s), {} flagged for re-extraction",
        pages.len(),
        flagged.len()
    );

    // ── Step 3: Re-extract flagged pages ─────────────────────────────────
    let (pages, reextracted) = reextract_pages(pages, &page_reports, reextractor).await;
    if let Some(ref cb) = config.progress_callback {
        cb.on_reextraction_complete(flagged.len(), reextracted);
    }

    // ── Step 4: Consolidate ──────────────────────────────────────────────
    let consolidated = consolidate(&pages);

    // ── Step 5: Classify lines ───────────────────────────────────────────
    let classification = summarize(&classify_text(&consolidated));
    debug!(
        "Classified {} lines, loss risk {:.3}",
        classification.total_lines, classification.potential_loss_risk
    );

    // ── Step 6: Structural tagging ───────────────────────────────────────
    let tagging_start = Instant::now();
    let tagged = StructuralTagger::new(Arc::clone(&generator), config)
        .tag_structurally(&consolidated)
        .await;
    let tagging_duration_ms = tagging_start.elapsed().as_millis() as u64;

    if tagged.all_failed() {
        let first_error = tagged
            .first_error()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(ReflowError::AllChunksFailed {
            total: tagged.chunks.len(),
            first_error,
        });
    }

    // ── Step 7: Review and correct tags ──────────────────────────────────
    let correction = TagCorrector::new(generator, config)
        .correct(&tagged.text)
        .await;
    if !correction.review.is_clean() {
        warn!(
            "Tag review: {} issue(s), status {:?}, accepted: {}",
            correction.review.error_count(),
            correction.validation.status,
            correction.accepted
        );
    }
    if let Some(ref cb) = config.progress_callback {
        cb.on_correction_complete(correction.iterations, correction.accepted);
    }

    // ── Step 8: Reformat ─────────────────────────────────────────────────
    let ReformatOutput {
        final_text,
        footnote_analysis,
        document,
    } = reformat(&correction.text);

    // ── Step 9: Stats ────────────────────────────────────────────────────
    let stats = ReconstructionStats {
        total_pages: pages.len(),
        flagged_pages: flagged.len(),
        reextracted_pages: reextracted,
        total_chunks: tagged.chunks.len(),
        degraded_chunks: tagged.degraded_count(),
        footnote_count: footnote_analysis.count,
        total_input_tokens: tagged.chunks.iter().map(|c| c.input_tokens).sum::<u64>()
            + correction.input_tokens,
        total_output_tokens: tagged.chunks.iter().map(|c| c.output_tokens).sum::<u64>()
            + correction.output_tokens,
        correction_iterations: correction.iterations,
        accepted: correction.accepted,
        tagging_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Reconstruction complete: {}/{} chunks tagged, {} footnote(s), {}ms total",
        tagged.tagged_count(),
        stats.total_chunks,
        stats.footnote_count,
        stats.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_reconstruction_complete(stats.total_chunks, tagged.tagged_count());
    }

    Ok(ReconstructionOutput {
        final_text,
        document,
        tagged_text: correction.text,
        page_reports,
        flagged_pages: flagged,
        chunks: tagged.chunks,
        footnote_analysis,
        classification,
        tag_review: correction.review,
        tag_validation: correction.validation,
        stats,
    })
}

/// Read a UTF-8 text file and reconstruct it.
pub async fn reconstruct_file(
    path: impl AsRef<Path>,
    config: &ReflowConfig,
) -> Result<ReconstructionOutput, ReflowError> {
    let raw = read_input(path.as_ref()).await?;
    reconstruct(&raw, config).await
}

/// Reconstruct a text file and write the final text to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn reconstruct_to_file(
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &ReflowConfig,
) -> Result<ReconstructionStats, ReflowError> {
    let output = reconstruct_file(input_path, config).await?;
    write_atomic(output_path.as_ref(), &output.final_text).await?;
    Ok(output.stats)
}

/// Synchronous wrapper around [`reconstruct`].
///
/// Creates a temporary tokio runtime internally.
pub fn reconstruct_sync(
    raw: &str,
    config: &ReflowConfig,
) -> Result<ReconstructionOutput, ReflowError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ReflowError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(reconstruct(raw, config))
}

/// Page quality and line classification without any LLM call.
///
/// Does not require a provider or API key.
pub fn analyze_only(raw: &str, config: &ReflowConfig) -> DocumentAnalysis {
    let pages = split_pages(raw, &config.page_marker);
    let page_reports = analyze_pages(&pages, config);
    let consolidated = consolidate(&pages);
    DocumentAnalysis {
        flagged_pages: flagged_pages(&page_reports),
        page_reports,
        classification: summarize(&classify_text(&consolidated)),
        planned_chunks: planned_chunks(&consolidated, config.chunk_size),
    }
}

/// Resolve the content generator, from most-specific to least-specific.
///
/// 1. **Pre-built generator** (`config.generator`), used as-is.
/// 2. Otherwise an LLM provider is resolved (see below) and wrapped in an
///    [`LlmContentGenerator`] that enforces `config.api_timeout_secs`.
///
/// Provider resolution:
///
/// 1. **Pre-built provider** (`config.provider`).
/// 2. **Named provider + model** (`config.provider_name`), via
///    [`ProviderFactory::create_llm_provider`], which reads the matching
///    API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`),
///    honoured before auto-detection so the model choice survives when
///    several API keys are present.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_generator(config: &ReflowConfig) -> Result<Arc<dyn ContentGenerator>, ReflowError> {
    if let Some(ref generator) = config.generator {
        return Ok(Arc::clone(generator));
    }
    let provider = resolve_provider(config)?;
    Ok(Arc::new(LlmContentGenerator::new(
        provider,
        Duration::from_secs(config.api_timeout_secs),
    )))
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ReflowError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ReflowError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn resolve_provider(config: &ReflowConfig) -> Result<Arc<dyn LLMProvider>, ReflowError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
    if let Some(ref name) = config.provider_name {
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ReflowError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn analyze_pages(pages: &[String], config: &ReflowConfig) -> Vec<PageQualityReport> {
    let reports: Vec<PageQualityReport> = pages
        .iter()
        .enumerate()
        .map(|(i, page)| analyze_with(i, page, &config.quality))
        .collect();
    for report in reports.iter().filter(|r| r.needs_reextraction) {
        warn!("Page {}: {}", report.page_number(), report.issues.join("; "));
    }
    reports
}

/// Replace the text of flagged pages. Returns the pages and the number of
/// pages actually replaced; failures keep the extracted text.
async fn reextract_pages(
    mut pages: Vec<String>,
    reports: &[PageQualityReport],
    reextractor: Option<&dyn PageReextractor>,
) -> (Vec<String>, usize) {
    let flagged: Vec<&PageQualityReport> =
        reports.iter().filter(|r| r.needs_reextraction).collect();
    if flagged.is_empty() {
        return (pages, 0);
    }
    let Some(reextractor) = reextractor else {
        warn!(
            "{} page(s) flagged but no re-extractor configured; keeping extracted text",
            flagged.len()
        );
        return (pages, 0);
    };

    info!("Re-extracting {} flagged page(s)", flagged.len());
    let results = join_all(flagged.iter().map(|report| {
        let current = pages[report.page_index].as_str();
        async move { (report.page_index, reextractor.reextract(report, current).await) }
    }))
    .await;

    let mut replaced = 0;
    for (index, result) in results {
        match result {
            Ok(text) if !text.trim().is_empty() => {
                pages[index] = text.trim().to_string();
                replaced += 1;
            }
            Ok(_) => warn!(
                "Page {}: re-extraction returned no text; keeping extracted text",
                index + 1
            ),
            Err(e) => warn!("{}; keeping extracted text", e),
        }
    }
    (pages, replaced)
}

/// Join non-empty pages with a blank line.
fn consolidate(pages: &[String]) -> String {
    pages
        .iter()
        .filter(|p| !p.is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n\n")
}

async fn read_input(path: &Path) -> Result<String, ReflowError> {
    if !path.exists() {
        return Err(ReflowError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ReflowError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

async fn write_atomic(path: &Path, contents: &str) -> Result<(), ReflowError> {
    let write_err = |e: std::io::Error| ReflowError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp_name = OsString::from(path.as_os_str());
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consolidate_skips_empty_pages() {
        let pages = vec!["one".to_string(), String::new(), "three".to_string()];
        assert_eq!(consolidate(&pages), "one\n\nthree");
        assert_eq!(consolidate(&[]), "");
    }

    #[test]
    fn analyze_only_reports_without_llm() {
        let good = "This page contains ordinary prose with normal spacing and punctuation. \
                    It is long enough to pass the minimum length check easily.";
        let raw = format!("{good}\n<!-- page-break -->\nshort");
        let analysis = analyze_only(&raw, &ReflowConfig::default());

        assert_eq!(analysis.page_reports.len(), 2);
        assert_eq!(analysis.flagged_pages, vec![2]);
        assert_eq!(analysis.planned_chunks, 1);
        assert_eq!(analysis.classification.total_lines, 3);
    }

    #[test]
    fn pre_built_generator_wins() {
        struct Never;
        #[async_trait]
        impl ContentGenerator for Never {
            async fn generate_content(
                &self,
                _request: crate::pipeline::llm::GenerateContentRequest,
            ) -> Result<crate::pipeline::llm::GeneratedContent, crate::error::ChunkError> {
                unreachable!()
            }
        }
        let generator: Arc<dyn ContentGenerator> = Arc::new(Never);
        let config = ReflowConfig::builder()
            .generator(Arc::clone(&generator))
            .provider_name("definitely-not-a-provider")
            .build()
            .unwrap();
        let resolved = resolve_generator(&config).unwrap();
        assert!(Arc::ptr_eq(&resolved, &generator));
    }

    #[tokio::test]
    async fn missing_input_file() {
        let err = reconstruct_file("/definitely/not/here.txt", &ReflowConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReflowError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn atomic_write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("out.txt");
        write_atomic(&target, "done").await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "done");
        assert!(!dir.path().join("nested").join("out.txt.tmp").exists());
    }
}
