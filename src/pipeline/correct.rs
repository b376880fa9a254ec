//! Bounded correction of tagged text.
//!
//! When the tag review is not acceptable, the whole tagged text goes back to
//! the model together with the list of detected problems. Each round is
//! reviewed again and the loop stops as soon as the status is acceptable,
//! the round budget is spent, or a round brings nothing usable.
//!
//! A correction is applied only if it keeps the words of the current text:
//! with tags and whitespace removed both must be identical. A round that
//! rewrites content, or that leaves more issues than it started with, is
//! discarded and ends the loop.

use crate::config::{ReflowConfig, DEFAULT_MODEL};
use crate::pipeline::llm::{ContentGenerator, GenerateContentRequest, GenerationConfig};
use crate::pipeline::markers::strip_tags;
use crate::pipeline::review::{assess, review_tags, QualityStatus, TagReview, TagValidation};
use crate::prompts::{correction_issue_list, DEFAULT_CORRECTION_INSTRUCTION};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Whether a review status can be kept without further correction.
///
/// `Perfect` and `Excellent` always pass and `Critical` never does. A
/// `Warning` passes unless `strict` is set.
pub fn is_acceptable(status: QualityStatus, strict: bool) -> bool {
    match status {
        QualityStatus::Perfect | QualityStatus::Excellent => true,
        QualityStatus::Warning => !strict,
        QualityStatus::Critical => false,
    }
}

/// Final text of the correction loop and its verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionOutcome {
    pub text: String,
    pub review: TagReview,
    pub validation: TagValidation,
    /// Corrections actually applied.
    pub iterations: usize,
    pub accepted: bool,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Issues correction calls through a [`ContentGenerator`].
pub struct TagCorrector {
    generator: Arc<dyn ContentGenerator>,
    model: String,
    generation: GenerationConfig,
    max_iterations: usize,
    strict: bool,
}

impl TagCorrector {
    pub fn new(generator: Arc<dyn ContentGenerator>, config: &ReflowConfig) -> Self {
        Self {
            generator,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            generation: GenerationConfig::from_config(config),
            max_iterations: config.max_correction_iterations,
            strict: config.strict,
        }
    }

    /// Review `tagged` and correct it for at most `max_iterations` rounds.
    ///
    /// Never fails: a failed round keeps the last good text.
    pub async fn correct(&self, tagged: &str) -> CorrectionOutcome {
        let mut current = tagged.to_string();
        let mut review = review_tags(&current);
        let mut validation = assess(&review);
        let mut iterations = 0usize;
        let (mut input_tokens, mut output_tokens) = (0u64, 0u64);

        for round in 1..=self.max_iterations {
            if is_acceptable(validation.status, self.strict) {
                break;
            }
            debug!(
                "Correction round {}/{}: {} issue(s), status {:?}",
                round,
                self.max_iterations,
                review.error_count(),
                validation.status
            );

            let request = GenerateContentRequest::tag_correction(
                self.model.as_str(),
                DEFAULT_CORRECTION_INSTRUCTION,
                &correction_issue_list(&review),
                &current,
                Some(self.generation),
            );
            let generated = match self.generator.generate_content(request).await {
                Ok(generated) => generated,
                Err(e) => {
                    warn!("Correction round {} failed: {}", round, e);
                    break;
                }
            };
            input_tokens += generated.input_tokens;
            output_tokens += generated.output_tokens;

            let candidate = generated.text.trim();
            if candidate.is_empty() {
                warn!("Correction round {} returned no text", round);
                break;
            }
            if candidate == current.trim() {
                debug!("Correction round {} changed nothing", round);
                break;
            }
            if !same_words(&current, candidate) {
                warn!(
                    "Correction round {} altered the text itself; discarded",
                    round
                );
                break;
            }
            let candidate_review = review_tags(candidate);
            if candidate_review.error_count() > review.error_count() {
                warn!(
                    "Correction round {} left {} issue(s) instead of {}; discarded",
                    round,
                    candidate_review.error_count(),
                    review.error_count()
                );
                break;
            }

            current = candidate.to_string();
            validation = assess(&candidate_review);
            review = candidate_review;
            iterations += 1;
        }

        let accepted = is_acceptable(validation.status, self.strict);
        if iterations > 0 {
            info!(
                "Tag correction: {} round(s), {} issue(s) left, status {:?}",
                iterations,
                review.error_count(),
                validation.status
            );
        }

        CorrectionOutcome {
            text: current,
            review,
            validation,
            iterations,
            accepted,
            input_tokens,
            output_tokens,
        }
    }
}

/// Same characters once tags and whitespace are removed.
fn same_words(a: &str, b: &str) -> bool {
    let words = |text: &str| -> String {
        strip_tags(text)
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect()
    };
    words(a) == words(b)
}
