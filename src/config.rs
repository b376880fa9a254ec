//! Configuration types for document reconstruction.
//!
//! All pipeline behaviour is controlled through [`ReflowConfig`], built via
//! its [`ReflowConfigBuilder`]. Overriding the model or provider means
//! building a new config value; nothing in the library reads global mutable
//! state.

use crate::error::ReflowError;
use crate::pipeline::llm::ContentGenerator;
use crate::pipeline::quality::{QualityThresholds, DEFAULT_PAGE_MARKER};
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;

/// Model used when neither the config nor the environment names one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Configuration for a reconstruction run.
///
/// Built via [`ReflowConfig::builder()`] or using [`ReflowConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_reflow::ReflowConfig;
///
/// let config = ReflowConfig::builder()
///     .model("gpt-4.1-mini")
///     .chunk_size(20_000)
///     .max_concurrent_chunks(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ReflowConfig {
    /// LLM model identifier, e.g. "gpt-4.1-mini", "gemini-2.0-flash".
    /// If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "gemini", "ollama").
    /// If None along with `provider`, the provider is detected from the
    /// environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed content generator. Takes precedence over every
    /// provider setting; used by tests and by callers with their own client.
    pub generator: Option<Arc<dyn ContentGenerator>>,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Tagging must reproduce the input verbatim; any sampling randomness
    /// shows up as altered wording.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per chunk. Default: 16384.
    ///
    /// The tagged chunk is the whole chunk plus markup, so this must cover
    /// roughly `chunk_size / 3` tokens with headroom.
    pub max_tokens: usize,

    /// Chunk size in characters. Default: 40 000.
    ///
    /// Documents shorter than this go out in a single call; longer ones are
    /// split into fixed windows of this size.
    pub chunk_size: usize,

    /// Upper bound on tagging calls in flight. Default: None (all chunks of
    /// a document are issued at once).
    pub max_concurrent_chunks: Option<usize>,

    /// Per-call timeout in seconds, applied by the LLM adapter. Default: 180.
    pub api_timeout_secs: u64,

    /// Custom tagging instruction. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Literal marker separating pages in the raw input.
    /// Default: `<!-- page-break -->`.
    pub page_marker: String,

    /// Correction rounds allowed when the tag review is not acceptable.
    /// Default: 0 (the review stays advisory and no extra call is made).
    pub max_correction_iterations: usize,

    /// Accept only a `Perfect` or `Excellent` tag review. By default a
    /// `Warning` is accepted as well.
    pub strict: bool,

    /// Limits for the page quality heuristics.
    pub quality: QualityThresholds,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ReflowConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            generator: None,
            temperature: 0.0,
            max_tokens: 16384,
            chunk_size: 40_000,
            max_concurrent_chunks: None,
            api_timeout_secs: 180,
            system_prompt: None,
            page_marker: DEFAULT_PAGE_MARKER.to_string(),
            max_correction_iterations: 0,
            strict: false,
            quality: QualityThresholds::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ReflowConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReflowConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field(
                "generator",
                &self.generator.as_ref().map(|_| "<dyn ContentGenerator>"),
            )
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("chunk_size", &self.chunk_size)
            .field("max_concurrent_chunks", &self.max_concurrent_chunks)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("page_marker", &self.page_marker)
            .field("max_correction_iterations", &self.max_correction_iterations)
            .field("strict", &self.strict)
            .field("quality", &self.quality)
            .finish()
    }
}

impl ReflowConfig {
    /// Create a new builder for `ReflowConfig`.
    pub fn builder() -> ReflowConfigBuilder {
        ReflowConfigBuilder {
            config: Self::default(),
        }
    }

    /// Same settings with another model.
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..self.clone()
        }
    }
}

/// Builder for [`ReflowConfig`].
pub struct ReflowConfigBuilder {
    config: ReflowConfig,
}

impl fmt::Debug for ReflowConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReflowConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ReflowConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn ContentGenerator>) -> Self {
        self.config.generator = Some(generator);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn chunk_size(mut self, chars: usize) -> Self {
        self.config.chunk_size = chars;
        self
    }

    pub fn max_concurrent_chunks(mut self, n: usize) -> Self {
        self.config.max_concurrent_chunks = Some(n);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn page_marker(mut self, marker: impl Into<String>) -> Self {
        self.config.page_marker = marker.into();
        self
    }

    pub fn max_correction_iterations(mut self, n: usize) -> Self {
        self.config.max_correction_iterations = n;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.config.strict = strict;
        self
    }

    pub fn quality(mut self, thresholds: QualityThresholds) -> Self {
        self.config.quality = thresholds;
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.config.progress_callback = Some(callback);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ReflowConfig, ReflowError> {
        let c = &self.config;
        if c.chunk_size == 0 {
            return Err(ReflowError::InvalidConfig(
                "Chunk size must be ≥ 1 character".into(),
            ));
        }
        if c.max_concurrent_chunks == Some(0) {
            return Err(ReflowError::InvalidConfig(
                "Concurrent chunk limit must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(ReflowError::InvalidConfig("Max tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(ReflowError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.page_marker.is_empty() {
            return Err(ReflowError::InvalidConfig(
                "Page marker must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
