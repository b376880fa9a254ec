//! External structural-tagging call boundary.
//!
//! The tagger never talks to an LLM client directly. It builds a
//! [`GenerateContentRequest`] (`model` + `contents` + optional `config`) and
//! hands it to a [`ContentGenerator`]. Tests plug in scripted generators;
//! production code uses [`LlmContentGenerator`], which adapts any
//! `edgequake_llm::LLMProvider`.
//!
//! ## Timeouts
//!
//! No timeout is applied above this layer. [`LlmContentGenerator`] wraps
//! every call in `tokio::time::timeout`, so a hung provider degrades one
//! chunk instead of blocking the whole document. Custom generators are
//! responsible for their own deadline.

use crate::config::ReflowConfig;
use crate::error::ChunkError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One text part of a content entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

/// One content entry: a role and its ordered parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<usize>,
}

impl GenerationConfig {
    pub fn from_config(config: &ReflowConfig) -> Self {
        Self {
            temperature: Some(config.temperature),
            max_output_tokens: Some(config.max_tokens),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateContentRequest {
    pub model: String,
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<GenerationConfig>,
}

impl GenerateContentRequest {
    /// A single user turn whose parts are the instruction followed by the
    /// chunk text.
    pub fn structural_tagging(
        model: impl Into<String>,
        instruction: &str,
        chunk: &str,
        config: Option<GenerationConfig>,
    ) -> Self {
        Self::single_turn(model.into(), &[instruction, chunk], config)
    }

    /// A single user turn: instruction, problem list, then the tagged text
    /// to correct.
    pub fn tag_correction(
        model: impl Into<String>,
        instruction: &str,
        issues: &str,
        tagged: &str,
        config: Option<GenerationConfig>,
    ) -> Self {
        Self::single_turn(model.into(), &[instruction, issues, tagged], config)
    }

    fn single_turn(model: String, parts: &[&str], config: Option<GenerationConfig>) -> Self {
        Self {
            model,
            contents: vec![Content {
                role: "user".into(),
                parts: parts
                    .iter()
                    .map(|text| Part {
                        text: text.to_string(),
                    })
                    .collect(),
            }],
            config,
        }
    }

    /// The last part of the last content entry; the chunk for tagging
    /// requests.
    pub fn payload(&self) -> Option<&str> {
        self.contents
            .last()
            .and_then(|c| c.parts.last())
            .map(|p| p.text.as_str())
    }
}

/// Text produced by a generator plus token accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl GeneratedContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// `generateContent(model, contents, config) -> text`.
///
/// Errors may carry any chunk index; the tagger re-attributes them to the
/// chunk that issued the request.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate_content(
        &self,
        request: GenerateContentRequest,
    ) -> Result<GeneratedContent, ChunkError>;
}

/// [`ContentGenerator`] backed by an `edgequake_llm` provider.
pub struct LlmContentGenerator {
    provider: Arc<dyn LLMProvider>,
    timeout: Duration,
}

impl LlmContentGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }
}

#[async_trait]
impl ContentGenerator for LlmContentGenerator {
    async fn generate_content(
        &self,
        request: GenerateContentRequest,
    ) -> Result<GeneratedContent, ChunkError> {
        let messages = to_messages(&request);
        let options = build_options(request.config.as_ref());

        let call = self.provider.chat(&messages, Some(&options));
        let response = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| ChunkError::Timeout {
                chunk: 0,
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| ChunkError::GenerationFailed {
                chunk: 0,
                detail: e.to_string(),
            })?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            request.model, response.prompt_tokens, response.completion_tokens
        );

        Ok(GeneratedContent {
            text: strip_outer_fence(&response.content),
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

/// `system` entries become system messages, everything else a user message.
/// Parts of one entry are joined with a blank line.
fn to_messages(request: &GenerateContentRequest) -> Vec<ChatMessage> {
    request
        .contents
        .iter()
        .map(|content| {
            let text = content
                .parts
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            match content.role.as_str() {
                "system" => ChatMessage::system(text),
                _ => ChatMessage::user(text),
            }
        })
        .collect()
}

fn build_options(config: Option<&GenerationConfig>) -> CompletionOptions {
    let config = config.copied().unwrap_or_default();
    CompletionOptions {
        temperature: config.temperature,
        max_tokens: config.max_output_tokens,
        ..Default::default()
    }
}

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:[a-zA-Z]*)?\n(.*)\n```\s*$").unwrap());

/// Models sometimes wrap the whole answer in a code fence even when told not
/// to. Only a fence around the entire response is removed.
pub(crate) fn strip_outer_fence(text: &str) -> String {
    let trimmed = text.trim();
    match RE_OUTER_FENCE.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => text.to_string(),
    }
}
