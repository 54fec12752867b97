//! Generative-text clients used as the last fallback of the responder.
//!
//! [`TextGenerator`] turns a prompt into a completion. Failures are returned
//! as [`GenerationError`], whose `Display` text is written so that the
//! responder can hand it straight back to the user.
//!
//! | Config Value | Client |
//! |-------------|--------|
//! | `"gemini"` | [`GeminiGenerator`] (`generateContent`) |
//! | `"openai"` | [`OpenAIChatGenerator`] (`chat/completions`) |
//! | `"disabled"` | [`DisabledGenerator`] |

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Credentials, GenerativeConfig};

const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash-latest";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Exception occurred: {0} not set")]
    MissingApiKey(&'static str),
    #[error("Error calling generative API: {0}")]
    Status(String),
    #[error("Exception occurred: {0}")]
    Transport(String),
    /// The upstream answered 2xx with a body that is not the expected JSON.
    #[error("Exception occurred: {0}")]
    Malformed(String),
    #[error("No candidates in the API response.")]
    NoCandidates,
    #[error("No content parts in the API response.")]
    NoContentParts,
    #[error("No content returned from the API.")]
    EmptyContent,
    #[error("Generative fallback is disabled.")]
    Disabled,
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        GenerationError::Transport(err.to_string())
    }
}

/// A text-completion backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError>;
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Reads the body of a non-2xx response into a [`GenerationError::Status`].
async fn status_error(response: reqwest::Response) -> GenerationError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if body.is_empty() {
        GenerationError::Status(status.to_string())
    } else {
        GenerationError::Status(body)
    }
}

// ============ Gemini ============

pub struct GeminiGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiGenerator {
    pub fn new(config: &GenerativeConfig, credentials: &Credentials) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_GEMINI_URL.to_string()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            api_key: credentials.gemini_api_key.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

fn parse_gemini_response(body: &str) -> Result<String, GenerationError> {
    let parsed: GeminiResponse =
        serde_json::from_str(body).map_err(|e| GenerationError::Malformed(e.to_string()))?;

    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or(GenerationError::NoCandidates)?;
    let part = candidate
        .content
        .and_then(|c| c.parts.into_iter().next())
        .ok_or(GenerationError::NoContentParts)?;

    let text = part.text.unwrap_or_default().trim().to_string();
    if text.is_empty() {
        return Err(GenerationError::EmptyContent);
    }
    Ok(text)
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(GenerationError::MissingApiKey("GEMINI_API_KEY"))?;

        let body = serde_json::json!({
            "contents": [ { "parts": [ { "text": prompt } ] } ]
        });

        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.url.trim_end_matches('/'),
                self.model
            ))
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let text = response.text().await?;
        parse_gemini_response(&text)
    }
}

// ============ OpenAI chat ============

pub struct OpenAIChatGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAIChatGenerator {
    pub fn new(config: &GenerativeConfig, credentials: &Credentials) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            api_key: credentials.openai_api_key.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

fn parse_chat_response(body: &str) -> Result<String, GenerationError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| GenerationError::Malformed(e.to_string()))?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or(GenerationError::NoCandidates)?;
    let content = choice
        .message
        .and_then(|m| m.content)
        .ok_or(GenerationError::NoContentParts)?;

    let text = content.trim().to_string();
    if text.is_empty() {
        return Err(GenerationError::EmptyContent);
    }
    Ok(text)
}

#[async_trait]
impl TextGenerator for OpenAIChatGenerator {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(GenerationError::MissingApiKey("OPENAI_API_KEY"))?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [ { "role": "user", "content": prompt } ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let text = response.text().await?;
        parse_chat_response(&text)
    }
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    async fn complete(&self, _prompt: &str) -> Result<String, GenerationError> {
        Err(GenerationError::Disabled)
    }
}

pub fn create_generator(
    config: &GenerativeConfig,
    credentials: &Credentials,
) -> Result<Arc<dyn TextGenerator>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiGenerator::new(config, credentials)?)),
        "openai" => Ok(Arc::new(OpenAIChatGenerator::new(config, credentials)?)),
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        other => bail!("Unknown generative provider: {}", other),
    }
}
