//! Gemini multimodal client and the structured-generation wrapper.
//!
//! [`ModelClient`] is the injection seam: the real [`GeminiClient`] talks to
//! the Generative Language REST API, while tests substitute a stub. The
//! [`RemoteExtractor`] layers the reliability policy on top: JSON-output
//! prompt suffix, per-call timeout, exponential-backoff retries, and the
//! three-step JSON repair ladder. A recognized rate-limit signal is never
//! retried here; it propagates so callers can answer "try again later".

use crate::config::Settings;
use crate::error::ExtractError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Opaque reference to content uploaded to the model service, addressable
/// in subsequent generate calls. Scoped to one orchestration invocation.
#[derive(Debug, Clone)]
pub struct FileHandle {
    pub name: String,
    pub uri: String,
    pub mime_type: String,
}

/// The remote multimodal model, reduced to the two calls the pipeline needs.
#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    /// Upload raw bytes, returning a handle the model can address.
    async fn upload(&self, bytes: &[u8], mime_type: &str) -> Result<FileHandle, ExtractError>;

    /// Run one generation call. Implementations must surface rate limiting
    /// as [`ExtractError::RateLimited`], distinct from generic failure.
    async fn generate(
        &self,
        prompt: &str,
        file: Option<&FileHandle>,
    ) -> Result<String, ExtractError>;
}

// ── Gemini REST implementation ──────────────────────────────────────────────

pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f64,
    max_output_tokens: u32,
}

impl GeminiClient {
    /// Create a client reading the API key from `GOOGLE_API_KEY`.
    pub fn from_env(client: reqwest::Client, settings: &Settings) -> anyhow::Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .map_err(|_| anyhow::anyhow!("GOOGLE_API_KEY environment variable not set"))?;
        info!("Gemini client initialized with model: {}", settings.gemini_model);
        Ok(Self {
            client,
            api_key,
            model: settings.gemini_model.clone(),
            temperature: settings.gemini_temperature,
            max_output_tokens: settings.gemini_max_output_tokens,
        })
    }
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Serialize)]
struct RequestPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "fileData", skip_serializing_if = "Option::is_none")]
    file_data: Option<FileData>,
}

#[derive(Serialize)]
struct FileData {
    #[serde(rename = "fileUri")]
    file_uri: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
    temperature: f64,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

#[derive(Deserialize)]
struct UploadResponse {
    file: UploadedFile,
}

#[derive(Deserialize)]
struct UploadedFile {
    name: String,
    uri: String,
    #[serde(rename = "mimeType", default)]
    mime_type: Option<String>,
}

#[async_trait::async_trait]
impl ModelClient for GeminiClient {
    async fn upload(&self, bytes: &[u8], mime_type: &str) -> Result<FileHandle, ExtractError> {
        use reqwest::multipart::{Form, Part};

        info!("Uploading {} bytes to Gemini Files API", bytes.len());

        let metadata = serde_json::json!({ "file": { "display_name": "document" } });
        let form = Form::new()
            .part(
                "metadata",
                Part::text(metadata.to_string())
                    .mime_str("application/json")
                    .map_err(|e| ExtractError::Upload(e.to_string()))?,
            )
            .part(
                "file",
                Part::bytes(bytes.to_vec())
                    .mime_str(mime_type)
                    .map_err(|e| ExtractError::Upload(e.to_string()))?,
            );

        let url = format!("{}/upload/v1beta/files?key={}", GEMINI_API_BASE, self.api_key);
        let resp = self
            .client
            .post(&url)
            .header("X-Goog-Upload-Protocol", "multipart")
            .multipart(form)
            .send()
            .await
            .map_err(|e| ExtractError::Upload(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            warn!("Gemini Files API rate limited the upload");
            return Err(ExtractError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExtractError::Upload(format!("({}): {}", status, body)));
        }

        let upload: UploadResponse = resp
            .json()
            .await
            .map_err(|e| ExtractError::Upload(format!("bad upload response: {}", e)))?;

        info!("File uploaded: {}", upload.file.name);
        Ok(FileHandle {
            name: upload.file.name,
            uri: upload.file.uri,
            mime_type: upload.file.mime_type.unwrap_or_else(|| mime_type.to_string()),
        })
    }

    async fn generate(
        &self,
        prompt: &str,
        file: Option<&FileHandle>,
    ) -> Result<String, ExtractError> {
        let mut parts = Vec::new();
        if let Some(handle) = file {
            parts.push(RequestPart {
                text: None,
                file_data: Some(FileData {
                    file_uri: handle.uri.clone(),
                    mime_type: handle.mime_type.clone(),
                }),
            });
        }
        parts.push(RequestPart {
            text: Some(prompt.to_string()),
            file_data: None,
        });

        let request = GenerateContentRequest {
            contents: vec![RequestContent { parts }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            GEMINI_API_BASE, self.model, self.api_key
        );

        debug!("Calling Gemini generateContent (model={})", self.model);
        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractError::Request(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            warn!("Gemini rate limit exceeded");
            return Err(ExtractError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if body.contains("RESOURCE_EXHAUSTED") {
                warn!("Gemini quota exhausted: {}", body);
                return Err(ExtractError::RateLimited);
            }
            return Err(ExtractError::Request(format!("({}): {}", status, body)));
        }

        let response: GenerateContentResponse = resp
            .json()
            .await
            .map_err(|e| ExtractError::Request(format!("bad generate response: {}", e)))?;

        if let Some(usage) = &response.usage_metadata {
            info!(
                "Token usage: input={}, output={}, total={}",
                usage.prompt_token_count, usage.candidates_token_count, usage.total_token_count
            );
        }

        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ExtractError::Request("model returned no text".to_string()));
        }

        Ok(text)
    }
}

// ── Structured-generation wrapper ───────────────────────────────────────────

/// Wraps a [`ModelClient`] with the reliability policy every strategy uses.
pub struct RemoteExtractor {
    client: Arc<dyn ModelClient>,
    max_retries: u32,
    backoff_base: Duration,
    timeout: Duration,
}

impl RemoteExtractor {
    pub fn new(client: Arc<dyn ModelClient>, settings: &Settings) -> Self {
        Self::with_policy(
            client,
            settings.max_retries,
            settings.backoff_base,
            settings.request_timeout,
        )
    }

    pub fn with_policy(
        client: Arc<dyn ModelClient>,
        max_retries: u32,
        backoff_base: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            max_retries,
            backoff_base,
            timeout,
        }
    }

    /// Upload with the per-call timeout applied. Not retried: callers decide
    /// whether a failed upload dooms their strategy.
    pub async fn upload(&self, bytes: &[u8], mime_type: &str) -> Result<FileHandle, ExtractError> {
        match tokio::time::timeout(self.timeout, self.client.upload(bytes, mime_type)).await {
            Ok(result) => result,
            Err(_) => Err(ExtractError::Timeout(self.timeout)),
        }
    }

    /// Generate content and parse it as `T`.
    ///
    /// Appends a machine-readable JSON instruction embedding the schema hint
    /// (a human-readable guide, not a strict validator). Retries transient
    /// failures, including timeouts and unrepairable responses, with
    /// exponential backoff. Rate limiting is surfaced immediately.
    pub async fn generate_structured<T: DeserializeOwned>(
        &self,
        prompt: &str,
        file: Option<&FileHandle>,
        schema_hint: &serde_json::Value,
    ) -> Result<T, ExtractError> {
        let final_prompt = format!(
            "{}\n\nPlease provide the output in valid JSON format.\nFollow this schema:\n{}",
            prompt,
            serde_json::to_string_pretty(schema_hint).unwrap_or_default()
        );

        let mut last_err: Option<ExtractError> = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let wait = self.backoff_base * 2u32.pow(attempt - 1);
                warn!(
                    "LLM generation retry {}/{} after {:?}",
                    attempt + 1,
                    self.max_retries,
                    wait
                );
                tokio::time::sleep(wait).await;
            }

            let outcome =
                tokio::time::timeout(self.timeout, self.client.generate(&final_prompt, file)).await;

            match outcome {
                Err(_) => {
                    warn!("LLM call timed out after {:?}", self.timeout);
                    last_err = Some(ExtractError::Timeout(self.timeout));
                }
                Ok(Err(ExtractError::RateLimited)) => return Err(ExtractError::RateLimited),
                Ok(Err(e)) => {
                    warn!("LLM generation failed (attempt {}): {}", attempt + 1, e);
                    last_err = Some(e);
                }
                Ok(Ok(raw)) => match parse_json_response::<T>(&raw) {
                    Ok(parsed) => return Ok(parsed),
                    Err(e) => {
                        warn!("LLM response unparseable (attempt {}): {}", attempt + 1, e);
                        last_err = Some(e);
                    }
                },
            }
        }

        Err(ExtractError::RetriesExhausted {
            attempts: self.max_retries,
            last: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts made".to_string()),
        })
    }
}

/// Parse model output that is expected to be JSON but may be wrapped in
/// prose or code fences: direct parse, then fence stripping, then slicing
/// from the first `{` to the last `}`.
pub fn parse_json_response<T: DeserializeOwned>(raw: &str) -> Result<T, ExtractError> {
    let trimmed = raw.trim();
    if let Ok(parsed) = serde_json::from_str::<T>(trimmed) {
        return Ok(parsed);
    }

    if trimmed.contains("```") {
        let fence = regex::Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```")
            .expect("fence pattern is valid");
        if let Some(cap) = fence.captures(trimmed) {
            if let Ok(parsed) = serde_json::from_str::<T>(cap[1].trim()) {
                return Ok(parsed);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(parsed) = serde_json::from_str::<T>(&trimmed[start..=end]) {
                return Ok(parsed);
            }
        }
    }

    Err(ExtractError::MalformedResponse(
        trimmed.chars().take(200).collect(),
    ))
}
