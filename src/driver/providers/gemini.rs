//! Gemini (Google) image generation driver.

use crate::driver::provider::Driver;
use crate::driver::types::{DriverKind, GeneratedMedia, GenerationMetadata, GenerationRequest, Usage};
use crate::error::{DriverError, Result};
use crate::http;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Instant;

const BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
const API_KEY_VARS: [&str; 3] = ["GOOGLE_API_KEY", "GENAI_API_KEY", "API_KEY"];

/// Builder for GeminiProvider.
#[derive(Debug, Clone, Default)]
pub struct GeminiProviderBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
}

impl GeminiProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to `GOOGLE_API_KEY`, `GENAI_API_KEY`, then `API_KEY`.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Overrides the API base URL. Falls back to `GOOGLE_API_BASE`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the default model used when a request names none.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Builds the provider, resolving the API key.
    pub fn build(self) -> Result<GeminiProvider> {
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                API_KEY_VARS
                    .iter()
                    .filter_map(|var| std::env::var(var).ok())
                    .find(|k| !k.trim().is_empty())
            })
            .ok_or(DriverError::MissingApiKey {
                driver: "google",
                env_var: "GOOGLE_API_KEY",
            })?;

        let base_url = self
            .base_url
            .filter(|u| !u.trim().is_empty())
            .or_else(|| std::env::var("GOOGLE_API_BASE").ok())
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| BASE_URL.to_string());

        Ok(GeminiProvider {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }
}

/// Gemini image generation driver.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiProvider {
    /// Creates a new `GeminiProviderBuilder`.
    pub fn builder() -> GeminiProviderBuilder {
        GeminiProviderBuilder::new()
    }

    fn model_url(&self, model: &str) -> String {
        http::join_url(&self.base_url, &format!("v1beta/models/{}", model))
    }

    async fn generate_impl(&self, request: &GenerationRequest) -> Result<GeneratedMedia> {
        let start = Instant::now();
        let model = request.model_or(&self.model).to_string();
        let url = format!("{}:generateContent", self.model_url(&model));

        let body = GeminiRequest::from_generation_request(request);
        tracing::debug!(model = %model, images = request.images.len(), "sending Gemini request");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(parse_error(status.as_u16(), &text, &headers));
        }

        let gemini_response: GeminiResponse = response.json().await?;

        // Blocked prompts come back as HTTP 200
        if let Some(ref feedback) = gemini_response.prompt_feedback {
            if let Some(ref reason) = feedback.block_reason {
                let msg = feedback
                    .block_reason_message
                    .clone()
                    .unwrap_or_else(|| format!("Prompt blocked: {}", reason));
                return Err(DriverError::ContentBlocked(msg));
            }
        }

        let usage = gemini_response
            .usage_metadata
            .map(Usage::from)
            .and_then(Usage::non_empty);

        let mut finish_reasons = Vec::new();
        let mut inline = None;
        for candidate in gemini_response.candidates {
            if let Some(reason) = candidate.finish_reason {
                finish_reasons.push(reason);
            }
            inline = candidate
                .content
                .into_iter()
                .flat_map(|c| c.parts)
                .find_map(|p| p.inline_data.filter(|d| !d.data.is_empty()));
            if inline.is_some() {
                break;
            }
        }

        let inline_data = match inline {
            Some(data) => data,
            None => return Err(missing_image_error(&finish_reasons)),
        };

        let data = base64::engine::general_purpose::STANDARD
            .decode(inline_data.data.trim())
            .map_err(|e| DriverError::Decode(e.to_string()))?;
        let mime_type = inline_data
            .mime_type
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| http::resolve_mime(None, &data, "image/png"));

        GeneratedMedia::new(
            data,
            mime_type,
            usage,
            GenerationMetadata::new(DriverKind::Gemini)
                .with_model(model)
                .with_input_images(&request.images)
                .with_duration(start),
        )
    }
}

#[async_trait]
impl Driver for GeminiProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia> {
        self.generate_impl(request).await
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Gemini
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(self.model_url(&self.model))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;

        match response.status().as_u16() {
            401 | 403 => Err(DriverError::Auth("Invalid API key".into())),
            404 => Err(DriverError::InvalidRequest(
                "Model not found. Verify the model name is correct.".into(),
            )),
            s if !(200..300).contains(&s) => Err(DriverError::Api {
                status: s,
                message: "Health check failed".into(),
            }),
            _ => Ok(()),
        }
    }
}

fn parse_error(status: u16, text: &str, headers: &reqwest::header::HeaderMap) -> DriverError {
    if status == 402 {
        return DriverError::Billing(
            "Gemini billing issue: enable billing at https://aistudio.google.com".into(),
        );
    }
    if status == 404 {
        return DriverError::InvalidRequest(
            "Model not found. Verify the model name is correct.".into(),
        );
    }

    let err = http::error_from_parts("Gemini API failed", status, headers, text);
    match err {
        DriverError::Api { message, .. } if is_safety_message(&message) => {
            DriverError::ContentBlocked(message)
        }
        other => other,
    }
}

fn is_safety_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("safety")
        || lower.contains("blocked")
        || lower.contains("content_policy")
        || lower.contains("prohibited")
}

fn missing_image_error(finish_reasons: &[String]) -> DriverError {
    let blocked = finish_reasons.iter().find(|r| {
        matches!(
            r.as_str(),
            "SAFETY"
                | "IMAGE_SAFETY"
                | "IMAGE_PROHIBITED_CONTENT"
                | "IMAGE_RECITATION"
                | "RECITATION"
                | "PROHIBITED_CONTENT"
                | "BLOCKLIST"
        )
    });
    match (blocked, finish_reasons.first()) {
        (Some(reason), _) => DriverError::ContentBlocked(format!(
            "Content blocked by Gemini safety filter: {}",
            reason
        )),
        (None, Some(reason)) => DriverError::UnexpectedResponse(format!(
            "No image data in Gemini response (finish reason {})",
            reason
        )),
        (None, None) => DriverError::UnexpectedResponse("No image data in Gemini response".into()),
    }
}

// Request/Response types
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiRequestPart>,
}

/// A part in a Gemini request - can be text or inline image data.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiRequestPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiConfig {
    response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
}

impl GeminiRequest {
    fn from_generation_request(req: &GenerationRequest) -> Self {
        // Reference images first, then the instruction
        let mut parts: Vec<GeminiRequestPart> = req
            .images
            .iter()
            .filter(|img| !img.data.is_empty())
            .map(|img| GeminiRequestPart::InlineData {
                inline_data: GeminiInlineData {
                    mime_type: if img.mime_type.is_empty() {
                        "image/png".to_string()
                    } else {
                        img.mime_type.clone()
                    },
                    data: img.to_base64(),
                },
            })
            .collect();

        parts.push(GeminiRequestPart::Text {
            text: req.prompt.clone(),
        });

        Self {
            contents: vec![GeminiContent { role: "user", parts }],
            generation_config: GeminiConfig {
                response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
                seed: req.options.get_i64("seed"),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default, alias = "prompt_feedback")]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default, alias = "usage_metadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContentResponse>,
    #[serde(default, alias = "finish_reason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default, alias = "block_reason")]
    block_reason: Option<String>,
    #[serde(default, alias = "block_reason_message")]
    block_reason_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPartResponse {
    #[serde(default, alias = "inline_data")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default, alias = "mime_type")]
    mime_type: Option<String>,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: Option<u64>,
    #[serde(default)]
    candidates_token_count: Option<u64>,
    #[serde(default)]
    total_token_count: Option<u64>,
}

impl From<UsageMetadata> for Usage {
    fn from(u: UsageMetadata) -> Self {
        Usage {
            prompt_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
            ..Usage::default()
        }
    }
}
