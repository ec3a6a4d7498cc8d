//! Google Gemini provider.
//!
//! Talks to the `generateContent` endpoint for both chat replies and image
//! generation. The API key is sent in the `x-goog-api-key` header so it never
//! shows up in request URLs or error messages.

use super::{GenerateRequest, ModelClient, ProviderError};
use async_trait::async_trait;
use base64::Engine;
use parley_common::config::GeminiConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const PROVIDER: &str = "gemini";

/// Gemini provider.
pub struct GeminiProvider {
    api_key: String,
    base_url: String,
    client: Client,
}

// ══════════════════════════════════════════════════════════════════════════════
// API REQUEST/RESPONSE TYPES
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Default, Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(rename = "responseModalities", skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<&'static str>>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
    #[serde(rename = "inlineData")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

impl GeminiProvider {
    /// Create a provider against the public endpoint with default timeouts.
    pub fn new(api_key: impl Into<String>) -> Self {
        let defaults = GeminiConfig::default();
        Self::with_options(api_key, defaults.base_url, Duration::from_secs(defaults.timeout_secs))
    }

    pub fn with_options(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::builder()
                .timeout(timeout)
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Build a provider from the `gemini` config section.
    pub fn from_config(config: &GeminiConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| error(
                "-",
                "Gemini API key not found. Set GEMINI_API_KEY or gemini.api_key.",
                None,
            ))?;

        Ok(Self::with_options(
            api_key,
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
        ))
    }

    fn endpoint(&self, model: &str) -> String {
        let model_name = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        format!("{}/{model_name}:generateContent", self.base_url)
    }

    async fn post(
        &self,
        model: &str,
        body: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, ProviderError> {
        let response = self
            .client
            .post(self.endpoint(model))
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| error(model, format!("Request failed: {e}"), None))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GenerateContentResponse>(&error_text)
                .ok()
                .and_then(|r| r.error)
                .map_or(error_text, |e| e.message);
            return Err(error(
                model,
                format!("API error ({}): {message}", status.as_u16()),
                Some(status.as_u16()),
            ));
        }

        let result: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| error(model, format!("Failed to parse response: {e}"), None))?;

        if let Some(err) = result.error {
            return Err(error(model, format!("API error: {}", err.message), None));
        }

        Ok(result)
    }
}

fn error(model: &str, message: impl Into<String>, status_code: Option<u16>) -> ProviderError {
    ProviderError {
        provider: PROVIDER.into(),
        model: model.into(),
        message: message.into(),
        status_code,
    }
}

fn build_chat_request(request: &GenerateRequest) -> GenerateContentRequest {
    let mut contents: Vec<Content> = request
        .history
        .iter()
        .map(|turn| Content {
            role: Some(turn.role.as_str()),
            parts: vec![Part {
                text: turn.content.clone(),
            }],
        })
        .collect();
    contents.push(Content {
        role: Some("user"),
        parts: vec![Part {
            text: request.message.clone(),
        }],
    });

    let system_instruction = (!request.system_prompt.is_empty()).then(|| Content {
        role: None,
        parts: vec![Part {
            text: request.system_prompt.clone(),
        }],
    });

    GenerateContentRequest {
        contents,
        system_instruction,
        generation_config: GenerationConfig {
            temperature: Some(request.temperature),
            response_modalities: None,
        },
    }
}

fn first_candidate_parts(
    model: &str,
    response: GenerateContentResponse,
) -> Result<Vec<ResponsePart>, ProviderError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(error(model, format!("Prompt blocked: {reason}"), None));
    }

    let candidate = response
        .candidates
        .and_then(|c| c.into_iter().next())
        .ok_or_else(|| error(model, "No response from Gemini", None))?;

    match candidate.content {
        Some(content) if !content.parts.is_empty() => Ok(content.parts),
        _ => Err(error(
            model,
            format!(
                "Empty response (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            ),
            None,
        )),
    }
}

#[async_trait]
impl ModelClient for GeminiProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, ProviderError> {
        let start = Instant::now();
        let body = build_chat_request(&request);
        let response = self.post(&request.model, &body).await?;

        let text: String = first_candidate_parts(&request.model, response)?
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        if text.is_empty() {
            return Err(error(&request.model, "Response contained no text", None));
        }

        tracing::debug!(
            model = %request.model,
            history = request.history.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Gemini reply received"
        );
        Ok(text)
    }

    async fn generate_image(
        &self,
        model: &str,
        prompt: &str,
    ) -> Result<Option<Vec<u8>>, ProviderError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            system_instruction: None,
            generation_config: GenerationConfig {
                temperature: None,
                response_modalities: Some(vec!["TEXT", "IMAGE"]),
            },
        };

        let response = self.post(model, &body).await?;
        let Some(inline) = first_candidate_parts(model, response)?
            .into_iter()
            .find_map(|p| p.inline_data)
        else {
            return Ok(None);
        };

        base64::engine::general_purpose::STANDARD
            .decode(inline.data.as_bytes())
            .map(Some)
            .map_err(|e| error(model, format!("Invalid image data: {e}"), None))
    }
}
