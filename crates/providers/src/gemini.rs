//! Gemini `generateContent` provider.
//!
//! Uses the REST API directly:
//!
//! - `x-goog-api-key` header authentication
//! - System instruction as a top-level `systemInstruction` field
//! - Binary parts sent as base64 `inlineData`
//! - One safety setting per harm category, all at the configured threshold
//!
//! The client never picks a reply; it hands every candidate back to the caller.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parley_config::GenerationConfig;
use parley_core::error::GenerationError;
use parley_core::generation::{Candidate, GenerationClient, GenerationRequest, GenerationResponse};
use parley_core::message::{Blob, Part, Role, Turn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// The four harm categories the API lets callers tune.
pub const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Gemini REST client.
pub struct GeminiClient {
    base_url: String,
    api_key: String,
    model: String,
    system_instruction: Option<String>,
    safety_threshold: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Create a client with default endpoint, no system instruction and `BLOCK_NONE` safety.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| GenerationError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: model.into(),
            system_instruction: None,
            safety_threshold: "BLOCK_NONE".into(),
            timeout_secs,
            client,
        })
    }

    /// Build from the `[generation]` config section.
    pub fn from_config(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            GenerationError::AuthenticationFailed("No Gemini API key configured".into())
        })?;

        let mut client = Self::new(api_key, &config.model, config.timeout_secs)?
            .with_base_url(&config.base_url)
            .with_safety_threshold(&config.safety_threshold);
        if let Some(instruction) = &config.system_instruction {
            client = client.with_system_instruction(instruction);
        }
        Ok(client)
    }

    /// Override the API root (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_safety_threshold(mut self, threshold: impl Into<String>) -> Self {
        self.safety_threshold = threshold.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    /// Persona and model turns both go out as the `model` role.
    fn wire_role(role: Role) -> &'static str {
        match role {
            Role::User => "user",
            Role::Persona | Role::Model => "model",
        }
    }

    fn to_wire_part(part: &Part) -> WirePart {
        match part {
            Part::Text(text) => WirePart {
                text: Some(text.clone()),
                inline_data: None,
            },
            Part::Blob(blob) => WirePart {
                text: None,
                inline_data: Some(InlineData {
                    mime_type: blob.mime_type.clone(),
                    data: BASE64.encode(&blob.data),
                }),
            },
        }
    }

    fn to_wire_content(turn: &Turn) -> WireContent {
        WireContent {
            role: Some(Self::wire_role(turn.role).into()),
            parts: turn.parts.iter().map(Self::to_wire_part).collect(),
        }
    }

    /// Assemble the request body: history first, then the new utterance.
    fn build_body(&self, request: &GenerationRequest) -> GenerateContentBody {
        let mut contents: Vec<WireContent> = request
            .history
            .iter()
            .map(|turn| Self::to_wire_content(turn))
            .collect();
        contents.push(Self::to_wire_content(&request.utterance));

        GenerateContentBody {
            contents,
            system_instruction: self.system_instruction.as_ref().map(|text| WireContent {
                role: None,
                parts: vec![WirePart {
                    text: Some(text.clone()),
                    inline_data: None,
                }],
            }),
            safety_settings: HARM_CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category: (*category).into(),
                    threshold: self.safety_threshold.clone(),
                })
                .collect(),
        }
    }

    /// Convert the wire response into domain candidates.
    fn parse_response(resp: GenerateContentReply) -> Result<GenerationResponse, GenerationError> {
        let mut candidates = Vec::with_capacity(resp.candidates.len());

        for candidate in resp.candidates {
            let content = match candidate.content {
                Some(content) => {
                    let mut parts = Vec::with_capacity(content.parts.len());
                    for part in content.parts {
                        if let Some(text) = part.text {
                            parts.push(Part::Text(text));
                        } else if let Some(inline) = part.inline_data {
                            let data = BASE64.decode(inline.data.as_bytes()).map_err(|e| {
                                GenerationError::InvalidResponse(format!(
                                    "inlineData is not valid base64: {e}"
                                ))
                            })?;
                            parts.push(Part::Blob(Blob::new(inline.mime_type, data)));
                        }
                    }
                    Some(parts)
                }
                None => None,
            };

            candidates.push(Candidate {
                content,
                finish_reason: candidate.finish_reason,
            });
        }

        Ok(GenerationResponse { candidates })
    }

    fn map_transport_error(&self, e: reqwest::Error) -> GenerationError {
        if e.is_timeout() {
            GenerationError::Timeout(self.timeout_secs)
        } else {
            GenerationError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        let body = self.build_body(&request);

        debug!(
            provider = "gemini",
            model = %self.model,
            contents = body.contents.len(),
            "Sending generateContent request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(GenerationError::RateLimited);
        }
        if status == 401 || status == 403 {
            return Err(GenerationError::AuthenticationFailed(
                "Gemini rejected the API key".into(),
            ));
        }
        if !(200..300).contains(&status) {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Gemini API error");
            return Err(GenerationError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let reply: GenerateContentReply = response.json().await.map_err(|e| {
            GenerationError::InvalidResponse(format!("Failed to parse Gemini response: {e}"))
        })?;

        Self::parse_response(reply)
    }
}

// --- Gemini wire types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: String,
    threshold: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentReply {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    #[serde(default)]
    content: Option<WireContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}
