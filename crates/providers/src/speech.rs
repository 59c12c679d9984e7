//! Google Cloud Speech-to-Text `speech:recognize` client.
//!
//! Synchronous recognition only: the whole clip goes up base64-encoded in one
//! request and the transcript comes back in the response.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parley_config::SpeechConfig;
use parley_core::error::TranscriptionError;
use parley_core::transcription::{AudioInput, Transcriber};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Speech recognizer client. Built once and shared across requests.
pub struct GoogleSpeechClient {
    base_url: String,
    api_key: String,
    encoding: String,
    sample_rate_hertz: u32,
    language_code: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl GoogleSpeechClient {
    pub fn from_config(config: &SpeechConfig) -> Result<Self, TranscriptionError> {
        if !config.enabled {
            return Err(TranscriptionError::NotConfigured);
        }
        let api_key = config
            .api_key
            .clone()
            .ok_or(TranscriptionError::NotConfigured)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                TranscriptionError::Network(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            encoding: config.encoding.clone(),
            sample_rate_hertz: config.sample_rate_hertz,
            language_code: config.language_code.clone(),
            timeout_secs: config.timeout_secs,
            client,
        })
    }

    /// Override the API root (e.g., for testing).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/speech:recognize", self.base_url)
    }

    fn build_body(&self, audio: &AudioInput) -> RecognizeBody {
        RecognizeBody {
            config: RecognitionConfig {
                encoding: self.encoding.clone(),
                sample_rate_hertz: self.sample_rate_hertz,
                language_code: self.language_code.clone(),
            },
            audio: RecognitionAudio {
                content: BASE64.encode(&audio.data),
            },
        }
    }

    /// Every alternative of every result, concatenated in order.
    fn join_alternatives(resp: RecognizeReply) -> Result<String, TranscriptionError> {
        if resp.results.is_empty() {
            return Err(TranscriptionError::NoResult);
        }

        Ok(resp
            .results
            .into_iter()
            .flat_map(|r| r.alternatives)
            .map(|a| a.transcript)
            .collect())
    }
}

#[async_trait]
impl Transcriber for GoogleSpeechClient {
    fn name(&self) -> &str {
        "google-speech"
    }

    async fn transcribe(&self, audio: &AudioInput) -> Result<String, TranscriptionError> {
        if audio.is_empty() {
            return Err(TranscriptionError::EmptyAudio);
        }

        debug!(
            bytes = audio.len(),
            content_type = audio.content_type.as_deref().unwrap_or("unknown"),
            language = %self.language_code,
            "Sending speech recognize request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&self.build_body(audio))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TranscriptionError::Timeout(self.timeout_secs)
                } else {
                    TranscriptionError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 401 || status == 403 {
            return Err(TranscriptionError::AuthenticationFailed(
                "Speech API rejected the API key".into(),
            ));
        }
        if !(200..300).contains(&status) {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Speech API error");
            return Err(TranscriptionError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let reply: RecognizeReply = response.json().await.map_err(|e| {
            TranscriptionError::InvalidResponse(format!("Failed to parse speech response: {e}"))
        })?;

        Self::join_alternatives(reply)
    }
}

// --- Speech API types ---

#[derive(Debug, Serialize)]
struct RecognizeBody {
    config: RecognitionConfig,
    audio: RecognitionAudio,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognitionConfig {
    encoding: String,
    sample_rate_hertz: u32,
    language_code: String,
}

#[derive(Debug, Serialize)]
struct RecognitionAudio {
    content: String,
}

#[derive(Debug, Deserialize)]
struct RecognizeReply {
    #[serde(default)]
    results: Vec<RecognitionResult>,
}

#[derive(Debug, Deserialize)]
struct RecognitionResult {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> SpeechConfig {
        SpeechConfig {
            api_key: Some("speech-key".into()),
            base_url: base_url.into(),
            timeout_secs: 5,
            ..SpeechConfig::default()
        }
    }

    fn clip() -> AudioInput {
        AudioInput::new(b"OggS-fake-audio".to_vec()).with_content_type("audio/webm")
    }

    #[test]
    fn disabled_or_keyless_is_not_configured() {
        let disabled = SpeechConfig {
            enabled: false,
            api_key: Some("k".into()),
            ..SpeechConfig::default()
        };
        assert!(matches!(
            GoogleSpeechClient::from_config(&disabled),
            Err(TranscriptionError::NotConfigured)
        ));
        assert!(matches!(
            GoogleSpeechClient::from_config(&SpeechConfig::default()),
            Err(TranscriptionError::NotConfigured)
        ));
    }

    #[test]
    fn body_uses_configured_recognition_settings() {
        let client = GoogleSpeechClient::from_config(&config("http://unused")).unwrap();
        let body = serde_json::to_value(client.build_body(&AudioInput::new(b"hi".to_vec()))).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "config": {"encoding": "WEBM_OPUS", "sampleRateHertz": 48000, "languageCode": "ko-KR"},
                "audio": {"content": "aGk="}
            })
        );
    }

    #[tokio::test]
    async fn alternatives_are_concatenated() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/speech:recognize"))
            .and(header("x-goog-api-key", "speech-key"))
            .and(body_partial_json(serde_json::json!({
                "config": {"languageCode": "ko-KR", "sampleRateHertz": 48000}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"alternatives": [{"transcript": "민호야 ", "confidence": 0.9}]},
                    {"alternatives": [{"transcript": "안녕"}]}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = GoogleSpeechClient::from_config(&config(&server.uri())).unwrap();
        assert_eq!(client.transcribe(&clip()).await.unwrap(), "민호야 안녕");
    }

    #[tokio::test]
    async fn no_results_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/speech:recognize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = GoogleSpeechClient::from_config(&config(&server.uri())).unwrap();
        assert!(matches!(
            client.transcribe(&clip()).await,
            Err(TranscriptionError::NoResult)
        ));
    }

    #[tokio::test]
    async fn empty_audio_never_reaches_the_backend() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = GoogleSpeechClient::from_config(&config(&server.uri())).unwrap();
        assert!(matches!(
            client.transcribe(&AudioInput::new(Vec::new())).await,
            Err(TranscriptionError::EmptyAudio)
        ));
    }

    #[tokio::test]
    async fn backend_error_status_is_surfaced() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/speech:recognize"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad encoding"))
            .mount(&server)
            .await;

        let client = GoogleSpeechClient::from_config(&config(&server.uri())).unwrap();
        match client.transcribe(&clip()).await {
            Err(TranscriptionError::ApiError {
                status_code,
                message,
            }) => {
                assert_eq!(status_code, 400);
                assert_eq!(message, "bad encoding");
            }
            other => panic!("expected ApiError, got {other:?}"),
        }
    }
}
