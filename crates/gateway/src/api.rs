//! Chat, transcription and session inspection handlers.

use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use parley_core::error::{Error, ErrorClass, TranscriptionError};
use parley_core::message::{Part, Role, SessionId, Turn};
use parley_core::transcription::AudioInput;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::SharedState;

/// Header carrying the caller's session id when the body does not.
pub const SESSION_HEADER: &str = "x-session-id";

// ── Errors ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// A failed request: status plus a message for the `{"error": ...}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Keep the extractor's own status (400, 413, 415) and message.
    fn rejected(status: StatusCode, message: String) -> Self {
        Self { status, message }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn speech_disabled() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: TranscriptionError::NotConfigured.to_string(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        if matches!(e, Error::Transcription(TranscriptionError::NotConfigured)) {
            return Self::speech_disabled();
        }
        let status = match e.class() {
            ErrorClass::Client => StatusCode::BAD_REQUEST,
            ErrorClass::Server => {
                error!(error = %e, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<TranscriptionError> for ApiError {
    fn from(e: TranscriptionError) -> Self {
        Error::from(e).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

// ── Request parsing ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

/// Whatever a chat submission carried, JSON or multipart.
#[derive(Default)]
struct Submission {
    audio: Option<AudioInput>,
    message: Option<String>,
    session_id: Option<String>,
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"))
}

async fn read_multipart(mut multipart: Multipart) -> Result<Submission, ApiError> {
    let mut submission = Submission::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" => {
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;
                info!(
                    bytes = data.len(),
                    content_type = content_type.as_deref().unwrap_or("unknown"),
                    "Audio upload received"
                );
                let mut audio = AudioInput::new(data.to_vec());
                if let Some(ct) = content_type {
                    audio = audio.with_content_type(ct);
                }
                submission.audio = Some(audio);
            }
            "message" | "session_id" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;
                if name == "message" {
                    submission.message = Some(value);
                } else {
                    submission.session_id = Some(value);
                }
            }
            _ => {}
        }
    }

    Ok(submission)
}

async fn read_submission(state: &SharedState, req: Request) -> Result<Submission, ApiError> {
    if is_multipart(req.headers()) {
        let multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;
        return read_multipart(multipart).await;
    }

    let body = Bytes::from_request(req, state)
        .await
        .map_err(|e| ApiError::rejected(e.status(), e.body_text()))?;
    let payload: ChatRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))?;

    Ok(Submission {
        audio: None,
        message: Some(payload.message),
        session_id: payload.session_id,
    })
}

/// Body field first, then header, then the shared conversation.
fn resolve_session(body: Option<&str>, headers: &HeaderMap) -> Result<SessionId, ApiError> {
    let raw = body.filter(|s| !s.is_empty()).or_else(|| {
        headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
    });

    match raw {
        None => Ok(SessionId::shared()),
        Some(raw) => SessionId::parse(raw).ok_or_else(|| {
            ApiError::bad_request("session_id must be 1-128 characters of [A-Za-z0-9_.-]")
        }),
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ChatResponse {
    pub message: Part,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    pub session_id: SessionId,
}

/// `POST /chat`: text or recorded speech in, the character's reply out.
pub async fn chat_handler(
    State(state): State<SharedState>,
    req: Request,
) -> Result<Json<ChatResponse>, ApiError> {
    let headers = req.headers().clone();
    let submission = read_submission(&state, req).await?;
    let session = resolve_session(submission.session_id.as_deref(), &headers)?;

    let (utterance, transcript) = match submission.audio {
        Some(audio) => {
            let speech = state.speech.as_ref().ok_or_else(ApiError::speech_disabled)?;
            let transcript = speech.transcribe(audio).await?;
            info!(session = %session, transcript_chars = transcript.chars().count(), "Audio transcribed");
            (transcript.clone(), Some(transcript))
        }
        None => match submission.message {
            Some(message) => (message, None),
            None => return Err(ApiError::bad_request("Missing audio or message")),
        },
    };

    let reply = state.sessions.converse(&session, &utterance).await?;

    Ok(Json(ChatResponse {
        message: reply.content,
        transcript,
        session_id: session,
    }))
}

#[derive(Serialize)]
pub struct TranscribeResponse {
    pub transcript: String,
}

/// `POST /transcribe`: corrected transcript only, no chat turn.
pub async fn transcribe_handler(
    State(state): State<SharedState>,
    req: Request,
) -> Result<Json<TranscribeResponse>, ApiError> {
    if !is_multipart(req.headers()) {
        return Err(ApiError::bad_request("Expected multipart/form-data with an audio field"));
    }
    let speech = state.speech.clone().ok_or_else(ApiError::speech_disabled)?;

    let submission = read_submission(&state, req).await?;
    let audio = submission
        .audio
        .ok_or_else(|| ApiError::bad_request("Missing audio field"))?;

    let transcript = speech.transcribe(audio).await?;
    Ok(Json(TranscribeResponse { transcript }))
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum PartSummary {
    Text(String),
    Blob { mime_type: String, bytes: usize },
}

impl From<&Part> for PartSummary {
    fn from(part: &Part) -> Self {
        match part {
            Part::Text(text) => PartSummary::Text(text.clone()),
            Part::Blob(blob) => PartSummary::Blob {
                mime_type: blob.mime_type.clone(),
                bytes: blob.data.len(),
            },
        }
    }
}

#[derive(Serialize)]
pub struct TurnSummary {
    pub role: Role,
    pub parts: Vec<PartSummary>,
    /// RFC 3339, UTC.
    pub timestamp: String,
}

impl From<&Arc<Turn>> for TurnSummary {
    fn from(turn: &Arc<Turn>) -> Self {
        Self {
            role: turn.role,
            parts: turn.parts.iter().map(PartSummary::from).collect(),
            timestamp: turn.timestamp.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub session_id: SessionId,
    pub turns: Vec<TurnSummary>,
}

#[derive(Serialize)]
pub struct NewSessionResponse {
    pub session_id: SessionId,
}

/// `POST /sessions`: hand out a fresh session id.
///
/// Nothing is stored yet; the conversation is created and seeded on its first `/chat`.
pub async fn new_session_handler() -> (StatusCode, Json<NewSessionResponse>) {
    let session_id = SessionId::new();
    info!(session = %session_id, "Session id issued");
    (StatusCode::CREATED, Json(NewSessionResponse { session_id }))
}

/// `GET /sessions/{id}`: what the model will see on the next turn.
pub async fn session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = SessionId::parse(&id).ok_or_else(|| ApiError::bad_request("Invalid session id"))?;
    let turns = state.sessions.history(&session).await.ok_or_else(|| {
        warn!(session = %session, "Unknown session requested");
        ApiError::not_found(format!("No session '{session}'"))
    })?;

    Ok(Json(SessionResponse {
        session_id: session,
        turns: turns.iter().map(TurnSummary::from).collect(),
    }))
}
