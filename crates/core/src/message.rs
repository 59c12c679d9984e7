//! Turn and session domain types.
//!
//! These are the value objects that flow through the system:
//! the caller sends an utterance → the session manager wraps it in a [`Turn`] →
//! the generation backend answers with [`Part`]s → one of them becomes the [`ChatReply`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Identifier of the shared conversation used when the caller does not name one.
pub const SHARED_SESSION: &str = "default";

/// Maximum accepted length of a caller-supplied session identifier.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Unique identifier for a conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// A fresh random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The single process-wide conversation.
    pub fn shared() -> Self {
        Self(SHARED_SESSION.to_string())
    }

    /// Parse a caller-supplied id: 1-128 chars of `[A-Za-z0-9_.-]`.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_SESSION_ID_LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::shared()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The priming payload that establishes the character
    Persona,
    /// The person talking to the character
    User,
    /// The generation backend
    Model,
}

/// Binary content with its media type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Arc<[u8]>,
}

impl Blob {
    pub fn new(mime_type: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

/// One piece of a turn's content.
///
/// Text serializes as a bare JSON string; blobs as `{mime_type, data}` with base64 data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text(String),
    Blob(Blob),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(text.into())
    }

    /// Text content, if this is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text(t) => Some(t),
            Part::Blob(_) => None,
        }
    }

    /// Whitespace-only text and zero-length blobs carry nothing worth replying with.
    pub fn is_empty(&self) -> bool {
        match self {
            Part::Text(t) => t.trim().is_empty(),
            Part::Blob(b) => b.data.is_empty(),
        }
    }
}

/// One exchange unit in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            role,
            parts,
            timestamp: Utc::now(),
        }
    }

    /// A user turn holding a single text part.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    /// A model turn holding the extracted reply.
    pub fn model(reply: Part) -> Self {
        Self::new(Role::Model, vec![reply])
    }

    /// Concatenated text of all text parts (blobs skipped).
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }
}

/// The model output returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub content: Part,
}

impl ChatReply {
    pub fn text(&self) -> Option<&str> {
        self.content.as_text()
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S: Serializer>(data: &Arc<[u8]>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Arc<[u8]>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Arc::from)
            .map_err(serde::de::Error::custom)
    }
}
