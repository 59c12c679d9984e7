//! Error types for the Parley domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] ties them together.

use std::path::PathBuf;
use thiserror::Error;

/// The top-level error type for all Parley operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Persona documents ---
    #[error("Persona error: {0}")]
    Persona(#[from] PersonaError),

    // --- Generation backend ---
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    // --- Speech backend ---
    #[error("Transcription error: {0}")]
    Transcription(#[from] TranscriptionError),

    // --- Client input ---
    #[error("Invalid request: {0}")]
    Validation(String),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Who is to blame for a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed or missing input; the caller can fix it.
    Client,
    /// Backend, I/O or configuration failure.
    Server,
}

impl Error {
    /// Shorthand for a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Classify the error for the serving surface.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Validation(_) => ErrorClass::Client,
            Error::Transcription(TranscriptionError::EmptyAudio) => ErrorClass::Client,
            _ => ErrorClass::Server,
        }
    }
}

// --- Bounded context errors ---

/// The persona documents could not be turned into a context.
///
/// `Clone` so that a memoized initialization failure can be handed to every caller.
#[derive(Debug, Clone, Error)]
pub enum PersonaError {
    #[error("Failed to read persona document {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Persona document {path} is empty")]
    Empty { path: PathBuf },
}

#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limited by generation backend")]
    RateLimited,

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Backend returned no usable candidates")]
    NoResult,
}

#[derive(Debug, Clone, Error)]
pub enum TranscriptionError {
    #[error("Speech recognition is not configured")]
    NotConfigured,

    #[error("Audio payload is empty")]
    EmptyAudio,

    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("No recognition result returned")]
    NoResult,
}
