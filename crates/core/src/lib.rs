//! # Parley Core
//!
//! Domain types, collaborator traits, and error definitions for the Parley
//! persona chat service. This crate has **no framework dependencies**: it
//! defines the model every other crate implements against.
//!
//! The two external backends (language model, speech recognizer) are traits
//! here so the session manager can be exercised with scripted fakes.

pub mod error;
pub mod generation;
pub mod message;
pub mod transcription;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ErrorClass, GenerationError, PersonaError, Result, TranscriptionError};
pub use generation::{Candidate, GenerationClient, GenerationRequest, GenerationResponse};
pub use message::{Blob, ChatReply, Part, Role, SessionId, Turn};
pub use transcription::{AudioInput, Transcriber};
