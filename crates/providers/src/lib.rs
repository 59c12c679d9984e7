//! Backend clients for Parley.
//!
//! Both external collaborators are plain request/response bridges:
//! [`GeminiClient`] implements `parley_core::GenerationClient` and
//! [`GoogleSpeechClient`] implements `parley_core::Transcriber`.
//! Each is built once at startup and shared behind an `Arc`.

pub mod gemini;
pub mod speech;

pub use gemini::GeminiClient;
pub use speech::GoogleSpeechClient;
