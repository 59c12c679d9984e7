//! Transcriber trait — the abstraction over the hosted speech recognizer.

use async_trait::async_trait;

use crate::error::TranscriptionError;

/// Raw audio handed to a transcriber.
///
/// Callers are expected to supply audio already in the recognizer's configured
/// encoding and sample rate; nothing here resamples or transcodes.
#[derive(Debug, Clone)]
pub struct AudioInput {
    pub data: Vec<u8>,

    /// Content type declared by the uploader, for logging only.
    pub content_type: Option<String>,
}

impl AudioInput {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;

    /// Turn audio into raw recognized text (no correction applied).
    async fn transcribe(&self, audio: &AudioInput) -> Result<String, TranscriptionError>;
}
