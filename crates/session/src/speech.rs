//! Speech pipeline: recognizer output passed through the name corrector.

use parley_core::error::TranscriptionError;
use parley_core::transcription::{AudioInput, Transcriber};
use std::sync::Arc;
use tracing::debug;

use crate::corrector::TextCorrector;

pub struct SpeechPipeline {
    transcriber: Arc<dyn Transcriber>,
    corrector: Arc<TextCorrector>,
}

impl SpeechPipeline {
    pub fn new(transcriber: Arc<dyn Transcriber>, corrector: Arc<TextCorrector>) -> Self {
        Self {
            transcriber,
            corrector,
        }
    }

    /// Recognize `audio` and return the corrected transcript.
    ///
    /// A recognizer answer with only blank transcripts is a backend no-result,
    /// not something the caller sent.
    pub async fn transcribe(&self, audio: AudioInput) -> Result<String, TranscriptionError> {
        if audio.is_empty() {
            return Err(TranscriptionError::EmptyAudio);
        }

        let raw = self.transcriber.transcribe(&audio).await?;
        let corrected = self.corrector.correct(&raw);

        debug!(
            backend = self.transcriber.name(),
            audio_bytes = audio.len(),
            raw = %raw,
            transcript = %corrected,
            "Transcribed audio"
        );
        if corrected.trim().is_empty() {
            return Err(TranscriptionError::NoResult);
        }
        Ok(corrected)
    }
}
