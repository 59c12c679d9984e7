//! `parley transcribe`: recognize a local audio file and print the corrected transcript.

use parley_core::transcription::AudioInput;
use std::path::Path;

use crate::app;

pub async fn run(config_path: Option<&Path>, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = app::load_config(config_path)?;
    let speech = app::build_speech(&config)?
        .ok_or("Speech recognition is disabled (speech.enabled = false)")?;

    let data = tokio::fs::read(file)
        .await
        .map_err(|e| format!("Failed to read {}: {e}", file.display()))?;

    let transcript = speech.transcribe(AudioInput::new(data)).await?;
    println!("{transcript}");
    Ok(())
}
