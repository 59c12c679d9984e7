//! Startup wiring shared by the commands.
//!
//! Every check here is a startup precondition: a failure ends the process
//! with a non-zero exit instead of surfacing later inside a request.

use parley_config::AppConfig;
use parley_core::message::Part;
use parley_providers::{GeminiClient, GoogleSpeechClient};
use parley_session::{SessionManager, SpeechPipeline, TextCorrector};
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn Error>> {
    AppConfig::load(path).map_err(|e| format!("Failed to load config: {e}").into())
}

/// Generation client + session manager. Fails without a key or instruction.
pub fn build_sessions(config: &AppConfig) -> Result<Arc<SessionManager>, Box<dyn Error>> {
    config.require_generation()?;
    let client = GeminiClient::from_config(&config.generation)?;
    info!(model = %client.model(), "Generation backend ready");
    Ok(Arc::new(SessionManager::from_config(config, Arc::new(client))))
}

/// Speech pipeline, or `None` when `speech.enabled = false`.
pub fn build_speech(config: &AppConfig) -> Result<Option<Arc<SpeechPipeline>>, Box<dyn Error>> {
    if !config.speech.enabled {
        info!("Speech recognition disabled");
        return Ok(None);
    }
    config.require_speech()?;

    let client = GoogleSpeechClient::from_config(&config.speech)?;
    let corrector = TextCorrector::from_config(&config.corrections)?;
    info!(
        language = %config.speech.language_code,
        sample_rate = config.speech.sample_rate_hertz,
        match_mode = ?corrector.mode(),
        "Speech recognition ready"
    );
    Ok(Some(Arc::new(SpeechPipeline::new(
        Arc::new(client),
        Arc::new(corrector),
    ))))
}

/// Render a reply for the terminal.
pub fn display_part(part: &Part) -> String {
    match part {
        Part::Text(text) => text.clone(),
        Part::Blob(blob) => format!("[{} reply, {} bytes]", blob.mime_type, blob.data.len()),
    }
}
