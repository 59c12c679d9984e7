//! `parley serve`: start the HTTP gateway.

use parley_gateway::AppState;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::app;

pub async fn run(
    config_path: Option<&Path>,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = app::load_config(config_path)?;
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let sessions = app::build_sessions(&config)?;
    let speech = app::build_speech(&config)?;

    // Persona documents are a startup precondition.
    sessions
        .ensure_persona()
        .await
        .map_err(|e| format!("Cannot start without persona documents: {e}"))?;

    println!("🗨  Parley Gateway");
    println!("   Listening: http://{}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.generation.model);
    println!(
        "   Speech:    {}",
        if speech.is_some() { config.speech.language_code.as_str() } else { "disabled" }
    );

    let state = Arc::new(AppState { sessions, speech });
    parley_gateway::serve(state, &config.gateway, shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
