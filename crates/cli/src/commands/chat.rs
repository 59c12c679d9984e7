//! `parley chat`: single-message or interactive chat from the terminal.

use parley_core::message::SessionId;
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::app;

pub async fn run(
    config_path: Option<&Path>,
    message: Option<String>,
    session: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = app::load_config(config_path)?;

    let session = match session {
        Some(raw) => SessionId::parse(&raw)
            .ok_or("Session ids are 1-128 characters of [A-Za-z0-9_.-]")?,
        None => SessionId::shared(),
    };

    let sessions = app::build_sessions(&config)?;
    sessions
        .ensure_persona()
        .await
        .map_err(|e| format!("Cannot chat without persona documents: {e}"))?;

    if let Some(msg) = message {
        // Single message mode
        let reply = sessions.converse(&session, &msg).await?;
        println!("{}", app::display_part(&reply.content));
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  Parley: interactive chat");
    println!("  Model:    {}", config.generation.model);
    println!("  Session:  {session}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        // A failed turn leaves history intact, so keep the session going.
        match sessions.converse(&session, line).await {
            Ok(reply) => println!("  니노 > {}\n", app::display_part(&reply.content)),
            Err(e) => eprintln!("  ❌ {e}\n"),
        }
    }

    println!("  Bye!");
    Ok(())
}
