//! `parley doctor`: diagnose configuration, credentials and persona documents.

use parley_config::AppConfig;
use parley_session::{PersonaLoader, TextCorrector};
use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Parley Doctor");
    println!("================\n");

    let mut issues = 0;

    let config = match AppConfig::load(config_path) {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            return Err("1 issue(s) found".into());
        }
    };

    match config.require_generation() {
        Ok(()) => println!("  ✅ Gemini key and system instruction set ({})", config.generation.model),
        Err(e) => {
            println!("  ❌ {e}");
            issues += 1;
        }
    }

    if config.speech.enabled {
        match config.require_speech() {
            Ok(()) => println!("  ✅ Speech key set ({})", config.speech.language_code),
            Err(e) => {
                println!("  ❌ {e}");
                issues += 1;
            }
        }
        match TextCorrector::from_config(&config.corrections) {
            Ok(corrector) => println!("  ✅ Correction table valid ({:?} matching)", corrector.mode()),
            Err(e) => {
                println!("  ❌ {e}");
                issues += 1;
            }
        }
    } else {
        println!("  ⚠️  Speech recognition disabled");
    }

    match PersonaLoader::from_config(&config.persona).load().await {
        Ok(persona) => {
            for doc in [&persona.style_corpus, &persona.biography] {
                println!(
                    "  ✅ {} ({} bytes, {})",
                    doc.path.display(),
                    doc.bytes.len(),
                    doc.media_type
                );
            }
        }
        Err(e) => {
            println!("  ❌ {e}");
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
        Ok(())
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
        Err(format!("{issues} issue(s) found").into())
    }
}
