//! `purrgate doctor` — Diagnose environment, persona, and provider health.

use purrgate_config::AppConfig;
use purrgate_core::persona::Persona;
use std::path::Path;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🐾 Purrgate Doctor\n");
    let mut problems = 0;

    // Configuration
    let config = match AppConfig::from_env() {
        Ok(config) => {
            println!("✓ Configuration parses");
            config
        }
        Err(e) => {
            println!("✗ Configuration invalid: {e}");
            return Err(e.into());
        }
    };

    if !config.npc.enabled {
        println!("! NPC_ENABLED is false — the persona will never engage");
    }

    // Persona file
    let persona_path = Path::new(&config.gateway.persona_path);
    match Persona::load(persona_path) {
        Ok(persona) if persona_path.exists() => {
            println!(
                "✓ Persona '{}' loaded ({} facts)",
                persona.name,
                persona.facts.len()
            );
        }
        Ok(_) => {
            println!(
                "! Persona file {} not found — using the fallback persona",
                persona_path.display()
            );
        }
        Err(e) => {
            println!("✗ Persona file invalid: {e}");
            problems += 1;
        }
    }

    // API key
    if config.has_api_key() {
        println!("✓ API key configured");
    } else if config.provider.provider == "ollama" {
        println!("✓ No API key needed for ollama");
    } else {
        println!("✗ No API key (set PURRGATE_API_KEY)");
        problems += 1;
    }

    // Provider reachability
    let router = purrgate_providers::router::build_from_config(&config.provider);
    if let Some(provider) = router.default() {
        match provider.health_check().await {
            Ok(true) => println!("✓ Provider '{}' reachable", provider.name()),
            Ok(false) => {
                println!("✗ Provider '{}' unhealthy", provider.name());
                problems += 1;
            }
            Err(e) => {
                println!("✗ Provider '{}' unreachable: {e}", provider.name());
                problems += 1;
            }
        }
    }

    println!();
    if problems == 0 {
        println!("All checks passed.");
        Ok(())
    } else {
        Err(format!("{problems} problem(s) found").into())
    }
}
