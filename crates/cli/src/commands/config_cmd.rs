//! `purrgate config` — Print the effective configuration.

use purrgate_config::AppConfig;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env().map_err(|e| format!("Failed to load config: {e}"))?;

    // The API key is skipped by the config's Serialize impl.
    let json = serde_json::to_string_pretty(&config)?;
    println!("{json}");
    if config.has_api_key() {
        println!("# API key: configured (redacted)");
    } else {
        println!("# API key: not configured");
    }
    Ok(())
}
