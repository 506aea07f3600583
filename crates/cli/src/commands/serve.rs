//! `purrgate serve` — Start the NPC gateway HTTP server.

use purrgate_config::AppConfig;
use purrgate_core::persona::Persona;
use purrgate_core::transcript::{NoopSink, TranscriptSink};
use purrgate_engine::{Dispatcher, NpcEngine, ThreadRngSource};
use purrgate_gateway::GatewayState;
use purrgate_memory::KeywordMemoryStore;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::transcript::FileTranscriptSink;

pub async fn run(
    port_override: Option<u16>,
    host_override: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::from_env().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    if let Some(host) = host_override {
        config.gateway.host = host;
    }

    let persona = Persona::load(Path::new(&config.gateway.persona_path))?;

    let sink: Arc<dyn TranscriptSink> = if config.gateway.transcript_dir.is_empty() {
        Arc::new(NoopSink)
    } else {
        Arc::new(FileTranscriptSink::spawn(
            config.gateway.transcript_dir.clone().into(),
        ))
    };

    let memory = Arc::new(KeywordMemoryStore::new());
    let engine = Arc::new(NpcEngine::new(
        &config,
        &persona,
        memory,
        sink,
        Box::new(ThreadRngSource),
    ));
    engine.seed_memories(&persona).await;

    let router = purrgate_providers::router::build_from_config(&config.provider);
    let provider = router
        .default()
        .expect("provider router always registers the configured provider");
    if !config.has_api_key() && config.provider.provider != "ollama" {
        warn!("No API key configured — LLM calls will fail until one is set");
    }

    if config.npc.enabled {
        engine.clone().spawn_ticker();
    } else {
        warn!("NPC_ENABLED is false — the persona will observe but never engage");
    }

    let dispatcher = Dispatcher::new(
        engine,
        provider,
        config.provider.clone(),
        config.npc.clone(),
    );
    let state = Arc::new(GatewayState::new(dispatcher, &config.gateway));

    println!("🐾 Purrgate Gateway");
    println!("   Persona:   {}", persona.name);
    println!("   Provider:  {} ({})", config.provider.provider, config.provider.model);
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Engaging:  {}", if config.npc.enabled { "enabled" } else { "disabled" });
    info!(persona = %persona.name, "Gateway configured");

    purrgate_gateway::start(state, &config.gateway).await?;

    Ok(())
}
