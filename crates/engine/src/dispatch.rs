//! The dispatch adapter — the engine-facing contract of the HTTP layer.
//!
//! One call per incoming room message: ingest, park on the rendezvous,
//! and on an engage verdict run the LLM (streaming preferred,
//! non-streaming fallback), emit the reply, and clean up. LLM calls
//! happen outside the engine lock.

use purrgate_config::{NpcConfig, ProviderConfig};
use purrgate_core::error::{Error, ProviderError, Result};
use purrgate_core::provider::{Provider, ProviderRequest, Usage};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::engine::NpcEngine;

/// In-band commands that reset the conversation instead of being chatter.
const RESET_COMMANDS: &[&str] = &["reset", "清除"];

/// The outcome of one dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The engine engaged and the persona replied
    Reply(String),

    /// The engine declined or never decided within the window
    NotEngaged,

    /// The message was an in-band reset command
    Reset,
}

/// Dispatches room messages through the engine to the LLM.
pub struct Dispatcher {
    engine: Arc<NpcEngine>,
    provider: Arc<dyn Provider>,
    provider_cfg: ProviderConfig,
    npc: NpcConfig,
}

impl Dispatcher {
    pub fn new(
        engine: Arc<NpcEngine>,
        provider: Arc<dyn Provider>,
        provider_cfg: ProviderConfig,
        npc: NpcConfig,
    ) -> Self {
        Self {
            engine,
            provider,
            provider_cfg,
            npc,
        }
    }

    pub fn engine(&self) -> Arc<NpcEngine> {
        self.engine.clone()
    }

    /// Handle one incoming message from the room.
    pub async fn handle_message(
        &self,
        speaker: &str,
        avatar_id: &str,
        text: &str,
    ) -> Result<Outcome> {
        if RESET_COMMANDS.contains(&text.trim()) {
            info!(avatar_id, "In-band reset command received");
            self.engine.reset_all("reset").await;
            return Ok(Outcome::Reset);
        }

        if !self.npc.enabled {
            return Ok(Outcome::NotEngaged);
        }

        self.engine.ingest(avatar_id, speaker, text).await;

        let timeout = Duration::from_millis(self.npc.listening_timeout_ms);
        let Some(decision) = self.engine.wait_for_decision(avatar_id, timeout).await else {
            debug!(avatar_id, "No decision within the listening window");
            return Ok(Outcome::NotEngaged);
        };
        debug!(avatar_id, score = decision.score, "Engaging");

        let Some(prompt) = self.engine.build_prompt(avatar_id, speaker).await else {
            return Ok(Outcome::NotEngaged);
        };

        let request = ProviderRequest {
            model: self.provider_cfg.model.clone(),
            messages: prompt,
            temperature: self.provider_cfg.temperature,
            max_tokens: Some(self.provider_cfg.max_tokens),
            stream: true,
            stop: vec![],
        };

        match self.invoke_llm(request).await {
            Ok((reply, usage)) => {
                let tokens = usage.map(|u| u.total_tokens).unwrap_or(0);
                self.engine
                    .complete_reply(avatar_id, &reply, &self.provider_cfg.model, tokens)
                    .await;
                Ok(Outcome::Reply(reply))
            }
            Err(e) => {
                warn!(avatar_id, error = %e, "LLM call failed, rolling back");
                self.engine.fail_reply("llm", &e.to_string()).await;
                Err(Error::Provider(e))
            }
        }
    }

    /// Stream the reply, falling back to a non-streaming call when the
    /// stream errors (at setup or mid-flight).
    async fn invoke_llm(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<(String, Option<Usage>), ProviderError> {
        match self.stream_reply(request.clone()).await {
            Ok(result) => Ok(result),
            Err(stream_err) => {
                warn!(
                    provider = self.provider.name(),
                    error = %stream_err,
                    "Streaming failed, falling back to non-streaming"
                );
                let mut request = request;
                request.stream = false;
                let response = self.provider.complete(request).await?;
                Ok((response.content, response.usage))
            }
        }
    }

    async fn stream_reply(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<(String, Option<Usage>), ProviderError> {
        let mut rx = self.provider.stream(request).await?;
        let mut reply = String::new();
        let mut usage = None;
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            if let Some(content) = chunk.content {
                reply.push_str(&content);
            }
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            if chunk.done {
                break;
            }
        }
        Ok((reply, usage))
    }
}
