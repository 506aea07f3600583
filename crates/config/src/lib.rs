//! Configuration loading and validation for Purrgate.
//!
//! Purrgate is configured entirely through environment variables so it can
//! run as a sidecar next to the virtual-world chat relay without a config
//! file. Every knob has a default; `AppConfig::from_env()` never fails on
//! a missing variable, only on an unparseable or nonsensical one.

use serde::Serialize;
use std::collections::HashMap;

/// The root configuration structure.
#[derive(Clone, Serialize)]
pub struct AppConfig {
    /// Engine lifecycle timings and master switch
    pub npc: NpcConfig,

    /// Message buffer caps and windows
    pub buffer: BufferConfig,

    /// Decision-layer scoring weights and gates
    pub score: ScoreConfig,

    /// Conversation history and context budgeting
    pub conversation: ConversationConfig,

    /// Long-term memory injection
    pub memory: MemoryConfig,

    /// LLM provider selection and credentials
    pub provider: ProviderConfig,

    /// HTTP gateway binding and rate limiting
    pub gateway: GatewayConfig,
}

/// Engine lifecycle timings and the master switch.
#[derive(Debug, Clone, Serialize)]
pub struct NpcConfig {
    /// Whether the engagement engine runs at all (`NPC_ENABLED`)
    pub enabled: bool,

    /// Tick interval for the state machine (`NPC_TICK_INTERVAL_MS`)
    pub tick_interval_ms: u64,

    /// How long LISTENING waits before going idle, and how long a caller
    /// parks on the rendezvous (`NPC_LISTENING_TIMEOUT_MS`)
    pub listening_timeout_ms: u64,

    /// Wall-clock bound on THINKING (`NPC_THINKING_TIMEOUT_MS`)
    pub thinking_timeout_ms: u64,

    /// Cooldown after a reply before listening again (`NPC_SPEAKING_COOLDOWN_MS`)
    pub speaking_cooldown_ms: u64,
}

/// Message buffer caps and windows.
#[derive(Debug, Clone, Serialize)]
pub struct BufferConfig {
    /// Per-speaker queue cap (`NPC_BUFFER_MAX_PER_AVATAR`)
    pub max_per_avatar: usize,

    /// Global soft cap across all speakers (`NPC_BUFFER_MAX_TOTAL_SIZE`)
    pub max_total_size: usize,

    /// Aggregation window for combining rapid utterances
    /// (`NPC_BUFFER_AGGREGATION_WINDOW_MS`)
    pub aggregation_window_ms: u64,

    /// Utterance expiry age (`NPC_BUFFER_EXPIRY_MS`)
    pub expiry_ms: u64,
}

/// Decision-layer scoring weights and gates.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreConfig {
    /// Minimum score to be a response candidate (`NPC_RESPONSE_THRESHOLD`)
    pub response_threshold: f64,

    /// Probability gate on responding, 0.0–1.0 (`NPC_RESPONSE_CHANCE`)
    pub response_chance: f64,

    /// Trigger substrings marking a direct mention (`NPC_TRIGGER_WORDS`,
    /// comma-separated, matched case-insensitively)
    pub trigger_words: Vec<String>,

    /// Bonus when any buffered utterance mentions a trigger word
    /// (`NPC_SCORE_DIRECT_MENTION`)
    pub direct_mention_bonus: f64,

    /// Bonus for interaction within the last hour
    /// (`NPC_SCORE_RECENT_INTERACTION`)
    pub recent_interaction_bonus: f64,

    /// Per-message bonus multiplier (`NPC_SCORE_MESSAGE_COUNT_MULT`)
    pub message_count_multiplier: f64,

    /// Per-consecutive-message bonus (`NPC_SCORE_CONSECUTIVE_BONUS`)
    pub consecutive_bonus: f64,

    /// Cap on the age decay penalty (`NPC_SCORE_MAX_TIME_DECAY`)
    pub max_time_decay: f64,

    /// Decay rate in points per minute (`NPC_SCORE_TIME_DECAY_RATE`)
    pub time_decay_rate: f64,

    /// Upper bound (exclusive) of the uniform random score component
    /// (`NPC_SCORE_RANDOMNESS_RANGE`)
    pub randomness_range: f64,

    /// Minimum interval between two replies to the same speaker
    /// (`NPC_AVATAR_COOLDOWN_MS`)
    pub avatar_cooldown_ms: u64,
}

/// Conversation history and context budgeting.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationConfig {
    /// Maximum non-system turns kept verbatim
    /// (`CONVERSATION_MAX_HISTORY_MESSAGES`)
    pub max_history_messages: usize,

    /// Total context token budget; 0 disables budgeting
    /// (`CONTEXT_MAX_TOKENS`)
    pub max_context_tokens: usize,

    /// Largest share of the context the system prompt may occupy
    /// (`CONTEXT_SYSTEM_PROMPT_MAX_PERCENT`)
    pub system_prompt_max_percent: u8,

    /// Idle time before the conversation is archived and reset
    /// (`INACTIVITY_TIMEOUT_MS`)
    pub inactivity_timeout_ms: u64,
}

/// Long-term memory injection.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryConfig {
    /// Whether memory injection is active (`MEMORY_ENABLED`)
    pub enabled: bool,

    /// Token budget for injected memories (`MEMORY_TOKEN_BUDGET`)
    pub token_budget: usize,
}

/// LLM provider selection and credentials.
#[derive(Clone, Serialize)]
pub struct ProviderConfig {
    /// Provider name: "anthropic", "openai", "openrouter", "ollama", ...
    /// (`PURRGATE_PROVIDER`)
    pub provider: String,

    /// Model identifier (`PURRGATE_MODEL`)
    pub model: String,

    /// API key (`PURRGATE_API_KEY`, falling back to `ANTHROPIC_API_KEY`
    /// then `OPENAI_API_KEY`)
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Base URL override (`PURRGATE_API_URL`)
    pub api_url: Option<String>,

    /// Sampling temperature (`PURRGATE_TEMPERATURE`)
    pub temperature: f32,

    /// Max tokens per reply (`PURRGATE_MAX_TOKENS`)
    pub max_tokens: u32,
}

/// HTTP gateway binding and rate limiting.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayConfig {
    /// Bind host (`PURRGATE_HOST`)
    pub host: String,

    /// Bind port (`PURRGATE_PORT`)
    pub port: u16,

    /// Rate-limit window per avatar (`PURRGATE_RATE_LIMIT_WINDOW_MS`)
    pub rate_limit_window_ms: u64,

    /// Max requests per avatar per window (`PURRGATE_RATE_LIMIT_MAX`)
    pub rate_limit_max: u32,

    /// Persona file path (`PURRGATE_PERSONA_PATH`)
    pub persona_path: String,

    /// Directory for conversation transcripts; empty disables archival
    /// (`PURRGATE_TRANSCRIPT_DIR`)
    pub transcript_dir: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("npc", &self.npc)
            .field("buffer", &self.buffer)
            .field("score", &self.score)
            .field("conversation", &self.conversation)
            .field("memory", &self.memory)
            .field("provider", &self.provider)
            .field("gateway", &self.gateway)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field(
                "api_key",
                &self.api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("api_url", &self.api_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// A source of environment variables. Production uses the process
/// environment; tests pass a map so they stay deterministic and parallel.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// The process environment.
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&ProcessEnv)
    }

    /// Load configuration from an arbitrary environment source.
    pub fn from_source(env: &impl EnvSource) -> Result<Self, ConfigError> {
        let config = Self {
            npc: NpcConfig {
                enabled: get_bool(env, "NPC_ENABLED", false)?,
                tick_interval_ms: get_u64(env, "NPC_TICK_INTERVAL_MS", 1000)?,
                listening_timeout_ms: get_u64(env, "NPC_LISTENING_TIMEOUT_MS", 15_000)?,
                thinking_timeout_ms: get_u64(env, "NPC_THINKING_TIMEOUT_MS", 30_000)?,
                speaking_cooldown_ms: get_u64(env, "NPC_SPEAKING_COOLDOWN_MS", 5_000)?,
            },
            buffer: BufferConfig {
                max_per_avatar: get_usize(env, "NPC_BUFFER_MAX_PER_AVATAR", 10)?,
                max_total_size: get_usize(env, "NPC_BUFFER_MAX_TOTAL_SIZE", 50)?,
                aggregation_window_ms: get_u64(env, "NPC_BUFFER_AGGREGATION_WINDOW_MS", 5_000)?,
                expiry_ms: get_u64(env, "NPC_BUFFER_EXPIRY_MS", 60_000)?,
            },
            score: ScoreConfig {
                response_threshold: get_f64(env, "NPC_RESPONSE_THRESHOLD", 50.0)?,
                response_chance: get_f64(env, "NPC_RESPONSE_CHANCE", 0.8)?,
                trigger_words: get_words(env, "NPC_TRIGGER_WORDS", "maid,cat-maid,kitty"),
                direct_mention_bonus: get_f64(env, "NPC_SCORE_DIRECT_MENTION", 100.0)?,
                recent_interaction_bonus: get_f64(env, "NPC_SCORE_RECENT_INTERACTION", 30.0)?,
                message_count_multiplier: get_f64(env, "NPC_SCORE_MESSAGE_COUNT_MULT", 5.0)?,
                consecutive_bonus: get_f64(env, "NPC_SCORE_CONSECUTIVE_BONUS", 10.0)?,
                max_time_decay: get_f64(env, "NPC_SCORE_MAX_TIME_DECAY", 20.0)?,
                time_decay_rate: get_f64(env, "NPC_SCORE_TIME_DECAY_RATE", 2.0)?,
                randomness_range: get_f64(env, "NPC_SCORE_RANDOMNESS_RANGE", 10.0)?,
                avatar_cooldown_ms: get_u64(env, "NPC_AVATAR_COOLDOWN_MS", 30_000)?,
            },
            conversation: ConversationConfig {
                max_history_messages: get_usize(env, "CONVERSATION_MAX_HISTORY_MESSAGES", 50)?,
                max_context_tokens: get_usize(env, "CONTEXT_MAX_TOKENS", 8_000)?,
                system_prompt_max_percent: get_u64(env, "CONTEXT_SYSTEM_PROMPT_MAX_PERCENT", 80)?
                    as u8,
                inactivity_timeout_ms: get_u64(env, "INACTIVITY_TIMEOUT_MS", 3_600_000)?,
            },
            memory: MemoryConfig {
                enabled: get_bool(env, "MEMORY_ENABLED", true)?,
                token_budget: get_usize(env, "MEMORY_TOKEN_BUDGET", 500)?,
            },
            provider: ProviderConfig {
                provider: get_string(env, "PURRGATE_PROVIDER", "anthropic"),
                model: get_string(env, "PURRGATE_MODEL", "claude-sonnet-4-20250514"),
                api_key: env
                    .get("PURRGATE_API_KEY")
                    .or_else(|| env.get("ANTHROPIC_API_KEY"))
                    .or_else(|| env.get("OPENAI_API_KEY")),
                api_url: env.get("PURRGATE_API_URL"),
                temperature: get_f64(env, "PURRGATE_TEMPERATURE", 0.7)? as f32,
                max_tokens: get_u64(env, "PURRGATE_MAX_TOKENS", 1024)? as u32,
            },
            gateway: GatewayConfig {
                host: get_string(env, "PURRGATE_HOST", "127.0.0.1"),
                port: get_u64(env, "PURRGATE_PORT", 42710)? as u16,
                rate_limit_window_ms: get_u64(env, "PURRGATE_RATE_LIMIT_WINDOW_MS", 10_000)?,
                rate_limit_max: get_u64(env, "PURRGATE_RATE_LIMIT_MAX", 20)? as u32,
                persona_path: get_string(env, "PURRGATE_PERSONA_PATH", "persona.toml"),
                transcript_dir: get_string(env, "PURRGATE_TRANSCRIPT_DIR", ""),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.score.response_chance) {
            return Err(ConfigError::ValidationError(
                "NPC_RESPONSE_CHANCE must be between 0.0 and 1.0".into(),
            ));
        }
        if self.score.randomness_range < 0.0 {
            return Err(ConfigError::ValidationError(
                "NPC_SCORE_RANDOMNESS_RANGE must be >= 0".into(),
            ));
        }
        if self.buffer.max_per_avatar == 0 || self.buffer.max_total_size == 0 {
            return Err(ConfigError::ValidationError(
                "buffer caps must be greater than zero".into(),
            ));
        }
        if self.npc.tick_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "NPC_TICK_INTERVAL_MS must be greater than zero".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "PURRGATE_TEMPERATURE must be between 0.0 and 2.0".into(),
            ));
        }
        if self.conversation.system_prompt_max_percent > 100 {
            return Err(ConfigError::ValidationError(
                "CONTEXT_SYSTEM_PROMPT_MAX_PERCENT must be at most 100".into(),
            ));
        }
        Ok(())
    }

    /// Check if an API key is available.
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        // The empty environment yields all defaults; defaults always validate.
        Self::from_source(&HashMap::<String, String>::new())
            .expect("default configuration is valid")
    }
}

// --- Typed getters ---

fn get_string(env: &impl EnvSource, var: &str, default: &str) -> String {
    env.get(var)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn get_words(env: &impl EnvSource, var: &str, default: &str) -> Vec<String> {
    get_string(env, var, default)
        .split(',')
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

fn get_bool(env: &impl EnvSource, var: &str, default: bool) -> Result<bool, ConfigError> {
    match env.get(var) {
        None => Ok(default),
        Some(v) => match v.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                var: var.into(),
                value: v,
                reason: "expected a boolean".into(),
            }),
        },
    }
}

fn get_u64(env: &impl EnvSource, var: &str, default: u64) -> Result<u64, ConfigError> {
    match env.get(var) {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| ConfigError::InvalidValue {
            var: var.into(),
            value: v,
            reason: "expected a non-negative integer".into(),
        }),
    }
}

fn get_usize(env: &impl EnvSource, var: &str, default: usize) -> Result<usize, ConfigError> {
    Ok(get_u64(env, var, default as u64)? as usize)
}

fn get_f64(env: &impl EnvSource, var: &str, default: f64) -> Result<f64, ConfigError> {
    match env.get(var) {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| ConfigError::InvalidValue {
            var: var.into(),
            value: v,
            reason: "expected a number".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = AppConfig::default();
        assert!(!config.npc.enabled);
        assert_eq!(config.npc.tick_interval_ms, 1000);
        assert_eq!(config.npc.listening_timeout_ms, 15_000);
        assert_eq!(config.npc.thinking_timeout_ms, 30_000);
        assert_eq!(config.npc.speaking_cooldown_ms, 5_000);
        assert_eq!(config.buffer.max_per_avatar, 10);
        assert_eq!(config.buffer.max_total_size, 50);
        assert_eq!(config.buffer.aggregation_window_ms, 5_000);
        assert_eq!(config.buffer.expiry_ms, 60_000);
        assert_eq!(config.score.response_threshold, 50.0);
        assert_eq!(config.score.response_chance, 0.8);
        assert_eq!(config.score.trigger_words, vec!["maid", "cat-maid", "kitty"]);
        assert_eq!(config.score.direct_mention_bonus, 100.0);
        assert_eq!(config.score.avatar_cooldown_ms, 30_000);
        assert_eq!(config.conversation.max_history_messages, 50);
        assert_eq!(config.conversation.max_context_tokens, 8_000);
        assert_eq!(config.conversation.inactivity_timeout_ms, 3_600_000);
        assert!(config.memory.enabled);
        assert_eq!(config.memory.token_budget, 500);
    }

    #[test]
    fn env_overrides_applied() {
        let config = AppConfig::from_source(&env(&[
            ("NPC_ENABLED", "true"),
            ("NPC_RESPONSE_THRESHOLD", "75"),
            ("NPC_TRIGGER_WORDS", " Neko , Butler "),
            ("PURRGATE_PORT", "9000"),
        ]))
        .unwrap();

        assert!(config.npc.enabled);
        assert_eq!(config.score.response_threshold, 75.0);
        assert_eq!(config.score.trigger_words, vec!["neko", "butler"]);
        assert_eq!(config.gateway.port, 9000);
    }

    #[test]
    fn api_key_fallback_chain() {
        let config =
            AppConfig::from_source(&env(&[("ANTHROPIC_API_KEY", "sk-ant-test")])).unwrap();
        assert_eq!(config.provider.api_key.as_deref(), Some("sk-ant-test"));

        let config = AppConfig::from_source(&env(&[
            ("PURRGATE_API_KEY", "primary"),
            ("ANTHROPIC_API_KEY", "secondary"),
        ]))
        .unwrap();
        assert_eq!(config.provider.api_key.as_deref(), Some("primary"));
    }

    #[test]
    fn invalid_chance_rejected() {
        let err = AppConfig::from_source(&env(&[("NPC_RESPONSE_CHANCE", "1.5")])).unwrap_err();
        assert!(err.to_string().contains("NPC_RESPONSE_CHANCE"));
    }

    #[test]
    fn unparseable_integer_rejected() {
        let err =
            AppConfig::from_source(&env(&[("NPC_TICK_INTERVAL_MS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("NPC_TICK_INTERVAL_MS"));
    }

    #[test]
    fn zero_tick_rejected() {
        assert!(AppConfig::from_source(&env(&[("NPC_TICK_INTERVAL_MS", "0")])).is_err());
    }

    #[test]
    fn bool_spellings() {
        for (raw, expected) in [("1", true), ("on", true), ("FALSE", false), ("no", false)] {
            let config = AppConfig::from_source(&env(&[("MEMORY_ENABLED", raw)])).unwrap();
            assert_eq!(config.memory.enabled, expected, "spelling {raw:?}");
        }
    }

    #[test]
    fn api_key_redacted_in_debug() {
        let config = AppConfig::from_source(&env(&[("PURRGATE_API_KEY", "sk-secret")])).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
