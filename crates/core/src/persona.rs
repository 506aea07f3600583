//! Persona loading — the NPC's system prompt and seed facts.
//!
//! A persona file is a TOML document with the persona's display name, the
//! system prompt that anchors every conversation, and a list of facts that
//! seed the long-term memory store at startup:
//!
//! ```toml
//! name = "Mio"
//! system_prompt = "You are Mio, the cat-maid of the mansion..."
//!
//! [[facts]]
//! keywords = ["garden", "roses"]
//! content = "The mansion has a rose garden Mio tends every morning."
//! priority = 6
//! ```
//!
//! The file is optional. When missing, a built-in fallback persona is used
//! so the gateway can start without any configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{EngineError, Error, Result};

/// A persona fact that seeds the memory store at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaFact {
    /// Keywords that activate this fact (lowercased on insert)
    pub keywords: Vec<String>,

    /// The fact text injected into the prompt
    pub content: String,

    /// Priority 1–10 (higher = stronger)
    #[serde(default = "default_priority")]
    pub priority: u8,
}

fn default_priority() -> u8 {
    5
}

/// The NPC persona: display name, system prompt, and seed facts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    /// The persona's display name
    pub name: String,

    /// The system prompt anchoring every conversation
    pub system_prompt: String,

    /// Facts loaded into the memory store at startup
    #[serde(default)]
    pub facts: Vec<PersonaFact>,
}

impl Persona {
    /// The built-in fallback persona used when no file is configured.
    pub fn fallback() -> Self {
        Self {
            name: "Maid".into(),
            system_prompt: concat!(
                "You are a cheerful cat-maid NPC in a virtual-world mansion. ",
                "You observe the room's chatter and only speak when addressed ",
                "or when a conversation clearly involves you. ",
                "Keep replies short, in character, and address speakers by name.",
            )
            .into(),
            facts: vec![],
        }
    }

    /// Load a persona from a TOML file.
    ///
    /// Missing file falls back to the built-in persona with a warning;
    /// a malformed file is an error (a half-loaded persona is worse than
    /// none).
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Persona file not found, using fallback persona");
                return Ok(Self::fallback());
            }
            Err(e) => {
                return Err(Error::Engine(EngineError::Persona(format!(
                    "failed to read {}: {e}",
                    path.display()
                ))))
            }
        };

        let persona: Persona = toml::from_str(&content).map_err(|e| {
            Error::Engine(EngineError::Persona(format!(
                "failed to parse {}: {e}",
                path.display()
            )))
        })?;

        if persona.system_prompt.trim().is_empty() {
            return Err(Error::Engine(EngineError::Persona(
                "persona system_prompt is empty".into(),
            )));
        }

        debug!(
            name = %persona.name,
            facts = persona.facts.len(),
            prompt_len = persona.system_prompt.len(),
            "Persona loaded"
        );
        Ok(persona)
    }
}

impl Default for Persona {
    fn default() -> Self {
        Self::fallback()
    }
}
