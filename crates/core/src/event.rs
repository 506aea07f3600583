//! Domain event system — decoupled diagnostics between bounded contexts.
//!
//! Events are published when something interesting happens in the engine.
//! Subscribers (log streams, status endpoints) react without tight
//! coupling. Events are diagnostic only and never affect verdicts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A new utterance was buffered for a speaker
    UtteranceBuffered {
        avatar_id: String,
        speaker: String,
        direct_mention: bool,
        timestamp: DateTime<Utc>,
    },

    /// The decision layer produced a verdict
    DecisionMade {
        respond: bool,
        target: Option<String>,
        reason: String,
        score: f64,
        timestamp: DateTime<Utc>,
    },

    /// The state machine changed state
    StateChanged {
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },

    /// The persona replied to a speaker
    ReplyGenerated {
        avatar_id: String,
        model: String,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what
/// they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
