//! HTTP gateway for Purrgate.
//!
//! Exposes the ingest endpoint the in-world chat relay POSTs to, plus
//! the memory reset endpoint and a health check.
//!
//! Built on Axum for high performance async HTTP.
//!
//! Response contract for `POST /chat`:
//! - **200** reply body as plain text when the persona engaged
//! - **202** empty body when the engine declined
//! - **204** when the message was a reset command
//! - **400** on missing/empty required fields
//! - **429** when the rate limiter refused
//! - **502** on LLM transport failure, with a plain-text explanation

pub mod ratelimit;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use purrgate_config::GatewayConfig;
use purrgate_engine::{Dispatcher, Outcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use ratelimit::RateLimiter;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub dispatcher: Dispatcher,
    pub rate_limiter: RateLimiter,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(dispatcher: Dispatcher, config: &GatewayConfig) -> Self {
        Self {
            dispatcher,
            rate_limiter: RateLimiter::new(
                Duration::from_millis(config.rate_limit_window_ms),
                config.rate_limit_max,
            ),
        }
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/memory/reset", post(memory_reset_handler))
        .route("/health", get(health_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start(
    state: SharedState,
    config: &GatewayConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Deserialize)]
struct ChatRequest {
    /// Display name of the speaker
    #[serde(default)]
    speaker: Option<String>,

    /// The chat line
    #[serde(default)]
    message: Option<String>,

    /// Stable identity; defaults to the display name
    #[serde(default, rename = "avatarId")]
    avatar_id: Option<String>,
}

async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Response {
    let speaker = payload.speaker.as_deref().unwrap_or("").trim();
    let message = payload.message.as_deref().unwrap_or("").trim();
    if speaker.is_empty() || message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            "speaker and message are required",
        )
            .into_response();
    }
    let avatar_id = payload
        .avatar_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(speaker);

    if !state.rate_limiter.allow(avatar_id) {
        return (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response();
    }

    match state
        .dispatcher
        .handle_message(speaker, avatar_id, message)
        .await
    {
        Ok(Outcome::Reply(reply)) => (StatusCode::OK, reply).into_response(),
        Ok(Outcome::NotEngaged) => StatusCode::ACCEPTED.into_response(),
        Ok(Outcome::Reset) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            warn!(error = %e, "Chat dispatch failed");
            (StatusCode::BAD_GATEWAY, format!("LLM call failed: {e}")).into_response()
        }
    }
}

async fn memory_reset_handler(State(state): State<SharedState>) -> StatusCode {
    state.dispatcher.engine().reset_all("reset").await;
    StatusCode::NO_CONTENT
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use purrgate_config::AppConfig;
    use purrgate_core::error::ProviderError;
    use purrgate_core::persona::Persona;
    use purrgate_core::provider::{Provider, ProviderRequest, ProviderResponse};
    use purrgate_core::transcript::NoopSink;
    use purrgate_engine::{FixedRandom, NpcEngine};
    use purrgate_memory::KeywordMemoryStore;
    use tower::ServiceExt;

    struct MockProvider {
        reply: String,
        fail: bool,
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn complete(
            &self,
            request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            if self.fail {
                return Err(ProviderError::Network("provider down".into()));
            }
            Ok(ProviderResponse {
                content: self.reply.clone(),
                usage: None,
                model: request.model,
            })
        }
    }

    fn test_state(reply: &str, fail: bool, rate_limit_max: u32) -> SharedState {
        let mut config = AppConfig::default();
        config.npc.enabled = true;
        config.npc.listening_timeout_ms = 100;
        config.score.response_chance = 1.0;
        config.score.randomness_range = 0.0;
        config.gateway.rate_limit_max = rate_limit_max;

        let persona = Persona::fallback();
        let engine = Arc::new(NpcEngine::new(
            &config,
            &persona,
            Arc::new(KeywordMemoryStore::new()),
            Arc::new(NoopSink),
            Box::new(FixedRandom(0.0)),
        ));
        let dispatcher = Dispatcher::new(
            engine,
            Arc::new(MockProvider {
                reply: reply.into(),
                fail,
            }),
            config.provider.clone(),
            config.npc.clone(),
        );
        Arc::new(GatewayState::new(dispatcher, &config.gateway))
    }

    fn chat_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chat")
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// Drive the engine until a verdict for the speaker is parked, so the
    /// next HTTP call consumes it without a live ticker.
    async fn park_verdict(state: &SharedState, avatar_id: &str, speaker: &str, text: &str) {
        let engine = state.dispatcher.engine();
        engine.ingest(avatar_id, speaker, text).await;
        let now = chrono::Utc::now();
        engine.tick_once(now).await;
        engine.tick_once(now).await;
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_state("hi", false, 0));
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_speaker_is_bad_request() {
        let app = build_router(test_state("hi", false, 0));
        let response = app
            .oneshot(chat_request(r#"{"message": "hello"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_message_is_bad_request() {
        let app = build_router(test_state("hi", false, 0));
        let response = app
            .oneshot(chat_request(r#"{"speaker": "Carol", "message": "  "}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn declined_message_is_accepted_no_content() {
        let app = build_router(test_state("hi", false, 0));
        // Plain chatter scores below threshold.
        let response = app
            .oneshot(chat_request(
                r#"{"speaker": "Alice", "message": "just passing by"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn engaged_message_returns_reply_text() {
        let state = test_state("Nya~ welcome back!", false, 0);
        park_verdict(&state, "carol", "Carol", "hey maid!").await;

        let app = build_router(state);
        let response = app
            .oneshot(chat_request(
                r#"{"speaker": "Carol", "avatarId": "carol", "message": "you there?"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"Nya~ welcome back!");
    }

    #[tokio::test]
    async fn reset_command_is_no_content() {
        let app = build_router(test_state("hi", false, 0));
        let response = app
            .oneshot(chat_request(r#"{"speaker": "Carol", "message": "reset"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn provider_failure_is_bad_gateway() {
        let state = test_state("", true, 0);
        park_verdict(&state, "carol", "Carol", "hey maid!").await;

        let app = build_router(state);
        let response = app
            .oneshot(chat_request(
                r#"{"speaker": "Carol", "avatarId": "carol", "message": "you there?"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn rate_limited_is_too_many_requests() {
        let state = test_state("hi", false, 1);
        let app = build_router(state);

        let first = app
            .clone()
            .oneshot(chat_request(r#"{"speaker": "Carol", "message": "one"}"#))
            .await
            .unwrap();
        assert_ne!(first.status(), StatusCode::TOO_MANY_REQUESTS);

        let second = app
            .oneshot(chat_request(r#"{"speaker": "Carol", "message": "two"}"#))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn memory_reset_endpoint() {
        let state = test_state("hi", false, 0);
        state
            .dispatcher
            .engine()
            .ingest("carol", "Carol", "hello")
            .await;

        let app = build_router(state.clone());
        let req = Request::builder()
            .method("POST")
            .uri("/memory/reset")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.dispatcher.engine().buffered_total().await, 0);
    }

    #[tokio::test]
    async fn avatar_id_defaults_to_speaker() {
        let state = test_state("Hello!", false, 0);
        // Parked under the display name, since no avatarId is sent.
        park_verdict(&state, "Carol", "Carol", "hey maid!").await;

        let app = build_router(state);
        let response = app
            .oneshot(chat_request(r#"{"speaker": "Carol", "message": "hi?"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
