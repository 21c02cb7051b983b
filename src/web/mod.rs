use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use log::info;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::bot::{BroadcastRelay, ChatRunner, SettingsUpdate};
use crate::config::load_usernames;
use crate::platforms::EmoteFetcher;

#[derive(Clone)]
pub struct ControlState {
    pub runner: Arc<ChatRunner>,
    pub relay: Arc<BroadcastRelay>,
    pub fetcher: Arc<EmoteFetcher>,
    pub usernames_file: PathBuf,
}

#[derive(Debug, Deserialize)]
struct TranscriptAppend {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ChannelRequest {
    channel: String,
}

pub struct ControlServer {
    state: ControlState,
}

impl ControlServer {
    pub fn new(state: ControlState) -> Self {
        Self { state }
    }

    pub async fn start_server(&self, port: u16) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
        info!("Control API available at http://localhost:{}/api/status", port);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/status", get(get_status))
            .route("/api/runner/start", post(start_runner))
            .route("/api/runner/stop", post(stop_runner))
            .route("/api/runner/settings", post(update_settings))
            .route("/api/transcript", post(append_transcript))
            .route("/api/usernames", get(get_usernames))
            .route("/api/emotes/global", get(get_global_emotes))
            .route("/api/emotes", post(add_channel_emotes))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }
}

fn ok(data: serde_json::Value) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "data": data
    }))
}

async fn get_status(State(state): State<ControlState>) -> Result<Json<serde_json::Value>, StatusCode> {
    let runner = state.runner.status().await;
    let runner = serde_json::to_value(runner).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(ok(serde_json::json!({
        "runner": runner,
        "viewers": state.relay.viewer_count().await,
        "envelopesSent": state.relay.envelopes_sent(),
        "loggedUsernames": state.relay.audit_log().len().await,
        "version": env!("CARGO_PKG_VERSION")
    })))
}

async fn start_runner(State(state): State<ControlState>) -> Json<serde_json::Value> {
    let started = state.runner.start();
    ok(serde_json::json!({ "started": started }))
}

async fn stop_runner(State(state): State<ControlState>) -> Json<serde_json::Value> {
    let cancelled = state.runner.stop().await;
    ok(serde_json::json!({ "cancelled": cancelled }))
}

async fn update_settings(
    State(state): State<ControlState>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let settings = state.runner.apply(update).await;
    let settings = serde_json::to_value(settings).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(ok(settings))
}

async fn append_transcript(
    State(state): State<ControlState>,
    Json(body): Json<TranscriptAppend>,
) -> Json<serde_json::Value> {
    state.runner.append_to_transcript(&body.text).await;
    ok(serde_json::json!({ "transcript": state.runner.transcript().await }))
}

/// Re-read the username list and install it as the replacement pool.
/// An empty or missing file leaves the current pool in place.
async fn get_usernames(State(state): State<ControlState>) -> Json<serde_json::Value> {
    let usernames = load_usernames(&state.usernames_file).await;
    let installed = !usernames.is_empty();
    if installed {
        state.runner.session().set_replacement_usernames(usernames.clone()).await;
    }
    ok(serde_json::json!({ "usernames": usernames, "installed": installed }))
}

async fn get_global_emotes(State(state): State<ControlState>) -> Json<serde_json::Value> {
    let emotes = state.fetcher.global_emotes().await;
    ok(serde_json::json!({ "emotes": emotes }))
}

async fn add_channel_emotes(
    State(state): State<ControlState>,
    Json(body): Json<ChannelRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if body.channel.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let emotes = state.runner.add_channel(&state.fetcher, &body.channel).await;
    Ok(ok(serde_json::json!({ "emotes": emotes })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::{ChatSession, UsernameAuditLog};
    use crate::config::{ModerationConfig, RunnerSettings, TwitchSettings};
    use crate::platforms::{CompletionRequest, CompletionSource};
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct Silent;

    #[async_trait]
    impl CompletionSource for Silent {
        async fn complete(&self, _request: &CompletionRequest) -> String {
            String::new()
        }
    }

    async fn serve(dir: &std::path::Path) -> (String, ControlState) {
        let audit_log = Arc::new(UsernameAuditLog::open(dir.join("usernames.log")).await);
        let relay = Arc::new(BroadcastRelay::new(audit_log));
        let session = ChatSession::from_config(&ModerationConfig::default(), Vec::new(), true).unwrap();
        let runner = Arc::new(ChatRunner::new(
            session,
            Arc::new(Silent),
            relay.clone(),
            RunnerSettings::default(),
        ));
        let state = ControlState {
            runner,
            relay,
            fetcher: Arc::new(EmoteFetcher::new(&TwitchSettings::default()).unwrap()),
            usernames_file: dir.join("valid_usernames.txt"),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let router = ControlServer::new(state.clone()).router();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (base, state)
    }

    #[tokio::test]
    async fn test_status_and_runner_control() {
        let temp_dir = tempdir().unwrap();
        let (base, state) = serve(temp_dir.path()).await;
        let http = reqwest::Client::new();

        let status: serde_json::Value = http.get(format!("{}/api/status", base)).send().await.unwrap().json().await.unwrap();
        assert_eq!(status["success"], true);
        assert_eq!(status["data"]["runner"]["running"], false);
        assert_eq!(status["data"]["viewers"], 0);

        let started: serde_json::Value =
            http.post(format!("{}/api/runner/start", base)).send().await.unwrap().json().await.unwrap();
        assert_eq!(started["data"]["started"], true);
        assert!(state.runner.is_running());

        http.post(format!("{}/api/runner/stop", base)).send().await.unwrap();
        assert!(!state.runner.is_running());
    }

    #[tokio::test]
    async fn test_settings_update_is_clamped() {
        let temp_dir = tempdir().unwrap();
        let (base, _state) = serve(temp_dir.path()).await;

        let response: serde_json::Value = reqwest::Client::new()
            .post(format!("{}/api/runner/settings", base))
            .json(&serde_json::json!({ "maxRandomDelaySec": 500, "temperature": 0.7 }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(response["data"]["maxRandomDelaySec"], 60);
        assert_eq!(response["data"]["temperature"], 0.7);
    }

    #[tokio::test]
    async fn test_transcript_and_usernames() {
        let temp_dir = tempdir().unwrap();
        tokio::fs::write(temp_dir.path().join("valid_usernames.txt"), "one\n\n two \n").await.unwrap();
        let (base, _state) = serve(temp_dir.path()).await;
        let http = reqwest::Client::new();

        let response: serde_json::Value = http
            .post(format!("{}/api/transcript", base))
            .json(&serde_json::json!({ "text": "STREAMER: hi chat" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(response["data"]["transcript"], "STREAMER: hi chat");

        let usernames: serde_json::Value =
            http.get(format!("{}/api/usernames", base)).send().await.unwrap().json().await.unwrap();
        assert_eq!(usernames["data"]["usernames"], serde_json::json!(["one", "two"]));
        assert_eq!(usernames["data"]["installed"], true);
    }

    #[tokio::test]
    async fn test_username_reload_replaces_pool() {
        let temp_dir = tempdir().unwrap();
        let (base, state) = serve(temp_dir.path()).await;
        let http = reqwest::Client::new();

        // no file yet: names pass through unchanged and the pool is not touched
        let missing: serde_json::Value =
            http.get(format!("{}/api/usernames", base)).send().await.unwrap().json().await.unwrap();
        assert_eq!(missing["data"]["installed"], false);
        let batch = state.runner.session().parse_batch("alice: before reload").await;
        assert_eq!(batch.messages[0].username.as_deref(), Some("alice"));

        tokio::fs::write(temp_dir.path().join("valid_usernames.txt"), "stand_in\n").await.unwrap();
        http.get(format!("{}/api/usernames", base)).send().await.unwrap();

        let batch = state.runner.session().parse_batch("bob: after reload").await;
        assert_eq!(batch.messages[0].username.as_deref(), Some("stand_in"));
        // mappings made before the reload survive it
        let batch = state.runner.session().parse_batch("alice: again").await;
        assert_eq!(batch.messages[0].username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_blank_channel_rejected() {
        let temp_dir = tempdir().unwrap();
        let (base, _state) = serve(temp_dir.path()).await;

        let response = reqwest::Client::new()
            .post(format!("{}/api/emotes", base))
            .json(&serde_json::json!({ "channel": "  " }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
