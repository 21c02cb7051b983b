//! # chatsim
//!
//! A simulated Twitch chat feed. Completions from a language model endpoint
//! are parsed into chat lines, filtered and anonymized, then relayed to every
//! connected viewer over WebSocket after an optional random display delay.
//! Live Twitch chat can be read anonymously and rebroadcast in the same
//! envelope shape.
//!
//! ## Pipeline
//!
//! - **Moderation**: banned terms, streamer name rewriting, username
//!   replacement from a fixed pool, unknown emote stripping
//! - **Relay**: ordered fan-out to all viewers, client-sent messages relayed
//!   back to everyone, every distinct username appended to an audit log
//! - **Runner**: prompt building, completion requests and cancellable
//!   delayed delivery
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chatsim::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load("config/chatsim.yaml").await?;
//!     let session = ChatSession::from_config(&config.moderation, Vec::new(), true)?;
//!
//!     let audit_log = Arc::new(UsernameAuditLog::open(config.audit_log_path()).await);
//!     let relay = Arc::new(BroadcastRelay::new(audit_log));
//!     let listener = BroadcastRelay::bind(&config.relay_addr()).await?;
//!     tokio::spawn(Arc::clone(&relay).serve(listener));
//!
//!     let completion = Arc::new(CompletionClient::new(&config.completion)?);
//!     let runner = Arc::new(ChatRunner::new(session, completion, relay, config.runner.clone()));
//!     runner.start();
//!
//!     tokio::signal::ctrl_c().await?;
//!     runner.stop().await;
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod config;
pub mod platforms;
pub mod types;

#[cfg(feature = "web")]
pub mod web;

// Re-export commonly used items
pub mod prelude {
    pub use crate::bot::{BroadcastRelay, ChatRunner, ChatSession, ChatSink, UsernameAuditLog};
    pub use crate::config::AppConfig;
    pub use crate::platforms::{
        CompletionClient, CompletionSource, EmoteFetcher, LiveChatSource, TwitchChatReader,
    };
    pub use crate::types::{ChatEnvelope, ChatMessage, Emote, LiveChatEvent};
    #[cfg(feature = "web")]
    pub use crate::web::{ControlServer, ControlState};
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
