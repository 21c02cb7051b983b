use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::types::LiveChatEvent;

pub mod completion;
pub mod emotes;
pub mod twitch;

pub use completion::{CompletionClient, CompletionRequest, CompletionSource};
pub use emotes::EmoteFetcher;
pub use twitch::TwitchChatReader;

/// Interface every live chat ingestion source implements
#[async_trait]
pub trait LiveChatSource: Send + Sync {
    /// Platform identifier (e.g. "twitch")
    fn platform_name(&self) -> &str;

    /// Channels this source reads from
    fn channels(&self) -> Vec<String>;

    /// Receiver for incoming chat events
    fn subscribe(&self) -> broadcast::Receiver<LiveChatEvent>;

    fn is_connected(&self) -> bool;

    /// Read until `shutdown` is called, reconnecting on failure
    async fn run(&self);

    fn shutdown(&self);
}
