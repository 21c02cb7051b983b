use anyhow::Result;
use log::info;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::bot::emotes::EmoteIndex;
use crate::bot::identity::{ColorTable, IdentityMapper};
use crate::bot::moderation::{ModerationRules, ModerationState};
use crate::bot::parser::{self, ParsedBatch};
use crate::config::ModerationConfig;
use crate::types::{ChatEnvelope, ChatMessage, Emote};

/// Rules are immutable; the identity map, pool and colors sit behind one
/// lock so a batch is mapped atomically.
#[derive(Clone)]
pub struct ChatSession {
    rules: Arc<ModerationRules>,
    state: Arc<RwLock<ModerationState>>,
    emotes: Arc<RwLock<EmoteIndex>>,
}

impl ChatSession {
    pub fn new(rules: ModerationRules, state: ModerationState, emotes: EmoteIndex) -> Self {
        Self {
            rules: Arc::new(rules),
            state: Arc::new(RwLock::new(state)),
            emotes: Arc::new(RwLock::new(emotes)),
        }
    }

    pub fn from_config(config: &ModerationConfig, usernames: Vec<String>, force_username: bool) -> Result<Self> {
        let rules = ModerationRules::new(config)?;
        let state = ModerationState::new(
            IdentityMapper::with_candidates(usernames),
            ColorTable::new(config.palette.clone()),
            force_username,
        );
        Ok(Self::new(rules, state, EmoteIndex::new()))
    }

    pub fn rules(&self) -> &ModerationRules {
        &self.rules
    }

    pub async fn parse_batch(&self, raw: &str) -> ParsedBatch {
        let emotes = self.emotes.read().await;
        let mut state = self.state.write().await;
        parser::parse_batch(raw, &self.rules, &mut state, &emotes)
    }

    /// Wire envelopes for accepted messages, carrying each username's color
    pub async fn envelopes_for(&self, messages: &[ChatMessage]) -> Vec<ChatEnvelope> {
        let state = self.state.read().await;
        messages
            .iter()
            .map(|m| {
                let color = m.username.as_deref().and_then(|u| state.colors.color_for(u));
                ChatEnvelope::from_message(m, color)
            })
            .collect()
    }

    pub async fn set_force_username(&self, enabled: bool) {
        self.state.write().await.force_username = enabled;
    }

    pub async fn force_username(&self) -> bool {
        self.state.read().await.force_username
    }

    pub async fn set_replacement_usernames(&self, usernames: Vec<String>) {
        let count = usernames.len();
        self.state.write().await.identity.set_candidates(usernames);
        info!("Replacement pool now has {} usernames", count);
    }

    pub async fn merge_emotes(&self, emotes: Vec<Emote>) -> usize {
        self.emotes.write().await.extend(emotes)
    }

    pub async fn emote_count(&self) -> usize {
        self.emotes.read().await.len()
    }

    pub async fn mapped_usernames(&self) -> usize {
        self.state.read().await.identity.mapped_count()
    }
}
