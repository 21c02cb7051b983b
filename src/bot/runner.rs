// src/bot/runner.rs - Producer loop: prompt, complete, moderate, schedule delivery

use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;

use crate::bot::relay::ChatSink;
use crate::bot::session::ChatSession;
use crate::bot::transcript::{Transcript, FULL_CONTEXT_PROBABILITY};
use crate::config::RunnerSettings;
use crate::platforms::completion::{CompletionRequest, CompletionSource};
use crate::platforms::emotes::EmoteFetcher;
use crate::types::{BatchStats, ChatEnvelope, ChatPayload, Emote};

/// Delivered messages kept for status queries
pub const RECENT_WINDOW: usize = 200;

/// Partial settings change; absent fields are left alone
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub call_delay_sec: Option<f64>,
    pub randomize_delay: Option<bool>,
    pub max_random_delay_sec: Option<f64>,
    pub force_username: Option<bool>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerStatus {
    pub running: bool,
    pub queued: usize,
    pub last_stats: Option<BatchStats>,
    pub settings: RunnerSettings,
    pub mapped_usernames: usize,
    pub emote_count: usize,
    pub recent: Vec<ChatPayload>,
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

pub struct ChatRunner {
    session: ChatSession,
    completion: Arc<dyn CompletionSource>,
    sink: Arc<dyn ChatSink>,
    settings: RwLock<RunnerSettings>,
    transcript: RwLock<Transcript>,
    running: AtomicBool,
    epoch: AtomicU64,
    stop_signal: Notify,
    pending: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_handoff: AtomicU64,
    last_stats: RwLock<Option<BatchStats>>,
    recent: RwLock<VecDeque<ChatPayload>>,
}

impl ChatRunner {
    pub fn new(
        session: ChatSession,
        completion: Arc<dyn CompletionSource>,
        sink: Arc<dyn ChatSink>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            session,
            completion,
            sink,
            settings: RwLock::new(settings.normalized()),
            transcript: RwLock::new(Transcript::new()),
            running: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            stop_signal: Notify::new(),
            pending: Mutex::new(HashMap::new()),
            next_handoff: AtomicU64::new(0),
            last_stats: RwLock::new(None),
            recent: RwLock::new(VecDeque::with_capacity(RECENT_WINDOW)),
        }
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.is_running() && self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Start the loop. Returns false when it was already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Chat runner started (run {})", epoch);

        let runner = Arc::clone(self);
        tokio::spawn(async move {
            runner.run_loop(epoch).await;
        });
        true
    }

    /// Stop the loop and cancel every hand-off that has not fired yet.
    /// Returns the number of cancelled hand-offs.
    pub async fn stop(&self) -> usize {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.stop_signal.notify_waiters();

        let mut pending = self.pending.lock().await;
        let cancelled = pending.len();
        for (_, handle) in pending.drain() {
            handle.abort();
        }
        if was_running || cancelled > 0 {
            info!("Chat runner stopped, {} pending batches cancelled", cancelled);
        }
        cancelled
    }

    async fn run_loop(self: Arc<Self>, epoch: u64) {
        while self.is_current(epoch) {
            self.tick(epoch).await;

            let stopped = self.stop_signal.notified();
            tokio::pin!(stopped);
            stopped.as_mut().enable();
            if !self.is_current(epoch) {
                break;
            }

            let delay = self.settings.read().await.call_delay_sec;
            if delay > 0.0 {
                let delay = Duration::try_from_secs_f64(delay).unwrap_or(Duration::MAX);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = &mut stopped => {}
                }
            } else {
                tokio::task::yield_now().await;
            }
        }
        debug!("Chat runner loop {} exited", epoch);
    }

    /// One request/parse/schedule cycle
    async fn tick(self: &Arc<Self>, epoch: u64) {
        let settings = self.settings.read().await.clone();
        let full_context = rand::rng().random_bool(FULL_CONTEXT_PROBABILITY);
        let prompt = self.transcript.read().await.build_prompt(full_context);

        let request = CompletionRequest::new(prompt, settings.temperature, settings.max_tokens);
        let raw = self.completion.complete(&request).await;

        if !self.is_current(epoch) {
            debug!("Discarding completion from superseded run {}", epoch);
            return;
        }

        let batch = self.session.parse_batch(&raw).await;
        debug!("Batch stats: {:?}", batch.stats);
        *self.last_stats.write().await = Some(batch.stats);
        if batch.is_empty() {
            return;
        }

        self.transcript.write().await.append_chat_block(&batch.transcript_block());
        let envelopes = self.session.envelopes_for(&batch.messages).await;

        if settings.randomize_delay {
            self.schedule_handoff(epoch, envelopes, settings.max_random_delay_sec * 1000).await;
        } else {
            self.deliver(&envelopes).await;
        }
    }

    /// Hand a batch to the sink after a uniform random delay in `[0, max_ms]`.
    ///
    /// The entry is inserted under the same lock the task must take to fire,
    /// so `stop` either aborts it or it has already removed itself.
    async fn schedule_handoff(self: &Arc<Self>, epoch: u64, envelopes: Vec<ChatEnvelope>, max_ms: u64) {
        let delay = Duration::from_millis(rand::rng().random_range(0..=max_ms));
        let id = self.next_handoff.fetch_add(1, Ordering::SeqCst);

        let mut pending = self.pending.lock().await;
        if !self.is_current(epoch) {
            return;
        }

        let runner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if runner.pending.lock().await.remove(&id).is_none() {
                return;
            }
            runner.deliver(&envelopes).await;
        });
        pending.insert(id, handle);
        debug!("Scheduled batch {} in {:?}", id, delay);
    }

    async fn deliver(&self, envelopes: &[ChatEnvelope]) {
        let delivered = self.sink.publish(envelopes).await;
        debug!("Published {} messages ({} viewer sends)", envelopes.len(), delivered);

        let mut recent = self.recent.write().await;
        for envelope in envelopes {
            if recent.len() == RECENT_WINDOW {
                recent.pop_front();
            }
            recent.push_back(envelope.payload().clone());
        }
    }

    pub async fn queued(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn settings(&self) -> RunnerSettings {
        self.settings.read().await.clone()
    }

    pub async fn set_call_delay(&self, sec: f64) {
        self.settings.write().await.set_call_delay(sec);
    }

    pub async fn set_randomized_delay(&self, enabled: bool) {
        self.settings.write().await.randomize_delay = enabled;
    }

    pub async fn set_max_random_delay(&self, sec: f64) {
        self.settings.write().await.set_max_random_delay(sec);
    }

    pub async fn set_force_username(&self, enabled: bool) {
        self.settings.write().await.force_username = enabled;
        self.session.set_force_username(enabled).await;
    }

    pub async fn set_temperature(&self, t: f64) {
        self.settings.write().await.set_temperature(t);
    }

    pub async fn set_max_tokens(&self, n: f64) {
        self.settings.write().await.set_max_tokens(n);
    }

    pub async fn apply(&self, update: SettingsUpdate) -> RunnerSettings {
        if let Some(sec) = update.call_delay_sec {
            self.set_call_delay(sec).await;
        }
        if let Some(enabled) = update.randomize_delay {
            self.set_randomized_delay(enabled).await;
        }
        if let Some(sec) = update.max_random_delay_sec {
            self.set_max_random_delay(sec).await;
        }
        if let Some(enabled) = update.force_username {
            self.set_force_username(enabled).await;
        }
        if let Some(t) = update.temperature {
            self.set_temperature(t).await;
        }
        if let Some(n) = update.max_tokens {
            self.set_max_tokens(n).await;
        }
        self.settings().await
    }

    /// Append free text (typically `STREAMER: ...` lines) to the transcript
    pub async fn append_to_transcript(&self, text: &str) {
        let text = text.trim_end();
        if text.is_empty() {
            return;
        }
        self.transcript.write().await.append(text);
    }

    pub async fn transcript(&self) -> String {
        self.transcript.read().await.as_str().to_string()
    }

    /// Fetch a channel's emotes and merge them into the index
    pub async fn add_channel(&self, fetcher: &EmoteFetcher, channel: &str) -> Vec<Emote> {
        let channel = channel.trim();
        if channel.is_empty() {
            warn!("Ignoring empty channel name");
            return Vec::new();
        }
        let emotes = fetcher.channel_emotes(channel).await;
        let added = self.session.merge_emotes(emotes.clone()).await;
        info!("Added {} emote entries from channel '{}'", added, channel);
        emotes
    }

    pub async fn status(&self) -> RunnerStatus {
        let last_stats = *self.last_stats.read().await;
        let recent: Vec<ChatPayload> = self.recent.read().await.iter().cloned().collect();
        RunnerStatus {
            running: self.is_running(),
            queued: self.queued().await,
            last_stats,
            settings: self.settings().await,
            mapped_usernames: self.session.mapped_usernames().await,
            emote_count: self.session.emote_count().await,
            recent,
            checked_at: chrono::Utc::now(),
        }
    }
}
