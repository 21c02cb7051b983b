// src/config/mod.rs - Application configuration: YAML file, env overrides, validation

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Default location of the optional YAML configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/chatsim.yaml";

/// Validation failures for a loaded configuration
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("canonical mention must not be empty")]
    EmptyCanonicalMention,
    #[error("streamer display name must not be empty")]
    EmptyDisplayName,
    #[error("{field} must be a non-zero port")]
    InvalidPort { field: &'static str },
    #[error("invalid completion url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub relay: RelayConfig,
    pub web: WebConfig,
    pub log_dir: PathBuf,
    pub usernames_file: PathBuf,
    pub completion: CompletionConfig,
    pub twitch: TwitchSettings,
    pub moderation: ModerationConfig,
    pub runner: RunnerSettings,
    /// Start the producer loop as soon as the service is up
    pub autostart: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            web: WebConfig::default(),
            log_dir: PathBuf::from("logs"),
            usernames_file: PathBuf::from("valid_usernames.txt"),
            completion: CompletionConfig::default(),
            twitch: TwitchSettings::default(),
            moderation: ModerationConfig::default(),
            runner: RunnerSettings::default(),
            autostart: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5005/v1/completions".to_string(),
            api_key: None,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TwitchSettings {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Live chat channels to read and rebroadcast
    pub channels: Vec<String>,
    /// Channels whose emotes are merged into the index at startup
    pub emote_channels: Vec<String>,
}

impl Default for TwitchSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            channels: Vec::new(),
            emote_channels: strings(&[
                "deme", "ludwig", "shxtou", "dougdoug", "porcelainmaid", "jamsvirtual", "merryweather",
            ]),
        }
    }
}

/// Word lists and canonical names used by the moderation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    pub banned_terms: Vec<String>,
    pub streamer_names: Vec<String>,
    /// Mentions (without '@') that are never anonymized
    pub mention_exclude: Vec<String>,
    /// Handle every streamer mention is rewritten to, without '@'
    pub canonical_mention: String,
    /// Word bare streamer names are rewritten to
    pub display_name: String,
    pub palette: Vec<String>,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            banned_terms: strings(&[
                "racism", "sexism", "sex", "rape", "hate", "terror", "terrorist", "alt right",
                "leftist", "white supremacist", "kys", "kill yourself", "keep yourself safe",
                "suicide", "self harm", "hate speech", "rape culture", "transphobia", "homophobic",
                "transphobic", "homophobe", "transphobe", "nazi", "nazism", "nuga",
            ]),
            streamer_names: strings(&[
                "deme", "ludwig", "shxtou", "shoto", "lud", "joeyzerotv", "merryweather",
                "jamsvirtual", "porcelainmaid", "dougdoug",
            ]),
            mention_exclude: Vec::new(),
            canonical_mention: "JoeyZeroTV".to_string(),
            display_name: "Joey".to_string(),
            palette: strings(&[
                "text-red-600", "text-orange-600", "text-amber-600", "text-yellow-600",
                "text-lime-600", "text-green-600", "text-emerald-600", "text-teal-600",
                "text-cyan-600", "text-sky-600", "text-blue-600", "text-indigo-600",
                "text-violet-600", "text-purple-600", "text-fuchsia-600", "text-pink-600",
                "text-rose-600",
            ]),
        }
    }
}

/// Tunables of the producer loop. Setters clamp to the accepted ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunnerSettings {
    pub call_delay_sec: f64,
    pub randomize_delay: bool,
    pub max_random_delay_sec: u64,
    pub force_username: bool,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            call_delay_sec: 0.5,
            randomize_delay: true,
            max_random_delay_sec: 5,
            force_username: true,
            temperature: 1.0,
            max_tokens: 60,
        }
    }
}

impl RunnerSettings {
    pub const MAX_RANDOM_DELAY_CAP_SEC: u64 = 60;
    pub const MAX_CALL_DELAY_SEC: f64 = 3600.0;

    pub fn set_call_delay(&mut self, sec: f64) {
        let sec = if sec.is_finite() { sec } else { 0.0 };
        self.call_delay_sec = sec.clamp(0.0, Self::MAX_CALL_DELAY_SEC);
    }

    pub fn set_max_random_delay(&mut self, sec: f64) {
        let sec = if sec.is_finite() { sec.floor() } else { 0.0 };
        self.max_random_delay_sec = sec.clamp(0.0, Self::MAX_RANDOM_DELAY_CAP_SEC as f64) as u64;
    }

    pub fn set_temperature(&mut self, t: f64) {
        let t = if t.is_finite() { t } else { 1.0 };
        self.temperature = t.clamp(0.0, 2.0);
    }

    pub fn set_max_tokens(&mut self, n: f64) {
        let n = if n.is_finite() { n.floor() } else { 60.0 };
        self.max_tokens = n.clamp(5.0, 200.0) as u32;
    }

    /// Re-apply every clamp, used after deserializing untrusted values
    pub fn normalized(mut self) -> Self {
        let (delay, max_delay, temperature, tokens) = (
            self.call_delay_sec,
            self.max_random_delay_sec as f64,
            self.temperature,
            self.max_tokens as f64,
        );
        self.set_call_delay(delay);
        self.set_max_random_delay(max_delay);
        self.set_temperature(temperature);
        self.set_max_tokens(tokens);
        self
    }
}

impl AppConfig {
    /// Load from the YAML file when present, then apply env overrides and validate
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let parsed: AppConfig = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config: {}", path.display()))?;
            info!("Loaded configuration from {}", path.display());
            parsed
        } else {
            info!("No config file at {}, using defaults", path.display());
            AppConfig::default()
        };

        config.apply_env_overrides();
        config.runner = config.runner.normalized();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| env::var(key).ok());
    }

    /// Apply overrides from any key lookup; unparsable values are ignored with a warning
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = lookup("WS_PORT").or_else(|| lookup("NEXT_PUBLIC_WS_PORT"));
        if let Some(port) = port {
            match port.trim().parse() {
                Ok(p) => self.relay.port = p,
                Err(_) => warn!("Ignoring invalid relay port '{}'", port),
            }
        }

        if let Some(port) = lookup("WEB_PORT") {
            match port.trim().parse() {
                Ok(p) => self.web.port = p,
                Err(_) => warn!("Ignoring invalid web port '{}'", port),
            }
        }

        if let Some(dir) = lookup("LOG_DIR").filter(|s| !s.trim().is_empty()) {
            self.log_dir = PathBuf::from(dir);
        }

        if let Some(file) = lookup("USERNAMES_FILE").filter(|s| !s.trim().is_empty()) {
            self.usernames_file = PathBuf::from(file);
        }

        if let Some(url) = lookup("LLM_URL").filter(|s| !s.trim().is_empty()) {
            self.completion.url = url;
        }

        if let Some(key) = lookup("LLM_API_KEY").filter(|s| !s.is_empty()) {
            self.completion.api_key = Some(key);
        }

        if let Some(id) = lookup("TWITCH_CLIENT_ID").filter(|s| !s.is_empty()) {
            self.twitch.client_id = Some(id);
        }

        if let Some(secret) = lookup("TWITCH_CLIENT_SECRET").filter(|s| !s.is_empty()) {
            self.twitch.client_secret = Some(secret);
        }

        if let Some(channels) = lookup("TWITCH_CHANNELS") {
            self.twitch.channels = split_list(&channels);
            debug!("Live chat channels from env: {:?}", self.twitch.channels);
        }

        if let Some(flag) = lookup("CHATSIM_AUTOSTART") {
            self.autostart = matches!(flag.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.moderation.canonical_mention.trim().is_empty() {
            return Err(ConfigError::EmptyCanonicalMention);
        }
        if self.moderation.display_name.trim().is_empty() {
            return Err(ConfigError::EmptyDisplayName);
        }
        if self.relay.port == 0 {
            return Err(ConfigError::InvalidPort { field: "relay.port" });
        }
        if self.web.enabled && self.web.port == 0 {
            return Err(ConfigError::InvalidPort { field: "web.port" });
        }
        if let Err(e) = url::Url::parse(&self.completion.url) {
            return Err(ConfigError::InvalidUrl {
                url: self.completion.url.clone(),
                reason: e.to_string(),
            });
        }
        if self.moderation.palette.is_empty() {
            warn!("Color palette is empty, every username will use the fallback color");
        }
        Ok(())
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.log_dir.join("usernames.log")
    }

    pub fn relay_addr(&self) -> String {
        format!("{}:{}", self.relay.host, self.relay.port)
    }
}

/// Split a replacement username list: one name per line, blanks ignored
pub fn parse_username_list(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

/// Read the replacement username list; a missing or unreadable file yields an empty list
pub async fn load_usernames<P: AsRef<Path>>(path: P) -> Vec<String> {
    let path = path.as_ref();
    match fs::read_to_string(path).await {
        Ok(raw) => {
            let names = parse_username_list(&raw);
            info!("Loaded {} replacement usernames from {}", names.len(), path.display());
            names
        }
        Err(e) => {
            warn!("Could not read username list {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
