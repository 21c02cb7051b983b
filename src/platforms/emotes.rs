use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::config::TwitchSettings;
use crate::types::{Emote, EmoteSource};

const TWITCH_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
const TWITCH_API: &str = "https://api.twitch.tv/helix";
const BTTV_API: &str = "https://api.betterttv.net/3/cached";
const BTTV_CDN: &str = "https://cdn.betterttv.net/emote";
const SEVENTV_API: &str = "https://api.7tv.app/v3";

/// Preferred 7TV file variants, best first
const SEVENTV_FILE_ORDER: [&str; 6] = ["2x.webp", "2x.avif", "1x.webp", "1x.avif", "2x.gif", "1x.gif"];

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct TwitchList<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TwitchUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TwitchEmote {
    name: String,
    images: TwitchImages,
}

#[derive(Debug, Deserialize)]
struct TwitchImages {
    url_1x: Option<String>,
    url_2x: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BttvEmote {
    id: String,
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BttvChannel {
    #[serde(default)]
    channel_emotes: Vec<BttvEmote>,
    #[serde(default)]
    shared_emotes: Vec<BttvEmote>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SevenTvFile {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SevenTvHost {
    pub url: String,
    #[serde(default)]
    pub files: Vec<SevenTvFile>,
}

#[derive(Debug, Deserialize)]
struct SevenTvEmoteData {
    host: SevenTvHost,
}

#[derive(Debug, Deserialize)]
struct SevenTvEmote {
    name: String,
    data: SevenTvEmoteData,
}

#[derive(Debug, Deserialize)]
struct SevenTvSet {
    #[serde(default)]
    emotes: Option<Vec<SevenTvEmote>>,
}

#[derive(Debug, Deserialize)]
struct SevenTvUser {
    emote_set: Option<SevenTvSet>,
}

struct AppToken {
    token: String,
    expires_at: Instant,
}

/// Pick the best available 7TV file, falling back to `2x.webp`
pub fn best_seventv_url(host: &SevenTvHost) -> String {
    let name = SEVENTV_FILE_ORDER
        .iter()
        .find(|wanted| host.files.iter().any(|f| f.name == **wanted))
        .copied()
        .unwrap_or("2x.webp");
    format!("https:{}/{}", host.url, name)
}

/// Merge provider lists by name; earlier lists win (Twitch > BTTV > 7TV)
pub fn dedupe_by_priority(lists: Vec<Vec<Emote>>) -> Vec<Emote> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for list in lists {
        for emote in list {
            if seen.insert(emote.name.clone()) {
                merged.push(emote);
            }
        }
    }
    merged
}

fn bttv_emote(e: BttvEmote) -> Emote {
    Emote {
        url: format!("{}/{}/2x", BTTV_CDN, e.id),
        name: e.code,
        source: EmoteSource::Bttv,
    }
}

fn seventv_emote(e: SevenTvEmote) -> Emote {
    Emote {
        url: best_seventv_url(&e.data.host),
        name: e.name,
        source: EmoteSource::SevenTv,
    }
}

/// Every provider failure degrades to an empty list plus a log line
pub struct EmoteFetcher {
    http: reqwest::Client,
    client_id: Option<String>,
    client_secret: Option<String>,
    token: RwLock<Option<AppToken>>,
}

impl EmoteFetcher {
    pub fn new(settings: &TwitchSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build emote HTTP client")?;
        if settings.client_id.is_none() || settings.client_secret.is_none() {
            warn!("Twitch client credentials missing, Twitch emotes will be skipped");
        }
        Ok(Self {
            http,
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            token: RwLock::new(None),
        })
    }

    pub async fn global_emotes(&self) -> Vec<Emote> {
        let (twitch, bttv, seventv) = tokio::join!(
            self.twitch_emotes(format!("{}/chat/emotes/global", TWITCH_API)),
            self.bttv_global(),
            self.seventv_global(),
        );
        let merged = dedupe_by_priority(vec![twitch, bttv, seventv]);
        info!("Fetched {} global emotes", merged.len());
        merged
    }

    pub async fn channel_emotes(&self, login: &str) -> Vec<Emote> {
        let Some(id) = self.twitch_user_id(login).await else {
            warn!("Could not resolve Twitch id for '{}'", login);
            return Vec::new();
        };
        let (twitch, bttv, seventv) = tokio::join!(
            self.twitch_emotes(format!(
                "{}/chat/emotes?broadcaster_id={}",
                TWITCH_API,
                urlencoding::encode(&id)
            )),
            self.bttv_channel(&id),
            self.seventv_channel(&id),
        );
        let merged = dedupe_by_priority(vec![twitch, bttv, seventv]);
        info!("Fetched {} emotes for channel '{}'", merged.len(), login);
        merged
    }

    async fn get_json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request.send().await.context("request failed")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("status {}", status));
        }
        response.json::<T>().await.context("invalid response body")
    }

    async fn app_token(&self) -> Option<String> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.expires_at > Instant::now() + Duration::from_secs(60) {
                return Some(token.token.clone());
            }
        }

        let (client_id, client_secret) = (self.client_id.as_ref()?, self.client_secret.as_ref()?);
        let url = format!(
            "{}?client_id={}&client_secret={}&grant_type=client_credentials",
            TWITCH_TOKEN_URL,
            urlencoding::encode(client_id),
            urlencoding::encode(client_secret)
        );
        match self.get_json::<TokenResponse>(self.http.post(&url)).await {
            Ok(response) => {
                let lifetime = Duration::from_secs(response.expires_in.saturating_sub(60));
                let token = response.access_token;
                *self.token.write().await = Some(AppToken {
                    token: token.clone(),
                    expires_at: Instant::now() + lifetime,
                });
                debug!("Refreshed Twitch app token");
                Some(token)
            }
            Err(e) => {
                error!("Twitch token request failed: {:#}", e);
                None
            }
        }
    }

    async fn twitch_request(&self, url: &str) -> Option<reqwest::RequestBuilder> {
        let token = self.app_token().await?;
        let client_id = self.client_id.as_ref()?;
        Some(self.http.get(url).header("Client-ID", client_id).bearer_auth(token))
    }

    async fn twitch_user_id(&self, login: &str) -> Option<String> {
        let url = format!("{}/users?login={}", TWITCH_API, urlencoding::encode(login));
        let request = self.twitch_request(&url).await?;
        match self.get_json::<TwitchList<TwitchUser>>(request).await {
            Ok(list) => list.data.into_iter().next().map(|u| u.id),
            Err(e) => {
                warn!("Twitch user lookup for '{}' failed: {:#}", login, e);
                None
            }
        }
    }

    async fn twitch_emotes(&self, url: String) -> Vec<Emote> {
        let Some(request) = self.twitch_request(&url).await else {
            return Vec::new();
        };
        match self.get_json::<TwitchList<TwitchEmote>>(request).await {
            Ok(list) => list
                .data
                .into_iter()
                .filter_map(|e| {
                    let url = e.images.url_2x.or(e.images.url_1x)?;
                    Some(Emote { name: e.name, url, source: EmoteSource::Twitch })
                })
                .collect(),
            Err(e) => {
                warn!("Twitch emote fetch failed: {:#}", e);
                Vec::new()
            }
        }
    }

    async fn bttv_global(&self) -> Vec<Emote> {
        let request = self.http.get(format!("{}/emotes/global", BTTV_API));
        match self.get_json::<Vec<BttvEmote>>(request).await {
            Ok(list) => list.into_iter().map(bttv_emote).collect(),
            Err(e) => {
                warn!("BTTV global fetch failed: {:#}", e);
                Vec::new()
            }
        }
    }

    async fn bttv_channel(&self, twitch_id: &str) -> Vec<Emote> {
        let request = self
            .http
            .get(format!("{}/users/twitch/{}", BTTV_API, urlencoding::encode(twitch_id)));
        match self.get_json::<BttvChannel>(request).await {
            Ok(channel) => channel
                .channel_emotes
                .into_iter()
                .chain(channel.shared_emotes)
                .map(bttv_emote)
                .collect(),
            Err(e) => {
                warn!("BTTV channel fetch failed: {:#}", e);
                Vec::new()
            }
        }
    }

    async fn seventv_global(&self) -> Vec<Emote> {
        let request = self.http.get(format!("{}/emote-sets/global", SEVENTV_API));
        match self.get_json::<SevenTvSet>(request).await {
            Ok(set) => {
                let emotes = set.emotes.unwrap_or_default();
                if emotes.is_empty() {
                    warn!("7TV global returned an empty set");
                }
                emotes.into_iter().map(seventv_emote).collect()
            }
            Err(e) => {
                error!("7TV global fetch failed: {:#}", e);
                Vec::new()
            }
        }
    }

    async fn seventv_channel(&self, twitch_id: &str) -> Vec<Emote> {
        let request = self
            .http
            .get(format!("{}/users/twitch/{}", SEVENTV_API, urlencoding::encode(twitch_id)));
        match self.get_json::<SevenTvUser>(request).await {
            Ok(user) => {
                let emotes = user.emote_set.and_then(|s| s.emotes).unwrap_or_default();
                if emotes.is_empty() {
                    warn!("7TV channel {} has no emotes", twitch_id);
                }
                emotes.into_iter().map(seventv_emote).collect()
            }
            Err(e) => {
                error!("7TV channel fetch failed: {:#}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emote(name: &str, source: EmoteSource) -> Emote {
        Emote { name: name.to_string(), url: format!("https://x/{}", name), source }
    }

    #[test]
    fn test_dedupe_prefers_earlier_providers() {
        let merged = dedupe_by_priority(vec![
            vec![emote("Kappa", EmoteSource::Twitch)],
            vec![emote("Kappa", EmoteSource::Bttv), emote("catJAM", EmoteSource::Bttv)],
            vec![emote("catJAM", EmoteSource::SevenTv), emote("EZ", EmoteSource::SevenTv)],
        ]);

        let summary: Vec<_> = merged.iter().map(|e| (e.name.as_str(), e.source)).collect();
        assert_eq!(
            summary,
            vec![
                ("Kappa", EmoteSource::Twitch),
                ("catJAM", EmoteSource::Bttv),
                ("EZ", EmoteSource::SevenTv),
            ]
        );
    }

    #[test]
    fn test_seventv_file_preference() {
        let host = SevenTvHost {
            url: "//cdn.7tv.app/emote/abc".to_string(),
            files: vec![
                SevenTvFile { name: "1x.gif".to_string() },
                SevenTvFile { name: "1x.webp".to_string() },
            ],
        };
        assert_eq!(best_seventv_url(&host), "https://cdn.7tv.app/emote/abc/1x.webp");

        let bare = SevenTvHost { url: "//cdn.7tv.app/emote/abc".to_string(), files: Vec::new() };
        assert_eq!(best_seventv_url(&bare), "https://cdn.7tv.app/emote/abc/2x.webp");
    }

    #[test]
    fn test_bttv_channel_shape() {
        let channel: BttvChannel = serde_json::from_str(
            r#"{"channelEmotes":[{"id":"1","code":"monkaS"}],"sharedEmotes":[{"id":"2","code":"catJAM"}]}"#,
        )
        .unwrap();
        let emotes: Vec<Emote> = channel
            .channel_emotes
            .into_iter()
            .chain(channel.shared_emotes)
            .map(bttv_emote)
            .collect();
        assert_eq!(emotes[0].url, "https://cdn.betterttv.net/emote/1/2x");
        assert_eq!(emotes[1].name, "catJAM");
    }

    #[test]
    fn test_seventv_user_without_set() {
        let user: SevenTvUser = serde_json::from_str(r#"{"emote_set":null}"#).unwrap();
        assert!(user.emote_set.and_then(|s| s.emotes).is_none());
    }

    #[tokio::test]
    async fn test_missing_credentials_skip_twitch() {
        let fetcher = EmoteFetcher::new(&TwitchSettings::default()).unwrap();
        assert!(fetcher.app_token().await.is_none());
        assert!(fetcher.twitch_emotes(format!("{}/chat/emotes/global", TWITCH_API)).await.is_empty());
    }
}
