use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::platforms::LiveChatSource;
use crate::types::LiveChatEvent;

pub const TWITCH_IRC_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const SHUTDOWN_POLL: Duration = Duration::from_secs(1);

/// Split an IRCv3 tag block (without the leading `@`) into key/value pairs
pub fn parse_tags(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter_map(|tag| {
            let (key, value) = tag.split_once('=').unwrap_or((tag, ""));
            if key.is_empty() {
                None
            } else {
                Some((key.to_string(), unescape_tag_value(value)))
            }
        })
        .collect()
}

fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => out.push(' '),
            Some(':') => out.push(';'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Parse one IRC line into a live chat event; anything but PRIVMSG is ignored.
///
/// Format: `@tags :login!login@login.tmi.twitch.tv PRIVMSG #channel :text`
pub fn parse_privmsg(line: &str) -> Option<LiveChatEvent> {
    let line = line.trim_end_matches(['\r', '\n']);

    let (tags, rest) = match line.strip_prefix('@') {
        Some(tagged) => {
            let (raw_tags, rest) = tagged.split_once(' ')?;
            (parse_tags(raw_tags), rest)
        }
        None => (HashMap::new(), line),
    };

    let (prefix, command) = rest.strip_prefix(':')?.split_once(' ')?;
    let target = command.strip_prefix("PRIVMSG ")?;
    let (channel, text) = target.split_once(" :")?;

    let login = prefix.split('!').next().unwrap_or("");
    let username = tags
        .get("display-name")
        .filter(|name| !name.is_empty())
        .cloned()
        .or_else(|| (!login.is_empty()).then(|| login.to_string()));
    let color = tags.get("color").filter(|c| !c.is_empty()).cloned();

    // /me messages arrive wrapped in CTCP ACTION
    let text = text
        .strip_prefix("\u{1}ACTION ")
        .and_then(|t| t.strip_suffix('\u{1}'))
        .unwrap_or(text);

    Some(LiveChatEvent {
        channel: channel.trim_start_matches('#').to_string(),
        username,
        color,
        text: text.to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// Reads chat from a set of channels and fans events out on a broadcast channel
pub struct TwitchChatReader {
    channels: Vec<String>,
    nick: String,
    sender: broadcast::Sender<LiveChatEvent>,
    connected: AtomicBool,
    shutdown: AtomicBool,
}

impl TwitchChatReader {
    pub fn new(channels: Vec<String>) -> Self {
        let channels = channels
            .into_iter()
            .map(|c| c.trim().trim_start_matches('#').to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        let nick = format!("justinfan{}", rand::rng().random_range(10000..100000));
        let (sender, _) = broadcast::channel(1000);
        Self {
            channels,
            nick,
            sender,
            connected: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        }
    }

    fn handle_line(&self, line: &str) {
        if let Some(event) = parse_privmsg(line) {
            debug!("#{} {:?}: {}", event.channel, event.username, event.text);
            // no subscribers is fine
            let _ = self.sender.send(event);
        }
    }

    async fn connect_and_read(&self) -> Result<()> {
        let url = Url::parse(TWITCH_IRC_URL).context("Failed to parse Twitch WebSocket URL")?;
        let (ws_stream, _) = connect_async(url)
            .await
            .context("Failed to connect to Twitch WebSocket")?;
        let (mut write, mut read) = ws_stream.split();

        write
            .send(Message::Text("CAP REQ :twitch.tv/tags twitch.tv/commands\r\n".to_string()))
            .await
            .context("Failed to request capabilities")?;
        write
            .send(Message::Text(format!("NICK {}\r\n", self.nick)))
            .await
            .context("Failed to send NICK command")?;
        for channel in &self.channels {
            write
                .send(Message::Text(format!("JOIN #{}\r\n", channel)))
                .await
                .with_context(|| format!("Failed to join channel: {}", channel))?;
            info!("Joined channel: #{}", channel);
        }
        self.connected.store(true, Ordering::SeqCst);

        while !self.shutdown.load(Ordering::SeqCst) {
            let frame = tokio::select! {
                frame = read.next() => frame,
                _ = tokio::time::sleep(SHUTDOWN_POLL) => continue,
            };

            match frame {
                Some(Ok(Message::Text(text))) => {
                    for line in text.split("\r\n").filter(|l| !l.is_empty()) {
                        if line.starts_with("PING") {
                            write
                                .send(Message::Text(format!("{}\r\n", line.replacen("PING", "PONG", 1))))
                                .await
                                .context("Failed to send PONG")?;
                        } else {
                            self.handle_line(line);
                        }
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    write.send(Message::Pong(payload)).await.context("Failed to send pong")?;
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("Twitch closed the connection: {:?}", frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(e).context("Twitch WebSocket error");
                }
                None => {
                    warn!("Twitch stream ended");
                    break;
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        let _ = write.close().await;
        Ok(())
    }
}

#[async_trait]
impl LiveChatSource for TwitchChatReader {
    fn platform_name(&self) -> &str {
        "twitch"
    }

    fn channels(&self) -> Vec<String> {
        self.channels.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<LiveChatEvent> {
        self.sender.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn run(&self) {
        if self.channels.is_empty() {
            info!("No Twitch channels configured, live chat disabled");
            return;
        }
        info!("Reading Twitch chat as {} in {} channels", self.nick, self.channels.len());

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.connect_and_read().await {
                Ok(()) => info!("Twitch connection closed"),
                Err(e) => error!("Twitch connection failed: {:#}", e),
            }
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
        info!("Twitch reader stopped");
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_privmsg() {
        let line = "@badge-info=;badges=;color=#FF4500;display-name=Alice;emotes=;mod=0 \
                    :alice!alice@alice.tmi.twitch.tv PRIVMSG #ludwig :hello world\r\n";
        let event = parse_privmsg(line).unwrap();

        assert_eq!(event.channel, "ludwig");
        assert_eq!(event.username.as_deref(), Some("Alice"));
        assert_eq!(event.text, "hello world");
        assert_eq!(event.username_class(), "text-[#FF4500]");
    }

    #[test]
    fn test_login_used_without_display_name() {
        let line = "@color=;display-name= :bob!bob@bob.tmi.twitch.tv PRIVMSG #deme :a: b :c";
        let event = parse_privmsg(line).unwrap();

        assert_eq!(event.username.as_deref(), Some("bob"));
        assert_eq!(event.text, "a: b :c");
        assert_eq!(event.username_class(), "");
    }

    #[test]
    fn test_action_message_unwrapped() {
        let line = ":carol!carol@carol.tmi.twitch.tv PRIVMSG #deme :\u{1}ACTION waves\u{1}";
        assert_eq!(parse_privmsg(line).unwrap().text, "waves");
    }

    #[test]
    fn test_non_privmsg_ignored() {
        assert!(parse_privmsg("PING :tmi.twitch.tv").is_none());
        assert!(parse_privmsg(":tmi.twitch.tv 001 justinfan123 :Welcome, GLHF!").is_none());
        assert!(parse_privmsg("@room-id=1 :tmi.twitch.tv ROOMSTATE #deme").is_none());
    }

    #[test]
    fn test_tag_unescaping() {
        let tags = parse_tags("display-name=A\\sB;system-msg=x\\:y;flag");
        assert_eq!(tags["display-name"], "A B");
        assert_eq!(tags["system-msg"], "x;y");
        assert_eq!(tags["flag"], "");
    }

    #[test]
    fn test_channels_normalized() {
        let reader = TwitchChatReader::new(vec!["#Ludwig".to_string(), " ".to_string(), "deme".to_string()]);
        assert_eq!(reader.channels(), vec!["ludwig", "deme"]);
        assert!(reader.nick.starts_with("justinfan"));
        assert!(!reader.is_connected());
    }

    #[tokio::test]
    async fn test_run_without_channels_returns() {
        let reader = TwitchChatReader::new(Vec::new());
        reader.run().await;
        assert!(!reader.is_connected());
    }

    #[tokio::test]
    async fn test_parsed_lines_reach_subscribers() {
        let reader = TwitchChatReader::new(vec!["deme".to_string()]);
        let mut rx = reader.subscribe();
        reader.handle_line(":dave!dave@dave.tmi.twitch.tv PRIVMSG #deme :pog");
        reader.handle_line("PING :tmi.twitch.tv");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.username.as_deref(), Some("dave"));
        assert!(rx.try_recv().is_err());
    }
}
