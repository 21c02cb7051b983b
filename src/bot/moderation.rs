// src/bot/moderation.rs - Content moderation and username anonymization for one chat line

use anyhow::{Context, Result};
use log::debug;
use regex::{Captures, Regex};
use std::collections::HashSet;

use crate::bot::emotes::EmoteIndex;
use crate::bot::identity::{ColorTable, IdentityMapper};
use crate::config::ModerationConfig;
use crate::types::ChatMessage;

/// Outcome of sanitizing one raw line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(ChatMessage),
    /// Contained a banned token; the whole line is dropped
    Banned,
    /// No `speaker:` header
    Unparseable,
    /// Nothing but emotes (or nothing at all) once brackets were removed
    EmptyAfterStrip,
}

/// Mutable anonymization state threaded through every call
#[derive(Debug, Clone, Default)]
pub struct ModerationState {
    pub identity: IdentityMapper,
    pub colors: ColorTable,
    /// Map speakers and mentions through the identity mapper
    pub force_username: bool,
}

impl ModerationState {
    pub fn new(identity: IdentityMapper, colors: ColorTable, force_username: bool) -> Self {
        Self {
            identity,
            colors,
            force_username,
        }
    }
}

/// Compiled word lists and patterns. Immutable once built.
#[derive(Debug, Clone)]
pub struct ModerationRules {
    banned_terms: HashSet<String>,
    streamer_names: HashSet<String>,
    mention_exclude: HashSet<String>,
    canonical_mention: String,
    display_name: String,
    header_re: Regex,
    mention_re: Regex,
    bracket_re: Regex,
    emote_re: Regex,
    unterminated_re: Regex,
}

impl ModerationRules {
    pub fn new(config: &ModerationConfig) -> Result<Self> {
        Ok(Self {
            banned_terms: lowercase_set(&config.banned_terms),
            streamer_names: lowercase_set(&config.streamer_names),
            mention_exclude: config
                .mention_exclude
                .iter()
                .map(|m| m.trim_start_matches('@').to_lowercase())
                .collect(),
            canonical_mention: config.canonical_mention.trim().to_string(),
            display_name: config.display_name.trim().to_string(),
            header_re: Regex::new(r"^([^:]+):\s*(.*)$").context("header pattern")?,
            mention_re: Regex::new(r"@([A-Za-z0-9_]+)").context("mention pattern")?,
            bracket_re: Regex::new(r"\[[^\]]+\]").context("bracket pattern")?,
            emote_re: Regex::new(r"\[([^\]]+)\]").context("emote pattern")?,
            unterminated_re: Regex::new(r"\[[^\]]*$").context("unterminated bracket pattern")?,
        })
    }

    pub fn is_banned_term(&self, token: &str) -> bool {
        self.banned_terms.contains(&token.to_lowercase())
    }

    pub fn is_streamer(&self, name: &str) -> bool {
        self.streamer_names.contains(&name.trim().to_lowercase())
    }

    pub fn canonical_mention(&self) -> String {
        format!("@{}", self.canonical_mention)
    }

    /// Turn one trimmed, non-empty line into at most one chat message
    pub fn sanitize(&self, line: &str, state: &mut ModerationState, emotes: &EmoteIndex) -> Verdict {
        let Some(caps) = self.header_re.captures(line) else {
            debug!("No speaker header: {}", line);
            return Verdict::Unparseable;
        };
        let speaker = caps.get(1).map_or("", |m| m.as_str()).trim();
        let original = caps.get(2).map_or("", |m| m.as_str());

        if self.contains_banned(original) {
            debug!("Dropping line from '{}' with banned term", speaker);
            return Verdict::Banned;
        }

        let username = if speaker.is_empty() {
            None
        } else if state.force_username && !self.is_streamer(speaker) {
            Some(state.identity.resolve(speaker))
        } else {
            Some(speaker.to_string())
        };

        let mut content = self.replace_streamer_mentions(original);
        if state.force_username {
            content = self.replace_other_mentions(&content, &mut state.identity);
        }
        content = self.replace_streamer_names(&content);
        content = self.strip_unknown_emotes(&content, emotes);

        if self.bracket_re.replace_all(&content, " ").trim().is_empty() {
            return Verdict::EmptyAfterStrip;
        }

        if let Some(name) = &username {
            state.colors.ensure(name);
        }

        Verdict::Accepted(ChatMessage::new(username, content))
    }

    fn contains_banned(&self, content: &str) -> bool {
        content.split(' ').any(|tok| self.is_banned_term(tok))
    }

    /// `@streamer` -> canonical mention, regardless of anonymization
    fn replace_streamer_mentions(&self, text: &str) -> String {
        let canonical = self.canonical_mention();
        self.mention_re
            .replace_all(text, |caps: &Captures| {
                if self.streamer_names.contains(&caps[1].to_lowercase()) {
                    canonical.clone()
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned()
    }

    fn replace_other_mentions(&self, text: &str, identity: &mut IdentityMapper) -> String {
        let canonical = self.canonical_mention.to_lowercase();
        self.mention_re
            .replace_all(text, |caps: &Captures| {
                let raw = &caps[1];
                let norm = raw.to_lowercase();
                if norm == canonical
                    || self.streamer_names.contains(&norm)
                    || self.mention_exclude.contains(&norm)
                {
                    return caps[0].to_string();
                }
                format!("@{}", identity.resolve(raw))
            })
            .into_owned()
    }

    /// Bare streamer names outside `[...]` become the display word, upper-cased
    /// when the non-bracketed text is all caps. Bracketed spans pass through.
    fn replace_streamer_names(&self, content: &str) -> String {
        let outside = self.bracket_re.replace_all(content, "");
        let shouting = outside.chars().any(|c| c.is_ascii_alphabetic()) && outside == outside.to_uppercase();
        let replacement = if shouting {
            self.display_name.to_uppercase()
        } else {
            self.display_name.clone()
        };

        let mut result = String::with_capacity(content.len());
        let mut last = 0;
        for span in self.bracket_re.find_iter(content) {
            result.push_str(&self.replace_name_tokens(&content[last..span.start()], &replacement));
            result.push_str(span.as_str());
            last = span.end();
        }
        result.push_str(&self.replace_name_tokens(&content[last..], &replacement));
        result
    }

    fn replace_name_tokens(&self, segment: &str, replacement: &str) -> String {
        if segment.is_empty() {
            return String::new();
        }
        segment
            .split(' ')
            .map(|tok| {
                if self.streamer_names.contains(&tok.to_lowercase()) {
                    replacement
                } else {
                    tok
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Drop a dangling `[` tail and every `[name]` the emote index does not know
    fn strip_unknown_emotes(&self, text: &str, emotes: &EmoteIndex) -> String {
        let trimmed = self.unterminated_re.replace(text, "");
        self.emote_re
            .replace_all(&trimmed, |caps: &Captures| {
                if emotes.is_known(&caps[1]) {
                    caps[0].to_string()
                } else {
                    String::new()
                }
            })
            .into_owned()
    }
}

fn lowercase_set(items: &[String]) -> HashSet<String> {
    items.iter().map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()).collect()
}
