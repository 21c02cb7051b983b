use serde::Serialize;
use std::collections::HashMap;

use crate::types::{Emote, EmoteSource};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmoteEntry {
    pub url: String,
    pub source: EmoteSource,
}

/// Emote name (and its lowercase form) to image location.
#[derive(Debug, Clone, Default)]
pub struct EmoteIndex {
    entries: HashMap<String, EmoteEntry>,
}

impl EmoteIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_emotes<I: IntoIterator<Item = Emote>>(emotes: I) -> Self {
        let mut index = Self::new();
        index.extend(emotes);
        index
    }

    /// Merge emotes, registering both the exact and the lowercase name.
    /// Later entries overwrite earlier ones with the same key.
    pub fn extend<I: IntoIterator<Item = Emote>>(&mut self, emotes: I) -> usize {
        let mut added = 0;
        for emote in emotes {
            if emote.name.is_empty() || emote.url.is_empty() {
                continue;
            }
            let entry = EmoteEntry {
                url: emote.url,
                source: emote.source,
            };
            let lower = emote.name.to_lowercase();
            if lower != emote.name {
                self.entries.insert(lower, entry.clone());
            }
            self.entries.insert(emote.name, entry);
            added += 1;
        }
        added
    }

    /// A bracketed name is known if it matches exactly or by its lowercase form
    pub fn is_known(&self, name: &str) -> bool {
        self.entries.contains_key(name) || self.entries.contains_key(&name.to_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<&EmoteEntry> {
        self.entries
            .get(name)
            .or_else(|| self.entries.get(&name.to_lowercase()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emote(name: &str) -> Emote {
        Emote {
            name: name.to_string(),
            url: format!("https://cdn.example/{}", name),
            source: EmoteSource::Bttv,
        }
    }

    #[test]
    fn test_lookup_is_case_folded() {
        let index = EmoteIndex::from_emotes(vec![emote("PepeHands")]);

        assert!(index.is_known("PepeHands"));
        assert!(index.is_known("pepehands"));
        assert!(index.is_known("PEPEHANDS"));
        assert!(!index.is_known("Kappa"));
    }

    #[test]
    fn test_entries_without_url_are_skipped() {
        let mut index = EmoteIndex::new();
        let added = index.extend(vec![
            Emote { name: "Blank".to_string(), url: String::new(), source: EmoteSource::Twitch },
            emote("Kappa"),
        ]);

        assert_eq!(added, 1);
        assert!(!index.is_known("Blank"));
        assert_eq!(index.get("kappa").map(|e| e.source), Some(EmoteSource::Bttv));
    }
}
