use log::debug;

use crate::bot::emotes::EmoteIndex;
use crate::bot::moderation::{ModerationRules, ModerationState, Verdict};
use crate::types::{BatchStats, ChatMessage};

/// Accepted messages of one blob, in input order, plus how every line fared
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedBatch {
    pub messages: Vec<ChatMessage>,
    pub stats: BatchStats,
}

impl ParsedBatch {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The block appended to the raw transcript for this batch
    pub fn transcript_block(&self) -> String {
        self.messages
            .iter()
            .map(ChatMessage::transcript_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Candidate lines of a blob: split on line breaks, trimmed, blanks removed
pub fn candidate_lines(raw: &str) -> impl Iterator<Item = &str> {
    raw.split('\n').map(str::trim).filter(|l| !l.is_empty())
}

pub fn parse_batch(
    raw: &str,
    rules: &ModerationRules,
    state: &mut ModerationState,
    emotes: &EmoteIndex,
) -> ParsedBatch {
    let mut batch = ParsedBatch::default();

    for line in candidate_lines(raw) {
        batch.stats.total += 1;
        match rules.sanitize(line, state, emotes) {
            Verdict::Accepted(message) => {
                batch.stats.accepted += 1;
                batch.messages.push(message);
            }
            Verdict::Banned => batch.stats.banned += 1,
            Verdict::Unparseable => batch.stats.no_colon += 1,
            Verdict::EmptyAfterStrip => batch.stats.dropped_empty += 1,
        }
    }

    debug!(
        "Parsed batch: total={} accepted={} banned={} noColon={} droppedEmpty={}",
        batch.stats.total,
        batch.stats.accepted,
        batch.stats.banned,
        batch.stats.no_colon,
        batch.stats.dropped_empty
    );
    batch
}
