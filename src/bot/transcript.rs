// src/bot/transcript.rs

/// Prefix marking lines spoken by the human streamer
pub const STREAMER_MARKER: &str = "STREAMER:";
/// Prefix of generated chat blocks and the prompt tail
pub const CHAT_MARKER: &str = "CHAT:";
/// Lines of recent context included when the prompt carries full history
pub const CONTEXT_LINES: usize = 50;
/// Chance a prompt carries the full recent transcript instead of streamer lines only
pub const FULL_CONTEXT_PROBABILITY: f64 = 0.3;

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    raw: String,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Append arbitrary text (e.g. `STREAMER: ...` lines) as a new line
    pub fn append(&mut self, text: &str) {
        if !self.raw.is_empty() {
            self.raw.push('\n');
        }
        self.raw.push_str(text);
    }

    /// Append an accepted batch as one `CHAT: ...` block
    pub fn append_chat_block(&mut self, block: &str) {
        self.append(&format!("{} {}", CHAT_MARKER, block));
    }

    /// Prompt for the next completion. With `full_context` the last lines of
    /// the transcript are included, otherwise only streamer lines.
    pub fn build_prompt(&self, full_context: bool) -> String {
        let lines: Vec<&str> = if self.raw.is_empty() {
            Vec::new()
        } else if full_context {
            let all: Vec<&str> = self.raw.split('\n').collect();
            let start = all.len().saturating_sub(CONTEXT_LINES);
            all[start..].iter().copied().filter(|l| !l.is_empty()).collect()
        } else {
            self.raw.split('\n').filter(|l| l.starts_with(STREAMER_MARKER)).collect()
        };

        if lines.is_empty() {
            CHAT_MARKER.to_string()
        } else {
            format!("{}\n{}", lines.join("\n"), CHAT_MARKER)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_transcript_prompt() {
        let transcript = Transcript::new();
        assert_eq!(transcript.build_prompt(true), "CHAT:");
        assert_eq!(transcript.build_prompt(false), "CHAT:");
    }

    #[test]
    fn test_chat_block_format() {
        let mut transcript = Transcript::new();
        transcript.append_chat_block("alpha: one\nbeta: two");
        transcript.append("STREAMER: hello chat");
        assert_eq!(transcript.as_str(), "CHAT: alpha: one\nbeta: two\nSTREAMER: hello chat");
    }

    #[test]
    fn test_streamer_only_prompt() {
        let mut transcript = Transcript::new();
        transcript.append("STREAMER: first");
        transcript.append_chat_block("alpha: noise");
        transcript.append("STREAMER: second");

        assert_eq!(transcript.build_prompt(false), "STREAMER: first\nSTREAMER: second\nCHAT:");
    }

    #[test]
    fn test_full_context_is_capped() {
        let mut transcript = Transcript::new();
        for i in 0..80 {
            transcript.append(&format!("line {}", i));
        }

        let prompt = transcript.build_prompt(true);
        let lines: Vec<&str> = prompt.lines().collect();
        assert_eq!(lines.len(), CONTEXT_LINES + 1);
        assert_eq!(lines[0], "line 30");
        assert_eq!(lines[CONTEXT_LINES], "CHAT:");
    }
}
