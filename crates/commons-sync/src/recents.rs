use serde::{Deserialize, Serialize};

/// Most recently used reaction emoji, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentReactions {
    max: usize,
    emojis: Vec<String>,
}

impl RecentReactions {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            emojis: Vec::new(),
        }
    }

    /// Move `emoji` to the front, dropping the oldest beyond capacity.
    pub fn touch(&mut self, emoji: &str) {
        self.emojis.retain(|e| e != emoji);
        self.emojis.insert(0, emoji.to_string());
        self.emojis.truncate(self.max);
    }

    /// The first `n` entries, for the quick-reaction bar.
    pub fn quick(&self, n: usize) -> &[String] {
        &self.emojis[..n.min(self.emojis.len())]
    }

    pub fn all(&self) -> &[String] {
        &self.emojis
    }
}
