//! Append-only transcript of the conversation.
//!
//! Two producers write here: finalized local utterances and inbound
//! `agent_text` messages. Both go through [`TranscriptLog::append`], so the
//! log order is the true arrival order across producers. Entries are never
//! mutated, merged, deduplicated, or reordered after append.

use std::sync::{Arc, Mutex};

use serde::Serialize;

/// One transcript line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub speaker: String,
    pub text: String,
}

/// Shared, append-only ordered sequence of transcript entries.
#[derive(Debug, Clone, Default)]
pub struct TranscriptLog {
    entries: Arc<Mutex<Vec<TranscriptEntry>>>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry at the tail of the log.
    pub fn append(&self, speaker: impl Into<String>, text: impl Into<String>) {
        let entry = TranscriptEntry {
            speaker: speaker.into(),
            text: text.into(),
        };
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
    }

    /// Snapshot of the log in insertion order.
    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
