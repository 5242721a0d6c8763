//! Context summaries handed over by the agent when it compacts.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One stored summary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSummary {
    /// Summary text.
    pub summary: String,
    /// Context size before compaction, when the agent reported it.
    pub tokens_before: Option<u64>,
    /// When it was stored.
    pub recorded_at: DateTime<Utc>,
}

/// Bounded history of summaries, newest last.
#[derive(Debug)]
pub struct ContextStore {
    history: Mutex<VecDeque<ContextSummary>>,
    capacity: usize,
}

impl ContextStore {
    /// Keep at most `capacity` summaries.
    pub fn new(capacity: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Store a summary, evicting the oldest past capacity.
    pub fn record(&self, summary: String, tokens_before: Option<u64>) -> ContextSummary {
        let entry = ContextSummary {
            summary,
            tokens_before,
            recorded_at: Utc::now(),
        };
        let mut history = self.history.lock();
        if history.len() == self.capacity {
            let _ = history.pop_front();
        }
        history.push_back(entry.clone());
        entry
    }

    /// Most recent summary.
    pub fn latest(&self) -> Option<ContextSummary> {
        self.history.lock().back().cloned()
    }

    /// All stored summaries, oldest first.
    pub fn history(&self) -> Vec<ContextSummary> {
        self.history.lock().iter().cloned().collect()
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_latest_within_capacity() {
        let store = ContextStore::new(2);
        assert!(store.latest().is_none());
        let _ = store.record("one".into(), None);
        let _ = store.record("two".into(), Some(120_000));
        let _ = store.record("three".into(), None);

        let texts: Vec<String> = store.history().into_iter().map(|s| s.summary).collect();
        assert_eq!(texts, vec!["two", "three"]);
        assert_eq!(store.latest().unwrap().summary, "three");
    }
}
