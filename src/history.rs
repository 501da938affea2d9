//! Conversation history
//!
//! An append-only, capped sequence of completed turns. When a store is
//! attached, every append and clear is written through to SQLite as a single
//! JSON document under a fixed key.

use std::collections::VecDeque;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{DbPool, KvStore};
use crate::{Error, Result};

/// Storage key for the persisted history
pub const HISTORY_KEY: &str = "dastyar_robin_history";

/// Default number of turns retained
pub const DEFAULT_MAX_TURNS: usize = 50;

/// One completed exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    #[serde(rename = "user", default)]
    pub user_text: String,
    #[serde(rename = "robin", default)]
    pub reply_text: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ChatTurn {
    /// A turn stamped with the current time
    #[must_use]
    pub fn new(user_text: impl Into<String>, reply_text: impl Into<String>) -> Self {
        Self {
            user_text: user_text.into(),
            reply_text: reply_text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// SQLite-backed history document
#[derive(Debug, Clone)]
pub struct HistoryStore {
    kv: KvStore,
    key: String,
}

impl HistoryStore {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self::with_key(pool, HISTORY_KEY)
    }

    #[must_use]
    pub fn with_key(pool: DbPool, key: impl Into<String>) -> Self {
        Self {
            kv: KvStore::new(pool),
            key: key.into(),
        }
    }

    /// Load the stored turns. Unparsable data loads as empty.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be read
    pub fn load(&self) -> Result<Vec<ChatTurn>> {
        let Some(raw) = self.kv.get(&self.key)? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str(&raw) {
            Ok(turns) => Ok(turns),
            Err(e) => {
                tracing::warn!(error = %e, key = %self.key, "stored history is corrupt, starting empty");
                Ok(Vec::new())
            }
        }
    }

    /// Replace the stored turns
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the write fails
    pub fn save<'a>(&self, turns: impl IntoIterator<Item = &'a ChatTurn>) -> Result<()> {
        let turns: Vec<&ChatTurn> = turns.into_iter().collect();
        let raw = serde_json::to_string(&turns)?;
        self.kv.set(&self.key, &raw)
    }

    /// Delete the stored turns
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails
    pub fn clear(&self) -> Result<()> {
        self.kv.delete(&self.key)?;
        Ok(())
    }
}

/// Capped, ordered turn history
#[derive(Debug)]
pub struct ConversationHistory {
    turns: VecDeque<ChatTurn>,
    max_turns: usize,
    store: Option<HistoryStore>,
}

impl ConversationHistory {
    /// In-memory history retaining at most `max_turns`
    #[must_use]
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns: max_turns.max(1),
            store: None,
        }
    }

    /// History backed by `store`, loaded immediately
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    pub fn with_store(store: HistoryStore, max_turns: usize) -> Result<Self> {
        let mut history = Self::new(max_turns);
        history.turns = store.load()?.into();
        history.truncate();
        history.store = Some(store);

        tracing::debug!(turns = history.turns.len(), "history loaded");
        Ok(history)
    }

    /// Append a turn, evicting the oldest beyond the cap, and persist.
    ///
    /// The in-memory append happens even if persisting fails.
    ///
    /// # Errors
    ///
    /// Returns error if the store write fails
    pub fn append(&mut self, turn: ChatTurn) -> Result<()> {
        self.turns.push_back(turn);
        self.truncate();
        self.persist()
    }

    /// Remove all turns, in memory and in the store
    ///
    /// # Errors
    ///
    /// Returns error if the store delete fails
    pub fn clear(&mut self) -> Result<()> {
        self.turns.clear();
        match &self.store {
            Some(store) => store.clear(),
            None => Ok(()),
        }
    }

    /// Snapshot of the turns, oldest first
    #[must_use]
    pub fn turns(&self) -> Vec<ChatTurn> {
        self.turns.iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[must_use]
    pub const fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Write the history to `path` as pretty JSON
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn export(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.turns)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), turns = self.turns.len(), "history exported");
        Ok(())
    }

    /// Replace the history with the turns in `path`
    ///
    /// Missing fields are tolerated. Returns the number of turns kept.
    ///
    /// # Errors
    ///
    /// Returns error if the file is unreadable or not a JSON array of turns
    pub fn import(&mut self, path: &Path) -> Result<usize> {
        let raw = std::fs::read_to_string(path)?;
        let turns: Vec<ChatTurn> = serde_json::from_str(&raw)
            .map_err(|e| Error::History(format!("invalid history file: {e}")))?;

        self.turns = turns.into();
        self.truncate();
        self.persist()?;

        tracing::info!(path = %path.display(), turns = self.turns.len(), "history imported");
        Ok(self.turns.len())
    }

    fn truncate(&mut self) {
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    fn persist(&self) -> Result<()> {
        match &self.store {
            Some(store) => store.save(&self.turns),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::db::init_memory;

    #[test]
    fn turn_serializes_with_short_keys() {
        let turn = ChatTurn::new("سلام", "سلام! چطور کمک کنم؟");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["user"], "سلام");
        assert_eq!(json["robin"], "سلام! چطور کمک کنم؟");
        assert!(json["timestamp"].is_string());

        let back: ChatTurn = serde_json::from_value(json).unwrap();
        assert_eq!(back, turn);
    }

    #[test]
    fn missing_fields_get_defaults() {
        let turn: ChatTurn = serde_json::from_str(r#"{"user": "x"}"#).unwrap();
        assert_eq!(turn.user_text, "x");
        assert_eq!(turn.reply_text, "");
    }

    #[test]
    fn append_persists_and_reloads() {
        let pool = init_memory().unwrap();
        let mut history = ConversationHistory::with_store(HistoryStore::new(pool.clone()), 50).unwrap();
        history.append(ChatTurn::new("a", "b")).unwrap();
        history.append(ChatTurn::new("c", "d")).unwrap();

        let reloaded = ConversationHistory::with_store(HistoryStore::new(pool), 50).unwrap();
        let users: Vec<String> = reloaded.turns().into_iter().map(|t| t.user_text).collect();
        assert_eq!(users, vec!["a", "c"]);
    }

    #[test]
    fn clear_removes_stored_turns() {
        let pool = init_memory().unwrap();
        let store = HistoryStore::new(pool);
        let mut history = ConversationHistory::with_store(store.clone(), 50).unwrap();
        history.append(ChatTurn::new("a", "b")).unwrap();
        history.clear().unwrap();

        assert!(history.is_empty());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn corrupt_store_loads_empty() {
        let pool = init_memory().unwrap();
        KvStore::new(pool.clone()).set(HISTORY_KEY, "not json").unwrap();

        let history = ConversationHistory::with_store(HistoryStore::new(pool), 50).unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn export_then_import() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        let mut source = ConversationHistory::new(10);
        source.append(ChatTurn::new("q1", "a1")).unwrap();
        source.append(ChatTurn::new("q2", "a2")).unwrap();
        source.export(&path).unwrap();

        let mut target = ConversationHistory::new(1);
        assert_eq!(target.import(&path).unwrap(), 1);
        assert_eq!(target.turns()[0].user_text, "q2");
    }

    #[test]
    fn import_rejects_non_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"user": "x"}"#).unwrap();

        let mut history = ConversationHistory::new(10);
        assert!(matches!(history.import(&path), Err(Error::History(_))));
    }

    proptest! {
        #[test]
        fn cap_keeps_most_recent_in_order(max in 1usize..20, n in 0usize..60) {
            let pool = init_memory().unwrap();
            let store = HistoryStore::new(pool);
            let mut history = ConversationHistory::with_store(store.clone(), max).unwrap();

            for i in 0..n {
                history.append(ChatTurn::new(i.to_string(), String::new())).unwrap();
            }

            let expected: Vec<String> = (n.saturating_sub(max)..n).map(|i| i.to_string()).collect();
            let persisted: Vec<String> = store.load().unwrap().into_iter().map(|t| t.user_text).collect();
            let in_memory: Vec<String> = history.turns().into_iter().map(|t| t.user_text).collect();

            prop_assert_eq!(&in_memory, &expected);
            if n > 0 {
                prop_assert_eq!(&persisted, &expected);
            }
        }
    }
}
