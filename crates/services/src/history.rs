//! Bounded undo stack.

use std::collections::VecDeque;

use shared::history::HistoryEntry;
use shared::AppError;

use crate::card_store::CardStore;

/// Snapshots kept before the oldest is dropped.
pub const HISTORY_CAPACITY: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct HistoryStack {
    entries: VecDeque<HistoryEntry>,
}

impl HistoryStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a deep copy of the board, evicting the oldest entry at capacity.
    ///
    /// A response still streaming is recorded as it was before the stream.
    pub fn snapshot(&mut self, label: impl Into<String>, store: &CardStore) {
        let entry = HistoryEntry::new(label, store.settled_cards(), store.theme().clone());
        tracing::debug!("snapshot \"{}\" ({} cards)", entry.label, entry.cards.len());
        if self.entries.len() == HISTORY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Restore the newest snapshot and return its label.
    ///
    /// Cards are always replaced. The theme is only rolled back while the live
    /// theme is unlocked, so a locked theme survives undo.
    pub fn undo(&mut self, store: &mut CardStore) -> Result<String, AppError> {
        let entry = self.entries.pop_back().ok_or(AppError::EmptyHistory)?;
        let theme = (!store.theme().locked).then_some(entry.theme);
        store.restore(entry.cards, theme);
        Ok(entry.label)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest first, newest last.
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }
}
