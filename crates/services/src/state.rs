//! The whole mutable application state and its named, undoable operations.
//!
//! Every operation that changes cards or theme in a way the user may want to
//! take back snapshots first, then mutates, then persists. Validation happens
//! before the snapshot so a failed operation leaves history untouched.

use std::path::Path;

use shared::card::{CardId, StyleOverrides};
use shared::settings::{CardView, Settings};
use shared::theme::ThemeMode;
use shared::AppError;

use crate::card_store::CardStore;
use crate::history::HistoryStack;
use crate::persistence::{self, ImportDocument, PersistedState, StateFile};

#[derive(Debug)]
pub struct AppState {
    pub store: CardStore,
    pub history: HistoryStack,
    pub settings: Settings,
    pub session_id: String,
    /// Card open in the focus (full-screen) view
    pub focused: Option<CardId>,
    storage: Option<StateFile>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::from_persisted(PersistedState::default(), None)
    }
}

impl AppState {
    /// State that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `file` and persist back to it on every commit.
    pub fn load(file: StateFile) -> Self {
        let persisted = file.load();
        tracing::info!(
            "loaded {} cards from {}",
            persisted.cards.len(),
            file.path().display()
        );
        Self::from_persisted(persisted, Some(file))
    }

    fn from_persisted(persisted: PersistedState, storage: Option<StateFile>) -> Self {
        Self {
            store: CardStore::new(persisted.cards, persisted.theme),
            history: HistoryStack::new(),
            settings: persisted.settings,
            session_id: persisted.session_id,
            focused: None,
            storage,
        }
    }

    pub fn to_persisted(&self) -> PersistedState {
        PersistedState {
            cards: self.store.cards().to_vec(),
            theme: self.store.theme().clone(),
            settings: self.settings.clone(),
            session_id: self.session_id.clone(),
        }
    }

    /// Persist the current state. Failures are logged; the in-memory state stays authoritative.
    pub fn commit(&self) {
        let Some(file) = &self.storage else { return };
        if let Err(e) = file.save(&self.to_persisted()) {
            tracing::warn!("failed to save state: {:#}", e);
        }
    }

    fn require(&self, id: &CardId) -> Result<(), AppError> {
        if self.store.contains(id) {
            Ok(())
        } else {
            Err(AppError::CardNotFound { id: id.clone() })
        }
    }

    fn prune_focus(&mut self) {
        if let Some(id) = &self.focused {
            if !self.store.contains(id) {
                self.focused = None;
            }
        }
    }

    // ── Undoable card operations ─────────────────────────────────────

    /// Manual edit of a card's request and/or response.
    pub fn edit_card(&mut self, id: &CardId, q: Option<&str>, r: Option<&str>) -> Result<(), AppError> {
        self.require(id)?;
        self.history.snapshot("Manual Edit", &self.store);
        self.store.update_card(id, q, r)?;
        self.commit();
        Ok(())
    }

    pub fn delete_card(&mut self, id: &CardId) -> Result<(), AppError> {
        self.require(id)?;
        self.history.snapshot("Delete Card", &self.store);
        self.store.delete_card(id)?;
        self.prune_focus();
        self.commit();
        Ok(())
    }

    /// Delete every selected card. Returns the removed ids.
    pub fn bulk_delete(&mut self) -> Result<Vec<CardId>, AppError> {
        let ids = self.store.selected_ids().to_vec();
        if ids.is_empty() {
            return Err(AppError::NotEnoughCards { needed: 1, got: 0 });
        }
        self.history.snapshot("Bulk Delete", &self.store);
        let removed = self.store.bulk_delete(&ids);
        self.store.clear_selection();
        self.prune_focus();
        self.commit();
        Ok(removed)
    }

    pub fn clear_all(&mut self) -> Vec<CardId> {
        self.history.snapshot("Clear All", &self.store);
        let removed = self.store.clear_all();
        self.focused = None;
        self.commit();
        removed
    }

    /// User style editor. The editor may also lock or unlock the card.
    pub fn set_card_style(&mut self, id: &CardId, styles: &StyleOverrides) -> Result<(), AppError> {
        self.require(id)?;
        self.history.snapshot("Style Change", &self.store);
        self.store.set_card_style(id, styles)?;
        self.commit();
        Ok(())
    }

    /// Flip between the light and dark palettes. Returns the new mode.
    pub fn toggle_theme_mode(&mut self) -> ThemeMode {
        self.history.snapshot("Theme Mode", &self.store);
        let mode = match self.store.theme().mode() {
            ThemeMode::Dark => ThemeMode::Light,
            ThemeMode::Light => ThemeMode::Dark,
        };
        self.store.set_theme_mode(mode);
        self.commit();
        mode
    }

    pub fn undo(&mut self) -> Result<String, AppError> {
        let label = self.history.undo(&mut self.store)?;
        self.prune_focus();
        self.commit();
        Ok(label)
    }

    // ── Non-undoable toggles ─────────────────────────────────────────

    /// Returns whether the theme is now locked.
    pub fn toggle_theme_lock(&mut self) -> bool {
        let locked = !self.store.theme().locked;
        self.store.set_theme_locked(locked);
        self.commit();
        locked
    }

    pub fn set_view(&mut self, view: CardView) {
        self.settings.view = view;
        self.commit();
    }

    pub fn cycle_view(&mut self) -> CardView {
        let view = self.settings.view.next();
        self.set_view(view);
        view
    }

    pub fn toggle_tts(&mut self) -> bool {
        self.settings.auto_tts = !self.settings.auto_tts;
        self.commit();
        self.settings.auto_tts
    }

    pub fn toggle_asr(&mut self) -> bool {
        self.settings.asr_enabled = !self.settings.asr_enabled;
        self.commit();
        self.settings.asr_enabled
    }

    /// Empty input resets to the configured default endpoint.
    pub fn set_proxy_url(&mut self, url: &str) {
        self.settings.proxy_url = url.trim().to_string();
        self.commit();
    }

    pub fn focus(&mut self, id: Option<&CardId>) -> Result<(), AppError> {
        if let Some(id) = id {
            self.require(id)?;
        }
        self.focused = id.cloned();
        Ok(())
    }

    pub fn is_focused(&self, id: &CardId) -> bool {
        self.focused.as_ref() == Some(id)
    }

    // ── Import / export ──────────────────────────────────────────────

    /// Replace state from an import document, snapshotting first.
    pub fn import(&mut self, doc: ImportDocument) {
        self.history.snapshot("Pre-Import Backup", &self.store);
        let cards = doc.cards.unwrap_or_default();
        self.store.restore(cards, doc.theme);
        if let Some(settings) = doc.settings {
            self.settings = settings;
        }
        if let Some(session_id) = doc.session_id {
            self.session_id = session_id;
        }
        self.prune_focus();
        self.commit();
    }

    /// Parse `json` and import it. Invalid input leaves everything untouched.
    pub fn import_json(&mut self, json: &str) -> Result<(), AppError> {
        let doc = ImportDocument::parse(json)?;
        self.import(doc);
        Ok(())
    }

    pub fn import_from(&mut self, path: &Path) -> Result<(), AppError> {
        let doc = persistence::read_import(path)?;
        self.import(doc);
        Ok(())
    }

    pub fn export_to(&self, path: &Path) -> Result<(), AppError> {
        persistence::export(path, &self.to_persisted()).map_err(|e| AppError::storage(format!("{:#}", e)))
    }
}
