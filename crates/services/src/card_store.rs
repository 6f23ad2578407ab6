//! The card board: cards, the global theme, the selection set and the
//! single pending-stream slot.
//!
//! Lock policy lives here and nowhere else: every directive-originated
//! mutation (`apply_style_update`, `apply_theme_update`) checks the lock
//! before touching any field and reports whether it applied.

use shared::card::{Card, CardId, StyleOverrides};
use shared::theme::{Theme, ThemeMode, ThemeUpdate};
use shared::AppError;

#[derive(Debug, Clone, Default)]
pub struct CardStore {
    cards: Vec<Card>,
    theme: Theme,
    /// Ordered set of ids marked for batch operations
    selected: Vec<CardId>,
    /// Card currently receiving a streamed response
    streaming_id: Option<CardId>,
    /// That card as it was before the stream began; `None` for a new card
    streaming_origin: Option<Card>,
}

impl CardStore {
    /// Build a store from loaded data, dropping cards with duplicate ids.
    pub fn new(cards: Vec<Card>, theme: Theme) -> Self {
        let mut store = Self {
            cards: Vec::with_capacity(cards.len()),
            theme,
            selected: Vec::new(),
            streaming_id: None,
            streaming_origin: None,
        };
        store.set_cards(cards);
        store
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn card(&self, id: &CardId) -> Option<&Card> {
        self.cards.iter().find(|c| &c.id == id)
    }

    pub fn contains(&self, id: &CardId) -> bool {
        self.card(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    fn card_mut(&mut self, id: &CardId) -> Result<&mut Card, AppError> {
        self.cards
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| AppError::CardNotFound { id: id.clone() })
    }

    // ── Cards ────────────────────────────────────────────────────────

    pub fn create_card(
        &mut self,
        q: impl Into<String>,
        r: impl Into<String>,
        styles: StyleOverrides,
    ) -> CardId {
        let card = Card::new(q, r, styles);
        let id = card.id.clone();
        self.cards.push(card);
        id
    }

    /// Replace the request and/or response text in place.
    pub fn update_card(
        &mut self,
        id: &CardId,
        q: Option<&str>,
        r: Option<&str>,
    ) -> Result<(), AppError> {
        let card = self.card_mut(id)?;
        if let Some(q) = q {
            card.q = q.to_string();
        }
        if let Some(r) = r {
            card.r = r.to_string();
        }
        Ok(())
    }

    /// Remove a card. Clears the pending slot and selection entry with it.
    pub fn delete_card(&mut self, id: &CardId) -> Result<Card, AppError> {
        let pos = self
            .cards
            .iter()
            .position(|c| &c.id == id)
            .ok_or_else(|| AppError::CardNotFound { id: id.clone() })?;
        let card = self.cards.remove(pos);
        self.forget(id);
        Ok(card)
    }

    /// Delete every listed card that exists; returns the ids actually removed.
    pub fn bulk_delete(&mut self, ids: &[CardId]) -> Vec<CardId> {
        ids.iter()
            .filter_map(|id| self.delete_card(id).ok().map(|card| card.id))
            .collect()
    }

    pub fn clear_all(&mut self) -> Vec<CardId> {
        let ids: Vec<CardId> = self.cards.drain(..).map(|c| c.id).collect();
        self.selected.clear();
        self.streaming_id = None;
        self.streaming_origin = None;
        ids
    }

    /// Create one new card standing for the merge of `ids` and clear the selection.
    pub fn merge_cards(
        &mut self,
        ids: &[CardId],
        q: impl Into<String>,
        r: impl Into<String>,
    ) -> Result<CardId, AppError> {
        if ids.len() < 2 {
            return Err(AppError::NotEnoughCards {
                needed: 2,
                got: ids.len(),
            });
        }
        if let Some(missing) = ids.iter().find(|id| !self.contains(id)) {
            return Err(AppError::CardNotFound {
                id: missing.clone(),
            });
        }
        let id = self.create_card(q, r, StyleOverrides::default());
        self.selected.clear();
        Ok(id)
    }

    // ── Styles and theme ─────────────────────────────────────────────

    /// Merge a directive-originated style update. Returns `false` and leaves the
    /// card untouched when it is locked or missing.
    pub fn apply_style_update(&mut self, id: &CardId, update: &StyleOverrides) -> bool {
        let Ok(card) = self.card_mut(id) else {
            return false;
        };
        if card.styles.locked {
            tracing::debug!("style update rejected: card {} is locked", id);
            return false;
        }
        card.styles.merge(update);
        true
    }

    /// Merge a directive-originated theme update unless the theme is locked.
    pub fn apply_theme_update(&mut self, update: &ThemeUpdate) -> bool {
        if self.theme.locked {
            tracing::debug!("theme update rejected: theme is locked");
            return false;
        }
        self.theme.merge(update);
        true
    }

    /// User style editor: overlay the given properties and set the lock as chosen.
    pub fn set_card_style(&mut self, id: &CardId, styles: &StyleOverrides) -> Result<(), AppError> {
        let card = self.card_mut(id)?;
        card.styles.merge(styles);
        card.styles.locked = styles.locked;
        Ok(())
    }

    pub fn set_card_locked(&mut self, id: &CardId, locked: bool) -> Result<(), AppError> {
        self.card_mut(id)?.styles.locked = locked;
        Ok(())
    }

    pub fn set_theme_locked(&mut self, locked: bool) {
        self.theme.locked = locked;
    }

    /// Explicit user choice of light or dark surfaces; not subject to the lock.
    pub fn set_theme_mode(&mut self, mode: ThemeMode) {
        self.theme.apply_mode(mode);
    }

    // ── Selection ────────────────────────────────────────────────────

    pub fn selected_ids(&self) -> &[CardId] {
        &self.selected
    }

    pub fn is_selected(&self, id: &CardId) -> bool {
        self.selected.contains(id)
    }

    /// Flip selection of a card; returns whether it is now selected.
    pub fn toggle_select(&mut self, id: &CardId) -> Result<bool, AppError> {
        if !self.contains(id) {
            return Err(AppError::CardNotFound { id: id.clone() });
        }
        if let Some(pos) = self.selected.iter().position(|s| s == id) {
            self.selected.remove(pos);
            Ok(false)
        } else {
            self.selected.push(id.clone());
            Ok(true)
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    // ── Pending stream slot ──────────────────────────────────────────

    pub fn streaming_id(&self) -> Option<&CardId> {
        self.streaming_id.as_ref()
    }

    pub fn is_streaming(&self, id: &CardId) -> bool {
        self.streaming_id.as_ref() == Some(id)
    }

    /// Claim the single pending slot for a card created for this stream.
    pub fn begin_streaming(&mut self, id: &CardId) -> Result<(), AppError> {
        self.claim(id, None)
    }

    /// Claim the slot for an existing card whose response is streamed over.
    /// Snapshots keep showing the card as it is now until the stream ends.
    pub fn begin_continuation(&mut self, id: &CardId) -> Result<(), AppError> {
        let origin = self
            .card(id)
            .cloned()
            .ok_or_else(|| AppError::CardNotFound { id: id.clone() })?;
        self.claim(id, Some(origin))
    }

    fn claim(&mut self, id: &CardId, origin: Option<Card>) -> Result<(), AppError> {
        if let Some(active) = &self.streaming_id {
            return Err(AppError::ExchangeInFlight { id: active.clone() });
        }
        if !self.contains(id) {
            return Err(AppError::CardNotFound { id: id.clone() });
        }
        self.streaming_id = Some(id.clone());
        self.streaming_origin = origin;
        Ok(())
    }

    /// Release the slot if `id` still holds it.
    pub fn finish_streaming(&mut self, id: &CardId) -> bool {
        if self.is_streaming(id) {
            self.streaming_id = None;
            self.streaming_origin = None;
            true
        } else {
            false
        }
    }

    /// Cards as history should record them: a half-streamed response is
    /// never captured. A new pending card is left out, a continued card
    /// appears as it was before its stream began.
    pub fn settled_cards(&self) -> Vec<Card> {
        let Some(streaming) = &self.streaming_id else {
            return self.cards.clone();
        };
        self.cards
            .iter()
            .filter_map(|card| {
                if &card.id != streaming {
                    Some(card.clone())
                } else {
                    self.streaming_origin.clone()
                }
            })
            .collect()
    }

    // ── Wholesale replacement ────────────────────────────────────────

    /// Replace every card (undo, import). The theme is only replaced when given.
    ///
    /// A card that is receiving a stream survives the replacement in its live
    /// form, so restoring never cuts off a running exchange.
    pub fn restore(&mut self, cards: Vec<Card>, theme: Option<Theme>) {
        let live = self
            .streaming_id
            .as_ref()
            .and_then(|id| self.card(id))
            .cloned();
        self.set_cards(cards);
        if let Some(live) = live {
            match self.cards.iter_mut().find(|c| c.id == live.id) {
                Some(slot) => *slot = live,
                None => self.cards.push(live),
            }
        }
        if let Some(theme) = theme {
            self.theme = theme;
        }
        let cards = &self.cards;
        self.selected.retain(|id| cards.iter().any(|c| &c.id == id));
    }

    fn set_cards(&mut self, cards: Vec<Card>) {
        self.cards.clear();
        for card in cards {
            if self.contains(&card.id) {
                tracing::warn!("dropping card with duplicate id {}", card.id);
                continue;
            }
            self.cards.push(card);
        }
    }

    fn forget(&mut self, id: &CardId) {
        self.selected.retain(|s| s != id);
        if self.is_streaming(id) {
            self.streaming_id = None;
            self.streaming_origin = None;
        }
    }
}
