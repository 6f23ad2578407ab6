//! Board state: the card store, undo history and the on-disk state file.

pub mod card_store;
pub mod history;
pub mod persistence;
pub mod state;

pub use card_store::CardStore;
pub use history::{HistoryStack, HISTORY_CAPACITY};
pub use persistence::{ImportDocument, PersistedState, StateFile};
pub use state::AppState;
