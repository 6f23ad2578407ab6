//! Error kinds surfaced to the user. None of them is fatal to the process.

use crate::card::CardId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    /// Non-success response or network failure while talking to the proxy
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Nothing to undo")]
    EmptyHistory,

    #[error("Invalid import file: {reason}")]
    MalformedImport { reason: String },

    #[error("Card not found: {id}")]
    CardNotFound { id: CardId },

    #[error("Card {id} is locked")]
    CardLocked { id: CardId },

    #[error("Global theme is locked")]
    ThemeLocked,

    /// A second submission while one exchange is still streaming
    #[error("A response is already streaming into card {id}")]
    ExchangeInFlight { id: CardId },

    #[error("Need at least {needed} cards, got {got}")]
    NotEnoughCards { needed: usize, got: usize },

    #[error("Storage error: {0}")]
    Storage(String),

    /// A user-supplied setting failed validation
    #[error("Invalid setting: {message}")]
    InvalidSetting { message: String },
}

impl AppError {
    pub fn transport(message: impl Into<String>) -> Self {
        AppError::Transport {
            message: message.into(),
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        AppError::Storage(err.to_string())
    }
}
