//! Events emitted by the core for the presentation layer to render.

use serde::{Deserialize, Serialize};

use crate::card::CardId;
use crate::settings::CardView;
use crate::theme::Theme;

/// Terminal state of one request/stream/finalize cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeOutcome {
    /// Stream ended and directives were applied
    Finalized,
    /// Cancelled by the user; not an error
    Aborted,
    /// Transport failure
    Failed { error: String },
}

impl ExchangeOutcome {
    pub fn is_finalized(&self) -> bool {
        matches!(self, ExchangeOutcome::Finalized)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppEvent {
    /// Short user-facing notice (toast)
    Notice(String),
    CardCreated {
        id: CardId,
    },
    CardUpdated {
        id: CardId,
    },
    CardsRemoved {
        ids: Vec<CardId>,
    },
    /// Cards were replaced wholesale (undo, import, clear)
    BoardReplaced,
    StreamStarted {
        id: CardId,
    },
    /// New visible projection of a streaming response
    StreamDelta {
        id: CardId,
        visible: String,
        /// Whether the card is open in the focus view
        focused: bool,
    },
    ExchangeFinished {
        id: CardId,
        outcome: ExchangeOutcome,
    },
    ThemeChanged {
        theme: Theme,
    },
    ViewChanged {
        view: CardView,
    },
    SelectionChanged {
        selected: Vec<CardId>,
    },
    /// Hand a response to the speech collaborator
    SpeakRequested {
        id: CardId,
        text: String,
    },
}

impl AppEvent {
    pub fn notice(message: impl Into<String>) -> Self {
        AppEvent::Notice(message.into())
    }

    /// The card an event is about, if any.
    pub fn card_id(&self) -> Option<&CardId> {
        match self {
            AppEvent::CardCreated { id }
            | AppEvent::CardUpdated { id }
            | AppEvent::StreamStarted { id }
            | AppEvent::StreamDelta { id, .. }
            | AppEvent::ExchangeFinished { id, .. }
            | AppEvent::SpeakRequested { id, .. } => Some(id),
            _ => None,
        }
    }
}
