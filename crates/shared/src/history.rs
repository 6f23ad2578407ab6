//! Undo snapshot type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::card::Card;
use crate::theme::Theme;

/// Immutable copy of the board taken before (or after) a mutating operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Deep copy of every card at snapshot time
    pub cards: Vec<Card>,
    pub theme: Theme,
    pub timestamp: DateTime<Utc>,
    /// What the snapshot was taken for, e.g. "Add Card"
    pub label: String,
}

impl HistoryEntry {
    pub fn new(label: impl Into<String>, cards: Vec<Card>, theme: Theme) -> Self {
        Self {
            cards,
            theme,
            timestamp: Utc::now(),
            label: label.into(),
        }
    }

    /// Format relative time (e.g., "2 minutes ago")
    pub fn relative_time(&self) -> String {
        let duration = Utc::now().signed_duration_since(self.timestamp);

        if duration.num_seconds() < 60 {
            "just now".to_string()
        } else if duration.num_minutes() < 60 {
            match duration.num_minutes() {
                1 => "1 minute ago".to_string(),
                mins => format!("{} minutes ago", mins),
            }
        } else if duration.num_hours() < 24 {
            match duration.num_hours() {
                1 => "1 hour ago".to_string(),
                hours => format!("{} hours ago", hours),
            }
        } else {
            self.timestamp.format("%Y-%m-%d %H:%M").to_string()
        }
    }
}
