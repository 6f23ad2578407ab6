//! Application actions a response can request with `!action:<name>!`.

use shared::settings::CardView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    /// Merge the current selection
    Merge,
    /// Delete every card
    Clear,
    View(CardView),
}

impl AppAction {
    /// Parse an action payload. Unknown names and unknown views yield `None`.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        let (name, arg) = match token.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (token, None),
        };
        match (name.to_ascii_lowercase().as_str(), arg) {
            ("merge", None) => Some(AppAction::Merge),
            ("clear", None) => Some(AppAction::Clear),
            ("view", Some(view)) => CardView::parse(view).map(AppAction::View),
            _ => None,
        }
    }
}
