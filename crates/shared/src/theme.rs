//! The process-wide board theme.

use serde::{Deserialize, Serialize};

pub const DEFAULT_THEME_NAME: &str = "ai-Ndraft";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Theme {
    pub name: String,
    pub primary: String,
    pub bg: String,
    pub card_bg: String,
    pub text: String,
    pub border: String,
    /// Global lock: no AI-issued theme change applies while set
    pub locked: bool,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            name: DEFAULT_THEME_NAME.to_string(),
            primary: "#c41e3a".to_string(),
            bg: "#121212".to_string(),
            card_bg: "#1e1e1e".to_string(),
            text: "#f5f5f5".to_string(),
            border: "#333".to_string(),
            locked: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThemeMode {
    Light,
    Dark,
}

impl Theme {
    /// Overlay the fields the update provides. The lock flag is untouched.
    pub fn merge(&mut self, update: &ThemeUpdate) {
        let slots = [
            (&mut self.name, &update.name),
            (&mut self.bg, &update.bg),
            (&mut self.card_bg, &update.card_bg),
            (&mut self.text, &update.text),
            (&mut self.border, &update.border),
            (&mut self.primary, &update.primary),
        ];
        for (slot, value) in slots {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }
    }

    /// Swap the surface colors for the built-in light or dark palette.
    pub fn apply_mode(&mut self, mode: ThemeMode) {
        let (bg, card_bg, text, border) = match mode {
            ThemeMode::Light => ("#f8f9fa", "#ffffff", "#222", "#ddd"),
            ThemeMode::Dark => ("#121212", "#1e1e1e", "#f5f5f5", "#333"),
        };
        self.bg = bg.to_string();
        self.card_bg = card_bg.to_string();
        self.text = text.to_string();
        self.border = border.to_string();
    }

    /// Best guess at the current mode, used when toggling.
    pub fn mode(&self) -> ThemeMode {
        if self.bg.eq_ignore_ascii_case("#f8f9fa") {
            ThemeMode::Light
        } else {
            ThemeMode::Dark
        }
    }
}

/// Theme replacement candidate parsed from a `!theme:...!` directive.
///
/// Missing fields stay `None` so they never blank out the live theme.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeUpdate {
    pub name: Option<String>,
    pub bg: Option<String>,
    pub card_bg: Option<String>,
    pub text: Option<String>,
    pub border: Option<String>,
    pub primary: Option<String>,
}

impl ThemeUpdate {
    /// Build from the comma separated `Name,Bg,CardBg,Text,Border,Primary` payload.
    pub fn from_payload(payload: &str) -> Self {
        let mut fields = payload.split(',').map(|s| {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        });
        let mut next = || fields.next().flatten();
        Self {
            name: next(),
            bg: next(),
            card_bg: next(),
            text: next(),
            border: next(),
            primary: next(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Updated")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_payload_keeps_existing_fields() {
        let update = ThemeUpdate::from_payload("Ocean, #001122 ,,");
        assert_eq!(update.name.as_deref(), Some("Ocean"));
        assert_eq!(update.bg.as_deref(), Some("#001122"));
        assert!(update.card_bg.is_none());
        assert!(update.primary.is_none());

        let mut theme = Theme::default();
        theme.merge(&update);
        assert_eq!(theme.name, "Ocean");
        assert_eq!(theme.bg, "#001122");
        assert_eq!(theme.card_bg, "#1e1e1e");
        assert_eq!(theme.primary, "#c41e3a");
    }

    #[test]
    fn test_full_payload_order() {
        let update =
            ThemeUpdate::from_payload("Gold,#1a1a1a,#2a2a2a,#ffd700,#ffd700,#b8860b");
        let mut theme = Theme::default();
        theme.merge(&update);
        assert_eq!(theme.name, "Gold");
        assert_eq!(theme.card_bg, "#2a2a2a");
        assert_eq!(theme.text, "#ffd700");
        assert_eq!(theme.primary, "#b8860b");
        assert!(!theme.locked);
    }

    #[test]
    fn test_mode_toggle() {
        let mut theme = Theme::default();
        assert_eq!(theme.mode(), ThemeMode::Dark);
        theme.apply_mode(ThemeMode::Light);
        assert_eq!(theme.mode(), ThemeMode::Light);
        assert_eq!(theme.card_bg, "#ffffff");
        assert_eq!(theme.name, DEFAULT_THEME_NAME);
    }

    #[test]
    fn test_partial_document_falls_back_per_field() {
        let theme: Theme = serde_json::from_str(r##"{"name":"Mine","cardBg":"#000"}"##).unwrap();
        assert_eq!(theme.name, "Mine");
        assert_eq!(theme.card_bg, "#000");
        assert_eq!(theme.primary, "#c41e3a");
    }
}
