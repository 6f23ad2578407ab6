//! Cards and their per-card style overrides.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Response value of a card that is still waiting for its stream.
pub const PENDING_RESPONSE: &str = "...";

/// Opaque, stable card identifier.
///
/// New cards get a v4 UUID, but any string loaded from disk is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(String);

impl CardId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CardId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CardId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CardId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Partial visual overrides for one card. `None` means "unchanged".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StyleOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub padding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border_radius: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_weight: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_decoration: Option<String>,
    #[serde(rename = "customCSS", skip_serializing_if = "Option::is_none")]
    pub custom_css: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border_width: Option<String>,
    /// Blocks every directive-originated change until the user unlocks
    pub locked: bool,
}

impl StyleOverrides {
    /// True when no visual property is set (the lock flag is ignored).
    pub fn is_empty(&self) -> bool {
        self.color.is_none()
            && self.background_color.is_none()
            && self.border_color.is_none()
            && self.padding.is_none()
            && self.border_radius.is_none()
            && self.font_size.is_none()
            && self.font_weight.is_none()
            && self.font_style.is_none()
            && self.text_decoration.is_none()
            && self.custom_css.is_none()
            && self.border_width.is_none()
    }

    /// Overlay every property `update` provides. Never touches `locked`.
    pub fn merge(&mut self, update: &StyleOverrides) {
        fn overlay(slot: &mut Option<String>, value: &Option<String>) {
            if let Some(v) = value {
                *slot = Some(v.clone());
            }
        }

        overlay(&mut self.color, &update.color);
        overlay(&mut self.background_color, &update.background_color);
        overlay(&mut self.border_color, &update.border_color);
        overlay(&mut self.padding, &update.padding);
        overlay(&mut self.border_radius, &update.border_radius);
        overlay(&mut self.font_size, &update.font_size);
        overlay(&mut self.font_weight, &update.font_weight);
        overlay(&mut self.font_style, &update.font_style);
        overlay(&mut self.text_decoration, &update.text_decoration);
        overlay(&mut self.custom_css, &update.custom_css);
        overlay(&mut self.border_width, &update.border_width);
    }

    /// The custom fragment scoped to a single card so it cannot leak into others.
    pub fn scoped_css(&self, id: &CardId) -> Option<String> {
        self.custom_css
            .as_deref()
            .filter(|css| !css.trim().is_empty())
            .map(|css| format!("[data-id=\"{}\"] {}", id, css))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    /// Request text
    pub q: String,
    /// Response text, `PENDING_RESPONSE` while waiting
    pub r: String,
    #[serde(default)]
    pub styles: StyleOverrides,
}

impl Card {
    pub fn new(q: impl Into<String>, r: impl Into<String>, styles: StyleOverrides) -> Self {
        Self {
            id: CardId::new(),
            q: q.into(),
            r: r.into(),
            styles,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.r == PENDING_RESPONSE
    }

    pub fn is_locked(&self) -> bool {
        self.styles.locked
    }
}

/// Text handed to the speech collaborator: markdown punctuation stripped, capped at 2000 chars.
pub fn speech_text(response: &str) -> String {
    response
        .chars()
        .filter(|c| !matches!(c, '#' | '*' | '_' | '`' | '>' | '~' | '-'))
        .take(2000)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_only_overlays_provided_keys() {
        let mut styles = StyleOverrides {
            color: Some("#fff".into()),
            padding: Some("8px".into()),
            locked: true,
            ..Default::default()
        };
        let update = StyleOverrides {
            padding: Some("16px".into()),
            font_weight: Some("bold".into()),
            ..Default::default()
        };

        styles.merge(&update);

        assert_eq!(styles.color.as_deref(), Some("#fff"));
        assert_eq!(styles.padding.as_deref(), Some("16px"));
        assert_eq!(styles.font_weight.as_deref(), Some("bold"));
        assert!(styles.locked);
    }

    #[test]
    fn test_scoped_css() {
        let id = CardId::from("abc");
        let styles = StyleOverrides {
            custom_css: Some(".content { color: red; }".into()),
            ..Default::default()
        };
        assert_eq!(
            styles.scoped_css(&id).as_deref(),
            Some("[data-id=\"abc\"] .content { color: red; }")
        );
        assert!(StyleOverrides::default().scoped_css(&id).is_none());
    }

    #[test]
    fn test_style_wire_names() {
        let styles = StyleOverrides {
            background_color: Some("#000".into()),
            custom_css: Some("p{}".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&styles).unwrap();
        assert_eq!(json["backgroundColor"], "#000");
        assert_eq!(json["customCSS"], "p{}");
        assert_eq!(json["locked"], false);
        assert!(json.get("color").is_none());
    }

    #[test]
    fn test_card_without_styles_loads() {
        let card: Card = serde_json::from_str(r#"{"id":"c1","q":"hi","r":"..."}"#).unwrap();
        assert_eq!(card.id.as_str(), "c1");
        assert!(card.is_pending());
        assert!(!card.is_locked());
    }

    #[test]
    fn test_speech_text() {
        assert_eq!(speech_text("# Title\n*bold* `code`"), " Title\nbold code");
        assert_eq!(speech_text(&"a".repeat(3000)).len(), 2000);
    }
}
