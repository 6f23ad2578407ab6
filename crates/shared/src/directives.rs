//! Inline directive grammar.
//!
//! Model responses may embed control tokens of the form `!keyword[:payload]!`.
//! This module has two separate entry points:
//!
//! - [`parse_directives`] runs over a complete response and produces the
//!   authoritative [`DirectiveResult`] (clean prose, style/theme updates and
//!   queued actions).
//! - [`mask_directives`] is the streaming projection. It never parses; it
//!   hides anything that *could* be a token, including one whose closing `!`
//!   has not arrived yet.

use std::sync::LazyLock;

use regex::Regex;

use crate::card::StyleOverrides;
use crate::theme::ThemeUpdate;

/// `bold`/`italic` are flags; every other keyword needs a `:payload`.
static DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)!(?:(bold|italic)(?::[^!]*)?|(theme|bg|text|border|pad|radius|font|css|action):([^!]+))!",
    )
    .expect("directive pattern is valid")
});

/// A `!` followed by anything up to the next `!` or the end of the buffer.
static OPEN_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"![^!]*(?:!|$)").expect("mask pattern is valid"));

/// Default unit appended to bare lengths (`!pad:12!` -> `12px`).
const DEFAULT_LENGTH_UNIT: &str = "px";

/// Everything extracted from one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectiveResult {
    /// Response text with every directive span removed, trimmed
    pub clean_text: String,
    /// Merged per-card overrides; empty when no style directive was present
    pub style_update: StyleOverrides,
    /// Last `!theme:...!` seen, if any
    pub theme_update: Option<ThemeUpdate>,
    /// Raw action payloads in order of appearance, duplicates kept
    pub actions: Vec<String>,
}

impl DirectiveResult {
    pub fn has_style_update(&self) -> bool {
        !self.style_update.is_empty()
    }
}

/// Extract every directive from `text`.
///
/// Spans are cut out by position, never by searching for the token text, so
/// repeated identical tokens are each removed exactly once. Removing a span can
/// splice its neighbours into a new token (`!b` + `!bold!` + `g:red!`), so the
/// scan repeats until the text is free of tokens.
pub fn parse_directives(text: &str) -> DirectiveResult {
    let mut result = DirectiveResult::default();
    let mut current = text.to_string();

    loop {
        let (clean, found) = extract_pass(&current, &mut result);
        current = clean;
        if !found {
            break;
        }
    }

    result.clean_text = current.trim().to_string();
    result
}

/// Whether `text` contains at least one complete directive.
pub fn has_directives(text: &str) -> bool {
    DIRECTIVE_RE.is_match(text)
}

/// Text that is safe to show while a response is still streaming.
pub fn mask_directives(text: &str) -> String {
    OPEN_TOKEN_RE
        .replace_all(text, "")
        .trim_start()
        .to_string()
}

fn extract_pass(text: &str, result: &mut DirectiveResult) -> (String, bool) {
    let mut clean = String::with_capacity(text.len());
    let mut cursor = 0;
    let mut found = false;

    for caps in DIRECTIVE_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };

        if let Some(flag) = caps.get(1) {
            apply_flag(&flag.as_str().to_ascii_lowercase(), result);
        } else if let (Some(keyword), Some(payload)) = (caps.get(2), caps.get(3)) {
            apply_keyword(
                &keyword.as_str().to_ascii_lowercase(),
                payload.as_str().trim(),
                result,
            );
        }

        clean.push_str(&text[cursor..whole.start()]);
        cursor = whole.end();
        found = true;
    }

    clean.push_str(&text[cursor..]);
    (clean, found)
}

fn apply_flag(flag: &str, result: &mut DirectiveResult) {
    match flag {
        "bold" => result.style_update.font_weight = Some("bold".to_string()),
        "italic" => result.style_update.font_style = Some("italic".to_string()),
        _ => {}
    }
}

fn apply_keyword(keyword: &str, payload: &str, result: &mut DirectiveResult) {
    let styles = &mut result.style_update;
    match keyword {
        "theme" => result.theme_update = Some(ThemeUpdate::from_payload(payload)),
        "bg" => styles.background_color = Some(payload.to_string()),
        "text" => styles.color = Some(payload.to_string()),
        "border" => styles.border_color = Some(payload.to_string()),
        "pad" => styles.padding = Some(with_default_unit(payload)),
        "radius" => styles.border_radius = Some(with_default_unit(payload)),
        "font" => styles.font_size = Some(with_default_unit(payload)),
        "css" => styles.custom_css = Some(payload.to_string()),
        "action" => result.actions.push(payload.to_string()),
        _ => {}
    }
}

fn with_default_unit(value: &str) -> String {
    match value.chars().last() {
        Some(c) if c.is_ascii_digit() || c == '.' => format!("{}{}", value, DEFAULT_LENGTH_UNIT),
        _ => value.to_string(),
    }
}
