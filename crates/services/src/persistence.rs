//! On-disk state: one JSON document holding cards, theme, settings and session id.
//!
//! Loading is lenient per field: a missing or malformed field falls back to
//! its default and the rest of the document is still used. Imports are
//! stricter: the file must at least be a JSON object.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use shared::card::Card;
use shared::settings::Settings;
use shared::theme::Theme;
use shared::AppError;

pub const STATE_FILE_NAME: &str = "state.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub cards: Vec<Card>,
    pub theme: Theme,
    pub settings: Settings,
    pub session_id: String,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            cards: Vec::new(),
            theme: Theme::default(),
            settings: Settings::default(),
            session_id: new_session_id(),
        }
    }
}

impl PersistedState {
    /// Build from an arbitrary JSON value, defaulting every field that is
    /// missing or does not deserialize.
    pub fn from_value(value: &Value) -> Self {
        let mut state = Self::default();
        let Some(obj) = value.as_object() else {
            tracing::warn!("persisted state is not an object, using defaults");
            return state;
        };

        if let Some(cards) = obj.get("cards").and_then(Value::as_array) {
            state.cards = lenient_cards(cards);
        }
        if let Some(theme) = field::<Theme>(obj.get("theme"), "theme") {
            state.theme = theme;
        }
        if let Some(settings) = field::<Settings>(obj.get("settings"), "settings") {
            state.settings = settings;
        }
        if let Some(id) = session_id(obj.get("sessionId")) {
            state.session_id = id;
        }
        state
    }
}

/// Contents of an import file. Absent sections leave the live value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportDocument {
    pub cards: Option<Vec<Card>>,
    pub theme: Option<Theme>,
    pub settings: Option<Settings>,
    pub session_id: Option<String>,
}

impl ImportDocument {
    pub fn parse(json: &str) -> Result<Self, AppError> {
        let value: Value = serde_json::from_str(json).map_err(|e| AppError::MalformedImport {
            reason: e.to_string(),
        })?;
        let obj = value.as_object().ok_or_else(|| AppError::MalformedImport {
            reason: "expected a JSON object".to_string(),
        })?;

        let cards = match obj.get("cards") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(lenient_cards(items)),
            Some(_) => {
                return Err(AppError::MalformedImport {
                    reason: "\"cards\" must be an array".to_string(),
                })
            }
        };

        Ok(Self {
            cards,
            theme: field(obj.get("theme"), "theme"),
            settings: field(obj.get("settings"), "settings"),
            session_id: session_id(obj.get("sessionId")),
        })
    }
}

/// Platform config directory, or the working directory when none is available.
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com.local", "ai-Ndraft", "Ndraft")
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// `sess_<unix-ms>`
pub fn new_session_id() -> String {
    format!("sess_{}", chrono::Utc::now().timestamp_millis())
}

/// `ndraft_export_<unix-ms>.json`
pub fn export_file_name() -> String {
    format!("ndraft_export_{}.json", chrono::Utc::now().timestamp_millis())
}

fn session_id(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn field<T: DeserializeOwned>(value: Option<&Value>, name: &str) -> Option<T> {
    let value = value?;
    match serde_json::from_value(value.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("ignoring malformed {} in saved state: {}", name, e);
            None
        }
    }
}

fn lenient_cards(items: &[Value]) -> Vec<Card> {
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<Card>(item.clone()) {
            Ok(card) => Some(card),
            Err(e) => {
                tracing::warn!("skipping malformed card: {}", e);
                None
            }
        })
        .collect()
}

// ── State file ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `state.json` inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(STATE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved state. Never fails: problems are logged and defaults used.
    pub fn load(&self) -> PersistedState {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no saved state at {}, starting fresh", self.path.display());
                return PersistedState::default();
            }
            Err(e) => {
                tracing::warn!("failed to read {}: {}", self.path.display(), e);
                return PersistedState::default();
            }
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(value) => PersistedState::from_value(&value),
            Err(e) => {
                tracing::warn!("saved state is not valid JSON, using defaults: {}", e);
                PersistedState::default()
            }
        }
    }

    /// Write via a temp file in the same directory, then rename over the target.
    pub fn save(&self, state: &PersistedState) -> Result<()> {
        write_json(&self.path, state, false)
    }
}

/// Write `state` as pretty JSON to `path` (used for exports).
pub fn export(path: &Path, state: &PersistedState) -> Result<()> {
    write_json(path, state, true)
}

pub fn read_import(path: &Path) -> Result<ImportDocument, AppError> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))
        .map_err(|e| AppError::MalformedImport {
            reason: format!("{:#}", e),
        })?;
    ImportDocument::parse(&content)
}

fn write_json(path: &Path, state: &PersistedState, pretty: bool) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let json = if pretty {
        serde_json::to_string_pretty(state)
    } else {
        serde_json::to_string(state)
    }
    .context("failed to serialize state")?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to move {} into place", tmp.display()))?;
    Ok(())
}
