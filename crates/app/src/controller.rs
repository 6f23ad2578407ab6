//! Controller - the single owner of application state
//!
//! Lifecycle: [`Controller::init`] loads the saved board and wires the
//! orchestrator to a proxy client. Every user operation then goes through one
//! named method here, which mutates [`AppState`] (snapshotting first when the
//! operation can be undone), persists, and emits [`AppEvent`]s for the front end.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent_host::{ExchangeReport, Orchestrator, Submission};
use parking_lot::Mutex;
use providers::{ProxyClient, Transport};
use services::persistence::export_file_name;
use services::AppState;
use shared::card::{CardId, StyleOverrides};
use shared::events::AppEvent;
use shared::settings::CardView;
use shared::theme::{Theme, ThemeMode};
use shared::AppError;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::config::{validate_endpoint, AppConfig};

pub struct Controller {
    config: AppConfig,
    state: Arc<Mutex<AppState>>,
    orchestrator: Arc<Orchestrator>,
    /// Endpoint the orchestrator's transport talks to
    endpoint: Mutex<String>,
    events: UnboundedSender<AppEvent>,
}

impl Controller {
    /// Load saved state and connect to the configured proxy.
    pub fn init(config: AppConfig) -> (Self, UnboundedReceiver<AppEvent>) {
        let state = AppState::load(config.state_file());
        let endpoint = config.endpoint_for(&state.settings);
        tracing::info!("using proxy endpoint {}", endpoint);
        let transport: Arc<dyn Transport> = Arc::new(ProxyClient::new(&endpoint));
        Self::with_parts(config, state, transport)
    }

    /// Assemble from explicit parts.
    pub fn with_parts(
        config: AppConfig,
        state: AppState,
        transport: Arc<dyn Transport>,
    ) -> (Self, UnboundedReceiver<AppEvent>) {
        let (tx, rx) = unbounded_channel();
        let endpoint = config.endpoint_for(&state.settings);
        let state = Arc::new(Mutex::new(state));
        let orchestrator = Orchestrator::new(transport, state.clone(), tx.clone())
            .with_idle_timeout(config.idle_timeout);
        (
            Self {
                config,
                state,
                orchestrator: Arc::new(orchestrator),
                endpoint: Mutex::new(endpoint),
                events: tx,
            },
            rx,
        )
    }

    pub fn state(&self) -> Arc<Mutex<AppState>> {
        self.state.clone()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn endpoint(&self) -> String {
        self.endpoint.lock().clone()
    }

    /// Point new exchanges at `endpoint` unless they already use it.
    fn reconnect(&self, endpoint: String) {
        let mut current = self.endpoint.lock();
        if *current == endpoint {
            return;
        }
        tracing::info!("switching proxy endpoint to {}", endpoint);
        self.orchestrator
            .set_transport(Arc::new(ProxyClient::new(&endpoint)));
        *current = endpoint;
    }

    /// Resolve a full id or a unique id prefix.
    pub fn find_card(&self, prefix: &str) -> Option<CardId> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return None;
        }
        let state = self.state.lock();
        let mut matches = state
            .store
            .cards()
            .iter()
            .filter(|c| c.id.as_str().starts_with(prefix));
        let first = matches.next()?;
        if matches.next().is_some() && first.id.as_str() != prefix {
            return None;
        }
        Some(first.id.clone())
    }

    fn emit(&self, event: AppEvent) {
        let _ = self.events.send(event);
    }

    fn notice(&self, message: impl Into<String>) {
        self.emit(AppEvent::notice(message));
    }

    // ── Exchanges ────────────────────────────────────────────────────

    /// Send a fresh prompt. Blank input is ignored.
    pub async fn send(&self, prompt: &str) -> Result<Option<ExchangeReport>, AppError> {
        let text = prompt.trim();
        if text.is_empty() {
            return Ok(None);
        }
        self.submit(Submission::Prompt {
            text: text.to_string(),
        })
        .await
        .map(Some)
    }

    pub async fn continue_card(&self, id: &CardId, instruction: &str) -> Result<ExchangeReport, AppError> {
        self.submit(Submission::Continue {
            card: id.clone(),
            instruction: instruction.trim().to_string(),
        })
        .await
    }

    pub async fn split_card(&self, id: &CardId, instruction: &str) -> Result<ExchangeReport, AppError> {
        self.submit(Submission::Split {
            card: id.clone(),
            instruction: instruction.trim().to_string(),
        })
        .await
    }

    pub async fn ai_edit_card(&self, id: &CardId, instruction: &str) -> Result<ExchangeReport, AppError> {
        self.submit(Submission::Edit {
            card: id.clone(),
            instruction: instruction.trim().to_string(),
        })
        .await
    }

    pub async fn merge_selected(&self, instruction: &str) -> Result<ExchangeReport, AppError> {
        let selected = self.state.lock().store.selected_ids().len();
        if selected < 2 {
            self.notice("Select 2+ cards to merge");
            return Err(AppError::NotEnoughCards {
                needed: 2,
                got: selected,
            });
        }
        self.submit(Submission::Merge {
            instruction: instruction.trim().to_string(),
        })
        .await
    }

    /// Run an exchange, then any merge it requested. Returns the first report.
    async fn submit(&self, submission: Submission) -> Result<ExchangeReport, AppError> {
        let report = self.orchestrator.run(submission).await?;
        let mut next = report.follow_up.clone();
        while let Some(submission) = next.take() {
            match self.orchestrator.run(submission).await {
                Ok(follow) => next = follow.follow_up,
                Err(e) => self.notice(format!("Follow-up failed: {}", e)),
            }
        }
        Ok(report)
    }

    pub async fn generate_theme(
        &self,
        description: &str,
        card: Option<&CardId>,
    ) -> Result<Option<Theme>, AppError> {
        let description = description.trim();
        if description.is_empty() {
            return Ok(None);
        }
        self.orchestrator.generate_theme(description, card).await
    }

    /// Stop the streaming exchange, if any.
    pub fn cancel(&self) -> bool {
        self.orchestrator.cancel()
    }

    /// Cancel the running exchange when its card is gone from the board.
    fn cancel_if_orphaned(&self) {
        let Some(active) = self.orchestrator.active_card() else {
            return;
        };
        let orphaned = !self.state.lock().store.is_streaming(&active);
        if orphaned {
            self.orchestrator.cancel();
        }
    }

    // ── Undoable board operations ────────────────────────────────────

    pub fn undo(&self) -> Result<String, AppError> {
        let (label, theme) = {
            let mut state = self.state.lock();
            let label = state.undo()?;
            (label, state.store.theme().clone())
        };
        self.cancel_if_orphaned();
        self.emit(AppEvent::BoardReplaced);
        self.emit(AppEvent::ThemeChanged { theme });
        self.notice(format!("Undid: {}", label));
        Ok(label)
    }

    pub fn delete_card(&self, id: &CardId) -> Result<(), AppError> {
        self.state.lock().delete_card(id)?;
        self.cancel_if_orphaned();
        self.emit(AppEvent::CardsRemoved {
            ids: vec![id.clone()],
        });
        Ok(())
    }

    pub fn bulk_delete(&self) -> Result<Vec<CardId>, AppError> {
        let ids = self.state.lock().bulk_delete()?;
        self.cancel_if_orphaned();
        self.emit(AppEvent::CardsRemoved { ids: ids.clone() });
        self.emit(AppEvent::SelectionChanged {
            selected: Vec::new(),
        });
        Ok(ids)
    }

    pub fn clear_all(&self) -> Vec<CardId> {
        let ids = self.state.lock().clear_all();
        self.cancel_if_orphaned();
        self.emit(AppEvent::CardsRemoved { ids: ids.clone() });
        self.notice("Grid Cleared");
        ids
    }

    /// Manual edit of a card's request and/or response.
    pub fn edit_card(&self, id: &CardId, q: Option<&str>, r: Option<&str>) -> Result<(), AppError> {
        self.state.lock().edit_card(id, q, r)?;
        self.emit(AppEvent::CardUpdated { id: id.clone() });
        Ok(())
    }

    /// Style editor: overlay properties and set the card lock.
    pub fn set_card_style(&self, id: &CardId, styles: &StyleOverrides) -> Result<(), AppError> {
        self.state.lock().set_card_style(id, styles)?;
        self.emit(AppEvent::CardUpdated { id: id.clone() });
        Ok(())
    }

    /// Lock or unlock one card without touching its styles.
    pub fn set_card_locked(&self, id: &CardId, locked: bool) -> Result<(), AppError> {
        let styles = {
            let state = self.state.lock();
            let card = state
                .store
                .card(id)
                .ok_or_else(|| AppError::CardNotFound { id: id.clone() })?;
            StyleOverrides {
                locked,
                ..card.styles.clone()
            }
        };
        self.set_card_style(id, &styles)?;
        self.notice(if locked { "Card Locked" } else { "Card Unlocked" });
        Ok(())
    }

    pub fn toggle_theme_mode(&self) -> ThemeMode {
        let (mode, theme) = {
            let mut state = self.state.lock();
            let mode = state.toggle_theme_mode();
            (mode, state.store.theme().clone())
        };
        self.emit(AppEvent::ThemeChanged { theme });
        mode
    }

    // ── Settings and view ────────────────────────────────────────────

    pub fn toggle_theme_lock(&self) -> bool {
        let locked = self.state.lock().toggle_theme_lock();
        self.notice(if locked {
            "Global Theme Locked"
        } else {
            "Global Theme Unlocked"
        });
        locked
    }

    pub fn set_view(&self, view: CardView) {
        self.state.lock().set_view(view);
        self.emit(AppEvent::ViewChanged { view });
    }

    pub fn cycle_view(&self) -> CardView {
        let view = self.state.lock().cycle_view();
        self.emit(AppEvent::ViewChanged { view });
        view
    }

    /// Open a card in the focus view, or close it with `None`.
    pub fn focus(&self, id: Option<&CardId>) -> Result<(), AppError> {
        self.state.lock().focus(id)
    }

    pub fn toggle_select(&self, id: &CardId) -> Result<bool, AppError> {
        let (now_selected, selected) = {
            let mut state = self.state.lock();
            let now = state.store.toggle_select(id)?;
            (now, state.store.selected_ids().to_vec())
        };
        self.emit(AppEvent::SelectionChanged { selected });
        Ok(now_selected)
    }

    pub fn clear_selection(&self) {
        self.state.lock().store.clear_selection();
        self.emit(AppEvent::SelectionChanged {
            selected: Vec::new(),
        });
    }

    pub fn toggle_tts(&self) -> bool {
        let on = self.state.lock().toggle_tts();
        self.notice(if on { "Auto TTS on" } else { "Auto TTS off" });
        on
    }

    pub fn toggle_asr(&self) -> bool {
        let on = self.state.lock().toggle_asr();
        self.notice(if on { "Voice input on" } else { "Voice input off" });
        on
    }

    /// Save a proxy URL (empty resets to the configured default) and reconnect.
    pub fn set_proxy_url(&self, raw: &str) -> Result<String, AppError> {
        let saved = if raw.trim().is_empty() {
            String::new()
        } else {
            validate_endpoint(raw).map_err(|message| AppError::InvalidSetting { message })?
        };
        let endpoint = {
            let mut state = self.state.lock();
            state.set_proxy_url(&saved);
            self.config.endpoint_for(&state.settings)
        };
        self.reconnect(endpoint.clone());
        self.notice(format!("Proxy: {}", endpoint));
        Ok(endpoint)
    }

    // ── Import / export ──────────────────────────────────────────────

    /// Write the board to `path`, or to a timestamped file in the data directory.
    pub fn export_to(&self, path: Option<&Path>) -> Result<PathBuf, AppError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.data_dir.join(export_file_name()));
        self.state.lock().export_to(&path)?;
        self.notice(format!("Exported to {}", path.display()));
        Ok(path)
    }

    /// Replace the board and settings from a file, following any imported proxy URL.
    pub fn import_from(&self, path: &Path) -> Result<(), AppError> {
        let (theme, view, endpoint) = {
            let mut state = self.state.lock();
            state.import_from(path)?;
            (
                state.store.theme().clone(),
                state.settings.view,
                self.config.endpoint_for(&state.settings),
            )
        };
        self.reconnect(endpoint);
        self.cancel_if_orphaned();
        self.emit(AppEvent::BoardReplaced);
        self.emit(AppEvent::ThemeChanged { theme });
        self.emit(AppEvent::ViewChanged { view });
        self.notice("Import Successful");
        Ok(())
    }
}
