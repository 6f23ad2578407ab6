//! Drives one request/stream/finalize cycle at a time.
//!
//! Exchange lifecycle: `Idle -> Sent -> Streaming -> {Finalized | Aborted | Failed}`.
//!
//! Two locks are involved: the shared [`AppState`] mutex and the exchange
//! slot below. The slot is filled while the state lock is held, in the same
//! critical section that claims the card, and is never held while taking the
//! state lock. Cancellation and finalization both *take* the slot, so exactly
//! one of them wins.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{AbortHandle, Abortable};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::UnboundedSender;

use providers::{ByteStream, StreamAccumulator, Transport};
use services::AppState;
use shared::agent_api::ProxyRequest;
use shared::card::{speech_text, CardId, StyleOverrides, PENDING_RESPONSE};
use shared::events::{AppEvent, ExchangeOutcome};
use shared::theme::Theme;
use shared::AppError;

use crate::actions::AppAction;
use crate::prompts;

/// Appended to a card's response when the user stops the stream.
pub const STOPPED_MARKER: &str = "[Stopped]";

/// Longest gap between two chunks before the exchange fails.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

const SNAPSHOT_LABEL: &str = "AI Response";

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// A fresh prompt into a new card
    Prompt { text: String },
    /// Continue or refine an existing card in place
    Continue { card: CardId, instruction: String },
    /// Split a card's response into a new card
    Split { card: CardId, instruction: String },
    /// Rewrite a card's response into a new card
    Edit { card: CardId, instruction: String },
    /// Merge the current selection into a new card
    Merge { instruction: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangePhase {
    /// Request issued, nothing received yet
    Sent,
    /// At least one chunk received
    Streaming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeReport {
    pub id: CardId,
    pub outcome: ExchangeOutcome,
    /// Exchange requested by a `!action:merge!`, to be run next
    pub follow_up: Option<Submission>,
}

struct ActiveExchange {
    card_id: CardId,
    phase: ExchangePhase,
    abort: AbortHandle,
}

/// Everything `run` needs once the card slot has been claimed.
struct Prepared {
    id: CardId,
    prompt: String,
    session_id: String,
}

pub struct Orchestrator {
    transport: RwLock<Arc<dyn Transport>>,
    state: Arc<Mutex<AppState>>,
    events: UnboundedSender<AppEvent>,
    active: Mutex<Option<ActiveExchange>>,
    idle_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        state: Arc<Mutex<AppState>>,
        events: UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            transport: RwLock::new(transport),
            state,
            events,
            active: Mutex::new(None),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Swap the transport, e.g. after the proxy URL changed. In-flight exchanges keep theirs.
    pub fn set_transport(&self, transport: Arc<dyn Transport>) {
        *self.transport.write() = transport;
    }

    pub fn phase(&self) -> Option<ExchangePhase> {
        self.active.lock().as_ref().map(|ex| ex.phase)
    }

    pub fn active_card(&self) -> Option<CardId> {
        self.active.lock().as_ref().map(|ex| ex.card_id.clone())
    }

    /// Stop the in-flight exchange. Returns `false` when there was nothing to stop.
    pub fn cancel(&self) -> bool {
        match self.active.lock().take() {
            Some(ex) => {
                tracing::info!("cancelling exchange for card {}", ex.card_id);
                ex.abort.abort();
                true
            }
            None => false,
        }
    }

    /// Run one exchange to completion.
    ///
    /// Errors are only returned when the submission is rejected up front; once
    /// a card has been claimed the result is reported as an [`ExchangeOutcome`].
    pub async fn run(&self, submission: Submission) -> Result<ExchangeReport, AppError> {
        let (abort, registration) = AbortHandle::new_pair();
        let prepared = self.prepare(&submission, abort)?;
        let id = prepared.id.clone();
        tracing::info!("exchange sent for card {}", id);

        let request = ProxyRequest::new(prepared.session_id.clone(), prepared.prompt.clone());
        let transport = self.transport.read().clone();
        let work = async {
            let body = transport.open(&request).await?;
            self.read_stream(body, |acc, first| self.on_progress(&id, acc, first))
                .await
        };
        let result = Abortable::new(work, registration).await;

        // Whoever takes the slot decides the outcome.
        let claimed = self.active.lock().take().is_some();

        let (outcome, follow_up) = match result {
            Ok(Ok(acc)) if claimed => self.finalize(&prepared, &acc),
            Ok(Err(e)) if claimed => (self.fail(&id, &e), None),
            _ => (self.abort_card(&id), None),
        };

        self.emit(AppEvent::ExchangeFinished {
            id: id.clone(),
            outcome: outcome.clone(),
        });
        Ok(ExchangeReport {
            id,
            outcome,
            follow_up,
        })
    }

    /// Claim a card for the submission and fill the exchange slot, both under
    /// the state lock, so a cancel never sees a claimed card without a slot.
    fn prepare(&self, submission: &Submission, abort: AbortHandle) -> Result<Prepared, AppError> {
        let mut events = Vec::new();
        let prepared = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            // A stream whose card was deleted still holds the slot until it ends.
            if let Some(active) = self.active.lock().as_ref() {
                return Err(AppError::ExchangeInFlight {
                    id: active.card_id.clone(),
                });
            }
            if let Some(active) = state.store.streaming_id() {
                return Err(AppError::ExchangeInFlight { id: active.clone() });
            }

            let (id, prompt) = match submission {
                Submission::Prompt { text } => {
                    let id = state
                        .store
                        .create_card(text.as_str(), PENDING_RESPONSE, StyleOverrides::default());
                    (id, prompts::plain(text))
                }
                Submission::Continue { card, instruction } => {
                    let existing = state
                        .store
                        .card(card)
                        .ok_or_else(|| AppError::CardNotFound { id: card.clone() })?;
                    (card.clone(), prompts::continuation(existing, instruction))
                }
                Submission::Split { card, instruction } | Submission::Edit { card, instruction } => {
                    let existing = state
                        .store
                        .card(card)
                        .ok_or_else(|| AppError::CardNotFound { id: card.clone() })?;
                    let (q, prompt) = if matches!(submission, Submission::Split { .. }) {
                        (format!("Split: {}", instruction), prompts::split(existing, instruction))
                    } else {
                        (format!("Edit: {}", instruction), prompts::edit(existing, instruction))
                    };
                    let id = state
                        .store
                        .create_card(q, PENDING_RESPONSE, StyleOverrides::default());
                    (id, prompt)
                }
                Submission::Merge { instruction } => {
                    let ids = state.store.selected_ids().to_vec();
                    let sources: Vec<_> = ids
                        .iter()
                        .filter_map(|id| state.store.card(id))
                        .cloned()
                        .collect();
                    let prompt = prompts::merge(&sources, instruction);
                    let q = format!("Merged {} cards", ids.len());
                    let id = state.store.merge_cards(&ids, q, PENDING_RESPONSE)?;
                    events.push(AppEvent::SelectionChanged {
                        selected: Vec::new(),
                    });
                    (id, prompt)
                }
            };

            if matches!(submission, Submission::Continue { .. }) {
                state.store.begin_continuation(&id)?;
            } else {
                state.store.begin_streaming(&id)?;
                events.insert(0, AppEvent::CardCreated { id: id.clone() });
            }
            *self.active.lock() = Some(ActiveExchange {
                card_id: id.clone(),
                phase: ExchangePhase::Sent,
                abort,
            });
            Prepared {
                id,
                prompt,
                session_id: state.session_id.clone(),
            }
        };
        self.emit_all(events);
        Ok(prepared)
    }

    /// Feed the body through an accumulator until the end sentinel or end of body.
    async fn read_stream(
        &self,
        mut body: ByteStream,
        mut on_progress: impl FnMut(&StreamAccumulator, bool),
    ) -> Result<StreamAccumulator, AppError> {
        let mut acc = StreamAccumulator::new();
        let mut first = true;
        loop {
            let next = tokio::time::timeout(self.idle_timeout, body.next())
                .await
                .map_err(|_| {
                    AppError::transport(format!(
                        "no data received for {} seconds",
                        self.idle_timeout.as_secs()
                    ))
                })?;
            match next {
                Some(Ok(chunk)) => {
                    let progress = acc.feed(&chunk);
                    if progress.appended {
                        on_progress(&acc, first);
                        first = false;
                    }
                    if progress.done {
                        break;
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    if acc.flush().appended {
                        on_progress(&acc, first);
                    }
                    break;
                }
            }
        }
        if acc.skipped_frames() > 0 {
            tracing::debug!("{} malformed frames skipped", acc.skipped_frames());
        }
        Ok(acc)
    }

    /// Write the masked text into the card and tell the presentation layer.
    fn on_progress(&self, id: &CardId, acc: &StreamAccumulator, first: bool) {
        if first {
            if let Some(ex) = self.active.lock().as_mut() {
                ex.phase = ExchangePhase::Streaming;
            }
            tracing::info!("exchange streaming into card {}", id);
            self.emit(AppEvent::StreamStarted { id: id.clone() });
        }

        let visible = acc.visible();
        let focused = {
            let mut state = self.state.lock();
            if !state.store.is_streaming(id) {
                // Card was deleted mid-stream
                return;
            }
            if state.store.update_card(id, None, Some(&visible)).is_err() {
                return;
            }
            state.is_focused(id)
        };
        self.emit(AppEvent::StreamDelta {
            id: id.clone(),
            visible,
            focused,
        });
    }

    fn finalize(
        &self,
        prepared: &Prepared,
        acc: &StreamAccumulator,
    ) -> (ExchangeOutcome, Option<Submission>) {
        let id = &prepared.id;
        let result = acc.finish();
        let mut events = Vec::new();
        let mut follow_up = None;

        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !state.store.is_streaming(id) || !state.store.contains(id) {
                tracing::info!("card {} was removed during streaming, discarding response", id);
                state.store.finish_streaming(id);
                drop(guard);
                return (ExchangeOutcome::Aborted, None);
            }

            // Taken while the card still streams, so undo drops this response only.
            state.history.snapshot(SNAPSHOT_LABEL, &state.store);

            if result.has_style_update() && !state.store.apply_style_update(id, &result.style_update) {
                events.push(AppEvent::notice("Card locked: style change rejected"));
            }
            if let Some(update) = &result.theme_update {
                if state.store.apply_theme_update(update) {
                    events.push(AppEvent::ThemeChanged {
                        theme: state.store.theme().clone(),
                    });
                    events.push(AppEvent::notice(format!("Theme: {}", update.display_name())));
                } else {
                    events.push(AppEvent::notice("Global theme locked: theme change rejected"));
                }
            }

            let _ = state.store.update_card(id, None, Some(&result.clean_text));
            state.store.finish_streaming(id);
            events.push(AppEvent::CardUpdated { id: id.clone() });

            if state.settings.auto_tts {
                events.push(AppEvent::SpeakRequested {
                    id: id.clone(),
                    text: speech_text(&result.clean_text),
                });
            }

            for token in &result.actions {
                match AppAction::parse(token) {
                    Some(AppAction::Merge) => {
                        if state.store.selected_ids().len() >= 2 {
                            follow_up = Some(Submission::Merge {
                                instruction: String::new(),
                            });
                        } else {
                            events.push(AppEvent::notice(
                                "AI requested merge, but no cards selected.",
                            ));
                        }
                    }
                    Some(AppAction::Clear) => {
                        state.history.snapshot("Clear All", &state.store);
                        let ids = state.store.clear_all();
                        state.focused = None;
                        events.push(AppEvent::CardsRemoved { ids });
                        events.push(AppEvent::notice("Grid Cleared"));
                    }
                    Some(AppAction::View(view)) => {
                        state.settings.view = view;
                        events.push(AppEvent::ViewChanged { view });
                        events.push(AppEvent::notice(format!("AI switched to {}", view.as_str())));
                    }
                    None => tracing::debug!("ignoring unknown action {:?}", token),
                }
            }

            state.commit();
        }

        tracing::info!("exchange finalized for card {}", id);
        self.emit_all(events);
        (ExchangeOutcome::Finalized, follow_up)
    }

    fn abort_card(&self, id: &CardId) -> ExchangeOutcome {
        {
            let mut state = self.state.lock();
            if state.store.finish_streaming(id) {
                if let Some(card) = state.store.card(id) {
                    let r = if card.is_pending() || card.r.trim().is_empty() {
                        STOPPED_MARKER.to_string()
                    } else {
                        format!("{}\n\n{}", card.r, STOPPED_MARKER)
                    };
                    let _ = state.store.update_card(id, None, Some(&r));
                }
                state.commit();
            }
        }
        tracing::info!("exchange aborted for card {}", id);
        self.emit(AppEvent::CardUpdated { id: id.clone() });
        ExchangeOutcome::Aborted
    }

    fn fail(&self, id: &CardId, error: &AppError) -> ExchangeOutcome {
        tracing::warn!("exchange for card {} failed: {}", id, error);
        let message = error_message(error);
        {
            let mut state = self.state.lock();
            if state.store.finish_streaming(id) {
                let _ = state
                    .store
                    .update_card(id, None, Some(&format!("Error: {}", message)));
                state.commit();
            }
        }
        self.emit(AppEvent::CardUpdated { id: id.clone() });
        ExchangeOutcome::Failed { error: message }
    }

    /// Theme-only generation, optionally requested from a card's style editor.
    ///
    /// Returns the new theme, or `None` when the response held no theme directive.
    pub async fn generate_theme(
        &self,
        description: &str,
        card: Option<&CardId>,
    ) -> Result<Option<Theme>, AppError> {
        {
            let state = self.state.lock();
            if let Some(id) = card {
                let card = state
                    .store
                    .card(id)
                    .ok_or_else(|| AppError::CardNotFound { id: id.clone() })?;
                if card.is_locked() {
                    return Err(AppError::CardLocked { id: id.clone() });
                }
            }
            if state.store.theme().locked {
                return Err(AppError::ThemeLocked);
            }
        }

        self.emit(AppEvent::notice("Generating Theme..."));
        let request = ProxyRequest::anonymous(prompts::theme(description));
        let transport = self.transport.read().clone();
        let body = transport.open(&request).await?;
        let acc = self.read_stream(body, |_, _| {}).await?;

        let Some(update) = acc.finish().theme_update else {
            self.emit(AppEvent::notice("Theme generation failed (parse error)"));
            return Ok(None);
        };

        let theme = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.store.theme().locked {
                return Err(AppError::ThemeLocked);
            }
            state.history.snapshot("AI Theme", &state.store);
            state.store.apply_theme_update(&update);
            state.commit();
            state.store.theme().clone()
        };
        self.emit(AppEvent::ThemeChanged {
            theme: theme.clone(),
        });
        self.emit(AppEvent::notice(format!("Theme: {}", update.display_name())));
        Ok(Some(theme))
    }

    fn emit(&self, event: AppEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    fn emit_all(&self, events: Vec<AppEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

fn error_message(error: &AppError) -> String {
    match error {
        AppError::Transport { message } => message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::channel::mpsc;
    use shared::settings::CardView;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn frame(content: &str) -> Vec<u8> {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
        .into_bytes()
    }

    fn done() -> Vec<u8> {
        b"data: [DONE]\n\n".to_vec()
    }

    /// Replays a fixed list of chunks and records every request.
    struct ScriptedTransport {
        chunks: Vec<Vec<u8>>,
        open_error: Option<AppError>,
        requests: Mutex<Vec<ProxyRequest>>,
    }

    impl ScriptedTransport {
        fn new(chunks: Vec<Vec<u8>>) -> Arc<Self> {
            Arc::new(Self {
                chunks,
                open_error: None,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn failing(error: AppError) -> Arc<Self> {
            Arc::new(Self {
                chunks: Vec::new(),
                open_error: Some(error),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn open(&self, request: &ProxyRequest) -> Result<ByteStream, AppError> {
            self.requests.lock().push(request.clone());
            if let Some(e) = &self.open_error {
                return Err(e.clone());
            }
            let chunks: Vec<Result<Vec<u8>, AppError>> =
                self.chunks.iter().cloned().map(Ok).collect();
            Ok(futures::stream::iter(chunks).boxed())
        }
    }

    /// Hands out chunks as the test pushes them.
    struct ChannelTransport {
        rx: Mutex<Option<mpsc::UnboundedReceiver<Result<Vec<u8>, AppError>>>>,
    }

    #[async_trait]
    impl Transport for ChannelTransport {
        async fn open(&self, _request: &ProxyRequest) -> Result<ByteStream, AppError> {
            let rx = self
                .rx
                .lock()
                .take()
                .ok_or_else(|| AppError::transport("already opened"))?;
            Ok(rx.boxed())
        }
    }

    fn channel_transport() -> (
        Arc<ChannelTransport>,
        mpsc::UnboundedSender<Result<Vec<u8>, AppError>>,
    ) {
        let (tx, rx) = mpsc::unbounded();
        (
            Arc::new(ChannelTransport {
                rx: Mutex::new(Some(rx)),
            }),
            tx,
        )
    }

    fn setup(
        transport: Arc<dyn Transport>,
    ) -> (
        Arc<Orchestrator>,
        Arc<Mutex<AppState>>,
        UnboundedReceiver<AppEvent>,
    ) {
        let state = Arc::new(Mutex::new(AppState::in_memory()));
        let (tx, rx) = unbounded_channel();
        let orchestrator = Arc::new(Orchestrator::new(transport, state.clone(), tx));
        (orchestrator, state, rx)
    }

    async fn wait_for_delta(events: &mut UnboundedReceiver<AppEvent>) -> String {
        while let Some(event) = events.recv().await {
            if let AppEvent::StreamDelta { visible, .. } = event {
                return visible;
            }
        }
        panic!("event channel closed");
    }

    #[tokio::test]
    async fn test_prompt_is_finalized() {
        let transport = ScriptedTransport::new(vec![
            frame("!theme:Gold,#1a1a1a,#2a2a2a,#ffd700,#ffd700,#b8860b!"),
            frame("Hello"),
            frame("!action:view:grid!"),
            done(),
        ]);
        let (orch, state, _events) = setup(transport.clone());

        let report = orch
            .run(Submission::Prompt { text: "hi".into() })
            .await
            .unwrap();
        assert_eq!(report.outcome, ExchangeOutcome::Finalized);
        assert!(report.follow_up.is_none());

        let state = state.lock();
        let card = state.store.card(&report.id).unwrap();
        assert_eq!(card.q, "hi");
        assert_eq!(card.r, "Hello");
        assert_eq!(state.store.theme().name, "Gold");
        assert_eq!(state.settings.view, CardView::Grid);
        assert!(state.store.streaming_id().is_none());
        assert_eq!(state.history.len(), 1);
        assert!(orch.phase().is_none());

        let requests = transport.requests.lock();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].prompt.ends_with("User: hi"));
        assert_eq!(requests[0].session_id.as_deref(), Some(state.session_id.as_str()));
    }

    #[tokio::test]
    async fn test_undo_after_response_removes_card() {
        let transport = ScriptedTransport::new(vec![frame("answer"), done()]);
        let (orch, state, _events) = setup(transport);
        orch.run(Submission::Prompt { text: "q".into() }).await.unwrap();

        let mut state = state.lock();
        assert_eq!(state.undo().unwrap(), "AI Response");
        assert!(state.store.is_empty());
    }

    #[tokio::test]
    async fn test_undo_after_continue_restores_original() {
        let transport = ScriptedTransport::new(vec![frame("Longer answer"), done()]);
        let (orch, state, _events) = setup(transport);
        let id = state
            .lock()
            .store
            .create_card("q", "short", StyleOverrides::default());

        orch.run(Submission::Continue {
            card: id.clone(),
            instruction: "expand".into(),
        })
        .await
        .unwrap();

        let mut state = state.lock();
        assert_eq!(state.store.card(&id).unwrap().r, "Longer answer");
        assert_eq!(state.undo().unwrap(), "AI Response");
        assert_eq!(state.store.card(&id).unwrap().r, "short");
    }

    #[tokio::test]
    async fn test_undo_order_with_delete_during_stream() {
        let (transport, chunks) = channel_transport();
        let (orch, state, mut events) = setup(transport);
        let kept = state
            .lock()
            .store
            .create_card("x", "keep me", StyleOverrides::default());

        let runner = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.run(Submission::Prompt { text: "q".into() }).await })
        };
        chunks.unbounded_send(Ok(frame("Partial"))).unwrap();
        wait_for_delta(&mut events).await;
        let answer = orch.active_card().unwrap();

        state.lock().delete_card(&kept).unwrap();
        chunks.unbounded_send(Ok(done())).unwrap();
        let report = runner.await.unwrap().unwrap();
        assert_eq!(report.outcome, ExchangeOutcome::Finalized);

        let mut state = state.lock();
        let labels: Vec<String> = state.history.entries().map(|e| e.label.clone()).collect();
        assert_eq!(labels, vec!["Delete Card", "AI Response"]);

        assert_eq!(state.undo().unwrap(), "AI Response");
        assert!(!state.store.contains(&answer));
        assert!(!state.store.contains(&kept));

        assert_eq!(state.undo().unwrap(), "Delete Card");
        assert!(state.store.contains(&kept));
        assert!(!state.store.contains(&answer));
        assert!(state.store.streaming_id().is_none());
    }

    #[tokio::test]
    async fn test_split_creates_new_card() {
        let transport = ScriptedTransport::new(vec![frame("second half"), done()]);
        let (orch, state, _events) = setup(transport.clone());
        let source = state
            .lock()
            .store
            .create_card("q", "first half. second half", StyleOverrides::default());

        let report = orch
            .run(Submission::Split {
                card: source.clone(),
                instruction: "by sentence".into(),
            })
            .await
            .unwrap();
        assert_ne!(report.id, source);
        assert_eq!(report.outcome, ExchangeOutcome::Finalized);

        let state = state.lock();
        assert_eq!(state.store.len(), 2);
        let card = state.store.card(&report.id).unwrap();
        assert_eq!(card.q, "Split: by sentence");
        assert_eq!(card.r, "second half");
        assert_eq!(state.store.card(&source).unwrap().r, "first half. second half");
        assert!(transport.requests.lock()[0]
            .prompt
            .contains("SPLIT: by sentence. Text: first half. second half"));
    }

    #[tokio::test]
    async fn test_edit_card_streams_into_pending_copy() {
        let (transport, chunks) = channel_transport();
        let (orch, state, mut events) = setup(transport);
        let source = state
            .lock()
            .store
            .create_card("q", "wordy text", StyleOverrides::default());

        let runner = {
            let orch = orch.clone();
            let card = source.clone();
            tokio::spawn(async move {
                orch.run(Submission::Edit {
                    card,
                    instruction: "tighten".into(),
                })
                .await
            })
        };
        let edited = loop {
            match events.recv().await {
                Some(AppEvent::CardCreated { id }) => break id,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        };
        {
            let state = state.lock();
            let card = state.store.card(&edited).unwrap();
            assert_eq!(card.q, "Edit: tighten");
            assert!(card.is_pending());
            assert!(state.store.is_streaming(&edited));
        }

        chunks.unbounded_send(Ok(frame("terse"))).unwrap();
        chunks.unbounded_send(Ok(done())).unwrap();
        let report = runner.await.unwrap().unwrap();
        assert_eq!(report.id, edited);
        let state = state.lock();
        assert_eq!(state.store.card(&edited).unwrap().r, "terse");
        assert_eq!(state.store.card(&source).unwrap().r, "wordy text");
    }

    #[tokio::test]
    async fn test_split_of_missing_card_claims_nothing() {
        let transport = ScriptedTransport::new(vec![frame("x"), done()]);
        let (orch, state, _events) = setup(transport.clone());

        let result = orch
            .run(Submission::Split {
                card: CardId::from("ghost"),
                instruction: "halves".into(),
            })
            .await;
        assert!(matches!(result, Err(AppError::CardNotFound { .. })));
        assert!(orch.active_card().is_none());
        let state = state.lock();
        assert!(state.store.is_empty());
        assert!(state.store.streaming_id().is_none());
        assert!(transport.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_before_first_chunk() {
        let (transport, _chunks) = channel_transport();
        let (orch, state, mut events) = setup(transport);

        let runner = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.run(Submission::Prompt { text: "q".into() }).await })
        };
        let id = loop {
            match events.recv().await {
                Some(AppEvent::CardCreated { id }) => break id,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        };
        // The slot is filled by the time the card is visible.
        assert_eq!(orch.active_card(), Some(id.clone()));
        assert_eq!(orch.phase(), Some(ExchangePhase::Sent));

        assert!(orch.cancel());
        let report = runner.await.unwrap().unwrap();
        assert_eq!(report.outcome, ExchangeOutcome::Aborted);
        let state = state.lock();
        assert_eq!(state.store.card(&id).unwrap().r, STOPPED_MARKER);
        assert!(state.store.streaming_id().is_none());
    }

    #[tokio::test]
    async fn test_end_of_body_without_sentinel_finalizes() {
        let mut last = frame("tail");
        last.truncate(last.len() - 2);
        let transport = ScriptedTransport::new(vec![frame("head "), last]);
        let (orch, state, _events) = setup(transport);

        let report = orch.run(Submission::Prompt { text: "q".into() }).await.unwrap();
        assert_eq!(report.outcome, ExchangeOutcome::Finalized);
        assert_eq!(state.lock().store.card(&report.id).unwrap().r, "head tail");
    }

    #[tokio::test]
    async fn test_locked_card_keeps_styles() {
        let transport = ScriptedTransport::new(vec![frame("!bg:#000!!pad:4!More"), done()]);
        let (orch, state, _events) = setup(transport);
        let id = {
            let mut state = state.lock();
            let locked = StyleOverrides {
                color: Some("#abc".into()),
                locked: true,
                ..Default::default()
            };
            state.store.create_card("q", "r", locked)
        };
        let before = state.lock().store.card(&id).unwrap().styles.clone();

        let report = orch
            .run(Submission::Continue {
                card: id.clone(),
                instruction: "go on".into(),
            })
            .await
            .unwrap();
        assert_eq!(report.id, id);
        assert_eq!(report.outcome, ExchangeOutcome::Finalized);

        let state = state.lock();
        let card = state.store.card(&id).unwrap();
        assert_eq!(card.styles, before);
        assert_eq!(card.r, "More");
    }

    #[tokio::test]
    async fn test_locked_theme_is_kept() {
        let transport = ScriptedTransport::new(vec![frame("!theme:Gold!Hi"), done()]);
        let (orch, state, mut events) = setup(transport);
        state.lock().store.set_theme_locked(true);

        orch.run(Submission::Prompt { text: "q".into() }).await.unwrap();
        assert_eq!(state.lock().store.theme().name, "ai-Ndraft");

        let mut saw_notice = false;
        while let Ok(event) = events.try_recv() {
            if let AppEvent::Notice(msg) = event {
                saw_notice |= msg.contains("theme change rejected");
            }
        }
        assert!(saw_notice);
    }

    #[tokio::test]
    async fn test_transport_failure_marks_card() {
        let transport = ScriptedTransport::failing(AppError::transport("Proxy Error: 502 Bad Gateway"));
        let (orch, state, _events) = setup(transport);

        let report = orch.run(Submission::Prompt { text: "q".into() }).await.unwrap();
        assert_eq!(
            report.outcome,
            ExchangeOutcome::Failed {
                error: "Proxy Error: 502 Bad Gateway".into()
            }
        );
        let state = state.lock();
        assert_eq!(
            state.store.card(&report.id).unwrap().r,
            "Error: Proxy Error: 502 Bad Gateway"
        );
        assert!(state.store.streaming_id().is_none());
        assert!(state.history.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_stream() {
        let (transport, chunks) = channel_transport();
        let (orch, state, mut events) = setup(transport);

        let runner = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.run(Submission::Prompt { text: "q".into() }).await })
        };

        chunks.unbounded_send(Ok(frame("Partial answer"))).unwrap();
        assert_eq!(wait_for_delta(&mut events).await, "Partial answer");
        assert_eq!(orch.phase(), Some(ExchangePhase::Streaming));

        assert!(orch.cancel());
        let report = runner.await.unwrap().unwrap();
        assert_eq!(report.outcome, ExchangeOutcome::Aborted);
        assert!(!orch.cancel());

        let state = state.lock();
        assert_eq!(
            state.store.card(&report.id).unwrap().r,
            format!("Partial answer\n\n{}", STOPPED_MARKER)
        );
        assert!(state.history.is_empty());
        assert!(state.store.streaming_id().is_none());
    }

    #[tokio::test]
    async fn test_second_submission_is_rejected() {
        let (transport, chunks) = channel_transport();
        let (orch, state, mut events) = setup(transport);

        let runner = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.run(Submission::Prompt { text: "first".into() }).await })
        };
        chunks.unbounded_send(Ok(frame("x"))).unwrap();
        wait_for_delta(&mut events).await;

        let second = orch.run(Submission::Prompt { text: "second".into() }).await;
        assert!(matches!(second, Err(AppError::ExchangeInFlight { .. })));
        assert_eq!(state.lock().store.len(), 1);

        chunks.unbounded_send(Ok(done())).unwrap();
        let report = runner.await.unwrap().unwrap();
        assert_eq!(report.outcome, ExchangeOutcome::Finalized);
    }

    #[tokio::test]
    async fn test_deleting_pending_card_discards_response() {
        let (transport, chunks) = channel_transport();
        let (orch, state, mut events) = setup(transport);

        let runner = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.run(Submission::Prompt { text: "q".into() }).await })
        };
        chunks.unbounded_send(Ok(frame("!theme:Gold!text"))).unwrap();
        wait_for_delta(&mut events).await;

        let id = orch.active_card().unwrap();
        state.lock().delete_card(&id).unwrap();
        chunks.unbounded_send(Ok(done())).unwrap();

        let report = runner.await.unwrap().unwrap();
        assert_eq!(report.outcome, ExchangeOutcome::Aborted);
        let state = state.lock();
        assert!(state.store.is_empty());
        assert_eq!(state.store.theme().name, "ai-Ndraft");
    }

    #[tokio::test]
    async fn test_merge_selected_cards() {
        let (transport, chunks) = channel_transport();
        let (orch, state, mut events) = setup(transport);
        let (a, b) = {
            let mut state = state.lock();
            let a = state.store.create_card("qa", "ra", StyleOverrides::default());
            let b = state.store.create_card("qb", "rb", StyleOverrides::default());
            state.store.toggle_select(&a).unwrap();
            state.store.toggle_select(&b).unwrap();
            (a, b)
        };

        let runner = {
            let orch = orch.clone();
            tokio::spawn(async move {
                orch.run(Submission::Merge {
                    instruction: "shorten".into(),
                })
                .await
            })
        };

        let merged = loop {
            match events.recv().await {
                Some(AppEvent::CardCreated { id }) => break id,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        };
        {
            let state = state.lock();
            assert_eq!(state.store.len(), 3);
            let card = state.store.card(&merged).unwrap();
            assert!(card.is_pending());
            assert_eq!(card.q, "Merged 2 cards");
            assert!(state.store.selected_ids().is_empty());
            assert!(state.store.contains(&a) && state.store.contains(&b));
        }

        chunks.unbounded_send(Ok(frame("combined"))).unwrap();
        chunks.unbounded_send(Ok(done())).unwrap();
        let report = runner.await.unwrap().unwrap();
        assert_eq!(report.id, merged);
        assert_eq!(state.lock().store.card(&merged).unwrap().r, "combined");
    }

    #[tokio::test]
    async fn test_merge_prompt_embeds_sources() {
        let transport = ScriptedTransport::new(vec![frame("ok"), done()]);
        let (orch, state, _events) = setup(transport.clone());
        {
            let mut state = state.lock();
            let a = state.store.create_card("qa", "ra", StyleOverrides::default());
            let b = state.store.create_card("qb", "rb", StyleOverrides::default());
            state.store.toggle_select(&a).unwrap();
            state.store.toggle_select(&b).unwrap();
        }
        orch.run(Submission::Merge {
            instruction: "shorten".into(),
        })
        .await
        .unwrap();

        let prompt = transport.requests.lock()[0].prompt.clone();
        assert!(prompt.contains("Merge these into one based on: shorten"));
        assert!(prompt.contains("---\nqa\nra\n---\nqb\nrb"));
    }

    #[tokio::test]
    async fn test_merge_without_selection_is_rejected() {
        let transport = ScriptedTransport::new(vec![done()]);
        let (orch, state, _events) = setup(transport);
        let result = orch
            .run(Submission::Merge {
                instruction: String::new(),
            })
            .await;
        assert!(matches!(result, Err(AppError::NotEnoughCards { .. })));
        assert!(state.lock().store.is_empty());
    }

    #[tokio::test]
    async fn test_merge_action_queues_follow_up() {
        let transport = ScriptedTransport::new(vec![frame("ok!action:merge!"), done()]);
        let (orch, state, _events) = setup(transport);
        {
            let mut state = state.lock();
            let a = state.store.create_card("qa", "ra", StyleOverrides::default());
            let b = state.store.create_card("qb", "rb", StyleOverrides::default());
            state.store.toggle_select(&a).unwrap();
            state.store.toggle_select(&b).unwrap();
        }
        let report = orch.run(Submission::Prompt { text: "q".into() }).await.unwrap();
        assert_eq!(
            report.follow_up,
            Some(Submission::Merge {
                instruction: String::new()
            })
        );
    }

    #[tokio::test]
    async fn test_clear_action_empties_board() {
        let transport = ScriptedTransport::new(vec![frame("bye!action:clear!"), done()]);
        let (orch, state, _events) = setup(transport);
        state
            .lock()
            .store
            .create_card("old", "card", StyleOverrides::default());

        orch.run(Submission::Prompt { text: "q".into() }).await.unwrap();
        let state = state.lock();
        assert!(state.store.is_empty());
        assert_eq!(state.history.len(), 2);
    }

    #[tokio::test]
    async fn test_auto_tts_requests_speech() {
        let transport = ScriptedTransport::new(vec![frame("# Title\n**bold**"), done()]);
        let (orch, state, mut events) = setup(transport);
        state.lock().settings.auto_tts = true;

        orch.run(Submission::Prompt { text: "q".into() }).await.unwrap();
        let mut spoken = None;
        while let Ok(event) = events.try_recv() {
            if let AppEvent::SpeakRequested { text, .. } = event {
                spoken = Some(text);
            }
        }
        assert_eq!(spoken.as_deref(), Some(" Title\nbold"));
    }

    #[tokio::test]
    async fn test_idle_timeout_fails_exchange() {
        let (transport, _chunks) = channel_transport();
        let state = Arc::new(Mutex::new(AppState::in_memory()));
        let (tx, _rx) = unbounded_channel();
        let orch = Orchestrator::new(transport, state.clone(), tx)
            .with_idle_timeout(Duration::from_millis(20));

        let report = orch.run(Submission::Prompt { text: "q".into() }).await.unwrap();
        assert!(matches!(report.outcome, ExchangeOutcome::Failed { .. }));
        assert!(state.lock().store.streaming_id().is_none());
    }

    #[tokio::test]
    async fn test_generate_theme() {
        let transport =
            ScriptedTransport::new(vec![frame("!theme:Ocean,#001,#002,#eee,#333,#0af!"), done()]);
        let (orch, state, _events) = setup(transport.clone());

        let theme = orch.generate_theme("calm sea", None).await.unwrap().unwrap();
        assert_eq!(theme.name, "Ocean");
        assert_eq!(state.lock().store.theme().primary, "#0af");
        assert!(transport.requests.lock()[0].session_id.is_none());
    }

    #[tokio::test]
    async fn test_generate_theme_respects_locks() {
        let transport = ScriptedTransport::new(vec![frame("!theme:Ocean!"), done()]);
        let (orch, state, _events) = setup(transport.clone());

        let locked_card = state.lock().store.create_card(
            "q",
            "r",
            StyleOverrides {
                locked: true,
                ..Default::default()
            },
        );
        assert!(matches!(
            orch.generate_theme("x", Some(&locked_card)).await,
            Err(AppError::CardLocked { .. })
        ));

        state.lock().store.set_theme_locked(true);
        assert_eq!(orch.generate_theme("x", None).await, Err(AppError::ThemeLocked));
        assert!(transport.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_generate_theme_without_directive() {
        let transport = ScriptedTransport::new(vec![frame("Sorry, no."), done()]);
        let (orch, state, _events) = setup(transport);
        assert_eq!(orch.generate_theme("x", None).await, Ok(None));
        assert_eq!(state.lock().store.theme().name, "ai-Ndraft");
    }
}
