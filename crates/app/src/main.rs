//! ai-Ndraft - a terminal front end for the card workspace.

mod commands;
mod config;
mod controller;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

use commands::{Command, HELP};
use config::AppConfig;
use controller::Controller;
use shared::card::CardId;
use shared::events::{AppEvent, ExchangeOutcome};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (controller, events) = Controller::init(AppConfig::from_env());
    tracing::info!("data directory: {}", controller.config().data_dir.display());
    let controller = Arc::new(controller);

    tokio::spawn(print_events(events));

    println!("ai-Ndraft. Type /help for commands.");
    list_cards(&controller);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Command::parse(&line) {
            Command::Quit => break,
            command => handle(&controller, command),
        }
    }

    controller.cancel();
    Ok(())
}

/// Exchanges run in the background so `/stop` stays responsive.
fn handle(ctrl: &Arc<Controller>, command: Command) {
    match command {
        Command::Send(text) => spawn_exchange(ctrl, move |c| async move {
            c.send(&text).await.map(|_| ())
        }),
        Command::Continue { card, text } => {
            if let Some(id) = resolve(ctrl, &card) {
                spawn_exchange(ctrl, move |c| async move {
                    c.continue_card(&id, &text).await.map(|_| ())
                });
            }
        }
        Command::Split { card, text } => {
            if let Some(id) = resolve(ctrl, &card) {
                spawn_exchange(ctrl, move |c| async move {
                    c.split_card(&id, &text).await.map(|_| ())
                });
            }
        }
        Command::AiEdit { card, text } => {
            if let Some(id) = resolve(ctrl, &card) {
                spawn_exchange(ctrl, move |c| async move {
                    c.ai_edit_card(&id, &text).await.map(|_| ())
                });
            }
        }
        Command::Merge(text) => spawn_exchange(ctrl, move |c| async move {
            c.merge_selected(&text).await.map(|_| ())
        }),
        Command::Theme(description) => {
            let card = ctrl.state().lock().focused.clone();
            spawn_exchange(ctrl, move |c| async move {
                c.generate_theme(&description, card.as_ref()).await.map(|_| ())
            });
        }
        Command::Stop => {
            if !ctrl.cancel() {
                println!("Nothing is streaming.");
            }
        }
        Command::Undo => report(ctrl.undo().map(|_| ())),
        Command::Edit { card, text } => {
            if let Some(id) = resolve(ctrl, &card) {
                report(ctrl.edit_card(&id, None, Some(&text)));
            }
        }
        Command::Delete(card) => {
            if let Some(id) = resolve(ctrl, &card) {
                report(ctrl.delete_card(&id));
            }
        }
        Command::Select(card) => {
            if let Some(id) = resolve(ctrl, &card) {
                report(ctrl.toggle_select(&id).map(|_| ()));
            }
        }
        Command::Deselect => ctrl.clear_selection(),
        Command::BulkDelete => report(ctrl.bulk_delete().map(|_| ())),
        Command::Clear => {
            ctrl.clear_all();
        }
        Command::Lock { card, locked } => {
            if let Some(id) = resolve(ctrl, &card) {
                report(ctrl.set_card_locked(&id, locked));
            }
        }
        Command::ThemeLock => {
            ctrl.toggle_theme_lock();
        }
        Command::Mode => {
            ctrl.toggle_theme_mode();
        }
        Command::View(Some(view)) => ctrl.set_view(view),
        Command::View(None) => {
            ctrl.cycle_view();
        }
        Command::Focus(None) => report(ctrl.focus(None)),
        Command::Focus(Some(card)) => {
            if let Some(id) = resolve(ctrl, &card) {
                report(ctrl.focus(Some(&id)));
            }
        }
        Command::Show(card) => {
            if let Some(id) = resolve(ctrl, &card) {
                show_card(ctrl, &id);
            }
        }
        Command::List => list_cards(ctrl),
        Command::History => {
            let state = ctrl.state();
            let state = state.lock();
            if state.history.is_empty() {
                println!("No snapshots.");
            }
            for entry in state.history.entries() {
                println!("  {} ({})", entry.label, entry.relative_time());
            }
        }
        Command::Tts => {
            ctrl.toggle_tts();
        }
        Command::Asr => {
            ctrl.toggle_asr();
        }
        Command::Proxy(url) => report(ctrl.set_proxy_url(&url).map(|_| ())),
        Command::Export(path) => report(ctrl.export_to(path.as_deref().map(Path::new)).map(|_| ())),
        Command::Import(path) => report(ctrl.import_from(Path::new(&path))),
        Command::Help => println!("{}", HELP),
        Command::Invalid(message) => println!("{}", message),
        Command::Empty | Command::Quit => {}
    }
}

fn spawn_exchange<F, Fut>(ctrl: &Arc<Controller>, run: F)
where
    F: FnOnce(Arc<Controller>) -> Fut,
    Fut: std::future::Future<Output = Result<(), shared::AppError>> + Send + 'static,
{
    let fut = run(ctrl.clone());
    tokio::spawn(async move { report(fut.await) });
}

fn report(result: Result<(), shared::AppError>) {
    if let Err(e) = result {
        println!("! {}", e);
    }
}

fn resolve(ctrl: &Controller, prefix: &str) -> Option<CardId> {
    let id = ctrl.find_card(prefix);
    if id.is_none() {
        println!("No single card matches \"{}\".", prefix);
    }
    id
}

fn short(id: &CardId) -> String {
    id.as_str().chars().take(8).collect()
}

fn list_cards(ctrl: &Controller) {
    let state = ctrl.state();
    let state = state.lock();
    if state.store.is_empty() {
        println!("(no cards)");
        return;
    }
    for card in state.store.cards() {
        let mut flags = String::new();
        if state.store.is_selected(&card.id) {
            flags.push('*');
        }
        if card.is_locked() {
            flags.push('L');
        }
        let preview: String = card.r.lines().next().unwrap_or("").chars().take(60).collect();
        println!("[{}]{:<2} {} -> {}", short(&card.id), flags, card.q, preview);
    }
}

fn show_card(ctrl: &Controller, id: &CardId) {
    let state = ctrl.state();
    let state = state.lock();
    let Some(card) = state.store.card(id) else { return };
    println!("[{}] {}\n{}", card.id, card.q, card.r);
    if let Some(css) = card.styles.scoped_css(&card.id) {
        println!("css: {}", css);
    }
}

/// Render events as plain text. Streaming text is printed as it grows.
async fn print_events(mut events: UnboundedReceiver<AppEvent>) {
    let mut shown = String::new();
    while let Some(event) = events.recv().await {
        match event {
            AppEvent::Notice(message) => println!("-- {}", message),
            AppEvent::StreamStarted { id } => {
                shown.clear();
                println!("[{}] ", short(&id));
            }
            AppEvent::StreamDelta { visible, .. } => {
                match visible.strip_prefix(shown.as_str()) {
                    Some(rest) => print!("{}", rest),
                    None => print!("\n{}", visible),
                }
                let _ = std::io::stdout().flush();
                shown = visible;
            }
            AppEvent::ExchangeFinished { id, outcome } => {
                println!();
                match outcome {
                    ExchangeOutcome::Finalized => println!("[{}] done", short(&id)),
                    ExchangeOutcome::Aborted => println!("[{}] stopped", short(&id)),
                    ExchangeOutcome::Failed { error } => println!("[{}] failed: {}", short(&id), error),
                }
                shown.clear();
            }
            AppEvent::CardCreated { id } => tracing::debug!("card {} created", id),
            AppEvent::CardsRemoved { ids } => println!("-- removed {} card(s)", ids.len()),
            AppEvent::ThemeChanged { theme } => {
                println!("-- theme {} ({} on {})", theme.name, theme.text, theme.bg)
            }
            AppEvent::ViewChanged { view } => println!("-- view: {}", view.as_str()),
            AppEvent::SelectionChanged { selected } => println!("-- {} selected", selected.len()),
            AppEvent::SpeakRequested { text, .. } => {
                tracing::debug!("speech requested ({} chars)", text.chars().count())
            }
            AppEvent::CardUpdated { .. } | AppEvent::BoardReplaced => {}
        }
    }
}
