//! Line commands understood by the terminal front end.

use shared::settings::CardView;

pub const HELP: &str = "\
Type a prompt and press enter to send it. Commands:
  /continue <id> <text>   continue or refine a card
  /split <id> <text>      split a card into a new one
  /aiedit <id> <text>     rewrite a card into a new one
  /merge [text]           merge the selected cards
  /theme <description>    generate a theme
  /stop                   stop the streaming response
  /undo                   undo the last change
  /edit <id> <text>       replace a card's response by hand
  /delete <id>            delete a card
  /select <id>            toggle selection
  /deselect               clear the selection
  /bulkdelete             delete the selected cards
  /clear                  delete every card
  /lock <id> | /unlock <id>
  /themelock              toggle the global theme lock
  /mode                   toggle light/dark
  /view [list|grid|full]  set or cycle the view
  /focus [id]             open a card in focus view, or close it
  /show <id>              print a card
  /list                   list cards
  /history                list undo snapshots
  /tts | /asr             toggle speech settings
  /proxy [url]            set the proxy URL (empty resets)
  /export [path] | /import <path>
  /help | /quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Continue { card: String, text: String },
    Split { card: String, text: String },
    AiEdit { card: String, text: String },
    Merge(String),
    Theme(String),
    Stop,
    Undo,
    Edit { card: String, text: String },
    Delete(String),
    Select(String),
    Deselect,
    BulkDelete,
    Clear,
    Lock { card: String, locked: bool },
    ThemeLock,
    Mode,
    View(Option<CardView>),
    Focus(Option<String>),
    Show(String),
    List,
    History,
    Tts,
    Asr,
    Proxy(String),
    Export(Option<String>),
    Import(String),
    Help,
    Quit,
    Empty,
    /// Unknown command or missing argument
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Send(line.to_string());
        };

        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };
        let (first, tail) = match args.split_once(char::is_whitespace) {
            Some((first, tail)) => (first.to_string(), tail.trim().to_string()),
            None => (args.to_string(), String::new()),
        };
        let with_card = |build: fn(String, String) -> Command| {
            if first.is_empty() {
                Command::Invalid(format!("/{} needs a card id", name))
            } else {
                build(first.clone(), tail.clone())
            }
        };
        let single = |build: fn(String) -> Command| {
            if args.is_empty() {
                Command::Invalid(format!("/{} needs an argument", name))
            } else {
                build(args.to_string())
            }
        };

        match name.to_ascii_lowercase().as_str() {
            "continue" => with_card(|card, text| Command::Continue { card, text }),
            "split" => with_card(|card, text| Command::Split { card, text }),
            "aiedit" => with_card(|card, text| Command::AiEdit { card, text }),
            "edit" => with_card(|card, text| Command::Edit { card, text }),
            "merge" => Command::Merge(args.to_string()),
            "theme" => single(Command::Theme),
            "stop" => Command::Stop,
            "undo" => Command::Undo,
            "delete" => single(Command::Delete),
            "select" => single(Command::Select),
            "deselect" => Command::Deselect,
            "bulkdelete" => Command::BulkDelete,
            "clear" => Command::Clear,
            "lock" => with_card(|card, _| Command::Lock { card, locked: true }),
            "unlock" => with_card(|card, _| Command::Lock {
                card,
                locked: false,
            }),
            "themelock" => Command::ThemeLock,
            "mode" => Command::Mode,
            "view" if args.is_empty() => Command::View(None),
            "view" => match CardView::parse(args) {
                Some(view) => Command::View(Some(view)),
                None => Command::Invalid(format!("unknown view \"{}\"", args)),
            },
            "focus" => Command::Focus((!args.is_empty()).then(|| args.to_string())),
            "show" => single(Command::Show),
            "list" => Command::List,
            "history" => Command::History,
            "tts" => Command::Tts,
            "asr" => Command::Asr,
            "proxy" => Command::Proxy(args.to_string()),
            "export" => Command::Export((!args.is_empty()).then(|| args.to_string())),
            "import" => single(Command::Import),
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => Command::Invalid(format!("unknown command /{}", other)),
        }
    }
}
