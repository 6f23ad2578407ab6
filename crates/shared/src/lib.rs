pub mod card;
pub mod directives;
pub mod error;
pub mod events;
pub mod history;
pub mod theme;

pub use error::AppError;

pub mod settings {
    use serde::{Deserialize, Serialize};

    /// Layout the board is rendered in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum CardView {
        #[default]
        List,
        Grid,
        Full,
    }

    impl CardView {
        pub fn as_str(&self) -> &'static str {
            match self {
                CardView::List => "list",
                CardView::Grid => "grid",
                CardView::Full => "full",
            }
        }

        /// Parse a view name, as used by `!action:view:<name>!`.
        pub fn parse(name: &str) -> Option<Self> {
            match name.trim().to_lowercase().as_str() {
                "list" => Some(CardView::List),
                "grid" => Some(CardView::Grid),
                "full" => Some(CardView::Full),
                _ => None,
            }
        }

        /// list -> grid -> full -> list
        pub fn next(&self) -> Self {
            match self {
                CardView::List => CardView::Grid,
                CardView::Grid => CardView::Full,
                CardView::Full => CardView::List,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct Settings {
        pub view: CardView,
        #[serde(rename = "autoTTS")]
        pub auto_tts: bool,
        pub asr_enabled: bool,
        /// Empty means "use the configured default endpoint"
        pub proxy_url: String,
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                view: CardView::List,
                auto_tts: false,
                asr_enabled: false,
                proxy_url: String::new(),
            }
        }
    }
}

pub mod agent_api {
    use serde::{Deserialize, Serialize};

    /// Body POSTed to the generation proxy.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ProxyRequest {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub session_id: Option<String>,
        pub prompt: String,
    }

    impl ProxyRequest {
        pub fn new(session_id: impl Into<String>, prompt: impl Into<String>) -> Self {
            Self {
                session_id: Some(session_id.into()),
                prompt: prompt.into(),
            }
        }

        /// Request without a session, used for theme-only generations.
        pub fn anonymous(prompt: impl Into<String>) -> Self {
            Self {
                session_id: None,
                prompt: prompt.into(),
            }
        }
    }
}
