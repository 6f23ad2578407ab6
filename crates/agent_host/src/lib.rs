//! Agent Host - drives exchanges with the generation proxy
//!
//! This crate provides:
//! - Prompt builders that teach the model the directive vocabulary
//! - Parsing of the application actions a response may request
//! - The orchestrator that streams a response into a card and applies its directives

pub mod actions;
pub mod orchestrator;
pub mod prompts;

pub use actions::AppAction;
pub use orchestrator::{
    ExchangePhase, ExchangeReport, Orchestrator, Submission, DEFAULT_IDLE_TIMEOUT, STOPPED_MARKER,
};
