//! Prompt text sent to the generation proxy.
//!
//! The system prompt teaches the model the inline directive vocabulary; the
//! builders wrap user instructions for each kind of exchange.

use shared::card::Card;

pub const SYSTEM_PROMPT: &str = r#"You are a helpful, casual AI assistant. You can control styling and app behavior.

1. VISUAL STYLING (Start of response):
   - Page Theme: !theme:Name,BgHex,CardBgHex,TextHex,BorderHex,PrimaryHex!
   - Card Style: !bg:#hex! !text:#hex! !border:#hex! !pad:px! !radius:px! !font:px! !bold! !italic!
   - Custom CSS for this card only: !css:rule!

2. APP ACTIONS (Hidden commands, put at end):
   - !action:merge! (Merges current selection)
   - !action:clear! (Clears the entire board)
   - !action:view:grid! or !action:view:list! or !action:view:full! (Changes view)

Example 1 (Style + Action):
!theme:Gold,#1a1a1a,#2a2a2a,#ffd700,#ffd700,#b8860b!
Hello World
!action:view:grid!

User requests are natural language. Be efficient."#;

/// A fresh prompt: system prompt plus the user's text.
pub fn plain(prompt: &str) -> String {
    format!("{}\n\nUser: {}", SYSTEM_PROMPT, prompt)
}

/// Continue or refine an existing card in place.
pub fn continuation(card: &Card, instruction: &str) -> String {
    let note = if card.is_locked() {
        " (Note: Original card has locked styles)"
    } else {
        ""
    };
    format!(
        "Previous Request: \"{}\"\nPrevious Response: \"{}\"{}\n\nUser Instruction: {}\n\nProvide a continuation or refinement.",
        card.q, card.r, note, instruction
    )
}

/// Split a card's response into a new card.
pub fn split(card: &Card, instruction: &str) -> String {
    plain(&format!("SPLIT: {}. Text: {}", instruction, card.r))
}

/// Rewrite a card's response into a new card.
pub fn edit(card: &Card, instruction: &str) -> String {
    plain(&format!("EDIT: {}. Current: {}", instruction, card.r))
}

/// Merge several cards. Blocks are `---`, request, response; in selection order.
pub fn merge<'a>(cards: impl IntoIterator<Item = &'a Card>, instruction: &str) -> String {
    let content = cards
        .into_iter()
        .map(|c| format!("---\n{}\n{}", c.q, c.r))
        .collect::<Vec<_>>()
        .join("\n");
    let instruction = instruction.trim();
    let body = if instruction.is_empty() {
        format!("Combine these into one coherent response:\n\n{}", content)
    } else {
        format!("Merge these into one based on: {}\n\n{}", instruction, content)
    };
    plain(&body)
}

/// Theme-only generation; the model should answer with a single theme directive.
pub fn theme(description: &str) -> String {
    format!(
        "Generate ONLY a style definition in this exact format:\n!theme:Name,BgHex,CardBgHex,TextHex,BorderHex,PrimaryHex!\nBased on this vibe: {}\nDo not output any other text.",
        description.trim()
    )
}
