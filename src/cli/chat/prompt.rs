use rustyline::{Config, Editor, Result};

use super::conversation_state::SessionState;

/// Hidden first message of every conversation.
pub const SYSTEM_PROMPT: &str = "You are an expert on Amsterdam restaurants. When users ask about \
restaurants, always: 1) Find specific restaurants in Amsterdam that match their description, \
2) Explain why you chose each restaurant, and 3) Include the full address for each restaurant. \
Keep your tone friendly and conversational. If a request is not about restaurants in Amsterdam, \
politely redirect them to ask about Amsterdam restaurants instead.";

pub fn generate_prompt(state: &SessionState) -> String {
    match state {
        SessionState::Error(_) => "(error) > ".to_string(),
        _ => "> ".to_string(),
    }
}

pub fn rl() -> Result<Editor<()>> {
    let config = Config::builder()
        .history_ignore_space(true)
        .build();
    Editor::with_config(config)
}
