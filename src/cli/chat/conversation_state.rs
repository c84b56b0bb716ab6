use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A message as sent to the completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// Assistant reply still receiving chunks.
    Streaming,
    Final,
}

/// One entry of the conversation log. Only a streaming message can change.
#[derive(Debug, Clone)]
pub struct Message {
    id: String,
    role: Role,
    content: String,
    position: usize,
    created_at: DateTime<Utc>,
    status: MessageStatus,
}

impl Message {
    fn new(
        id: String,
        role: Role,
        content: String,
        position: usize,
        status: MessageStatus,
    ) -> Self {
        Self {
            id,
            role,
            content,
            position,
            created_at: Utc::now(),
            status,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    pub fn is_final(&self) -> bool {
        self.status() == MessageStatus::Final
    }

    fn to_wire(&self) -> WireMessage {
        WireMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Request dispatched, no response yet.
    Sending,
    Streaming,
    /// The last turn failed; holds the user-visible error.
    Error(String),
}

/// The conversation log and the request lifecycle of the chat.
///
/// The first message is always the hidden system prompt. One turn at a time:
/// `submit` hands out the log to send, `begin_response`/`push_chunk` build the
/// assistant reply, and `finish` or `fail` ends the turn.
pub struct ConversationState {
    system_prompt: String,
    messages: Vec<Message>,
    state: SessionState,
    input: String,
    next_id: u64,
}

impl ConversationState {
    pub fn new(system_prompt: &str) -> Self {
        let mut state = Self {
            system_prompt: system_prompt.to_string(),
            messages: Vec::new(),
            state: SessionState::Idle,
            input: String::new(),
            next_id: 0,
        };
        state.push_system_message();
        state
    }

    /// Append a user message and return the full log to dispatch.
    ///
    /// Returns `None` without touching the log when the text is blank or a
    /// turn is already underway. A previous error is cleared first.
    pub fn submit(&mut self, text: &str) -> Option<Vec<WireMessage>> {
        if text.trim().is_empty() {
            debug!("Empty input, skipping submission");
            return None;
        }
        match self.state {
            SessionState::Sending | SessionState::Streaming => {
                warn!("Submission rejected: a reply is still in progress");
                return None;
            }
            SessionState::Error(_) => self.dismiss_error(),
            SessionState::Idle => {}
        }

        self.push(Role::User, text.to_string(), MessageStatus::Final);
        self.input.clear();
        self.state = SessionState::Sending;
        Some(self.messages.iter().map(Message::to_wire).collect())
    }

    /// The response started: open an empty assistant message.
    pub fn begin_response(&mut self) {
        if self.state != SessionState::Sending {
            return;
        }
        self.push(Role::Assistant, String::new(), MessageStatus::Streaming);
        self.state = SessionState::Streaming;
    }

    /// Append a streamed chunk to the assistant message.
    pub fn push_chunk(&mut self, chunk: &str) {
        if self.state == SessionState::Sending {
            self.begin_response();
        }
        if self.state != SessionState::Streaming {
            debug!("Dropping chunk received outside of a streaming reply");
            return;
        }
        if let Some(message) = self.messages.last_mut() {
            if message.status == MessageStatus::Streaming {
                message.content.push_str(chunk);
            }
        }
    }

    /// Finalize the assistant message and return to idle.
    pub fn finish(&mut self) -> Option<&Message> {
        match self.state {
            SessionState::Sending => self.begin_response(),
            SessionState::Streaming => {}
            _ => return None,
        }
        self.state = SessionState::Idle;
        let message = self.messages.last_mut()?;
        message.status = MessageStatus::Final;
        Some(&*message)
    }

    /// End the turn with an error, discarding the partial reply.
    pub fn fail(&mut self, error: impl Into<String>) {
        if !matches!(self.state, SessionState::Sending | SessionState::Streaming) {
            return;
        }
        if matches!(self.messages.last(), Some(m) if m.status == MessageStatus::Streaming) {
            self.messages.pop();
        }
        self.state = SessionState::Error(error.into());
    }

    pub fn dismiss_error(&mut self) {
        if matches!(self.state, SessionState::Error(_)) {
            self.state = SessionState::Idle;
        }
    }

    /// Back to just the system prompt, from any state.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.input.clear();
        self.state = SessionState::Idle;
        self.push_system_message();
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[cfg(test)]
    pub fn is_idle(&self) -> bool {
        self.state == SessionState::Idle
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            SessionState::Error(message) => Some(message),
            _ => None,
        }
    }

    /// Text to pre-fill the next prompt with.
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, input: &str) {
        self.input = input.to_string();
    }

    #[cfg(test)]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Messages shown to the user: everything but the system prompt.
    pub fn visible_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }

    /// The assistant message currently receiving chunks.
    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.last().filter(|m| !m.is_final())
    }

    fn push_system_message(&mut self) {
        let prompt = self.system_prompt.clone();
        self.push(Role::System, prompt, MessageStatus::Final);
    }

    fn push(&mut self, role: Role, content: String, status: MessageStatus) {
        self.next_id += 1;
        let id = format!("{}-{}", role.as_str(), self.next_id);
        let position = self.messages.len();
        self.messages.push(Message::new(id, role, content, position, status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROMPT: &str = "You are an expert on Amsterdam restaurants.";

    #[test]
    fn test_starts_with_hidden_system_message() {
        let state = ConversationState::new(PROMPT);
        assert_eq!(state.messages().len(), 1);
        assert_eq!(state.messages()[0].role(), Role::System);
        assert_eq!(state.visible_messages().count(), 0);
        assert!(state.is_idle());
    }

    #[test]
    fn test_blank_submit_is_noop() {
        let mut state = ConversationState::new(PROMPT);
        assert!(state.submit("").is_none());
        assert!(state.submit("   \n\t").is_none());
        assert_eq!(state.messages().len(), 1);
        assert!(state.is_idle());
    }

    #[test]
    fn test_submit_dispatches_full_log() {
        let mut state = ConversationState::new(PROMPT);
        let wire = state.submit("vegan food").unwrap();
        assert_eq!(
            wire,
            vec![
                WireMessage { role: Role::System, content: PROMPT.to_string() },
                WireMessage { role: Role::User, content: "vegan food".to_string() },
            ]
        );
        assert_eq!(state.state(), &SessionState::Sending);
    }

    #[test]
    fn test_submit_while_busy_is_rejected() {
        let mut state = ConversationState::new(PROMPT);
        state.submit("vegan food").unwrap();
        assert!(state.submit("pizza").is_none());

        state.push_chunk("Try ");
        assert!(state.submit("pizza").is_none());
        assert_eq!(state.messages().len(), 3);
    }

    #[test]
    fn test_chunks_append_in_order_and_finalize() {
        let mut state = ConversationState::new(PROMPT);
        state.submit("vegan food").unwrap();
        state.begin_response();
        assert_eq!(state.state(), &SessionState::Streaming);
        assert_eq!(state.streaming_message().unwrap().content(), "");

        for chunk in ["De Groene ", "Olifant, ", "Westerstraat 35"] {
            state.push_chunk(chunk);
        }
        let message = state.finish().unwrap();
        assert_eq!(message.content(), "De Groene Olifant, Westerstraat 35");
        assert!(message.is_final());
        assert_eq!(message.position(), 2);
        assert!(state.is_idle());

        // Finalized messages no longer take chunks.
        state.push_chunk("more");
        assert_eq!(state.messages()[2].content(), "De Groene Olifant, Westerstraat 35");
    }

    #[test]
    fn test_first_chunk_opens_reply() {
        let mut state = ConversationState::new(PROMPT);
        state.submit("vegan food").unwrap();
        assert!(state.streaming_message().is_none());

        state.push_chunk("De Groene");
        assert_eq!(state.state(), &SessionState::Streaming);
        assert_eq!(state.streaming_message().unwrap().content(), "De Groene");
        assert_eq!(state.messages().len(), 3);
    }

    #[test]
    fn test_empty_stream_finalizes_empty_reply() {
        let mut state = ConversationState::new(PROMPT);
        state.submit("anything").unwrap();
        let message = state.finish().unwrap();
        assert_eq!(message.role(), Role::Assistant);
        assert_eq!(message.content(), "");
    }

    #[test]
    fn test_failure_discards_partial_reply() {
        let mut state = ConversationState::new(PROMPT);
        state.submit("vegan food").unwrap();
        state.push_chunk("De Groene");
        state.fail("connection reset");

        assert_eq!(state.error(), Some("connection reset"));
        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.messages()[1].role(), Role::User);
        assert!(state.streaming_message().is_none());

        // The next submission clears the error.
        assert!(state.submit("again").is_some());
        assert!(state.error().is_none());
    }

    #[test]
    fn test_dismiss_error() {
        let mut state = ConversationState::new(PROMPT);
        state.submit("vegan food").unwrap();
        state.fail("boom");
        state.dismiss_error();
        assert!(state.is_idle());
    }

    #[test]
    fn test_reset_from_any_state() {
        let mut state = ConversationState::new(PROMPT);
        state.submit("vegan food").unwrap();
        state.push_chunk("partial");
        state.set_input("draft");
        state.reset();

        assert_eq!(state.messages().len(), 1);
        assert_eq!(state.messages()[0].role(), Role::System);
        assert_eq!(state.messages()[0].content(), PROMPT);
        assert!(state.is_idle());
        assert_eq!(state.input(), "");

        // Late chunks from the abandoned turn are ignored.
        state.push_chunk("late");
        assert_eq!(state.messages().len(), 1);

        state.submit("x").unwrap();
        state.fail("boom");
        state.reset();
        assert!(state.error().is_none());
        assert_eq!(state.messages().len(), 1);
    }

    #[test]
    fn test_wire_message_json_shape() {
        let json = serde_json::to_string(&WireMessage {
            role: Role::Assistant,
            content: "hi".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }
}
