pub mod completion;
pub mod conversation_state;
pub mod prompt;
pub mod rate_limit;
pub mod render;

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use color_print::cstr;
use completion::{CompletionService, LocalEndpoint, RemoteEndpoint};
use conversation_state::ConversationState;
use crossterm::style::{style, Stylize};
use eyre::{bail, Result};
use futures::{future, StreamExt};
use prompt::{generate_prompt, SYSTEM_PROMPT};
use rate_limit::RateGate;
use rustyline::error::ReadlineError;
use tracing::{debug, error, info, warn};

use crate::address;
use crate::config::{redact, Config};
use crate::endpoint::ChatEndpoint;
use crate::error::ChatError;
use crate::map::{Geocoder, GoogleGeocoder, MapDriver, MapEvent, TerminalMap};

const WELCOME_TEXT: &str = cstr!(
    "
<bold>Hi, I'm your Amsterdam restaurant guide.</bold> Tell me what you feel like eating.

Things to try
• Where can I get good vegan food near the Jordaan?
• A romantic Indonesian rijsttafel for two.
• Cheap late-night eats close to Centraal.

Addresses I mention are pinned on the map as I type.

<green>/help</green>         Show the help dialogue
<green>/quit</green>         Quit the application
"
);

const HELP_TEXT: &str = cstr!(
    "
<bold>Amsterdam Restaurant Chat</bold>

<green>/clear</green>        Start over: clear the conversation and the map
<green>/history</green>      Show the conversation so far
<green>/help</green>         Show this help dialogue
<green>/quit</green>         Quit the application
"
);

const HISTORY_FILE: &str = ".restaurant_chat_history";

pub struct ChatContext {
    output: Box<dyn Write>,
    input: Option<String>,
    interactive: bool,
    show_map: bool,
    conversation_state: ConversationState,
    completion: Option<Arc<dyn CompletionService>>,
    geocoder: Option<Arc<dyn Geocoder>>,
    map: Option<MapDriver<TerminalMap>>,
    diagnostics: RateGate,
}

impl ChatContext {
    pub fn new(
        output: Box<dyn Write>,
        input: Option<String>,
        interactive: bool,
        show_map: bool,
    ) -> Self {
        Self {
            output,
            input,
            interactive,
            show_map,
            conversation_state: ConversationState::new(SYSTEM_PROMPT),
            completion: None,
            geocoder: None,
            map: None,
            diagnostics: RateGate::default(),
        }
    }

    /// Use the given services instead of building them from the environment.
    #[cfg(test)]
    pub fn with_services(
        mut self,
        completion: Arc<dyn CompletionService>,
        geocoder: Option<Arc<dyn Geocoder>>,
    ) -> Self {
        self.completion = Some(completion);
        self.geocoder = geocoder;
        self.open_map();
        self
    }

    pub async fn run(&mut self) -> Result<ExitCode> {
        if self.completion.is_none() {
            self.connect()?;
        }

        if self.interactive {
            self.print_welcome()?;
        }

        // Handle non-interactive mode (single query)
        if let Some(input) = self.input.take() {
            self.handle_input(&input).await?;
            self.close_map();
            return Ok(match self.conversation_state.error() {
                Some(_) => ExitCode::FAILURE,
                None => ExitCode::SUCCESS,
            });
        }

        if self.interactive {
            self.run_interactive().await?;
        }
        self.close_map();

        Ok(ExitCode::SUCCESS)
    }

    #[cfg(test)]
    pub fn conversation_state(&self) -> &ConversationState {
        &self.conversation_state
    }

    #[cfg(test)]
    pub fn map(&self) -> Option<&MapDriver<TerminalMap>> {
        self.map.as_ref()
    }

    fn connect(&mut self) -> Result<()> {
        let config = Config::from_env()?;

        let completion: Arc<dyn CompletionService> = match &config.chat_endpoint_url {
            Some(url) => {
                info!("Using chat endpoint at {}", url);
                Arc::new(RemoteEndpoint::new(url.clone()))
            }
            None => {
                match &config.openai_api_key {
                    Some(key) => info!(
                        "Using OpenAI model {} with API key {}",
                        config.openai_model,
                        redact(key)
                    ),
                    None => {
                        warn!("OPENAI_API_KEY is not set");
                        let notice = "OPENAI_API_KEY is not set, replies will fail.";
                        writeln!(self.output, "{}", style(notice).yellow())?;
                    }
                }
                Arc::new(LocalEndpoint::new(Arc::new(ChatEndpoint::from_config(&config))))
            }
        };
        self.completion = Some(completion);

        if self.show_map {
            match GoogleGeocoder::new(config.google_maps_api_key.as_deref()) {
                Ok(geocoder) => self.geocoder = Some(Arc::new(geocoder)),
                Err(e) => {
                    warn!("Map disabled: {}", e);
                    writeln!(self.output, "{}", style(format!("Map unavailable: {}", e)).red())?;
                }
            }
        }
        self.open_map();
        Ok(())
    }

    fn print_welcome(&mut self) -> Result<()> {
        writeln!(self.output, "{}", WELCOME_TEXT)?;
        Ok(())
    }

    async fn run_interactive(&mut self) -> Result<()> {
        let mut rl = prompt::rl()?;
        let history = history_path();
        if let Some(path) = &history {
            if rl.load_history(path).is_err() {
                debug!("No chat history at {}", path.display());
            }
        }

        loop {
            let prompt_text = generate_prompt(self.conversation_state.state());
            let pending = self.conversation_state.input().to_string();
            match rl.readline_with_initial(&prompt_text, (&pending, "")) {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }

                    rl.add_history_entry(line.as_str());

                    if line.trim() == "/quit" {
                        break;
                    }

                    if let Err(e) = self.handle_input(&line).await {
                        writeln!(self.output, "Error: {}", e)?;
                    }
                }
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
                Err(e) => {
                    writeln!(self.output, "Error: {}", e)?;
                    break;
                }
            }
        }

        if let Some(path) = &history {
            if let Err(e) = rl.save_history(path) {
                warn!("Failed to save chat history to {}: {}", path.display(), e);
            }
        }
        Ok(())
    }

    async fn handle_input(&mut self, input: &str) -> Result<()> {
        match input.trim() {
            "/help" => {
                writeln!(self.output, "{}", HELP_TEXT)?;
            }
            "/clear" => {
                self.conversation_state.reset();
                self.close_map();
                self.open_map();
                writeln!(self.output, "Conversation cleared.")?;
            }
            "/history" => {
                let messages = self.conversation_state.visible_messages();
                let transcript = render::render_transcript(messages);
                if transcript.is_empty() {
                    writeln!(self.output, "No messages yet.")?;
                } else {
                    write!(self.output, "{}", transcript)?;
                }
            }
            _ => {
                self.process_chat_input(input).await?;
            }
        }

        Ok(())
    }

    async fn process_chat_input(&mut self, input: &str) -> Result<()> {
        let Some(messages) = self.conversation_state.submit(input) else {
            return Ok(());
        };
        let Some(completion) = self.completion.clone() else {
            self.conversation_state.fail("Chat service not initialized");
            bail!("Chat service not initialized");
        };

        debug!("Sending conversation with {} message(s)", messages.len());
        let mut chunks = match completion.complete(messages).await {
            Ok(chunks) => chunks,
            Err(e) => return self.report_failure(e, input),
        };

        loop {
            tokio::select! {
                chunk = chunks.next() => match chunk {
                    Some(Ok(text)) => self.on_chunk(&text)?,
                    Some(Err(e)) => return self.report_failure(e, input),
                    None => break,
                },
                Some(event) = next_map_event(&mut self.map) => {
                    if let Some(map) = &mut self.map {
                        map.apply(event);
                    }
                }
            }
        }

        self.complete_turn().await
    }

    fn on_chunk(&mut self, text: &str) -> Result<()> {
        self.conversation_state.push_chunk(text);
        write!(self.output, "{}", text)?;
        self.output.flush()?;

        let (length, addresses) = match self.conversation_state.streaming_message() {
            Some(message) => (
                message.content().chars().count(),
                address::extract_settled(message.content()),
            ),
            None => return Ok(()),
        };

        if self.diagnostics.should_check() {
            debug!(
                "Streaming reply: {} char(s), {} settled address(es), map busy: {}",
                length,
                addresses.len(),
                self.map.as_ref().map_or(false, |map| map.map().is_busy())
            );
        }

        if let Some(map) = &mut self.map {
            map.update(&addresses);
        }
        Ok(())
    }

    async fn complete_turn(&mut self) -> Result<()> {
        let content = match self.conversation_state.finish() {
            Some(message) => {
                debug!("Finalized {} at position {}", message.id(), message.position());
                message.content().to_string()
            }
            None => return Ok(()),
        };
        writeln!(self.output)?;

        let addresses = address::extract(&content);
        if let Some(summary) = render::address_summary(&addresses) {
            info!("Found addresses in message: {:?}", addresses);
            writeln!(self.output, "{}", summary)?;
        }

        if let Some(map) = &mut self.map {
            map.update(&addresses);
            map.settle().await;
            debug!("Map shows {} marker(s)", map.map().markers().len());
        }
        Ok(())
    }

    /// End the turn with `e`, keeping the submitted text for the next prompt.
    fn report_failure(&mut self, e: ChatError, input: &str) -> Result<()> {
        error!("Chat request failed: {:?}", e);
        let partial = self
            .conversation_state
            .streaming_message()
            .map_or(false, |message| !message.content().is_empty());

        let message = match &e {
            ChatError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        };
        self.conversation_state.fail(message.as_str());
        self.conversation_state.set_input(input);

        if partial {
            writeln!(self.output)?;
        }
        writeln!(self.output, "{}", style(format!("Error: {}", message)).red())?;
        Ok(())
    }

    fn open_map(&mut self) {
        self.map = match (&self.geocoder, self.show_map) {
            (Some(geocoder), true) => Some(MapDriver::new(
                TerminalMap::new(Box::new(io::stdout())),
                Arc::clone(geocoder),
            )),
            _ => None,
        };
    }

    fn close_map(&mut self) {
        if let Some(mut map) = self.map.take() {
            map.teardown();
        }
    }
}

async fn next_map_event(map: &mut Option<MapDriver<TerminalMap>>) -> Option<MapEvent> {
    match map {
        Some(map) => map.next_event().await,
        None => future::pending().await,
    }
}

fn history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(HISTORY_FILE))
}
