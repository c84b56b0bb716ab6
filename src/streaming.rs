//! Turning response byte streams into streams of text chunks.
//!
//! Two body formats reach the chat: the upstream server-sent events stream
//! (`data: {...}` frames ending with `data: [DONE]`) and the plain text stream
//! served by the chat endpoint. Both arrive as arbitrary byte slices, so
//! frames and UTF-8 sequences may be split across reads.

use std::collections::VecDeque;

use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use winnow::combinator::{opt, preceded};
use winnow::token::{take_till, take_while};
use winnow::{PResult, Parser};

use crate::error::ChatError;

/// Incremental text of a reply, in arrival order.
pub type ChunkStream = BoxStream<'static, Result<String, ChatError>>;

/// Raw response body.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ChatError>>;

const DONE_MARKER: &str = "[DONE]";

/// One `name: value` line of an event stream.
fn sse_field<'s>(input: &mut &'s str) -> PResult<(&'s str, &'s str)> {
    (
        take_till(0.., ':'),
        opt(preceded(':', preceded(opt(' '), take_while(0.., |_: char| true)))),
    )
        .map(|(name, value)| (name, value.unwrap_or("")))
        .parse_next(input)
}

/// Splits an event stream into the `data` payloads of its events.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning the payloads of every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }

            let mut input = line;
            match sse_field(&mut input) {
                Ok(("data", value)) => self.data.push(value.to_string()),
                // Comments, ids, event names and retry hints carry no text.
                Ok(_) => {}
                Err(e) => tracing::debug!("Skipping unparsable event line {:?}: {:?}", line, e),
            }
        }
        events
    }

    /// Flush an event left open when the stream closed without a blank line.
    pub fn finish(&mut self) -> Option<String> {
        if self.data.is_empty() {
            None
        } else {
            let event = self.data.join("\n");
            self.data.clear();
            Some(event)
        }
    }
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Text(String),
    Done,
}

fn parse_frame(data: &str) -> Result<Frame, ChatError> {
    if data.trim() == DONE_MARKER {
        return Ok(Frame::Done);
    }
    let chunk: CompletionChunk = serde_json::from_str(data)
        .map_err(|e| ChatError::MalformedBody(format!("{}: {}", e, data)))?;
    let text = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect::<String>();
    Ok(Frame::Text(text))
}

struct SseState {
    bytes: ByteStream,
    decoder: SseDecoder,
    ready: VecDeque<Result<String, ChatError>>,
    done: bool,
}

impl SseState {
    fn accept(&mut self, data: String) {
        match parse_frame(&data) {
            Ok(Frame::Text(text)) if !text.is_empty() => self.ready.push_back(Ok(text)),
            Ok(Frame::Text(_)) => {}
            Ok(Frame::Done) => self.done = true,
            Err(e) => {
                self.ready.push_back(Err(e));
                self.done = true;
            }
        }
    }
}

/// Decode a chat completions event stream into its content deltas.
pub fn decode_sse(bytes: ByteStream) -> ChunkStream {
    let state = SseState {
        bytes,
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(bytes)) => {
                    for data in state.decoder.push(&bytes) {
                        if state.done {
                            break;
                        }
                        state.accept(data);
                    }
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
                None => {
                    if let Some(data) = state.decoder.finish() {
                        state.accept(data);
                    }
                    state.done = true;
                }
            }
        }
    })
    .boxed()
}

/// Decode a plain UTF-8 text body, keeping split multi-byte characters intact.
pub fn decode_text(bytes: ByteStream) -> ChunkStream {
    stream::unfold(
        (bytes, Vec::<u8>::new(), false),
        |(mut bytes, mut pending, done)| async move {
            if done {
                return None;
            }
            loop {
                match bytes.next().await {
                    Some(Ok(chunk)) => {
                        pending.extend_from_slice(&chunk);
                        let valid = match std::str::from_utf8(&pending).map(str::len) {
                            Ok(len) => len,
                            Err(e) if e.error_len().is_none() => e.valid_up_to(),
                            Err(e) => {
                                let err = ChatError::MalformedBody(format!("invalid UTF-8: {}", e));
                                return Some((Err(err), (bytes, pending, true)));
                            }
                        };
                        if valid == 0 {
                            continue;
                        }
                        let rest = pending.split_off(valid);
                        let text = String::from_utf8_lossy(&pending).into_owned();
                        return Some((Ok(text), (bytes, rest, false)));
                    }
                    Some(Err(e)) => return Some((Err(e), (bytes, pending, true))),
                    None if pending.is_empty() => return None,
                    None => {
                        let err = ChatError::MalformedBody("truncated UTF-8 sequence".to_string());
                        return Some((Err(err), (bytes, Vec::new(), true)));
                    }
                }
            }
        },
    )
    .boxed()
}
