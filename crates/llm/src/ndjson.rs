//! Incremental decoding of newline-delimited JSON response bodies.
//!
//! Body chunks arrive with arbitrary boundaries: a multi-byte character or a JSON line may be
//! split across any number of chunks. The decoders here buffer the incomplete tail and only hand
//! out complete characters and complete lines.

use std::collections::VecDeque;

use futures::{Stream, StreamExt};

use super::provider::{ByteStream, GenerateFragment, ProviderError};

const REPLACEMENT: char = '\u{FFFD}';

/// Decodes UTF-8 across chunk boundaries.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes every complete character of `pending + chunk`, keeping an incomplete trailing
    /// sequence for the next call. Invalid bytes become U+FFFD.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut decoded = String::with_capacity(self.pending.len());
        let mut consumed = 0;

        loop {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(valid) => {
                    decoded.push_str(valid);
                    consumed = self.pending.len();
                    break;
                }
                Err(error) => {
                    let valid_up_to = consumed + error.valid_up_to();
                    if let Ok(valid) = std::str::from_utf8(&self.pending[consumed..valid_up_to]) {
                        decoded.push_str(valid);
                    }

                    match error.error_len() {
                        Some(invalid_len) => {
                            decoded.push(REPLACEMENT);
                            consumed = valid_up_to + invalid_len;
                        }
                        None => {
                            // Incomplete sequence at the end; wait for more bytes.
                            consumed = valid_up_to;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..consumed);
        decoded
    }

    /// Flushes whatever is still buffered at end-of-data.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }

        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

/// Splits decoded text into non-empty lines.
#[derive(Debug, Default)]
pub struct LineDecoder {
    partial: String,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every line completed by `text`, in order, without blank lines.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.partial.push_str(text);

        let mut lines = Vec::new();
        while let Some(newline) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=newline).collect();
            if let Some(line) = Self::normalize(&line) {
                lines.push(line);
            }
        }
        lines
    }

    /// Returns the trailing unterminated line, if it has content.
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.partial);
        Self::normalize(&line)
    }

    fn normalize(line: &str) -> Option<String> {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    }
}

/// One item produced while decoding a response body.
#[derive(Debug)]
pub enum StreamItem {
    Fragment(GenerateFragment),
    /// A line that is not a valid fragment; the stream continues after it.
    Malformed { line: String, error: String },
    /// The body failed mid-transfer; nothing follows this item.
    Failed(ProviderError),
}

/// Byte chunks to parsed lines, without any I/O.
#[derive(Debug, Default)]
pub struct FragmentDecoder {
    text: Utf8ChunkDecoder,
    lines: LineDecoder,
}

impl FragmentDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamItem> {
        let text = self.text.decode(chunk);
        self.lines.push(&text).into_iter().map(parse_line).collect()
    }

    pub fn finish(&mut self) -> Vec<StreamItem> {
        let tail = self.text.finish();
        let mut lines = self.lines.push(&tail);
        lines.extend(self.lines.finish());
        lines.into_iter().map(parse_line).collect()
    }
}

fn parse_line(line: String) -> StreamItem {
    match serde_json::from_str::<GenerateFragment>(&line) {
        Ok(fragment) => StreamItem::Fragment(fragment),
        Err(error) => StreamItem::Malformed {
            line,
            error: error.to_string(),
        },
    }
}

pub type FragmentStream = std::pin::Pin<Box<dyn Stream<Item = StreamItem> + Send + 'static>>;

struct DecodeState {
    body: Option<ByteStream>,
    decoder: FragmentDecoder,
    ready: VecDeque<StreamItem>,
}

/// Lazily turns a response body into parsed fragments.
///
/// The stream is finite and cannot be restarted: it ends after the body ends (with any
/// unterminated last line flushed) or right after a [`StreamItem::Failed`]. Dropping it drops the
/// body, which stops the transfer.
pub fn fragment_stream(body: ByteStream) -> FragmentStream {
    let state = DecodeState {
        body: Some(body),
        decoder: FragmentDecoder::new(),
        ready: VecDeque::new(),
    };

    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }

            let body = state.body.as_mut()?;
            match body.next().await {
                Some(Ok(chunk)) => {
                    state.ready.extend(state.decoder.push(&chunk));
                }
                Some(Err(error)) => {
                    state.body = None;
                    state.ready.clear();
                    return Some((StreamItem::Failed(error), state));
                }
                None => {
                    state.body = None;
                    state.ready.extend(state.decoder.finish());
                }
            }
        }
    });

    Box::pin(stream)
}
