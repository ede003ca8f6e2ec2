//! Client side of the relay: turns the newline-delimited record stream back
//! into a message that grows as text arrives.
//!
//! [`Reconstructor`] is transport-free and can be fed text or single lines.
//! [`ChatClient`] drives it over HTTP with an idle timeout, and [`ChatView`]
//! is a minimal display model used by the terminal client.

use crate::constants::{FALLBACK_REPLY, MAX_RECORD_LINE_BYTES};
use crate::types::{ChatRequest, ConversationTurn, Role, StreamRecord};
use futures_util::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tokio_util::io::StreamReader;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("{0}")]
    Remote(String),

    #[error("Failed to get a response (status {0})")]
    Status(reqwest::StatusCode),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Stream read failed: {0}")]
    Read(#[from] AnyDelimiterCodecError),

    #[error("No data from relay for {0:?}")]
    IdleTimeout(Duration),
}

/// Receives display updates for the in-flight assistant message.
pub trait MessageSink {
    /// Full replacement of the visible content.
    fn update_content(&mut self, content: &str);
    fn set_streaming(&mut self, streaming: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Pending,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeEnd {
    /// A `done` record arrived.
    Completed(String),
    /// The stream ended without a terminal record; the partial text stays.
    Dropped(String),
}

#[derive(Debug, Default)]
pub struct Reconstructor {
    accumulated: String,
    carry: String,
    finished: bool,
}

impl Reconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&self) -> &str {
        &self.accumulated
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feeds decoded transport text. Lines may be split across calls.
    pub fn push_text(
        &mut self,
        text: &str,
        sink: &mut impl MessageSink,
    ) -> Result<Progress, ExchangeError> {
        self.carry.push_str(text);
        while let Some(idx) = self.carry.find('\n') {
            let line: String = self.carry.drain(..=idx).collect();
            if let Progress::Completed = self.push_line(&line, sink)? {
                self.carry.clear();
                return Ok(Progress::Completed);
            }
        }
        Ok(Progress::Pending)
    }

    /// Handles one undecoded line. A line that is not UTF-8 is skipped like
    /// any other unreadable record.
    pub fn push_raw_line(
        &mut self,
        line: &[u8],
        sink: &mut impl MessageSink,
    ) -> Result<Progress, ExchangeError> {
        match std::str::from_utf8(line) {
            Ok(text) => self.push_line(text, sink),
            Err(e) => {
                tracing::warn!(
                    "[⚙️  -> 🖥️ ] Skipping non-UTF-8 record ({} bytes): {}",
                    line.len(),
                    e
                );
                Ok(Progress::Pending)
            }
        }
    }

    /// Handles one record line. Blank and unparseable lines are skipped.
    pub fn push_line(
        &mut self,
        line: &str,
        sink: &mut impl MessageSink,
    ) -> Result<Progress, ExchangeError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Progress::Pending);
        }

        match serde_json::from_str::<StreamRecord>(line) {
            Ok(record) => self.apply(record, sink),
            Err(e) => {
                tracing::warn!(
                    "[⚙️  -> 🖥️ ] Skipping unreadable record ({}): {}",
                    e,
                    crate::str_utils::snippet(line, 200)
                );
                Ok(Progress::Pending)
            }
        }
    }

    pub fn apply(
        &mut self,
        record: StreamRecord,
        sink: &mut impl MessageSink,
    ) -> Result<Progress, ExchangeError> {
        if self.finished {
            tracing::debug!("Ignoring record after terminal: {:?}", record);
            return Ok(Progress::Completed);
        }

        match record {
            StreamRecord::Chunk { text } => {
                self.accumulated.push_str(&text);
                sink.update_content(&self.accumulated);
                Ok(Progress::Pending)
            }
            StreamRecord::Done { text } => {
                if text != self.accumulated {
                    tracing::debug!(
                        "done text ({} bytes) differs from streamed text ({} bytes); keeping streamed",
                        text.len(),
                        self.accumulated.len()
                    );
                }
                self.finished = true;
                sink.update_content(&self.accumulated);
                sink.set_streaming(false);
                Ok(Progress::Completed)
            }
            StreamRecord::Error { error } => {
                self.finished = true;
                sink.set_streaming(false);
                Err(ExchangeError::Remote(error))
            }
        }
    }

    /// Called when the transport has no more data.
    pub fn finish(&mut self, sink: &mut impl MessageSink) -> Result<ExchangeEnd, ExchangeError> {
        if !self.finished && !self.carry.is_empty() {
            let rest = std::mem::take(&mut self.carry);
            self.push_line(&rest, sink)?;
        }
        sink.set_streaming(false);

        if self.finished {
            Ok(ExchangeEnd::Completed(self.accumulated.clone()))
        } else {
            tracing::warn!(
                "[⚙️  -> 🖥️ ] Relay stream ended without a terminal record after {} bytes",
                self.accumulated.len()
            );
            self.finished = true;
            Ok(ExchangeEnd::Dropped(self.accumulated.clone()))
        }
    }

    /// Ends the exchange without further input, e.g. on timeout.
    pub fn abandon(&mut self, sink: &mut impl MessageSink) {
        self.finished = true;
        sink.set_streaming(false);
    }
}

pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
    idle_timeout: Duration,
}

impl ChatClient {
    pub fn new(http: reqwest::Client, base_url: &str, idle_timeout: Duration) -> Self {
        Self {
            http,
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
            idle_timeout,
        }
    }

    /// Runs one exchange, pushing display updates into `sink` as records
    /// arrive.
    pub async fn send(
        &self,
        request: &ChatRequest,
        sink: &mut impl MessageSink,
    ) -> Result<ExchangeEnd, ExchangeError> {
        sink.set_streaming(true);

        let response = match self.http.post(&self.endpoint).json(request).send().await {
            Ok(r) => r,
            Err(e) => {
                sink.set_streaming(false);
                return Err(e.into());
            }
        };
        if !response.status().is_success() {
            sink.set_streaming(false);
            return Err(ExchangeError::Status(response.status()));
        }

        let bytes = response
            .bytes_stream()
            .map(|r| r.map_err(std::io::Error::other));
        let mut lines = FramedRead::new(
            StreamReader::new(bytes),
            AnyDelimiterCodec::new_with_max_length(
                b"\n".to_vec(),
                Vec::new(),
                MAX_RECORD_LINE_BYTES,
            ),
        );

        let mut reconstructor = Reconstructor::new();
        loop {
            let next = match tokio::time::timeout(self.idle_timeout, lines.next()).await {
                Ok(n) => n,
                Err(_) => {
                    reconstructor.abandon(sink);
                    return Err(ExchangeError::IdleTimeout(self.idle_timeout));
                }
            };

            match next {
                Some(Ok(line)) => {
                    if let Progress::Completed = reconstructor.push_raw_line(&line, sink)? {
                        return Ok(ExchangeEnd::Completed(reconstructor.content().to_string()));
                    }
                }
                Some(Err(e)) => {
                    reconstructor.abandon(sink);
                    return Err(e.into());
                }
                None => break,
            }
        }

        reconstructor.finish(sink)
    }
}

/// The conversation as a front-end would display it.
#[derive(Debug, Default, Clone)]
pub struct ChatView {
    pub turns: Vec<ConversationTurn>,
    pub streaming: bool,
    pending_reply: Option<usize>,
}

impl ChatView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the user's message and an empty assistant placeholder, and
    /// returns the request for the relay.
    pub fn begin_exchange(
        &mut self,
        content: &str,
        system_prompt: Option<String>,
        personality_id: Option<String>,
    ) -> ChatRequest {
        self.turns.push(ConversationTurn::user(content));
        let request = ChatRequest {
            messages: self.turns.clone(),
            system_prompt,
            personality_id,
        };
        self.turns.push(ConversationTurn::assistant(""));
        self.pending_reply = Some(self.turns.len() - 1);
        request
    }

    /// Nothing streamed yet: the placeholder is replaced by the fallback
    /// reply. Partial content is left as is.
    pub fn fail_exchange(&mut self) {
        self.streaming = false;
        if let Some(idx) = self.pending_reply.take() {
            let empty = self.turns.get(idx).map(|t| t.content.is_empty()).unwrap_or(false);
            if empty {
                self.turns.remove(idx);
                self.turns.push(ConversationTurn::assistant(FALLBACK_REPLY));
            }
        }
    }

    pub fn end_exchange(&mut self) {
        self.streaming = false;
        self.pending_reply = None;
    }

    pub fn last_reply(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant)
            .map(|t| t.content.as_str())
    }
}

impl MessageSink for ChatView {
    fn update_content(&mut self, content: &str) {
        if let Some(turn) = self.pending_reply.and_then(|idx| self.turns.get_mut(idx)) {
            turn.content.clear();
            turn.content.push_str(content);
        }
    }

    fn set_streaming(&mut self, streaming: bool) {
        self.streaming = streaming;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        contents: Vec<String>,
        streaming: Vec<bool>,
    }

    impl MessageSink for Recorder {
        fn update_content(&mut self, content: &str) {
            self.contents.push(content.to_string());
        }

        fn set_streaming(&mut self, streaming: bool) {
            self.streaming.push(streaming);
        }
    }

    fn wire(record: &StreamRecord) -> String {
        String::from_utf8(record.encode().unwrap().to_vec()).unwrap()
    }

    #[test]
    fn test_chunks_replace_visible_content() {
        let mut view = ChatView::new();
        view.begin_exchange("hi", None, None);
        view.set_streaming(true);
        let mut recon = Reconstructor::new();

        let steps = [
            StreamRecord::chunk("Hel"),
            StreamRecord::chunk("lo"),
            StreamRecord::done("Hello"),
        ];
        let mut seen = Vec::new();
        let mut streaming = Vec::new();
        for record in steps {
            recon.apply(record, &mut view).unwrap();
            seen.push(view.last_reply().unwrap_or_default().to_string());
            streaming.push(view.streaming);
        }

        assert_eq!(seen, vec!["Hel", "Hello", "Hello"]);
        assert_eq!(streaming, vec![true, true, false]);
    }

    #[test]
    fn test_error_without_content_appends_fallback() {
        let mut view = ChatView::new();
        view.begin_exchange("hi", None, None);
        view.set_streaming(true);
        let mut recon = Reconstructor::new();

        let err = recon.apply(StreamRecord::error("x"), &mut view).unwrap_err();
        assert!(matches!(err, ExchangeError::Remote(ref m) if m == "x"));
        assert!(!view.streaming);

        view.fail_exchange();
        assert_eq!(view.turns.len(), 2);
        assert_eq!(view.last_reply(), Some(FALLBACK_REPLY));
    }

    #[test]
    fn test_error_after_partial_keeps_partial() {
        let mut view = ChatView::new();
        view.begin_exchange("hi", None, None);
        let mut recon = Reconstructor::new();

        recon.apply(StreamRecord::chunk("par"), &mut view).unwrap();
        assert!(recon.apply(StreamRecord::error("x"), &mut view).is_err());
        view.fail_exchange();
        assert_eq!(view.last_reply(), Some("par"));
    }

    #[test]
    fn test_push_text_handles_split_records_and_garbage() {
        let body = format!(
            "{}not json\n\n{}{}",
            wire(&StreamRecord::chunk("a \"q\" 😀")),
            wire(&StreamRecord::chunk("\n\t\u{0001}")),
            wire(&StreamRecord::done("a \"q\" 😀\n\t\u{0001}"))
        );

        for split in 1..body.len() {
            if !body.is_char_boundary(split) {
                continue;
            }
            let mut sink = Recorder::default();
            let mut recon = Reconstructor::new();
            assert_eq!(recon.push_text(&body[..split], &mut sink).unwrap(), Progress::Pending);
            assert_eq!(recon.push_text(&body[split..], &mut sink).unwrap(), Progress::Completed);
            assert_eq!(recon.content(), "a \"q\" 😀\n\t\u{0001}");
            assert_eq!(sink.streaming, vec![false]);
        }
    }

    #[test]
    fn test_round_trip_preserves_text() {
        let text = "she said \"hi\" 👋 \\ \u{0008}\u{001b}[0m\r\n";
        let mut sink = Recorder::default();
        let mut recon = Reconstructor::new();
        recon.push_text(&wire(&StreamRecord::chunk(text)), &mut sink).unwrap();
        assert_eq!(sink.contents, vec![text.to_string()]);
    }

    #[test]
    fn test_stream_end_without_terminal() {
        let mut sink = Recorder::default();
        let mut recon = Reconstructor::new();
        recon.push_text(&wire(&StreamRecord::chunk("half")), &mut sink).unwrap();
        let end = recon.finish(&mut sink).unwrap();
        assert_eq!(end, ExchangeEnd::Dropped("half".into()));
        assert_eq!(sink.streaming, vec![false]);
    }

    #[test]
    fn test_unterminated_final_record_is_flushed() {
        let mut sink = Recorder::default();
        let mut recon = Reconstructor::new();
        let line = wire(&StreamRecord::done(""));
        recon.push_text(line.trim_end(), &mut sink).unwrap();
        assert_eq!(recon.finish(&mut sink).unwrap(), ExchangeEnd::Completed(String::new()));
    }

    #[test]
    fn test_non_utf8_line_skipped() {
        let mut sink = Recorder::default();
        let mut recon = Reconstructor::new();
        let mut bad = b"{\"type\":\"chunk\",\"text\":\"".to_vec();
        bad.extend_from_slice(&[0xFF, 0xFE]);
        bad.extend_from_slice(b"\"}");

        assert_eq!(recon.push_raw_line(&bad, &mut sink).unwrap(), Progress::Pending);
        let good = wire(&StreamRecord::chunk("ok"));
        recon.push_raw_line(good.trim_end().as_bytes(), &mut sink).unwrap();
        assert_eq!(recon.content(), "ok");
        assert_eq!(sink.contents, vec!["ok".to_string()]);
    }

    #[test]
    fn test_records_after_terminal_ignored() {
        let mut sink = Recorder::default();
        let mut recon = Reconstructor::new();
        recon.apply(StreamRecord::done(""), &mut sink).unwrap();
        assert_eq!(
            recon.apply(StreamRecord::chunk("late"), &mut sink).unwrap(),
            Progress::Completed
        );
        assert_eq!(recon.content(), "");
    }
}
