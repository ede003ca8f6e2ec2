use crate::constants::{GENERIC_FAILURE_MESSAGE, MAX_PENDING_LINE_BYTES};
use crate::framing::{classify_line, FramingError, LineBuffer, ProviderLine, Utf8Carry};
use crate::logging::StreamMetric;
use crate::types::StreamRecord;
use bytes::Bytes;
use futures_util::Stream;
use futures_util::StreamExt;
use tokio::sync::mpsc;

/// Re-frames provider bytes into [`StreamRecord`]s.
///
/// Owns the accumulated reply for one exchange. `feed` only ever yields
/// `chunk` records; the single terminal record comes from `finish`.
pub struct Reframer {
    carry: Utf8Carry,
    lines: LineBuffer,
    accumulated: String,
    metric: StreamMetric,
}

impl Default for Reframer {
    fn default() -> Self {
        Self::new()
    }
}

impl Reframer {
    pub fn new() -> Self {
        Self::with_line_limit(MAX_PENDING_LINE_BYTES)
    }

    pub fn with_line_limit(max_pending: usize) -> Self {
        Self {
            carry: Utf8Carry::new(),
            lines: LineBuffer::new(max_pending),
            accumulated: String::new(),
            metric: StreamMetric::new(),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<StreamRecord>, FramingError> {
        self.metric.record_read(bytes.len());
        let text = self.carry.decode(bytes)?;
        self.lines.push(&text)?;

        let mut records = Vec::new();
        while let Some(line) = self.lines.next_line() {
            if let Some(record) = self.process_line(&line) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Flushes an unterminated last line and closes with `done`.
    pub fn finish(mut self) -> Vec<StreamRecord> {
        let mut records = Vec::new();
        if let Some(line) = self.lines.take_remainder() {
            if let Some(record) = self.process_line(&line) {
                records.push(record);
            }
        }
        if self.carry.pending_len() > 0 {
            tracing::warn!(
                "[☁️  -> ⚙️ ] Stream ended inside a UTF-8 sequence; dropping {} bytes",
                self.carry.pending_len()
            );
        }

        self.metric.log_summary();
        records.push(StreamRecord::done(self.accumulated));
        records
    }

    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    pub fn metric(&self) -> &StreamMetric {
        &self.metric
    }

    fn process_line(&mut self, line: &str) -> Option<StreamRecord> {
        match classify_line(line) {
            ProviderLine::Delta {
                text,
                finish_reason,
            } => {
                if finish_reason.is_some() {
                    self.metric.last_finish_reason = finish_reason;
                }
                if text.is_empty() {
                    return None;
                }
                self.accumulated.push_str(&text);
                self.metric.record_delta(&text);
                Some(StreamRecord::chunk(text))
            }
            ProviderLine::Sentinel => {
                tracing::debug!("[☁️  -> ⚙️ ] [DONE] marker received");
                self.metric.sentinels += 1;
                None
            }
            ProviderLine::Ignored => {
                if !line.is_empty() {
                    self.metric.ignored_lines += 1;
                }
                None
            }
            ProviderLine::Malformed(e) => {
                tracing::warn!(
                    "[☁️  -> ⚙️ ] Skipping malformed line ({}): {}",
                    e,
                    crate::str_utils::snippet(line, 200)
                );
                self.metric.malformed_lines += 1;
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// `done` was delivered.
    Completed,
    /// `error` was delivered (or attempted).
    Failed,
    /// The downstream receiver went away; the upstream was dropped.
    ClientGone,
}

pub struct StreamHandler;

impl StreamHandler {
    /// Pumps `upstream` through a [`Reframer`] into `tx`.
    ///
    /// Sends zero or more `chunk` records and then exactly one terminal
    /// record, unless the receiver is dropped first, in which case reading
    /// stops and `upstream` is dropped with it.
    pub async fn relay<S, E>(mut upstream: S, tx: mpsc::Sender<StreamRecord>) -> RelayOutcome
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let mut reframer = Reframer::new();

        while let Some(read) = upstream.next().await {
            let bytes = match read {
                Ok(b) => b,
                Err(e) => {
                    tracing::error!("[☁️  -> ⚙️ ] Upstream read failed: {}", e);
                    return Self::fail(&tx).await;
                }
            };

            let records = match reframer.feed(&bytes) {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!("[☁️  -> ⚙️ ] Framing failed: {}", e);
                    return Self::fail(&tx).await;
                }
            };

            for record in records {
                if tx.send(record).await.is_err() {
                    tracing::info!(
                        "[⚙️  -> 🖥️ ] Client disconnected after {} chars; aborting upstream",
                        reframer.accumulated().len()
                    );
                    return RelayOutcome::ClientGone;
                }
            }
        }

        for record in reframer.finish() {
            if tx.send(record).await.is_err() {
                tracing::info!("[⚙️  -> 🖥️ ] Client disconnected before completion");
                return RelayOutcome::ClientGone;
            }
        }
        RelayOutcome::Completed
    }

    async fn fail(tx: &mpsc::Sender<StreamRecord>) -> RelayOutcome {
        if tx
            .send(StreamRecord::error(GENERIC_FAILURE_MESSAGE))
            .await
            .is_err()
        {
            tracing::trace!("Client disconnected, error record not delivered");
        }
        RelayOutcome::Failed
    }
}
