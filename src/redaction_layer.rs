use lazy_static::lazy_static;
use regex::Regex;
use std::io::Write;
use tracing_subscriber::fmt::MakeWriter;

lazy_static! {
    static ref REDACTION_REGEX: Regex = Regex::new(
        r"(?i)(AIza[0-9A-Za-z_\-]{20,}|[?&]key=[^&\s]+|x-goog-api-key:\s*[^\s]+|Bearer\s+[^\s]+)"
    )
    .expect("Invalid redaction regex");
}

/// Masks provider credentials before they reach a log sink.
pub fn redact(input: &str) -> std::borrow::Cow<'_, str> {
    REDACTION_REGEX.replace_all(input, "[REDACTED]")
}

pub struct RedactingWriter<W: Write> {
    inner: W,
}

impl<W: Write> RedactingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let input = String::from_utf8_lossy(buf);
        self.inner.write_all(redact(&input).as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// `MakeWriter` adapter so a fmt layer can write through [`RedactingWriter`].
pub struct RedactingMakeWriter<M> {
    inner: M,
}

impl<M> RedactingMakeWriter<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<'a, M> MakeWriter<'a> for RedactingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = RedactingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new(self.inner.make_writer())
    }
}
