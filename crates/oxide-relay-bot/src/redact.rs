//! Log writer that masks credentials before they reach the output.

use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;

/// Regex patterns for redacting sensitive data
pub struct RedactionPatterns {
    query_token: Regex,
    graph_token: Regex,
    openai_key: Regex,
    bearer: Regex,
}

impl RedactionPatterns {
    /// Compile all patterns.
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            query_token: Regex::new(r#"(access_token=)[^\s&"']+"#)?,
            graph_token: Regex::new(r"\bEAA[A-Za-z0-9]{16,}")?,
            openai_key: Regex::new(r"\bsk-[A-Za-z0-9_-]{16,}")?,
            bearer: Regex::new(r"(Bearer )[A-Za-z0-9._~+/=-]+")?,
        })
    }

    /// Return `input` with every credential masked.
    pub fn redact(&self, input: &str) -> String {
        let output = self.query_token.replace_all(input, "${1}[MASKED]");
        let output = self.graph_token.replace_all(&output, "[GRAPH_TOKEN]");
        let output = self.openai_key.replace_all(&output, "[OPENAI_KEY]");
        self.bearer.replace_all(&output, "${1}[MASKED]").into_owned()
    }
}

/// Writer that redacts each chunk before forwarding it.
pub struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length; the redacted text may differ in size.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// `MakeWriter` producing redacting writers.
pub struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    /// Wrap `make_inner`.
    pub const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), Arc::clone(&self.patterns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns() -> RedactionPatterns {
        RedactionPatterns::new().expect("valid patterns")
    }

    #[test]
    fn test_masks_graph_tokens() {
        let line = "POST https://graph.facebook.com/v21.0/me/messages?access_token=EAAGm0PX4ZCpsBAKZAxyz123 failed";
        let redacted = patterns().redact(line);
        assert!(!redacted.contains("EAAGm0PX4ZCpsBAKZAxyz123"));
        assert!(redacted.contains("access_token=[MASKED]"));

        let bare = patterns().redact("token EAAGm0PX4ZCpsBAKZAxyz123 loaded");
        assert_eq!(bare, "token [GRAPH_TOKEN] loaded");
    }

    #[test]
    fn test_masks_openai_keys_and_bearer() {
        let redacted = patterns().redact("key=sk-proj-abcdefghijklmnop1234 auth=Bearer abc.def");
        assert_eq!(redacted, "key=[OPENAI_KEY] auth=Bearer [MASKED]");
    }

    #[test]
    fn test_writer_forwards_redacted_text() {
        let mut buffer = Vec::new();
        {
            let mut writer = RedactingWriter::new(&mut buffer, Arc::new(patterns()));
            let written = writer
                .write(b"access_token=secret&x=1")
                .expect("write");
            assert_eq!(written, 23);
        }
        assert_eq!(String::from_utf8_lossy(&buffer), "access_token=[MASKED]&x=1");
    }

    #[test]
    fn test_plain_text_is_untouched() {
        let line = "Sent message user_id=17841400000000000 delay=1.7";
        assert_eq!(patterns().redact(line), line);
    }
}
