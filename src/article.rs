//! Articles handed to the upload engine
//!
//! The engine never encodes payloads itself. It only needs something that
//! implements [`Post`]: a byte length for accounting, a message-id it may
//! regenerate, and a ready-to-send rendering of headers, body and terminator.
//! [`Article`] is a straightforward implementation for callers whose encoder
//! produces an already encoded text body.

use std::fmt::Write as _;
use uuid::Uuid;

/// One unit of upload as seen by the connection and orchestrator
pub trait Post: Send + 'static {
    /// Length of the original (pre-encoding) data, used for throughput accounting
    fn input_len(&self) -> u64;

    /// Current message-id, including angle brackets
    fn message_id(&self) -> &str;

    /// Replace the message-id (used when a server reports a different one)
    fn set_message_id(&mut self, message_id: String);

    /// Generate a fresh message-id before posting again
    fn regenerate_message_id(&mut self);

    /// Remove a header by name; returns whether anything was removed
    fn strip_header(&mut self, name: &str) -> bool;

    /// Append the wire form (headers, blank line, dot-stuffed body, `.\r\n`) to `out`
    fn render(&self, out: &mut Vec<u8>);
}

/// Generate a random message-id for `domain`
pub fn generate_message_id(domain: &str) -> String {
    let uuid = Uuid::new_v4();
    format!("<{}@{}>", uuid.simple(), domain)
}

/// Apply NNTP dot-stuffing and normalize line endings to CRLF
///
/// Lines starting with `.` get a second dot so that no body line can be
/// mistaken for the terminator. The result always ends with CRLF.
pub fn dot_stuff(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + body.len() / 64 + 2);
    let mut at_line_start = true;
    let mut previous = 0u8;

    for &byte in body {
        if at_line_start && byte == b'.' {
            out.push(b'.');
        }
        if byte == b'\n' && previous != b'\r' {
            out.push(b'\r');
        }
        out.push(byte);
        at_line_start = byte == b'\n';
        previous = byte;
    }

    if !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// An article with ordered headers and an encoded body
#[derive(Debug, Clone)]
pub struct Article {
    message_id: String,
    domain: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    input_len: u64,
}

impl Article {
    /// Headers other than Message-ID, in sending order
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Dot-stuffed body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Look up a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl Post for Article {
    fn input_len(&self) -> u64 {
        self.input_len
    }

    fn message_id(&self) -> &str {
        &self.message_id
    }

    fn set_message_id(&mut self, message_id: String) {
        self.message_id = message_id;
    }

    fn regenerate_message_id(&mut self) {
        self.message_id = generate_message_id(&self.domain);
    }

    fn strip_header(&mut self, name: &str) -> bool {
        let before = self.headers.len();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before != self.headers.len()
    }

    fn render(&self, out: &mut Vec<u8>) {
        let mut head = String::with_capacity(512);
        // write! to String is infallible
        for (name, value) in &self.headers {
            let _ = write!(head, "{}: {}\r\n", name, value);
        }
        let _ = write!(head, "Message-ID: {}\r\n\r\n", self.message_id);

        out.reserve(head.len() + self.body.len() + 3);
        out.extend_from_slice(head.as_bytes());
        out.extend_from_slice(&self.body);
        out.extend_from_slice(b".\r\n");
    }
}

/// Builder for [`Article`]
///
/// # Example
///
/// ```
/// use nntp_upload::{ArticleBuilder, Post};
///
/// let article = ArticleBuilder::new()
///     .from("poster <poster@example.com>")
///     .subject("file.bin (1/1)")
///     .newsgroups(["alt.binaries.test"])
///     .body(b"=ybegin line=128 size=3 name=file.bin\r\nabc\r\n=yend size=3\r\n".to_vec())
///     .input_len(3)
///     .build();
/// assert!(article.message_id().starts_with('<'));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ArticleBuilder {
    domain: Option<String>,
    message_id: Option<String>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    input_len: Option<u64>,
}

impl ArticleBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the From header
    pub fn from(self, from: impl Into<String>) -> Self {
        self.header("From", from)
    }

    /// Set the Subject header
    pub fn subject(self, subject: impl Into<String>) -> Self {
        self.header("Subject", subject)
    }

    /// Set the Newsgroups header
    pub fn newsgroups<I, S>(self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = groups
            .into_iter()
            .map(|g| g.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.header("Newsgroups", joined)
    }

    /// Set any header; a header with the same name is replaced
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(existing) => existing.1 = value,
            None => self.headers.push((name, value)),
        }
        self
    }

    /// Domain used for generated message-ids
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Use a fixed initial message-id
    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Encoded body; dot-stuffing is applied here
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Length of the original data; defaults to the body length
    pub fn input_len(mut self, len: u64) -> Self {
        self.input_len = Some(len);
        self
    }

    /// Build the article
    pub fn build(self) -> Article {
        let domain = self.domain.unwrap_or_else(|| "nntp-upload".to_string());
        let message_id = self
            .message_id
            .unwrap_or_else(|| generate_message_id(&domain));
        let input_len = self.input_len.unwrap_or(self.body.len() as u64);

        Article {
            message_id,
            domain,
            headers: self.headers,
            body: dot_stuff(&self.body),
            input_len,
        }
    }
}
