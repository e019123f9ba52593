//! Minimal HTTP/1.1 framing over tokio streams.
//!
//! Every response closes the connection, so bodies are either length-delimited
//! or run until close (event streams).

use std::io;

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAX_HEADER_LINES: usize = 100;
const MAX_LINE_BYTES: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed request: {0}")]
    Malformed(&'static str),

    #[error("request body of {actual} bytes exceeds limit of {limit}")]
    BodyTooLarge { limit: usize, actual: usize },
}

/// Lookup result that keeps repeated headers distinguishable from single ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue<'a> {
    Missing,
    Single(&'a str),
    Multiple(Vec<&'a str>),
}

/// Header list in arrival order; names are stored lowercased.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.entries.push((name.trim().to_ascii_lowercase(), value.into()));
    }

    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.append(name, value);
        self
    }

    pub fn lookup(&self, name: &str) -> HeaderValue<'_> {
        let mut values = self.get_all(name);
        match (values.next(), values.next()) {
            (None, _) => HeaderValue::Missing,
            (Some(one), None) => HeaderValue::Single(one),
            (Some(first), Some(second)) => {
                let mut all = vec![first, second];
                all.extend(values);
                HeaderValue::Multiple(all)
            }
        }
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).next()
    }

    pub fn get_all(&self, name: &str) -> impl Iterator<Item = &str> + '_ {
        let name = name.trim().to_ascii_lowercase();
        self.entries
            .iter()
            .filter(move |(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    #[must_use]
    pub fn with_json(mut self, value: &Value) -> Self {
        self.body = value.to_string().into_bytes();
        self
    }

    pub fn accepts_event_stream(&self) -> bool {
        self.headers
            .get_all("accept")
            .any(|v| v.contains("text/event-stream"))
    }
}

/// Reads one request. `Ok(None)` means the peer closed before sending anything.
pub async fn read_http_request<R>(
    reader: &mut R,
    max_body_bytes: usize,
) -> Result<Option<HttpRequest>, HttpError>
where
    R: AsyncBufRead + Unpin,
{
    let Some(first) = read_line(reader).await? else {
        return Ok(None);
    };
    if first.is_empty() {
        return Ok(None);
    }

    let mut parts = first.split_whitespace();
    let method = parts
        .next()
        .ok_or(HttpError::Malformed("missing method"))?;
    let target = parts.next().ok_or(HttpError::Malformed("missing path"))?;
    let path = target.split_once('?').map_or(target, |(p, _)| p).to_string();

    let mut headers = Headers::new();
    let mut content_length = 0_usize;
    loop {
        let Some(line) = read_line(reader).await? else {
            break;
        };
        if line.is_empty() {
            break;
        }
        if headers.entries.len() >= MAX_HEADER_LINES {
            return Err(HttpError::Malformed("too many headers"));
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(HttpError::Malformed("header without colon"));
        };
        let value = value.trim();
        if name.trim().eq_ignore_ascii_case("content-length") {
            content_length = value
                .parse::<usize>()
                .map_err(|_| HttpError::Malformed("invalid content-length"))?;
        }
        headers.append(name, value);
    }

    if content_length > max_body_bytes {
        return Err(HttpError::BodyTooLarge {
            limit: max_body_bytes,
            actual: content_length,
        });
    }
    let mut body = vec![0_u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body).await?;
    }

    Ok(Some(HttpRequest {
        method: method.to_ascii_uppercase(),
        path,
        headers,
        body,
    }))
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<String>, HttpError> {
    let mut line = String::new();
    let n = reader
        .take(MAX_LINE_BYTES as u64)
        .read_line(&mut line)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') && n >= MAX_LINE_BYTES {
        return Err(HttpError::Malformed("line too long"));
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Write side of one exchange. Tracks whether any response bytes went out,
/// after which the status can no longer change.
pub struct ResponseSink<'a> {
    writer: &'a mut (dyn AsyncWrite + Unpin + Send),
    headers: Vec<(String, String)>,
    status: Option<u16>,
    headers_sent: bool,
}

impl<'a> ResponseSink<'a> {
    pub fn new(writer: &'a mut (dyn AsyncWrite + Unpin + Send)) -> Self {
        Self {
            writer,
            headers: Vec::new(),
            status: None,
            headers_sent: false,
        }
    }

    /// Queues a header for the response head, replacing a previous value.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    pub const fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    pub async fn send_json(&mut self, status: u16, value: &Value) -> io::Result<()> {
        let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
        self.send(status, Some("application/json"), &body).await
    }

    pub async fn send_text(
        &mut self,
        status: u16,
        content_type: &str,
        body: &str,
    ) -> io::Result<()> {
        self.send(status, Some(content_type), body.as_bytes()).await
    }

    pub async fn send_empty(&mut self, status: u16) -> io::Result<()> {
        self.send(status, None, &[]).await
    }

    /// Writes the head of an open-ended body; follow with `write_chunk`.
    pub async fn start_stream(&mut self, status: u16, content_type: &str) -> io::Result<()> {
        self.write_head(status, Some(content_type), None).await?;
        self.writer.flush().await
    }

    pub async fn write_chunk(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !self.headers_sent {
            return Err(io::Error::other("stream not started"));
        }
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }

    async fn send(
        &mut self,
        status: u16,
        content_type: Option<&str>,
        body: &[u8],
    ) -> io::Result<()> {
        self.write_head(status, content_type, Some(body.len())).await?;
        self.writer.write_all(body).await?;
        self.writer.flush().await
    }

    async fn write_head(
        &mut self,
        status: u16,
        content_type: Option<&str>,
        content_length: Option<usize>,
    ) -> io::Result<()> {
        if self.headers_sent {
            return Err(io::Error::other("response already started"));
        }
        self.headers_sent = true;
        self.status = Some(status);

        let mut head = format!("HTTP/1.1 {} {}\r\n", status, reason_phrase(status));
        if let Some(content_type) = content_type {
            head.push_str(&format!("Content-Type: {content_type}\r\n"));
        }
        if let Some(len) = content_length {
            head.push_str(&format!("Content-Length: {len}\r\n"));
        }
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str("Connection: close\r\n\r\n");
        self.writer.write_all(head.as_bytes()).await
    }
}

pub const fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        202 => "Accepted",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "OK",
    }
}
