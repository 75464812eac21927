//! Raw HTTP/1.1 message framing
//!
//! Used by the diagnostic proxy, which must forward messages byte for byte.
//! Heads are read whole (bounded), parsed with `httparse` only to learn how
//! the body is delimited, and then forwarded as the exact bytes received.
//! Bodies are streamed, never buffered.

use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::EvalError;

/// Upper bound on header lines in one message head
const MAX_HEADERS: usize = 100;

/// Upper bound on one chunk-size or trailer line
const MAX_CHUNK_LINE: usize = 8 * 1024;

/// How a message body is delimited on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body follows the head
    Empty,
    /// Exactly this many bytes follow
    Length(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
    /// Body runs until the sender closes the connection (responses only)
    UntilClose,
}

/// A parsed request head plus the bytes it was parsed from
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub raw: Bytes,
    pub method: String,
    pub path: String,
    /// Minor HTTP version (0 or 1)
    pub version: u8,
    pub headers: Vec<(String, String)>,
    pub framing: BodyFraming,
}

/// A parsed response head plus the bytes it was parsed from
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub raw: Bytes,
    pub status: u16,
    pub reason: String,
    pub version: u8,
    pub headers: Vec<(String, String)>,
    pub framing: BodyFraming,
}

impl RequestHead {
    /// Whether the client asked for the connection to end after this exchange
    pub fn wants_close(&self) -> bool {
        wants_close(self.version, &self.headers)
    }
}

impl ResponseHead {
    pub fn wants_close(&self) -> bool {
        self.framing == BodyFraming::UntilClose || wants_close(self.version, &self.headers)
    }

    /// Interim 1xx responses are followed by the final response
    pub fn is_interim(&self) -> bool {
        (100..200).contains(&self.status) && self.status != 101
    }
}

/// Failure while streaming a body, tagged by which side failed
#[derive(Debug, thiserror::Error)]
pub enum RelayIoError {
    #[error("read failed: {0}")]
    Read(io::Error),
    #[error("write failed: {0}")]
    Write(io::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Head parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Read one request head
///
/// Returns `Ok(None)` when the peer closed the connection cleanly before
/// sending anything, which is how a keep-alive connection ends.
pub async fn read_request_head<R>(
    reader: &mut R,
    max_head_bytes: usize,
) -> Result<Option<RequestHead>, EvalError>
where
    R: AsyncBufRead + Unpin,
{
    let Some(raw) = read_head_bytes(reader, max_head_bytes).await? else {
        return Ok(None);
    };

    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut slots);
    match request.parse(&raw) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(EvalError::Protocol("incomplete request head".into()))
        }
        Err(e) => return Err(EvalError::Protocol(format!("malformed request head: {}", e))),
    }

    let method = request.method.unwrap_or_default().to_string();
    let path = request.path.unwrap_or_default().to_string();
    let version = request.version.unwrap_or(1);
    let headers = owned_headers(request.headers);
    let framing = request_framing(&headers)?;

    Ok(Some(RequestHead {
        raw: Bytes::from(raw),
        method,
        path,
        version,
        headers,
        framing,
    }))
}

/// Read one response head for a request sent with `request_method`
pub async fn read_response_head<R>(
    reader: &mut R,
    max_head_bytes: usize,
    request_method: &str,
) -> Result<ResponseHead, EvalError>
where
    R: AsyncBufRead + Unpin,
{
    let raw = read_head_bytes(reader, max_head_bytes)
        .await?
        .ok_or_else(|| EvalError::UpstreamUnavailable("upstream closed without responding".into()))?;

    let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut slots);
    match response.parse(&raw) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(EvalError::Protocol("incomplete response head".into()))
        }
        Err(e) => return Err(EvalError::Protocol(format!("malformed response head: {}", e))),
    }

    let status = response.code.unwrap_or_default();
    let reason = response.reason.unwrap_or_default().to_string();
    let version = response.version.unwrap_or(1);
    let headers = owned_headers(response.headers);
    let framing = response_framing(status, request_method, &headers)?;

    Ok(ResponseHead {
        raw: Bytes::from(raw),
        status,
        reason,
        version,
        headers,
        framing,
    })
}

/// Read bytes up to and including the blank line that ends a head
async fn read_head_bytes<R>(reader: &mut R, max_head_bytes: usize) -> Result<Option<Vec<u8>>, EvalError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let start = buf.len();
        let budget = (max_head_bytes + 1).saturating_sub(start) as u64;
        let n = (&mut *reader)
            .take(budget)
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| EvalError::Protocol(format!("read failed: {}", e)))?;

        if buf.len() > max_head_bytes {
            return Err(EvalError::Protocol(format!(
                "message head exceeds {} bytes",
                max_head_bytes
            )));
        }
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(EvalError::Protocol("connection closed mid-head".into()));
        }

        let line = &buf[start..];
        if line == b"\r\n" || line == b"\n" {
            if start == 0 {
                // Stray CRLF between pipelined messages
                buf.clear();
                continue;
            }
            return Ok(Some(buf));
        }
    }
}

fn owned_headers(headers: &[httparse::Header<'_>]) -> Vec<(String, String)> {
    headers
        .iter()
        .take_while(|h| !h.name.is_empty())
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).trim().to_string(),
            )
        })
        .collect()
}

/// Case-insensitive lookup of all values for `name`
fn header_values<'a>(
    headers: &'a [(String, String)],
    name: &'a str,
) -> impl Iterator<Item = &'a str> + 'a {
    headers
        .iter()
        .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn is_chunked(headers: &[(String, String)]) -> bool {
    header_values(headers, "transfer-encoding")
        .flat_map(|v| v.split(','))
        .last()
        .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

fn content_length(headers: &[(String, String)]) -> Result<Option<u64>, EvalError> {
    let mut length = None;
    for value in header_values(headers, "content-length") {
        let parsed = value
            .parse::<u64>()
            .map_err(|_| EvalError::Protocol(format!("invalid content-length {:?}", value)))?;
        if length.is_some_and(|existing| existing != parsed) {
            return Err(EvalError::Protocol("conflicting content-length headers".into()));
        }
        length = Some(parsed);
    }
    Ok(length)
}

fn wants_close(version: u8, headers: &[(String, String)]) -> bool {
    let mut close = version == 0;
    for value in header_values(headers, "connection") {
        for token in value.split(',').map(str::trim) {
            if token.eq_ignore_ascii_case("close") {
                return true;
            }
            if token.eq_ignore_ascii_case("keep-alive") {
                close = false;
            }
        }
    }
    close
}

fn request_framing(headers: &[(String, String)]) -> Result<BodyFraming, EvalError> {
    if is_chunked(headers) {
        return Ok(BodyFraming::Chunked);
    }
    Ok(match content_length(headers)? {
        Some(0) | None => BodyFraming::Empty,
        Some(n) => BodyFraming::Length(n),
    })
}

fn response_framing(
    status: u16,
    request_method: &str,
    headers: &[(String, String)],
) -> Result<BodyFraming, EvalError> {
    if request_method.eq_ignore_ascii_case("HEAD")
        || (100..200).contains(&status)
        || status == 204
        || status == 304
    {
        return Ok(BodyFraming::Empty);
    }
    if is_chunked(headers) {
        return Ok(BodyFraming::Chunked);
    }
    Ok(match content_length(headers)? {
        Some(0) => BodyFraming::Empty,
        Some(n) => BodyFraming::Length(n),
        None => BodyFraming::UntilClose,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Body streaming
// ─────────────────────────────────────────────────────────────────────────────

/// Records what passed through a body relay
#[derive(Debug, Default)]
pub struct BodyTap {
    limit: usize,
    preview: Vec<u8>,
    total: u64,
}

impl BodyTap {
    /// Keep at most `limit` leading bytes for inspection
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            preview: Vec::new(),
            total: 0,
        }
    }

    fn observe(&mut self, bytes: &[u8]) {
        self.total += bytes.len() as u64;
        let room = self.limit.saturating_sub(self.preview.len());
        self.preview
            .extend_from_slice(&bytes[..room.min(bytes.len())]);
    }

    /// Bytes relayed so far
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Leading bytes of the body, up to the tap's limit
    pub fn preview(&self) -> &[u8] {
        &self.preview
    }
}

/// Stream one body from `reader` to `writer` according to `framing`
///
/// With `idle` set, a sender that goes quiet for that long between reads
/// fails the relay with a `TimedOut` read error.
pub async fn relay_body<R, W>(
    reader: &mut R,
    writer: &mut W,
    framing: BodyFraming,
    tap: &mut BodyTap,
    idle: Option<Duration>,
) -> Result<(), RelayIoError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match framing {
        BodyFraming::Empty => {}
        BodyFraming::Length(n) => copy_exact(reader, writer, n, tap, idle).await?,
        BodyFraming::Chunked => copy_chunked(reader, writer, tap, idle).await?,
        BodyFraming::UntilClose => copy_to_eof(reader, writer, tap, idle).await?,
    }
    writer.flush().await.map_err(RelayIoError::Write)
}

async fn within<F, T>(idle: Option<Duration>, io: F) -> Result<T, RelayIoError>
where
    F: Future<Output = io::Result<T>>,
{
    let result = match idle {
        Some(limit) => match tokio::time::timeout(limit, io).await {
            Ok(result) => result,
            Err(_) => {
                return Err(RelayIoError::Read(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no body bytes for {}ms", limit.as_millis()),
                )))
            }
        },
        None => io.await,
    };
    result.map_err(RelayIoError::Read)
}

async fn copy_exact<R, W>(
    reader: &mut R,
    writer: &mut W,
    mut remaining: u64,
    tap: &mut BodyTap,
    idle: Option<Duration>,
) -> Result<(), RelayIoError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while remaining > 0 {
        let chunk = within(idle, reader.fill_buf()).await?;
        if chunk.is_empty() {
            return Err(RelayIoError::Read(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("peer closed with {} body bytes outstanding", remaining),
            )));
        }
        let take = usize::try_from(remaining)
            .unwrap_or(usize::MAX)
            .min(chunk.len());
        writer
            .write_all(&chunk[..take])
            .await
            .map_err(RelayIoError::Write)?;
        tap.observe(&chunk[..take]);
        reader.consume(take);
        remaining -= take as u64;
    }
    Ok(())
}

async fn copy_chunked<R, W>(
    reader: &mut R,
    writer: &mut W,
    tap: &mut BodyTap,
    idle: Option<Duration>,
) -> Result<(), RelayIoError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let size_line = read_line(reader, idle).await?;
        writer
            .write_all(&size_line)
            .await
            .map_err(RelayIoError::Write)?;
        tap.observe(&size_line);

        let bad_line = || {
            RelayIoError::Read(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "bad chunk size line {:?}",
                    String::from_utf8_lossy(&size_line)
                ),
            ))
        };
        let size = parse_chunk_size(&size_line).ok_or_else(bad_line)?;

        if size == 0 {
            // Optional trailers, then the terminating blank line
            loop {
                let trailer = read_line(reader, idle).await?;
                writer
                    .write_all(&trailer)
                    .await
                    .map_err(RelayIoError::Write)?;
                tap.observe(&trailer);
                if trailer == b"\r\n" || trailer == b"\n" {
                    return Ok(());
                }
            }
        }

        // Chunk data plus its trailing CRLF
        let framed = size.checked_add(2).ok_or_else(bad_line)?;
        copy_exact(reader, writer, framed, tap, idle).await?;
    }
}

async fn copy_to_eof<R, W>(
    reader: &mut R,
    writer: &mut W,
    tap: &mut BodyTap,
    idle: Option<Duration>,
) -> Result<(), RelayIoError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let chunk = within(idle, reader.fill_buf()).await?;
        if chunk.is_empty() {
            return Ok(());
        }
        let len = chunk.len();
        writer.write_all(chunk).await.map_err(RelayIoError::Write)?;
        tap.observe(chunk);
        reader.consume(len);
    }
}

async fn read_line<R>(reader: &mut R, idle: Option<Duration>) -> Result<Vec<u8>, RelayIoError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    within(
        idle,
        (&mut *reader)
            .take(MAX_CHUNK_LINE as u64)
            .read_until(b'\n', &mut line),
    )
    .await?;
    if !line.ends_with(b"\n") {
        return Err(RelayIoError::Read(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "chunk line truncated",
        )));
    }
    Ok(line)
}

fn parse_chunk_size(line: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(line).ok()?;
    let digits = text.split([';', '\r', '\n']).next()?.trim();
    u64::from_str_radix(digits, 16).ok()
}
