//! Structured HTTP/1.x request and response-head values, plus bounded readers.
//!
//! Only what the proxy needs: one request per connection, bodies delimited by
//! `Content-Length`, no chunked transfer-encoding. Heads are parsed with
//! `httparse`, so bare-LF line endings are accepted as well as CRLF.

use bytes::{Buf, Bytes, BytesMut};
use http::Method;
use tokio::io::{AsyncRead, AsyncReadExt};
use url::Url;

use crate::error::ProxyError;

const MAX_HEADERS: usize = 64;

/// Size ceilings applied while buffering a message from a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageLimits {
    pub max_header_size: usize,
    pub max_body_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Request {
    /// Parses a lone `METHOD SP target SP version` line. Any other shape is malformed.
    pub fn parse_request_line(line: &str) -> Result<(Method, String, String), ProxyError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let head = format!("{}\r\n\r\n", line);
        let request = Self::parse(head.as_bytes())?;
        Ok((request.method, request.target, request.version))
    }

    /// Parses a complete request head. The body is left empty.
    pub fn parse(head: &[u8]) -> Result<Self, ProxyError> {
        match Self::parse_head(head)? {
            Some((request, _)) => Ok(request),
            None => Err(ProxyError::MalformedRequest("incomplete request head".to_string())),
        }
    }

    /// Parses the head at the start of `buf`. Returns the request and the head
    /// length, or `None` while the head is still incomplete.
    pub fn parse_head(buf: &[u8]) -> Result<Option<(Self, usize)>, ProxyError> {
        let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut storage);

        let head_len = match parsed.parse(buf) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(e) => return Err(ProxyError::MalformedRequest(format!("invalid request head: {}", e))),
        };

        let method = parsed.method.unwrap_or_default();
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| ProxyError::MalformedRequest(format!("invalid method: {}", method)))?;
        let target = parsed.path.unwrap_or_default().to_string();
        if target.is_empty() {
            return Err(ProxyError::MalformedRequest("empty request target".to_string()));
        }
        let version = format!("HTTP/1.{}", parsed.version.unwrap_or(1));
        let headers = collect_headers(parsed.headers)
            .ok_or_else(|| ProxyError::MalformedRequest("header value is not valid UTF-8".to_string()))?;

        let request = Self {
            method,
            target,
            version,
            headers,
            body: Bytes::new(),
        };
        Ok(Some((request, head_len)))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replaces the first header named `name` in place, or appends it.
    pub fn set_header(&mut self, name: &str, value: &str) {
        match self.headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some(header) => header.1 = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
        let mut seen = false;
        self.headers.retain(|(n, _)| {
            if !n.eq_ignore_ascii_case(name) {
                return true;
            }
            let keep = !seen;
            seen = true;
            keep
        });
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn content_length(&self) -> Result<usize, ProxyError> {
        if let Some(encoding) = self.header("transfer-encoding") {
            if encoding.to_ascii_lowercase().contains("chunked") {
                return Err(ProxyError::MalformedRequest(
                    "chunked transfer-encoding is not supported".to_string(),
                ));
            }
        }
        match self.header("content-length") {
            Some(value) => value
                .parse()
                .map_err(|_| ProxyError::MalformedRequest(format!("invalid Content-Length: {}", value))),
            None => Ok(0),
        }
    }

    /// The target as an absolute URI, when the client sent absolute-form.
    pub fn absolute_uri(&self) -> Option<Url> {
        if self.target.contains("://") {
            Url::parse(&self.target).ok()
        } else {
            None
        }
    }

    /// Path and query of the target, dropping any scheme and authority.
    pub fn origin_form(&self) -> String {
        match self.absolute_uri() {
            Some(url) => match url.query() {
                Some(query) => format!("{}?{}", url.path(), query),
                None => url.path().to_string(),
            },
            None => self.target.clone(),
        }
    }

    /// Canonical serialization: request line, headers in order, blank line, body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.body.len());
        out.extend_from_slice(format!("{} {} {}\r\n", self.method, self.target, self.version).as_bytes());
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// Status and headers of a raw HTTP response, used to inspect cached payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// Parses the head at the start of `payload`, ignoring any body bytes.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match Self::parse_head(payload) {
            Ok(Some((head, _))) => Some(head),
            _ => None,
        }
    }

    /// Like [`Request::parse_head`]: `None` while the head is incomplete.
    pub fn parse_head(buf: &[u8]) -> Result<Option<(Self, usize)>, ProxyError> {
        let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut storage);

        let head_len = match parsed.parse(buf) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(e) => return Err(ProxyError::BadGateway(format!("invalid origin response: {}", e))),
        };

        let status = parsed.code.unwrap_or_default();
        let headers = collect_headers(parsed.headers)
            .ok_or_else(|| ProxyError::BadGateway("origin header value is not valid UTF-8".to_string()))?;
        Ok(Some((Self { status, headers }, head_len)))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn collect_headers(headers: &[httparse::Header<'_>]) -> Option<Vec<(String, String)>> {
    headers
        .iter()
        .map(|h| {
            let value = std::str::from_utf8(h.value).ok()?;
            Some((h.name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Reads until `parse` reports a complete head, never buffering more than
/// `max_header_size` bytes before it does. Returns the parsed head, the buffer
/// (head plus any over-read bytes) and the head length, or `None` when the peer
/// closed before sending anything.
async fn read_head<R, T, F>(
    reader: &mut R,
    max_header_size: usize,
    parse: F,
) -> Result<Option<(T, BytesMut, usize)>, ProxyError>
where
    R: AsyncRead + Unpin,
    F: Fn(&[u8]) -> Result<Option<(T, usize)>, ProxyError>,
{
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        if !buf.is_empty() {
            if let Some((head, head_len)) = parse(&buf[..])? {
                return Ok(Some((head, buf, head_len)));
            }
        }
        if buf.len() > max_header_size {
            return Err(ProxyError::MalformedRequest(format!(
                "message head exceeds {} bytes",
                max_header_size
            )));
        }
        if reader.read_buf(&mut buf).await? == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(ProxyError::MalformedRequest(
                "connection closed before end of message head".to_string(),
            ));
        }
    }
}

/// Reads one request from the client. `Ok(None)` means the client closed without sending.
pub async fn read_request<R>(reader: &mut R, limits: MessageLimits) -> Result<Option<Request>, ProxyError>
where
    R: AsyncRead + Unpin,
{
    let (mut request, mut buf, head_len) = match read_head(reader, limits.max_header_size, Request::parse_head).await? {
        Some(head) => head,
        None => return Ok(None),
    };

    let content_length = request.content_length()?;
    if content_length > limits.max_body_size {
        return Err(ProxyError::MalformedRequest(format!(
            "request body of {} bytes exceeds {} bytes",
            content_length, limits.max_body_size
        )));
    }

    buf.advance(head_len);
    while buf.len() < content_length {
        if reader.read_buf(&mut buf).await? == 0 {
            return Err(ProxyError::MalformedRequest("request body truncated".to_string()));
        }
    }
    buf.truncate(content_length);
    request.body = buf.freeze();

    Ok(Some(request))
}

/// Reads one complete response from an origin: the head, then `Content-Length`
/// bytes of body, or everything until the origin closes when no length is given.
/// Bodies larger than `max_body_size` are refused.
pub async fn read_response<R>(reader: &mut R, limits: MessageLimits) -> Result<Bytes, ProxyError>
where
    R: AsyncRead + Unpin,
{
    let (head, mut buf, head_len) = read_head(reader, limits.max_header_size, ResponseHead::parse_head)
        .await
        .map_err(|e| match e {
            ProxyError::BadGateway(_) => e,
            other => ProxyError::BadGateway(format!("invalid origin response: {}", other)),
        })?
        .ok_or_else(|| ProxyError::BadGateway("origin closed without responding".to_string()))?;

    let too_large = || ProxyError::BadGateway(format!("origin response body exceeds {} bytes", limits.max_body_size));
    let content_length = head.header("content-length").and_then(|v| v.parse::<usize>().ok());

    match content_length {
        Some(len) => {
            if len > limits.max_body_size {
                return Err(too_large());
            }
            let total = head_len.checked_add(len).ok_or_else(too_large)?;
            while buf.len() < total {
                if reader.read_buf(&mut buf).await? == 0 {
                    return Err(ProxyError::BadGateway("origin response body truncated".to_string()));
                }
            }
            buf.truncate(total);
        }
        None => loop {
            if buf.len() - head_len > limits.max_body_size {
                return Err(too_large());
            }
            if reader.read_buf(&mut buf).await? == 0 {
                break;
            }
        },
    }

    Ok(buf.freeze())
}
