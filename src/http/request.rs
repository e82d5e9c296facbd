//! Incremental HTTP/1.1 request parsing: request line, headers, and a
//! body read either by `Content-Length` or chunked transfer-encoding.
//! Feeds the parsed [`HttpRequest`] to the content router (see
//! `http::content`), which owns everything past "what did the client ask".

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    GET,
    POST,
    DELETE,
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::DELETE => "DELETE",
        }
    }
}

impl FromStr for Method {
    type Err = ParseError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "DELETE" => Ok(Method::DELETE),
            _ => Err(ParseError::InvalidMethod),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ParsingState {
    RequestLine,
    Headers,
    Body,
    ChunkedBody,
    Complete,
}

const CRLF_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    IncompleteRequestLine,
    MalformedRequestLine,
    InvalidMethod,
    InvalidUtf8,
    HeaderTooLong,
    InvalidChunkSize,
    PayloadTooLarge,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParseError::IncompleteRequestLine => "incomplete request line",
            ParseError::MalformedRequestLine => "malformed request line",
            ParseError::InvalidMethod => "invalid HTTP method",
            ParseError::InvalidUtf8 => "invalid UTF-8 in request",
            ParseError::HeaderTooLong => "header line too long",
            ParseError::InvalidChunkSize => "invalid chunk size",
            ParseError::PayloadTooLarge => "payload too large",
        };
        write!(f, "{s}")
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::PayloadTooLarge => Error::InvalidArgument("payload too large".into()),
            other => Error::InvalidArgument(other.to_string()),
        }
    }
}

#[derive(Debug)]
enum ChunkState {
    ReadSize,
    ReadData(usize),
    ReadTrailingCrlf,
    ReadTrailers,
}

#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub trailers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub state: ParsingState,
    buffer: Vec<u8>,
    cursor: usize,
    body_remaining: usize,
    chunk_state: ChunkState,
    max_body_size: usize,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRequest {
    pub fn new() -> Self {
        HttpRequest {
            method: Method::GET,
            url: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            trailers: HashMap::new(),
            body: Vec::new(),
            state: ParsingState::RequestLine,
            buffer: Vec::with_capacity(4096),
            cursor: 0,
            body_remaining: 0,
            chunk_state: ChunkState::ReadSize,
            max_body_size: usize::MAX,
        }
    }

    pub fn clear(&mut self) {
        self.method = Method::GET;
        self.url.clear();
        self.version.clear();
        self.headers.clear();
        self.trailers.clear();
        self.body.clear();
        self.state = ParsingState::RequestLine;
        self.body_remaining = 0;
        self.chunk_state = ChunkState::ReadSize;
    }

    pub fn set_max_body_size(&mut self, max: usize) {
        self.max_body_size = max;
    }

    /// Appends newly-read bytes and drives the parser as far as it will
    /// go. Returns `true` once `state == Complete`.
    pub fn feed(&mut self, bytes: &[u8]) -> std::result::Result<bool, ParseError> {
        self.buffer.extend_from_slice(bytes);
        loop {
            match self.state {
                ParsingState::RequestLine => match self.parse_request_line()? {
                    true => continue,
                    false => return Ok(false),
                },
                ParsingState::Headers => match self.parse_headers()? {
                    true => continue,
                    false => return Ok(false),
                },
                ParsingState::Body => match self.parse_body()? {
                    true => continue,
                    false => return Ok(false),
                },
                ParsingState::ChunkedBody => match self.parse_chunked_body()? {
                    true => continue,
                    false => return Ok(false),
                },
                ParsingState::Complete => return Ok(true),
            }
        }
    }

    /// Transitions out of `Headers` into whichever body-reading state the
    /// headers call for, or straight to `Complete` if there is no body.
    fn start_body(&mut self) -> std::result::Result<(), ParseError> {
        let is_chunked = self
            .headers
            .get("transfer-encoding")
            .map(|v| v.contains("chunked"))
            .unwrap_or(false);
        let content_length: usize = self
            .headers
            .get("content-length")
            .map(|v| v.parse().map_err(|_| ParseError::MalformedRequestLine))
            .transpose()?
            .unwrap_or(0);

        if !is_chunked && content_length > self.max_body_size {
            return Err(ParseError::PayloadTooLarge);
        }

        if is_chunked {
            self.state = ParsingState::ChunkedBody;
        } else if content_length > 0 {
            self.body_remaining = content_length;
            self.state = ParsingState::Body;
        } else {
            self.state = ParsingState::Complete;
        }
        Ok(())
    }

    fn parse_request_line(&mut self) -> std::result::Result<bool, ParseError> {
        let Some(abs_index) = find_crlf(&self.buffer, self.cursor) else {
            return Ok(false);
        };
        let line_bytes = &self.buffer[self.cursor..abs_index];
        let line = std::str::from_utf8(line_bytes).map_err(|_| ParseError::InvalidUtf8)?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(ParseError::MalformedRequestLine);
        }
        self.method = parts[0].parse()?;
        self.url = parts[1].to_string();
        self.version = parts[2].to_string();
        self.cursor = abs_index + CRLF_LEN;
        self.state = ParsingState::Headers;
        Ok(true)
    }

    fn extract_header_line(&mut self) -> std::result::Result<Option<(String, String)>, ParseError> {
        let Some(abs_index) = find_crlf(&self.buffer, self.cursor) else {
            return Err(ParseError::IncompleteRequestLine);
        };
        let line_bytes = &self.buffer[self.cursor..abs_index];
        if line_bytes.is_empty() {
            self.cursor = abs_index + CRLF_LEN;
            return Ok(None);
        }
        let line = std::str::from_utf8(line_bytes).map_err(|_| ParseError::InvalidUtf8)?;
        self.cursor = abs_index + CRLF_LEN;
        let sep = line.find(':').ok_or(ParseError::MalformedRequestLine)?;
        let key = line[..sep].trim().to_ascii_lowercase();
        let val = line[sep + 1..].trim().to_string();
        Ok(Some((key, val)))
    }

    fn parse_headers(&mut self) -> std::result::Result<bool, ParseError> {
        loop {
            match self.extract_header_line() {
                Ok(Some((k, v))) => {
                    self.headers.insert(k, v);
                }
                Ok(None) => {
                    self.buffer.drain(..self.cursor);
                    self.cursor = 0;
                    self.start_body()?;
                    return Ok(true);
                }
                Err(ParseError::IncompleteRequestLine) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }

    fn parse_body(&mut self) -> std::result::Result<bool, ParseError> {
        let available = self.buffer.len();
        let to_take = available.min(self.body_remaining);
        if to_take > 0 {
            self.body.extend(self.buffer.drain(..to_take));
            self.body_remaining -= to_take;
        }
        if self.body_remaining == 0 {
            self.state = ParsingState::Complete;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn parse_chunked_body(&mut self) -> std::result::Result<bool, ParseError> {
        loop {
            match self.chunk_state {
                ChunkState::ReadSize => {
                    let search_limit = self.buffer.len().min(18);
                    match find_subsequence(&self.buffer[..search_limit], b"\r\n", 0) {
                        Some(line_end) => {
                            let hex = String::from_utf8_lossy(&self.buffer[..line_end]);
                            let size = usize::from_str_radix(hex.trim(), 16)
                                .map_err(|_| ParseError::InvalidChunkSize)?;
                            if self.body.len() + size > self.max_body_size {
                                return Err(ParseError::PayloadTooLarge);
                            }
                            if size == 0 {
                                if self.buffer.len() < line_end + 2 * CRLF_LEN {
                                    return Ok(false);
                                }
                                self.buffer.drain(..line_end + CRLF_LEN);
                                self.chunk_state = ChunkState::ReadTrailers;
                            } else {
                                self.buffer.drain(..line_end + CRLF_LEN);
                                self.chunk_state = ChunkState::ReadData(size);
                            }
                        }
                        None if self.buffer.len() >= 18 => return Err(ParseError::InvalidChunkSize),
                        None => return Ok(false),
                    }
                }
                ChunkState::ReadData(remaining) => {
                    if self.buffer.is_empty() {
                        return Ok(false);
                    }
                    let to_take = self.buffer.len().min(remaining);
                    self.body.extend(self.buffer.drain(..to_take));
                    let left = remaining - to_take;
                    self.chunk_state = if left == 0 {
                        ChunkState::ReadTrailingCrlf
                    } else {
                        return Ok(false);
                    };
                }
                ChunkState::ReadTrailingCrlf => {
                    if self.buffer.len() < CRLF_LEN {
                        return Ok(false);
                    }
                    if &self.buffer[..CRLF_LEN] != b"\r\n" {
                        return Err(ParseError::InvalidChunkSize);
                    }
                    self.buffer.drain(..CRLF_LEN);
                    self.chunk_state = ChunkState::ReadSize;
                }
                ChunkState::ReadTrailers => match self.extract_header_line() {
                    Ok(Some((k, v))) => {
                        let allowed = self
                            .headers
                            .get("trailer")
                            .map(|t| t.to_lowercase().contains(&k))
                            .unwrap_or(false);
                        if allowed {
                            self.trailers.insert(k, v);
                        }
                    }
                    Ok(None) => {
                        self.buffer.drain(..self.cursor);
                        self.cursor = 0;
                        self.state = ParsingState::Complete;
                        return Ok(true);
                    }
                    Err(ParseError::IncompleteRequestLine) => return Ok(false),
                    Err(e) => return Err(e),
                },
            }
        }
    }
}

fn find_crlf(buffer: &[u8], start_offset: usize) -> Option<usize> {
    find_subsequence(buffer, b"\r\n", start_offset)
}

pub fn find_subsequence(buffer: &[u8], needle: &[u8], start_offset: usize) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let search_area = buffer.get(start_offset..)?;
    let first = needle[0];
    let mut pos = 0;
    while let Some(rel) = search_area[pos..].iter().position(|&b| b == first) {
        let abs = pos + rel;
        if let Some(candidate) = search_area.get(abs..abs + needle.len()) {
            if candidate == needle {
                return Some(start_offset + abs);
            }
        } else {
            return None;
        }
        pos = abs + 1;
    }
    None
}

impl fmt::Display for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {} {}", self.method, self.url, self.version)?;
        for (key, value) in &self.headers {
            writeln!(f, "{key}: {value}")?;
        }
        if self.body.is_empty() {
            write!(f, "<empty body>")
        } else {
            write!(f, "<{} byte body>", self.body.len())
        }
    }
}

#[derive(Debug, Default)]
pub struct PartInfo {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: String,
}

/// Parses a multipart/form-data part's own header block (`Content-Disposition`,
/// `Content-Type`), as delimited by the caller from the surrounding boundary.
pub fn parse_part_headers(headers: &str) -> PartInfo {
    let mut info = PartInfo::default();
    for line in headers.lines() {
        if line.starts_with("Content-Disposition:") {
            if let Some(n) = line.split(';').find(|s| s.trim().starts_with("name=")) {
                info.name = n.split('=').nth(1).unwrap_or("").trim_matches('"').to_string();
            }
            if let Some(fpart) = line.split(';').find(|s| s.trim().starts_with("filename=")) {
                info.filename = Some(
                    fpart.split('=').nth(1).unwrap_or("").trim_matches('"').to_string(),
                );
            }
        } else if line.starts_with("Content-Type:") {
            info.content_type = line
                .split(':')
                .nth(1)
                .unwrap_or("text/plain")
                .trim()
                .to_string();
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get_request_with_no_body() {
        let mut req = HttpRequest::new();
        let done = req.feed(b"GET /a/b HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert!(done);
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.url, "/a/b");
        assert_eq!(req.headers.get("host"), Some(&"x".to_string()));
    }

    #[test]
    fn parses_content_length_body_across_two_feeds() {
        let mut req = HttpRequest::new();
        assert!(!req
            .feed(b"POST /p HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel")
            .unwrap());
        assert!(req.feed(b"lo").unwrap());
        assert_eq!(req.body, b"hello");
    }

    #[test]
    fn parses_chunked_body() {
        let mut req = HttpRequest::new();
        let done = req
            .feed(b"POST /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n")
            .unwrap();
        assert!(done);
        assert_eq!(req.body, b"hello");
    }

    #[test]
    fn oversize_content_length_is_rejected() {
        let mut req = HttpRequest::new();
        req.set_max_body_size(4);
        let err = req
            .feed(b"POST /p HTTP/1.1\r\nContent-Length: 100\r\n\r\n")
            .unwrap_err();
        assert_eq!(err, ParseError::PayloadTooLarge);
    }
}
