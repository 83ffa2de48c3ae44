//! # Header Framing
//!
//! Prepends and extracts the routing header that travels in front of a
//! serialized message body on the wire.
//!
//! Wire shape: `<header-json><delimiter><body>`. The header is exactly
//! `{"source":...,"target":...,"time":...,"seq":...}` (field order not
//! guaranteed); the delimiter is a single reserved character that cannot
//! occur inside the header JSON. Extraction scans at most the first
//! [`MAX_HEADER_LENGTH`] bytes of a frame.

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

use crate::body::Body;

/// Delimiter between the header and the body.
pub const HEADER_DELIMITER: char = '$';

/// Upper bound on the header scan window, in bytes.
pub const MAX_HEADER_LENGTH: usize = 256;

#[derive(Debug)]
pub enum Error {
    /// The body representation cannot carry a header (not yet serialized).
    Unframeable(&'static str),
    /// Header serialization failed.
    Serialize(serde_json::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unframeable(kind) => write!(f, "Cannot frame a {} body", kind),
            Self::Serialize(e) => write!(f, "Header serialization failed: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialize(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Routing metadata framed alongside a message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub source: String,
    pub target: String,
    /// Milliseconds since the Unix epoch at framing time.
    pub time: u64,
    /// Strictly increasing per originating node.
    pub seq: u64,
}

impl Header {
    pub fn new(source: &str, target: &str, seq: u64) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            time: epoch_millis(),
            seq,
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Serializes `header` and concatenates header, delimiter and body.
///
/// Text bodies stay text; byte bodies get the header as UTF-8 bytes
/// followed by the delimiter byte and the raw body.
pub fn prepend_header(header: &Header, body: &Body) -> Result<Body> {
    let header_text = serde_json::to_string(header)?;
    match body {
        Body::Text(text) => Ok(Body::Text(format!("{}{}{}", header_text, HEADER_DELIMITER, text))),
        Body::Bytes(bytes) => {
            let mut framed = Vec::with_capacity(header_text.len() + 1 + bytes.len());
            framed.extend_from_slice(header_text.as_bytes());
            framed.push(HEADER_DELIMITER as u8);
            framed.extend_from_slice(bytes);
            Ok(Body::Bytes(framed))
        }
        Body::Value(_) => Err(Error::Unframeable(body.kind())),
    }
}

/// Scans the first [`MAX_HEADER_LENGTH`] bytes for the delimiter and
/// parses the prefix as a header. Returns the header and the remaining
/// body, or `None` when no well-formed header is present.
///
/// Callers treat `None` as an unroutable frame and drop it; the codec
/// never hands back the raw input as a fallback payload.
pub fn extract_header(raw: &Body) -> Option<(Header, Body)> {
    match raw {
        Body::Text(text) => {
            let pos = delimiter_position(text.as_bytes())?;
            let header = parse_header(&text[..pos])?;
            Some((header, Body::Text(text[pos + 1..].to_string())))
        }
        Body::Bytes(bytes) => {
            let pos = delimiter_position(bytes)?;
            let prefix = std::str::from_utf8(&bytes[..pos]).ok()?;
            let header = parse_header(prefix)?;
            Some((header, Body::Bytes(bytes[pos + 1..].to_vec())))
        }
        Body::Value(_) => None,
    }
}

/// Position of the delimiter within the scan window. A delimiter in the
/// first position means an empty header: not a match.
fn delimiter_position(bytes: &[u8]) -> Option<usize> {
    let window = &bytes[..bytes.len().min(MAX_HEADER_LENGTH)];
    match window.iter().position(|&b| b == HEADER_DELIMITER as u8) {
        Some(0) | None => None,
        Some(pos) => Some(pos),
    }
}

fn parse_header(text: &str) -> Option<Header> {
    if !text.starts_with('{') {
        return None;
    }
    let header: Header = serde_json::from_str(text).ok()?;
    if header.target.is_empty() {
        return None;
    }
    Some(header)
}
