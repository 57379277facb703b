//! RouterOS API wire protocol
//!
//! The API speaks length-prefixed words grouped into sentences:
//!
//! ```text
//! Client                                   Device
//!   |-- /login =name=x =password=y \0 ------>|
//!   |<----------------------- !done \0 ------|
//!   |-- /interface/monitor-traffic           |
//!   |      =interface=ether1 .tag=2 \0 ----->|
//!   |<-- !re =rx-bits-per-second=.. .tag=2 --|   (repeats)
//!   |-- /cancel =tag=2 .tag=3 \0 ----------->|
//!   |<-- !trap category=2 .tag=2 \0 ---------|
//!   |<-- !done .tag=2 \0 --------------------|
//! ```
//!
//! Word lengths use a variable encoding: one byte below `0x80`, two bytes
//! with the top bit set below `0x4000`, and so on up to five bytes. A
//! sentence ends with a zero-length word. Replies start with `!re`, `!done`,
//! `!trap` or `!fatal`; attribute words are `=key=value` and the reply tag
//! travels in `.tag=N`.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::DeviceError;

/// Encode a word length into the variable-length prefix.
pub fn encode_length(len: u32, buf: &mut BytesMut) {
    match len {
        0..=0x7F => buf.put_u8(len as u8),
        0x80..=0x3FFF => buf.put_u16(len as u16 | 0x8000),
        0x4000..=0x1F_FFFF => {
            buf.put_u8(((len >> 16) as u8) | 0xC0);
            buf.put_u16(len as u16);
        }
        0x20_0000..=0x0FFF_FFFF => buf.put_u32(len | 0xE000_0000),
        _ => {
            buf.put_u8(0xF0);
            buf.put_u32(len);
        }
    }
}

/// Decode a word length from the front of `buf` without consuming on a
/// short read. Returns the length and the number of prefix bytes.
pub fn decode_length(buf: &[u8]) -> Result<Option<(u32, usize)>, DeviceError> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };

    let (needed, value) = if first < 0x80 {
        (1, first as u32)
    } else if first & 0xC0 == 0x80 {
        (2, (first & 0x3F) as u32)
    } else if first & 0xE0 == 0xC0 {
        (3, (first & 0x1F) as u32)
    } else if first & 0xF0 == 0xE0 {
        (4, (first & 0x0F) as u32)
    } else if first == 0xF0 {
        (5, 0)
    } else {
        // 0xF1..=0xFF are reserved for control bytes the API never sends
        return Err(DeviceError::Protocol(format!(
            "invalid length prefix 0x{first:02X}"
        )));
    };

    if buf.len() < needed {
        return Ok(None);
    }

    let mut value = value;
    for &byte in &buf[1..needed] {
        value = (value << 8) | byte as u32;
    }
    Ok(Some((value, needed)))
}

/// Encode a sentence (words plus the zero-length terminator).
pub fn encode_sentence<S: AsRef<str>>(words: &[S]) -> Bytes {
    let mut buf = BytesMut::new();
    for word in words {
        let word = word.as_ref().as_bytes();
        encode_length(word.len() as u32, &mut buf);
        buf.put_slice(word);
    }
    buf.put_u8(0);
    buf.freeze()
}

/// Try to decode one complete sentence from the front of `buf`.
///
/// Consumes the sentence from `buf` only when it is complete; a partial
/// sentence leaves `buf` untouched and returns `None`.
pub fn decode_sentence(buf: &mut BytesMut) -> Result<Option<Vec<String>>, DeviceError> {
    let mut words = Vec::new();
    let mut offset = 0;

    loop {
        let Some((len, prefix)) = decode_length(&buf[offset..])? else {
            return Ok(None);
        };
        let end = offset + prefix + len as usize;
        if buf.len() < end {
            return Ok(None);
        }
        if len == 0 {
            buf.advance(end);
            return Ok(Some(words));
        }
        words.push(String::from_utf8_lossy(&buf[offset + prefix..end]).into_owned());
        offset = end;
    }
}

/// Builder for an outgoing command sentence
#[derive(Debug, Clone)]
pub struct Command {
    words: Vec<String>,
}

impl Command {
    /// Start a command for the given menu path (e.g. `/interface/print`).
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            words: vec![path.into()],
        }
    }

    /// Add an `=key=value` attribute word.
    pub fn attr(mut self, key: &str, value: &str) -> Self {
        self.words.push(format!("={key}={value}"));
        self
    }

    /// Set the `.tag` word used to correlate replies.
    pub fn tag(mut self, tag: u32) -> Self {
        self.words.push(format!(".tag={tag}"));
        self
    }

    /// Encode the sentence to wire bytes.
    pub fn encode(&self) -> Bytes {
        encode_sentence(&self.words)
    }
}

/// Kind of reply sentence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// `!re`, one data record
    Data,
    /// `!done`, command finished
    Done,
    /// `!trap`, command failed
    Trap,
    /// `!fatal`, connection-level failure before the device closes
    Fatal,
}

/// A parsed reply sentence
#[derive(Debug, Clone)]
pub struct Reply {
    /// Reply kind
    pub kind: ReplyKind,
    /// Attribute words (`=key=value`)
    pub attributes: HashMap<String, String>,
    /// Correlation tag, if the command was tagged
    pub tag: Option<u32>,
}

impl Reply {
    /// Parse a reply from the words of one sentence.
    pub fn parse(words: &[String]) -> Result<Self, DeviceError> {
        let Some(first) = words.first() else {
            return Err(DeviceError::Protocol("empty reply sentence".into()));
        };

        let kind = match first.as_str() {
            "!re" => ReplyKind::Data,
            "!done" => ReplyKind::Done,
            "!trap" => ReplyKind::Trap,
            "!fatal" => ReplyKind::Fatal,
            other => {
                return Err(DeviceError::Protocol(format!(
                    "unexpected reply word {other:?}"
                )))
            }
        };

        let mut attributes = HashMap::new();
        let mut tag = None;
        for word in &words[1..] {
            if let Some(rest) = word.strip_prefix(".tag=") {
                tag = rest.parse().ok();
            } else if let Some(rest) = word.strip_prefix('=') {
                if let Some((key, value)) = rest.split_once('=') {
                    attributes.insert(key.to_owned(), value.to_owned());
                }
            } else if kind == ReplyKind::Fatal {
                // fatal reasons arrive as bare words
                attributes.insert("message".to_owned(), word.clone());
            }
        }

        Ok(Self {
            kind,
            attributes,
            tag,
        })
    }

    /// Look up an attribute value.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Human-readable failure message for `!trap`/`!fatal` replies.
    pub fn message(&self) -> String {
        self.attribute("message")
            .unwrap_or("unknown device error")
            .to_owned()
    }
}
