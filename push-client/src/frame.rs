//! STOMP 1.2 framing as a `tokio_util` codec.
//!
//! A frame is a command line, `name:value` header lines, a blank line, and a
//! body terminated by NUL. When `content-length` is present the body is
//! sized by it and may itself contain NUL bytes. Bare EOLs between frames
//! are heart-beats.

use bytes::Buf;
use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;
use strum_macros::AsRefStr;
use strum_macros::Display;
use strum_macros::EnumString;
use tokio_util::codec::Decoder;
use tokio_util::codec::Encoder;

/// Upper bound on a single frame, head and body included.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    /// CONNECT and CONNECTED headers travel verbatim.
    fn escapes_headers(self) -> bool {
        !matches!(self, Command::Connect | Command::Stomp | Command::Connected)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("frame head is not valid UTF-8")]
    InvalidUtf8,

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("malformed header line {0:?}")]
    MalformedHeader(String),

    #[error("invalid escape sequence in {0:?}")]
    InvalidEscape(String),

    #[error("invalid content-length {0:?}")]
    InvalidContentLength(String),

    #[error("frame body is not NUL terminated")]
    MissingNul,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: Command,
    /// Headers in wire order. Repeated names are kept; the first one wins.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl StompFrame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// One unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    Frame(StompFrame),
    Heartbeat,
}

#[derive(Debug, Clone, Copy)]
pub struct StompCodec {
    max_frame_len: usize,
}

impl StompCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    fn check_len(&self, len: usize) -> Result<(), FrameError> {
        if len > self.max_frame_len {
            Err(FrameError::TooLarge {
                limit: self.max_frame_len,
            })
        } else {
            Ok(())
        }
    }
}

impl Default for StompCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Decoder for StompCodec {
    type Item = StompItem;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<StompItem>, FrameError> {
        match src.first() {
            None => return Ok(None),
            Some(b'\n') => {
                src.advance(1);
                return Ok(Some(StompItem::Heartbeat));
            }
            Some(b'\r') if src.len() < 2 => return Ok(None),
            Some(b'\r') if src[1] == b'\n' => {
                src.advance(2);
                return Ok(Some(StompItem::Heartbeat));
            }
            Some(_) => {}
        }

        let Some(body_start) = find_head_end(src) else {
            self.check_len(src.len())?;
            return Ok(None);
        };

        let head = std::str::from_utf8(&src[..body_start]).map_err(|_| FrameError::InvalidUtf8)?;
        let (command, headers) = parse_head(head)?;
        let content_length = headers
            .iter()
            .find(|(name, _)| name == "content-length")
            .map(|(_, value)| {
                value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| FrameError::InvalidContentLength(value.clone()))
            })
            .transpose()?;

        let body_end = match content_length {
            Some(len) => {
                self.check_len(len)?;
                let end = body_start.checked_add(len).ok_or(FrameError::TooLarge {
                    limit: self.max_frame_len,
                })?;
                self.check_len(end + 1)?;
                if src.len() <= end {
                    src.reserve(end + 1 - src.len());
                    return Ok(None);
                }
                if src[end] != 0 {
                    return Err(FrameError::MissingNul);
                }
                end
            }
            None => match src[body_start..].iter().position(|&b| b == 0) {
                Some(offset) => body_start + offset,
                None => {
                    self.check_len(src.len())?;
                    return Ok(None);
                }
            },
        };
        self.check_len(body_end + 1)?;

        let raw = src.split_to(body_end + 1).freeze();
        let body = raw.slice(body_start..body_end);
        Ok(Some(StompItem::Frame(StompFrame {
            command,
            headers,
            body,
        })))
    }
}

impl Encoder<StompItem> for StompCodec {
    type Error = FrameError;

    fn encode(&mut self, item: StompItem, dst: &mut BytesMut) -> Result<(), FrameError> {
        let frame = match item {
            StompItem::Heartbeat => {
                dst.put_u8(b'\n');
                return Ok(());
            }
            StompItem::Frame(frame) => frame,
        };

        let escape = frame.command.escapes_headers();
        dst.put_slice(frame.command.as_ref().as_bytes());
        dst.put_u8(b'\n');
        for (name, value) in &frame.headers {
            put_header_text(dst, name, escape);
            dst.put_u8(b':');
            put_header_text(dst, value, escape);
            dst.put_u8(b'\n');
        }
        if !frame.body.is_empty() && frame.get("content-length").is_none() {
            dst.put_slice(format!("content-length:{}\n", frame.body.len()).as_bytes());
        }
        dst.put_u8(b'\n');
        dst.put_slice(&frame.body);
        dst.put_u8(0);
        Ok(())
    }
}

/// Offset just past the blank line ending the frame head.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    let mut line_start = 0;
    for (i, &b) in buf.iter().enumerate() {
        if b != b'\n' {
            continue;
        }
        let line = &buf[line_start..i];
        if line_start > 0 && (line.is_empty() || line == b"\r") {
            return Some(i + 1);
        }
        line_start = i + 1;
    }
    None
}

fn parse_head(head: &str) -> Result<(Command, Vec<(String, String)>), FrameError> {
    let mut lines = head
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line));
    let command_line = lines.next().unwrap_or_default();
    let command: Command = command_line
        .parse()
        .map_err(|_| FrameError::UnknownCommand(command_line.to_string()))?;

    let escape = command.escapes_headers();
    let mut headers = Vec::new();
    for line in lines.filter(|line| !line.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
        if escape {
            headers.push((unescape(name)?, unescape(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }
    Ok((command, headers))
}

fn unescape(raw: &str) -> Result<String, FrameError> {
    if !raw.contains('\\') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some('\\') => out.push('\\'),
            _ => return Err(FrameError::InvalidEscape(raw.to_string())),
        }
    }
    Ok(out)
}

fn put_header_text(dst: &mut BytesMut, text: &str, escape: bool) {
    if !escape {
        dst.put_slice(text.as_bytes());
        return;
    }
    for c in text.chars() {
        match c {
            '\\' => dst.put_slice(b"\\\\"),
            '\n' => dst.put_slice(b"\\n"),
            '\r' => dst.put_slice(b"\\r"),
            ':' => dst.put_slice(b"\\c"),
            other => {
                let mut buf = [0u8; 4];
                dst.put_slice(other.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
}
