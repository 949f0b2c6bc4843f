//! STOMP 1.2 frame codec.
//!
//! Frames travel as WebSocket messages, one frame (or one heart-beat EOL)
//! per message:
//!
//! ```text
//! COMMAND\n
//! header:value\n
//! ...\n
//! \n
//! BODY\0
//! ```

use std::fmt;

/// Errors from decoding a STOMP frame.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StompError {
    #[error("empty frame")]
    Empty,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    #[error("invalid escape sequence in header: {0}")]
    InvalidEscape(String),

    #[error("frame is not terminated by NUL")]
    Unterminated,

    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

/// STOMP frame command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Result<Self, StompError> {
        Ok(match s {
            "CONNECT" | "STOMP" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(StompError::UnknownCommand(other.to_string())),
        })
    }

    /// CONNECT and CONNECTED frames carry headers without escaping.
    fn escapes_headers(self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded or to-be-encoded STOMP frame.
#[derive(Debug, Clone, PartialEq)]
pub struct StompFrame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// One inbound WebSocket payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Bare EOL sent to keep the link alive.
    Heartbeat,
    Frame(StompFrame),
}

impl StompFrame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Appends a header (builder style).
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Appends several headers (builder style).
    pub fn headers<'a, I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = &'a (String, String)>,
    {
        self.headers.extend(headers.into_iter().cloned());
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the first value of a header. Repeated headers keep the
    /// first occurrence, as STOMP 1.2 requires.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Serializes the frame, adding `content-length` when there is a body.
    pub fn encode(&self) -> Vec<u8> {
        let escape = self.command.escapes_headers();
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(self.command.as_str().as_bytes());
        out.push(b'\n');
        for (k, v) in &self.headers {
            push_header_part(&mut out, k, escape);
            out.push(b':');
            push_header_part(&mut out, v, escape);
            out.push(b'\n');
        }
        if !self.body.is_empty() && self.get_header("content-length").is_none() {
            out.extend_from_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }
        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }

    /// Body as UTF-8 text, lossily.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn push_header_part(out: &mut Vec<u8>, s: &str, escape: bool) {
    if !escape {
        out.extend_from_slice(s.as_bytes());
        return;
    }
    for c in s.chars() {
        match c {
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            ':' => out.extend_from_slice(b"\\c"),
            other => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
}

fn unescape(s: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(StompError::InvalidEscape(s.to_string())),
        }
    }
    Ok(out)
}

/// Splits off one line, accepting both `\n` and `\r\n` endings.
fn take_line(buf: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let line = &buf[..pos];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    Some((line, &buf[pos + 1..]))
}

/// Decodes one WebSocket payload into a frame or a heart-beat.
pub fn decode(data: &[u8]) -> Result<Inbound, StompError> {
    // Leading EOLs are heart-beats that may precede a frame.
    let start = data
        .iter()
        .position(|&b| b != b'\n' && b != b'\r')
        .unwrap_or(data.len());
    let data = &data[start..];
    if data.is_empty() {
        return if start > 0 {
            Ok(Inbound::Heartbeat)
        } else {
            Err(StompError::Empty)
        };
    }

    let (command_line, mut rest) = take_line(data).ok_or(StompError::Unterminated)?;
    let command_str = std::str::from_utf8(command_line).map_err(|_| StompError::InvalidUtf8)?;
    let command = Command::parse(command_str)?;
    let escape = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let (line, next) = take_line(rest).ok_or(StompError::Unterminated)?;
        rest = next;
        if line.is_empty() {
            break;
        }
        let line = std::str::from_utf8(line).map_err(|_| StompError::InvalidUtf8)?;
        let (k, v) = line
            .split_once(':')
            .ok_or_else(|| StompError::MalformedHeader(line.to_string()))?;
        let (k, v) = if escape {
            (unescape(k)?, unescape(v)?)
        } else {
            (k.to_string(), v.to_string())
        };
        headers.push((k, v));
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| StompError::InvalidContentLength(v.clone()))
        })
        .transpose()?;

    let body = match content_length {
        Some(len) => match rest.get(len) {
            Some(0) => rest[..len].to_vec(),
            _ => return Err(StompError::Unterminated),
        },
        None => {
            let end = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or(StompError::Unterminated)?;
            rest[..end].to_vec()
        }
    };

    Ok(Inbound::Frame(StompFrame {
        command,
        headers,
        body,
    }))
}
