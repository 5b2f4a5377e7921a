//! Minimal STOMP 1.2 frame codec.
//!
//! Only what the operator dashboard uses: text frames carried one per
//! WebSocket message, header escaping per the 1.2 rules (except on
//! `CONNECT`/`CONNECTED`), and an optional `content-length`.
//!
//! ```text
//! COMMAND\n
//! header:value\n
//! \n
//! body\0
//! ```

use std::fmt;

/// Frame commands understood or emitted by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Subscribe,
    Unsubscribe,
    Send,
    Disconnect,
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "SEND" => Command::Send,
            "DISCONNECT" => Command::Disconnect,
            "CONNECTED" => Command::Connected,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        })
    }

    fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Send => "SEND",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// `CONNECT`, `STOMP` and `CONNECTED` frames never escape headers.
    fn escapes_headers(self) -> bool {
        !matches!(self, Command::Connect | Command::Stomp | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    Empty,
    UnknownCommand(String),
    MissingHeaderEnd,
    BadHeader(String),
    BadEscape(String),
    BadContentLength(String),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Empty => write!(f, "empty frame"),
            FrameError::UnknownCommand(c) => write!(f, "unknown command '{c}'"),
            FrameError::MissingHeaderEnd => write!(f, "frame has no blank line after headers"),
            FrameError::BadHeader(h) => write!(f, "malformed header '{h}'"),
            FrameError::BadEscape(h) => write!(f, "invalid escape in header '{h}'"),
            FrameError::BadContentLength(v) => write!(f, "invalid content-length '{v}'"),
        }
    }
}

impl std::error::Error for FrameError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of header `name`; repeated headers keep their first value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Decode one frame.  Returns `Ok(None)` for a heart-beat (bare EOLs).
    pub fn parse(text: &str) -> Result<Option<Frame>, FrameError> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(None);
        }

        let (head, rest) = split_head(text).ok_or(FrameError::MissingHeaderEnd)?;
        let mut lines = head.lines();
        let cmd_line = lines.next().ok_or(FrameError::Empty)?.trim_end_matches('\r');
        let command = Command::parse(cmd_line)
            .ok_or_else(|| FrameError::UnknownCommand(cmd_line.to_string()))?;

        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            let (k, v) = line
                .split_once(':')
                .ok_or_else(|| FrameError::BadHeader(line.to_string()))?;
            if command.escapes_headers() {
                headers.push((unescape(k)?, unescape(v)?));
            } else {
                headers.push((k.to_string(), v.to_string()));
            }
        }

        let mut frame = Frame {
            command,
            headers,
            body: String::new(),
        };

        frame.body = match frame.get("content-length") {
            Some(len) => {
                let n: usize = len
                    .trim()
                    .parse()
                    .map_err(|_| FrameError::BadContentLength(len.to_string()))?;
                rest.get(..n)
                    .ok_or_else(|| FrameError::BadContentLength(len.to_string()))?
                    .to_string()
            }
            None => match rest.find('\0') {
                Some(end) => rest[..end].to_string(),
                None => rest.to_string(),
            },
        };
        Ok(Some(frame))
    }

    /// Encode the frame including its terminating NUL.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (k, v) in &self.headers {
            if self.command.escapes_headers() {
                out.push_str(&escape(k));
                out.push(':');
                out.push_str(&escape(v));
            } else {
                out.push_str(k);
                out.push(':');
                out.push_str(v);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

fn split_head(text: &str) -> Option<(&str, &str)> {
    if let Some(i) = text.find("\r\n\r\n") {
        let lf = text.find("\n\n");
        if lf.is_none_or(|j| i < j) {
            return Some((&text[..i], &text[i + 4..]));
        }
    }
    text.find("\n\n").map(|i| (&text[..i], &text[i + 2..]))
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(s: &str) -> Result<String, FrameError> {
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
            _ => return Err(FrameError::BadEscape(s.to_string())),
        }
    }
    Ok(out)
}
