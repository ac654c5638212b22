//! STOMP 1.2 frames over WebSocket text messages.
//!
//! A text message carries zero or more frames. Bare EOLs between frames are
//! heart-beats and are skipped by [`decode`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
        }
    }

    /// CONNECT and CONNECTED headers are sent verbatim, never escaped.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            "DISCONNECT" => Self::Disconnect,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("unknown STOMP command: {0:?}")]
    UnknownCommand(String),
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
    #[error("invalid escape sequence in header: {0:?}")]
    BadEscape(String),
    #[error("invalid content-length: {0:?}")]
    InvalidContentLength(String),
    #[error("frame is not NUL-terminated")]
    MissingTerminator,
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
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

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First occurrence wins for repeated headers.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// CONNECT carrying the bearer token. `heart_beat` is `(outgoing, incoming)` in ms.
    pub fn connect(host: &str, token: &str, heart_beat: (u64, u64)) -> Self {
        Self::new(Command::Connect)
            .header("accept-version", ACCEPT_VERSION)
            .header("host", host)
            .header("heart-beat", format!("{},{}", heart_beat.0, heart_beat.1))
            .header("Authorization", format!("Bearer {token}"))
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).header("id", id)
    }

    pub fn send_json(destination: &str, json: String) -> Self {
        Self::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .body(json)
    }

    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    /// Human-readable reason carried by an ERROR frame.
    pub fn error_message(&self) -> String {
        match (self.get("message"), self.body.trim()) {
            (Some(msg), "") => msg.to_string(),
            (Some(msg), body) => format!("{msg}: {body}"),
            (None, "") => "broker reported an error".to_string(),
            (None, body) => body.to_string(),
        }
    }

    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        let escape = self.command.escapes_headers();
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str("content-length:");
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Decode every frame in one WebSocket text message.
pub fn decode(text: &str) -> Result<Vec<Frame>, FrameError> {
    let bytes = text.as_bytes();
    let mut pos = 0;
    let mut frames = Vec::new();

    loop {
        while pos < bytes.len() && matches!(bytes[pos], b'\n' | b'\r') {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }

        let (line, next) = read_line(bytes, pos)?;
        pos = next;
        let command: Command = line.parse()?;
        let escaped = command.escapes_headers();

        let mut headers = Vec::new();
        loop {
            let (line, next) = read_line(bytes, pos)?;
            pos = next;
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
            if escaped {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| FrameError::InvalidContentLength(v.clone()))
            })
            .transpose()?;

        let body_end = match content_length {
            Some(len) => {
                let end = pos
                    .checked_add(len)
                    .filter(|&end| end < bytes.len())
                    .ok_or_else(|| FrameError::InvalidContentLength(len.to_string()))?;
                if bytes[end] != 0 {
                    return Err(FrameError::MissingTerminator);
                }
                end
            }
            None => bytes[pos..]
                .iter()
                .position(|b| *b == 0)
                .map(|offset| pos + offset)
                .ok_or(FrameError::MissingTerminator)?,
        };
        let body = std::str::from_utf8(&bytes[pos..body_end])
            .map_err(|_| FrameError::InvalidUtf8)?
            .to_string();
        pos = body_end + 1;

        frames.push(Frame {
            command,
            headers,
            body,
        });
    }

    Ok(frames)
}

fn read_line(bytes: &[u8], start: usize) -> Result<(&str, usize), FrameError> {
    let end = bytes[start..]
        .iter()
        .position(|b| *b == b'\n')
        .map(|offset| start + offset)
        .ok_or(FrameError::MissingTerminator)?;
    let line = std::str::from_utf8(&bytes[start..end]).map_err(|_| FrameError::InvalidUtf8)?;
    Ok((line.strip_suffix('\r').unwrap_or(line), end + 1))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
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

fn unescape_header(raw: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
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
            _ => return Err(FrameError::BadEscape(raw.to_string())),
        }
    }
    Ok(out)
}

/// Negotiated heart-beat intervals. `None` means disabled in that direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Heartbeat {
    /// How often we must send something.
    pub outgoing: Option<Duration>,
    /// How often the broker promised to send something.
    pub incoming: Option<Duration>,
}

/// `client` is what we offered as `(cx, cy)`; `server` is the CONNECTED
/// `heart-beat` header value `sx,sy`. Each direction uses the larger of the
/// two values, or is disabled when either side offered 0.
pub fn negotiate_heartbeat(client: (u64, u64), server: Option<&str>) -> Heartbeat {
    let (sx, sy) = server
        .and_then(|v| {
            let (sx, sy) = v.split_once(',')?;
            Some((sx.trim().parse().ok()?, sy.trim().parse().ok()?))
        })
        .unwrap_or((0u64, 0u64));
    let (cx, cy) = client;
    let pick = |ours: u64, theirs: u64| {
        (ours != 0 && theirs != 0).then(|| Duration::from_millis(ours.max(theirs)))
    };
    Heartbeat {
        outgoing: pick(cx, sy),
        incoming: pick(cy, sx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn encode_send_adds_content_length() {
        let frame = Frame::send_json("/app/task.watch", r#"{"taskId":"1"}"#.to_string());
        assert_eq!(
            frame.encode(),
            "SEND\ndestination:/app/task.watch\ncontent-type:application/json\ncontent-length:14\n\n{\"taskId\":\"1\"}\0"
        );
    }

    #[test]
    fn connect_headers_are_not_escaped() {
        let frame = Frame::connect("localhost", "abc", (10_000, 10_000));
        let text = frame.encode();
        assert!(text.starts_with("CONNECT\n"));
        assert!(text.contains("Authorization:Bearer abc\n"));
        assert!(text.contains("heart-beat:10000,10000\n"));
        assert!(text.ends_with("\n\n\0"));
    }

    #[test]
    fn decode_message_frame() {
        let text = "MESSAGE\nsubscription:sub-0\ndestination:/topic/tasks\nmessage-id:7\n\n{\"action\":\"created\"}\0";
        let frames = decode(text).unwrap();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.get("subscription"), Some("sub-0"));
        assert_eq!(frame.get("destination"), Some("/topic/tasks"));
        assert_eq!(frame.body, "{\"action\":\"created\"}");
    }

    #[test]
    fn decode_skips_heartbeats_and_reads_multiple_frames() {
        let text = "\n\r\nRECEIPT\nreceipt-id:1\n\n\0\nMESSAGE\ndestination:/a\n\nx\0\n";
        let frames = decode(text).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command, Command::Receipt);
        assert_eq!(frames[1].body, "x");
    }

    #[test]
    fn decode_pure_heartbeat_is_empty() {
        assert!(decode("\n").unwrap().is_empty());
        assert!(decode("").unwrap().is_empty());
    }

    #[test]
    fn decode_honours_content_length_with_embedded_nul() {
        let text = "MESSAGE\ndestination:/a\ncontent-length:3\n\na\0b\0";
        let frames = decode(text).unwrap();
        assert_eq!(frames[0].body, "a\0b");
    }

    #[test]
    fn decode_crlf_lines() {
        let text = "CONNECTED\r\nversion:1.2\r\n\r\n\0";
        let frames = decode(text).unwrap();
        assert_eq!(frames[0].command, Command::Connected);
        assert_eq!(frames[0].get("version"), Some("1.2"));
    }

    #[test]
    fn header_escaping_round_trips_through_wire() {
        let frame = Frame::new(Command::Message)
            .header("destination", "/topic/a")
            .header("note", "line1\nkey:value\\end");
        let decoded = decode(&frame.encode()).unwrap();
        assert_eq!(decoded[0].get("note"), Some("line1\nkey:value\\end"));
    }

    #[test]
    fn connected_headers_keep_backslashes() {
        let frames = decode("CONNECTED\nserver:a\\b\n\n\0").unwrap();
        assert_eq!(frames[0].get("server"), Some("a\\b"));
    }

    #[test]
    fn decode_errors() {
        assert_matches!(decode("BOGUS\n\n\0"), Err(FrameError::UnknownCommand(c)) if c == "BOGUS");
        assert_matches!(decode("MESSAGE\nnocolon\n\n\0"), Err(FrameError::MalformedHeader(_)));
        assert_matches!(decode("MESSAGE\n\nbody without nul"), Err(FrameError::MissingTerminator));
        assert_matches!(decode("MESSAGE\nx:\\t\n\n\0"), Err(FrameError::BadEscape(_)));
        assert_matches!(
            decode("MESSAGE\ncontent-length:abc\n\n\0"),
            Err(FrameError::InvalidContentLength(_))
        );
        assert_matches!(
            decode("MESSAGE\ncontent-length:2\n\nshort\0"),
            Err(FrameError::MissingTerminator)
        );
    }

    #[test]
    fn content_length_past_end_of_input_is_rejected() {
        assert_matches!(
            decode("MESSAGE\ncontent-length:10\n\nshort\0"),
            Err(FrameError::InvalidContentLength(_))
        );
        assert_matches!(
            decode("MESSAGE\ncontent-length:18446744073709551615\n\n\0"),
            Err(FrameError::InvalidContentLength(_))
        );
    }

    #[test]
    fn repeated_header_first_wins() {
        let frames = decode("MESSAGE\nfoo:1\nfoo:2\n\n\0").unwrap();
        assert_eq!(frames[0].get("foo"), Some("1"));
    }

    #[test]
    fn error_message_combines_header_and_body() {
        let frame = Frame::new(Command::Error)
            .header("message", "Access denied")
            .body("token expired\n");
        assert_eq!(frame.error_message(), "Access denied: token expired");
        assert_eq!(Frame::new(Command::Error).error_message(), "broker reported an error");
    }

    #[test]
    fn heartbeat_negotiation() {
        let hb = negotiate_heartbeat((10_000, 10_000), Some("5000,20000"));
        assert_eq!(hb.outgoing, Some(Duration::from_millis(20_000)));
        assert_eq!(hb.incoming, Some(Duration::from_millis(10_000)));

        let hb = negotiate_heartbeat((10_000, 0), Some("5000,5000"));
        assert_eq!(hb.outgoing, Some(Duration::from_millis(10_000)));
        assert_eq!(hb.incoming, None);

        assert_eq!(negotiate_heartbeat((10_000, 10_000), None), Heartbeat::default());
        assert_eq!(
            negotiate_heartbeat((10_000, 10_000), Some("garbage")),
            Heartbeat::default()
        );
    }
}
