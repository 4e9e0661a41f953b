//! ASCII command/response framing for the water-quality probes.
//!
//! Commands are ASCII tokens terminated by a null byte. A response frame is a
//! status byte followed by ASCII payload bytes (high bit cleared on decode),
//! null padded up to the read length.

use std::fmt;
use std::time::Duration;

/// Prefix of a decoded successful response.
pub const SUCCESS_PREFIX: &str = "Command succeeded ";
/// Text of a decoded response carrying a non-success status.
pub const ERROR_TEXT: &str = "Error reading response";
/// Text returned for `SLEEP`, which has no response frame.
pub const SLEEP_TEXT: &str = "sleep mode";

/// Post-command wait class. Reading before the wait elapses yields garbage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    /// `R*` and `CAL*`: sensor conversion time.
    Long,
    /// Any other command.
    Short,
    /// `SLEEP*`: no response is read.
    Sleep,
}

impl CommandClass {
    pub fn of(command: &str) -> Self {
        let c = command.trim_start().to_ascii_uppercase();
        if c.starts_with('R') || c.starts_with("CAL") {
            Self::Long
        } else if c.starts_with("SLEEP") {
            Self::Sleep
        } else {
            Self::Short
        }
    }
}

/// Protocol timing and frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusTimings {
    pub long_wait: Duration,
    pub short_wait: Duration,
    /// Bytes requested per response read.
    pub read_len: usize,
}

impl Default for BusTimings {
    fn default() -> Self {
        Self {
            long_wait: Duration::from_millis(1500),
            short_wait: Duration::from_millis(500),
            read_len: 31,
        }
    }
}

impl BusTimings {
    /// Wait between send and receive; `None` means do not read at all.
    pub fn wait_for(&self, class: CommandClass) -> Option<Duration> {
        match class {
            CommandClass::Long => Some(self.long_wait),
            CommandClass::Short => Some(self.short_wait),
            CommandClass::Sleep => None,
        }
    }
}

/// First byte of a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Success,
    SyntaxError,
    /// Device still processing; read came too early.
    Pending,
    NoData,
    Unknown(u8),
}

impl From<u8> for ResponseStatus {
    fn from(b: u8) -> Self {
        match b {
            1 => Self::Success,
            2 => Self::SyntaxError,
            254 => Self::Pending,
            255 => Self::NoData,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::SyntaxError => f.write_str("syntax error"),
            Self::Pending => f.write_str("still processing"),
            Self::NoData => f.write_str("no data"),
            Self::Unknown(b) => write!(f, "unknown status {b}"),
        }
    }
}

/// Decoded device response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Success(String),
    Failed(ResponseStatus),
    /// `SLEEP` was sent; nothing is read back.
    Sleeping,
}

impl Response {
    pub fn payload(&self) -> Option<&str> {
        match self {
            Self::Success(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(p) => write!(f, "{SUCCESS_PREFIX}{p}"),
            Self::Failed(_) => f.write_str(ERROR_TEXT),
            Self::Sleeping => f.write_str(SLEEP_TEXT),
        }
    }
}

/// Null-terminated wire form of `command`.
pub fn encode_command(command: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(command.len() + 1);
    frame.extend_from_slice(command.as_bytes());
    frame.push(0);
    frame
}

/// Decode a raw response frame. `Err` carries the reason the frame is
/// structurally invalid.
pub fn decode_frame(raw: &[u8]) -> Result<Response, String> {
    let end = raw.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    let frame = &raw[..end];
    let Some((&status, payload)) = frame.split_first() else {
        return Err("empty frame".to_string());
    };
    match ResponseStatus::from(status) {
        ResponseStatus::Success => {
            let mut text = String::with_capacity(payload.len());
            for (i, b) in payload.iter().enumerate() {
                let c = b & 0x7F;
                if c < 0x20 || c == 0x7F {
                    return Err(format!("non-printable payload byte 0x{b:02X} at offset {}", i + 1));
                }
                text.push(char::from(c));
            }
            Ok(Response::Success(text))
        }
        other => Ok(Response::Failed(other)),
    }
}
