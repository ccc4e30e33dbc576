// ABOUTME: SCP sink wire format: control line, terminator, and status replies.
// ABOUTME: Pure encode/decode helpers with no channel I/O.

use std::fmt;

/// Status byte: success.
pub const STATUS_OK: u8 = 0;
/// Status byte: warning, followed by a message line.
pub const STATUS_WARNING: u8 = 1;
/// Status byte: fatal error, followed by a message line.
pub const STATUS_ERROR: u8 = 2;

/// Marks the end of the file body.
pub const TERMINATOR: u8 = 0;

/// Remote command that starts a quiet sink for `destination`.
pub fn sink_command(destination: &str) -> String {
    format!("scp -tq {}", shell_quote(destination))
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"/._-+:,@%=~".contains(&b));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// The `C<mode> <length> <name>` line that announces a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlLine {
    pub mode: u32,
    pub length: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    NotAFileRecord,
    BadMode,
    BadLength,
    BadName,
    Unterminated,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            ParseError::NotAFileRecord => "expected control record 'C'",
            ParseError::BadMode => "bad mode",
            ParseError::BadLength => "size not delimited",
            ParseError::BadName => "unexpected filename",
            ParseError::Unterminated => "control record not newline terminated",
        };
        f.write_str(reason)
    }
}

impl std::error::Error for ParseError {}

impl ControlLine {
    pub fn new(mode: u32, length: u64, name: impl Into<String>) -> Self {
        Self {
            mode,
            length,
            name: name.into(),
        }
    }

    /// Names must be a single path component on one line.
    pub fn is_valid_name(name: &str) -> bool {
        !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\n', '\r'])
    }

    /// `C%06o %d %s\n`.
    pub fn encode(&self) -> String {
        format!("C{:06o} {} {}\n", self.mode, self.length, self.name)
    }

    /// Parse a control line as a sink would receive it, including the
    /// trailing newline.
    pub fn parse(line: &[u8]) -> Result<Self, ParseError> {
        let line = line.strip_suffix(b"\n").ok_or(ParseError::Unterminated)?;
        let line = std::str::from_utf8(line).map_err(|_| ParseError::BadName)?;
        let rest = line.strip_prefix('C').ok_or(ParseError::NotAFileRecord)?;

        let (mode, rest) = rest.split_once(' ').ok_or(ParseError::BadMode)?;
        if mode.is_empty() || !mode.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
            return Err(ParseError::BadMode);
        }
        let mode = u32::from_str_radix(mode, 8).map_err(|_| ParseError::BadMode)?;
        if mode > 0o7777 {
            return Err(ParseError::BadMode);
        }

        let (length, name) = rest.split_once(' ').ok_or(ParseError::BadLength)?;
        let length = length.parse::<u64>().map_err(|_| ParseError::BadLength)?;
        if !Self::is_valid_name(name) {
            return Err(ParseError::BadName);
        }

        Ok(Self::new(mode, length, name))
    }
}

/// Extract the first message from a sink's status stream.
///
/// The stream looks like `<status><text>\n<status><text>\n...`; only the
/// text after the leading status byte and before the next status byte (any
/// byte below 3) is kept, with a trailing newline removed.
pub fn decode_status_message(reply: &[u8]) -> String {
    let Some((_, body)) = reply.split_first() else {
        return String::new();
    };
    let first = body.split(|&b| b < 3).next().unwrap_or_default();
    let first = first.strip_suffix(b"\n").unwrap_or(first);
    String::from_utf8_lossy(first).into_owned()
}
