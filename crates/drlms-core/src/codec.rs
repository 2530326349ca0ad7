//! Line framing for the DRLMS control channel
//!
//! Requests and replies are single UTF-8 lines terminated by `\n` with
//! fields separated by `|`. File contents never travel inside a line: a
//! status line announces the byte count (`OK|<size>`) and the raw bytes
//! follow on the stream.
//!
//! Fields are not escaped. A field that would contain a separator or a
//! line break is refused at encode time instead of being sent ambiguously.

use crate::error::{CodecError, Result};
use crate::types::FileEntry;

/// Separator between fields of a control line
pub const FIELD_SEPARATOR: char = '|';

/// Separator between names in a `LIST` reply
pub const LIST_SEPARATOR: char = ',';

/// Control line terminator
pub const LINE_TERMINATOR: u8 = b'\n';

/// Longest control line accepted from a peer, terminator excluded
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Payload of the readiness reply to `PUT`
pub const READY: &str = "ready";

/// Client request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `LOGIN|<user>|<password>`
    Login { user: String, password: String },
    /// `LIST`
    List,
    /// `GET|<name>`
    Get { name: String },
    /// `PUT|<name>|<size>`, followed by `size` raw bytes once the server is ready
    Put { name: String, size: u64 },
}

impl Request {
    /// Protocol verb of this request
    pub fn verb(&self) -> &'static str {
        match self {
            Request::Login { .. } => "LOGIN",
            Request::List => "LIST",
            Request::Get { .. } => "GET",
            Request::Put { .. } => "PUT",
        }
    }

    /// Encode the request as a newline-terminated line.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::ReservedCharacter`] when a field contains a
    /// separator or line break, [`CodecError::EmptyField`] for an empty
    /// user or file name.
    pub fn encode(&self) -> Result<String> {
        let mut line = match self {
            Request::Login { user, password } => {
                check_non_empty("user", user)?;
                check_field("user", user)?;
                check_field("password", password)?;
                format!("LOGIN|{user}|{password}")
            }
            Request::List => "LIST".to_string(),
            Request::Get { name } => {
                validate_name(name)?;
                format!("GET|{name}")
            }
            Request::Put { name, size } => {
                validate_name(name)?;
                format!("PUT|{name}|{size}")
            }
        };
        line.push(LINE_TERMINATOR as char);
        Ok(line)
    }

    /// Parse a request line (terminator already removed).
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let mut fields = line.split(FIELD_SEPARATOR);
        let verb = fields.next().unwrap_or_default();
        let args: Vec<&str> = fields.collect();

        match (verb, args.as_slice()) {
            ("LOGIN", [user, password]) => Ok(Request::Login {
                user: (*user).to_string(),
                password: (*password).to_string(),
            }),
            ("LIST", []) => Ok(Request::List),
            ("GET", [name]) => Ok(Request::Get {
                name: (*name).to_string(),
            }),
            ("PUT", [name, size]) => Ok(Request::Put {
                name: (*name).to_string(),
                size: parse_size(size)?,
            }),
            _ => Err(CodecError::UnknownRequest(line.to_string())),
        }
    }

    /// Line suitable for logs: credentials are masked.
    pub fn redacted(&self) -> String {
        match self {
            Request::Login { user, .. } => format!("LOGIN|{user}|***"),
            Request::List => "LIST".to_string(),
            Request::Get { name } => format!("GET|{name}"),
            Request::Put { name, size } => format!("PUT|{name}|{size}"),
        }
    }
}

/// A status line: `OK|<payload>` or `ERR|<reason>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolResponse {
    Ok(String),
    Err(String),
}

impl ProtocolResponse {
    pub fn ok(payload: impl Into<String>) -> Self {
        ProtocolResponse::Ok(payload.into())
    }

    pub fn err(reason: impl Into<String>) -> Self {
        ProtocolResponse::Err(reason.into())
    }

    /// Parse a status line (terminator already removed).
    ///
    /// Anything whose first token is not `OK` or `ERR` is a
    /// [`CodecError::MalformedResponse`].
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        match line.split_once(FIELD_SEPARATOR) {
            Some(("OK", payload)) => Ok(ProtocolResponse::Ok(payload.to_string())),
            Some(("ERR", reason)) => Ok(ProtocolResponse::Err(reason.to_string())),
            _ => Err(CodecError::MalformedResponse(line.to_string())),
        }
    }

    /// Encode as a newline-terminated line. Line breaks inside the text are
    /// flattened to spaces so the reply always stays one line.
    pub fn encode(&self) -> String {
        let flatten = |s: &str| s.replace(['\r', '\n'], " ");
        match self {
            ProtocolResponse::Ok(payload) => format!("OK|{}\n", flatten(payload)),
            ProtocolResponse::Err(reason) => format!("ERR|{}\n", flatten(reason)),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ProtocolResponse::Ok(_))
    }

    /// Payload of an `OK` line or reason of an `ERR` line
    pub fn text(&self) -> &str {
        match self {
            ProtocolResponse::Ok(payload) => payload,
            ProtocolResponse::Err(reason) => reason,
        }
    }

    pub fn into_result(self) -> std::result::Result<String, String> {
        match self {
            ProtocolResponse::Ok(payload) => Ok(payload),
            ProtocolResponse::Err(reason) => Err(reason),
        }
    }
}

impl std::fmt::Display for ProtocolResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolResponse::Ok(payload) => write!(f, "OK|{payload}"),
            ProtocolResponse::Err(reason) => write!(f, "ERR|{reason}"),
        }
    }
}

/// Parse a byte count: plain decimal digits only, no sign or whitespace.
pub fn parse_size(field: &str) -> Result<u64> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CodecError::InvalidSize(field.to_string()));
    }
    field
        .parse::<u64>()
        .map_err(|_| CodecError::InvalidSize(field.to_string()))
}

/// Encode the payload of a `LIST` reply
pub fn encode_names<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut payload = String::new();
    for (i, name) in names.into_iter().enumerate() {
        if i > 0 {
            payload.push(LIST_SEPARATOR);
        }
        payload.push_str(name.as_ref());
    }
    payload
}

/// Decode the payload of a `LIST` reply.
///
/// Server order and duplicates are kept; empty segments (from a trailing
/// or doubled separator) are skipped.
pub fn parse_names(payload: &str) -> Vec<FileEntry> {
    payload
        .split(LIST_SEPARATOR)
        .filter(|name| !name.is_empty())
        .map(FileEntry::new)
        .collect()
}

/// Check that a file name can travel in a request or listing unescaped.
pub fn validate_name(name: &str) -> Result<()> {
    check_non_empty("name", name)?;
    check_field("name", name)?;
    if name.contains(LIST_SEPARATOR) {
        return Err(CodecError::ReservedCharacter {
            field: "name",
            ch: LIST_SEPARATOR,
        });
    }
    Ok(())
}

fn check_field(field: &'static str, value: &str) -> Result<()> {
    match value
        .chars()
        .find(|&ch| ch == FIELD_SEPARATOR || ch == '\n' || ch == '\r')
    {
        Some(ch) => Err(CodecError::ReservedCharacter { field, ch }),
        None => Ok(()),
    }
}

fn check_non_empty(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        Err(CodecError::EmptyField(field))
    } else {
        Ok(())
    }
}
