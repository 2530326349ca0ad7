use thiserror::Error;

/// Errors raised while framing or parsing protocol lines
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed response: {0:?}")]
    MalformedResponse(String),

    #[error("Invalid size field: {0:?}")]
    InvalidSize(String),

    #[error("Field `{field}` contains reserved character {ch:?}")]
    ReservedCharacter { field: &'static str, ch: char },

    #[error("Field `{0}` must not be empty")]
    EmptyField(&'static str),

    #[error("Unknown request: {0:?}")]
    UnknownRequest(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;
