//! Error taxonomy for the engine.
//!
//! Client-facing calls return [`Result`]; the tick loop never propagates
//! pattern-level failures outward (it logs and rolls the offending key back
//! instead).

use thiserror::Error;

/// A specialized result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by client-facing operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Mini-notation could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// A pattern failed while being evaluated.
    #[error("pattern error: {0}")]
    Pattern(String),

    /// Invalid configuration at startup.
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// OSC encoding or decoding failed.
    #[error("osc error: {0}")]
    Osc(#[from] rosc::OscError),
}

/// A parse failure with its source position (1-based line and column).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at line {line}, column {column}")]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        ParseError {
            message: message.into(),
            line,
            column,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_displays_position() {
        let err = ParseError::new("unexpected ']'", 2, 7);
        assert_eq!(err.to_string(), "unexpected ']' at line 2, column 7");
        let wrapped: Error = err.into();
        assert!(wrapped.to_string().contains("line 2"));
    }
}
