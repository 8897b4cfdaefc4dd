//! Error types for Tillvault Core.

use std::fmt;

use thiserror::Error;

/// Why a raw path was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseErrorReason {
    /// The raw path was empty or only whitespace.
    EmptyPath,
    /// The first component is not one of the accepted roots.
    InvalidRoot,
    /// A segment was empty, too long, or contained forbidden characters.
    IllegalSegment,
    /// More components than the configured depth bound.
    TooDeep,
}

impl ParseErrorReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ParseErrorReason::EmptyPath => "EmptyPath",
            ParseErrorReason::InvalidRoot => "InvalidRoot",
            ParseErrorReason::IllegalSegment => "IllegalSegment",
            ParseErrorReason::TooDeep => "TooDeep",
        }
    }
}

impl fmt::Display for ParseErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw path that could not be resolved.
///
/// Carries the original input so callers can report exactly what was
/// rejected. Never retried: the caller has to fix the path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration path {raw:?}: {reason}")]
pub struct ParseError {
    /// The raw input as given by the caller.
    pub raw: String,
    /// The reason code.
    pub reason: ParseErrorReason,
}

impl ParseError {
    pub fn new(raw: impl Into<String>, reason: ParseErrorReason) -> Self {
        Self {
            raw: raw.into(),
            reason,
        }
    }
}

/// Errors from the pure primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    /// KDF parameters below the enforced safety floor.
    #[error("weak key-derivation parameters: {0}")]
    WeakKdfParameters(String),

    /// A digest string was not 32 bytes of hex.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// An unknown audit operation name.
    #[error("unknown audit operation: {0}")]
    UnknownOperation(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
