//! Error types and Result aliases

use std::fmt;

/// Broad classification of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The operation is not supported in this build or on this input
    /// (e.g. a regex filter when the `regex` feature is disabled).
    Unsupported,
    /// A value is incompatible with the column it targets (e.g. pushing a
    /// string into an integer column of the ad-hoc builder).
    TypeMismatch,
    /// Columns passed to the ad-hoc builder have differing row counts.
    RowCountMismatch,
    /// Malformed input to an internal API (e.g. a corrupt serialized plan).
    Internal,
}

impl ErrorCode {
    /// Short name of the error code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unsupported => "unsupported",
            ErrorCode::TypeMismatch => "type mismatch",
            ErrorCode::RowCountMismatch => "row count mismatch",
            ErrorCode::Internal => "internal",
        }
    }
}

/// An error produced while planning a query or building a dataframe.
///
/// Runtime cast failures are *not* errors: they are encoded in
/// `CastFilterValueResult` and honored by the filter opcodes.
#[derive(Debug, Clone)]
pub struct Error {
    code: ErrorCode,
    message: String,
}

impl Error {
    /// Create an error with a code and message
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The error code
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for Error {}

/// Result type alias for fallible operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::with_message(ErrorCode::TypeMismatch, "string list with Lt op");
        assert_eq!(err.to_string(), "type mismatch: string list with Lt op");
        assert_eq!(err.code(), ErrorCode::TypeMismatch);
    }
}
