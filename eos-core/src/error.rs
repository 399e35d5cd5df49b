//! Error types for EOS core operations.
//!
//! All errors are handled explicitly. A payload that cannot be decoded is an
//! error, never a silently skipped record.

use std::fmt;

/// The result type for EOS core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in EOS core operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A record payload is not a valid message.
    InvalidPayload {
        /// Why the payload was rejected.
        reason: &'static str,
    },

    /// An invalid argument was provided.
    InvalidArgument {
        /// The name of the argument.
        name: &'static str,
        /// Why it was invalid.
        reason: &'static str,
    },

    /// A textual value did not name any known variant.
    UnknownVariant {
        /// The kind of value being parsed.
        kind: &'static str,
        /// The rejected input.
        value: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPayload { reason } => write!(f, "invalid payload: {reason}"),
            Self::InvalidArgument { name, reason } => {
                write!(f, "invalid argument '{name}': {reason}")
            }
            Self::UnknownVariant { kind, value } => {
                write!(f, "unknown {kind} '{value}'")
            }
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidPayload {
            reason: "not utf-8",
        };
        assert_eq!(format!("{err}"), "invalid payload: not utf-8");
    }

    #[test]
    fn test_unknown_variant_display() {
        let err = Error::UnknownVariant {
            kind: "failure mode",
            value: "soft_bounce".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("failure mode"));
        assert!(msg.contains("soft_bounce"));
    }
}
