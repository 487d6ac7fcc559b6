/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Error types for the fastwire codec.
//!
//! A single `thiserror` enum covers the primitive stream, the presence map
//! stack, the dictionary and the field operator engine. Absent optional
//! values are never reported through this type; they are `None`.

use crate::token::{Token, TypeKind};
use thiserror::Error;

/// Result type alias using [`FastError`] as the error type.
pub type Result<T> = std::result::Result<T, FastError>;

/// Errors that can occur during FAST encoding/decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FastError {
    /// The byte source is exhausted while a value is still incomplete.
    #[error("unexpected end of stream")]
    EndOfStream,

    /// Wire bytes that cannot be a valid encoding of the expected field.
    #[error("malformed field: {reason}")]
    MalformedField {
        /// What was wrong with the bytes.
        reason: &'static str,
    },

    /// Presence map stack depth exceeded.
    #[error("presence map nesting exceeds configured depth of {max_depth}")]
    NestingOverflow {
        /// Configured maximum depth.
        max_depth: usize,
    },

    /// Token instance outside the dictionary's configured range.
    #[error("token {token} resolves to instance {instance} outside dictionary capacity {capacity}")]
    DictionaryBounds {
        /// Offending token.
        token: Token,
        /// Instance carried by the token.
        instance: u32,
        /// Slot count of the dictionary array for the token's kind.
        capacity: usize,
    },

    /// More presence bits written to a group than it declared.
    #[error("presence map holds at most {max_bits} bits")]
    PresenceMapOverflow {
        /// Declared bit capacity of the group.
        max_bits: usize,
    },

    /// Value written for a constant field differs from the constant.
    #[error("value for constant field {token} differs from the dictionary constant")]
    ConstantMismatch {
        /// Constant field token.
        token: Token,
    },

    /// Value has no wire representation for the field's nullability.
    #[error("value out of range for field {token}")]
    ValueOutOfRange {
        /// Field token.
        token: Token,
    },

    /// Token type does not match the entry point it was used with.
    #[error("token {token} used where {expected:?} was expected")]
    TokenMismatch {
        /// Offending token.
        token: Token,
        /// Kind required by the entry point.
        expected: TypeKind,
    },

    /// Token bits do not describe a known type or operator.
    #[error("invalid token: {0:#010x}")]
    InvalidToken(u32),

    /// Group open/close calls are not balanced.
    #[error("unbalanced group: {depth} group(s) open")]
    UnbalancedGroup {
        /// Number of groups open at the time of the call.
        depth: usize,
    },

    /// A value requires more resident bytes than the window holds.
    #[error("buffer too small: need {needed} bytes, capacity {capacity}")]
    BufferTooSmall {
        /// Bytes required.
        needed: usize,
        /// Window capacity.
        capacity: usize,
    },

    /// Rejected configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error from an adapter.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for FastError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl FastError {
    /// Returns true if the error means the byte source ran dry.
    #[must_use]
    pub const fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Operator;

    #[test]
    fn test_error_display() {
        let err = FastError::MalformedField {
            reason: "varint too long",
        };
        assert_eq!(err.to_string(), "malformed field: varint too long");

        let err = FastError::NestingOverflow { max_depth: 32 };
        assert!(err.to_string().contains("32"));
    }

    #[test]
    fn test_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: FastError = io.into();
        assert!(matches!(err, FastError::Io(ref msg) if msg.contains("pipe closed")));
    }

    #[test]
    fn test_bounds_error_mentions_token() {
        let token = Token::new(TypeKind::IntegerUnsigned, Operator::Copy, 9).unwrap();
        let err = FastError::DictionaryBounds {
            token,
            instance: 9,
            capacity: 8,
        };
        let text = err.to_string();
        assert!(text.contains("instance 9"));
        assert!(text.contains("capacity 8"));
    }
}
