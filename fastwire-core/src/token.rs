/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Field tokens.
//!
//! A token is the compiled identity of one field: its scalar type, its
//! nullability, the operator applied against the dictionary and the
//! dictionary instance it owns. Tokens come from schema compilation and are
//! treated as opaque keys by the codec; the bit layout below is only relevant
//! to the code that builds them.
//!
//! ```text
//!  31 30      26 25    23 22    20 19                     0
//! +--+----------+--------+--------+------------------------+
//! |0 |   kind   |  op2   |   op   |        instance        |
//! +--+----------+--------+--------+------------------------+
//! ```
//!
//! `op2` is only meaningful for decimals, where `op` applies to the exponent
//! and `op2` to the mantissa.

use crate::error::{FastError, Result};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of bits holding the dictionary instance.
pub const INSTANCE_BITS: u32 = 20;

/// Upper bound (exclusive) on dictionary instances per scalar kind.
pub const MAX_INSTANCE: u32 = 1 << INSTANCE_BITS;

const INSTANCE_MASK: u32 = MAX_INSTANCE - 1;
const OPERATOR_SHIFT: u32 = 20;
const SECONDARY_SHIFT: u32 = 23;
const OPERATOR_MASK: u32 = 0x7;
const KIND_SHIFT: u32 = 26;
const KIND_MASK: u32 = 0x1F;

/// Scalar type of a field.
///
/// The low bit of every code marks the optional (nullable) variant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromPrimitive, ToPrimitive,
)]
#[repr(u8)]
pub enum TypeKind {
    /// Unsigned 32-bit integer.
    IntegerUnsigned = 0,
    /// Nullable unsigned 32-bit integer.
    IntegerUnsignedOptional = 1,
    /// Signed 32-bit integer.
    IntegerSigned = 2,
    /// Nullable signed 32-bit integer.
    IntegerSignedOptional = 3,
    /// Unsigned 64-bit integer.
    LongUnsigned = 4,
    /// Nullable unsigned 64-bit integer.
    LongUnsignedOptional = 5,
    /// Signed 64-bit integer.
    LongSigned = 6,
    /// Nullable signed 64-bit integer.
    LongSignedOptional = 7,
    /// Stop-bit terminated ASCII text.
    TextAscii = 8,
    /// Nullable ASCII text.
    TextAsciiOptional = 9,
    /// Codepoint-count prefixed UTF-8 text.
    TextUtf8 = 10,
    /// Nullable UTF-8 text.
    TextUtf8Optional = 11,
    /// Exponent/mantissa decimal pair.
    Decimal = 12,
    /// Nullable decimal pair (the exponent carries the null).
    DecimalOptional = 13,
    /// Length prefixed byte block.
    ByteArray = 14,
    /// Nullable byte block.
    ByteArrayOptional = 15,
}

impl TypeKind {
    /// Returns true for the nullable variant of a type.
    #[inline]
    #[must_use]
    pub const fn is_optional(self) -> bool {
        (self as u8) & 1 == 1
    }

    /// Returns the non-optional variant of this type.
    #[must_use]
    pub fn mandatory(self) -> Self {
        Self::from_u8((self as u8) & !1).unwrap_or(self)
    }

    /// Returns the optional variant of this type.
    #[must_use]
    pub fn optional(self) -> Self {
        Self::from_u8((self as u8) | 1).unwrap_or(self)
    }

    /// Returns true for text and byte block types.
    #[must_use]
    pub const fn is_text(self) -> bool {
        matches!(
            self,
            Self::TextAscii
                | Self::TextAsciiOptional
                | Self::TextUtf8
                | Self::TextUtf8Optional
                | Self::ByteArray
                | Self::ByteArrayOptional
        )
    }

    /// Returns true for decimal types.
    #[must_use]
    pub const fn is_decimal(self) -> bool {
        matches!(self, Self::Decimal | Self::DecimalOptional)
    }
}

/// FAST field operator types.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Default,
    FromPrimitive,
    ToPrimitive,
)]
#[repr(u8)]
pub enum Operator {
    /// No operator - value is always present in stream.
    #[default]
    None = 0,
    /// Constant - value comes from the dictionary unless the bit says otherwise.
    Constant = 1,
    /// Copy - if absent, use previous value from dictionary.
    Copy = 2,
    /// Default - if absent, use the schema default held in the dictionary.
    Default = 3,
    /// Delta - value in stream is a signed difference from the previous value.
    Delta = 4,
    /// Increment - if absent, increment previous value by 1.
    Increment = 5,
}

impl Operator {
    /// Returns true if this operator consumes a presence map bit.
    #[must_use]
    pub const fn requires_pmap(&self) -> bool {
        matches!(
            self,
            Self::Constant | Self::Copy | Self::Default | Self::Increment
        )
    }
}

/// Compiled field identifier.
///
/// The decoded parts are cached next to the raw bits so that the hot decode
/// paths never re-parse them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Token {
    raw: u32,
    kind: TypeKind,
    operator: Operator,
    secondary: Operator,
}

impl Token {
    /// Builds a token for a non-decimal field.
    ///
    /// # Arguments
    /// * `kind` - The scalar type of the field
    /// * `operator` - The operator applied to the field
    /// * `instance` - The dictionary instance owned by the field
    ///
    /// # Errors
    /// Returns `FastError::InvalidConfig` if `instance` does not fit in the
    /// instance bits, or if `kind` is a decimal (use [`Token::decimal`]).
    pub fn new(kind: TypeKind, operator: Operator, instance: u32) -> Result<Self> {
        if kind.is_decimal() {
            return Err(FastError::InvalidConfig(
                "decimal tokens carry two operators, use Token::decimal".to_string(),
            ));
        }
        Self::compose(kind, operator, Operator::None, instance)
    }

    /// Builds a token for a decimal field.
    ///
    /// # Arguments
    /// * `optional` - Whether the decimal is nullable
    /// * `exponent_op` - Operator applied to the exponent
    /// * `mantissa_op` - Operator applied to the mantissa
    /// * `instance` - The dictionary instance owned by the field
    ///
    /// # Errors
    /// Returns `FastError::InvalidConfig` if `instance` is out of range.
    pub fn decimal(
        optional: bool,
        exponent_op: Operator,
        mantissa_op: Operator,
        instance: u32,
    ) -> Result<Self> {
        let kind = if optional {
            TypeKind::DecimalOptional
        } else {
            TypeKind::Decimal
        };
        Self::compose(kind, exponent_op, mantissa_op, instance)
    }

    fn compose(
        kind: TypeKind,
        operator: Operator,
        secondary: Operator,
        instance: u32,
    ) -> Result<Self> {
        if instance >= MAX_INSTANCE {
            return Err(FastError::InvalidConfig(format!(
                "instance {instance} exceeds maximum {}",
                MAX_INSTANCE - 1
            )));
        }
        let raw = ((kind as u32) << KIND_SHIFT)
            | ((secondary as u32) << SECONDARY_SHIFT)
            | ((operator as u32) << OPERATOR_SHIFT)
            | instance;
        Ok(Self {
            raw,
            kind,
            operator,
            secondary,
        })
    }

    /// Decodes a token from its raw bits.
    ///
    /// # Errors
    /// Returns `FastError::InvalidToken` if the kind or operator codes are unknown.
    pub fn from_raw(raw: u32) -> Result<Self> {
        if raw >> 31 != 0 {
            return Err(FastError::InvalidToken(raw));
        }
        let kind = TypeKind::from_u32((raw >> KIND_SHIFT) & KIND_MASK)
            .ok_or(FastError::InvalidToken(raw))?;
        let operator = Operator::from_u32((raw >> OPERATOR_SHIFT) & OPERATOR_MASK)
            .ok_or(FastError::InvalidToken(raw))?;
        let secondary = Operator::from_u32((raw >> SECONDARY_SHIFT) & OPERATOR_MASK)
            .ok_or(FastError::InvalidToken(raw))?;
        Ok(Self {
            raw,
            kind,
            operator,
            secondary,
        })
    }

    /// Returns the raw token bits.
    #[inline]
    #[must_use]
    pub const fn raw(&self) -> u32 {
        self.raw
    }

    /// Returns the scalar type of the field.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> TypeKind {
        self.kind
    }

    /// Returns the field operator (the exponent operator for decimals).
    #[inline]
    #[must_use]
    pub const fn operator(&self) -> Operator {
        self.operator
    }

    /// Returns the mantissa operator of a decimal token.
    #[inline]
    #[must_use]
    pub const fn mantissa_operator(&self) -> Operator {
        self.secondary
    }

    /// Returns the unmasked dictionary instance.
    #[inline]
    #[must_use]
    pub const fn instance(&self) -> u32 {
        self.raw & INSTANCE_MASK
    }

    /// Returns true if the field is nullable.
    #[inline]
    #[must_use]
    pub const fn is_optional(&self) -> bool {
        self.kind.is_optional()
    }

    /// Returns the most presence map bits the field can consume.
    ///
    /// A decimal spends one bit for each of its operators that needs one,
    /// though a null exponent skips the mantissa's bit.
    #[must_use]
    pub const fn presence_bits(&self) -> usize {
        let mut bits = self.operator.requires_pmap() as usize;
        if self.kind.is_decimal() {
            bits += self.secondary.requires_pmap() as usize;
        }
        bits
    }
}

impl TryFrom<u32> for Token {
    type Error = FastError;

    fn try_from(raw: u32) -> Result<Self> {
        Self::from_raw(raw)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.raw
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("kind", &self.kind)
            .field("operator", &self.operator)
            .field("secondary", &self.secondary)
            .field("instance", &self.instance())
            .finish()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}#{}", self.kind, self.operator, self.instance())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_parts() {
        let token = Token::new(TypeKind::LongSignedOptional, Operator::Delta, 77).unwrap();
        assert_eq!(token.kind(), TypeKind::LongSignedOptional);
        assert_eq!(token.operator(), Operator::Delta);
        assert_eq!(token.mantissa_operator(), Operator::None);
        assert_eq!(token.instance(), 77);
        assert!(token.is_optional());
    }

    #[test]
    fn test_token_raw_round_trip() {
        let token = Token::decimal(true, Operator::Copy, Operator::Delta, 3).unwrap();
        let decoded = Token::from_raw(token.raw()).unwrap();
        assert_eq!(decoded, token);
        assert_eq!(decoded.operator(), Operator::Copy);
        assert_eq!(decoded.mantissa_operator(), Operator::Delta);
    }

    #[test]
    fn test_token_rejects_large_instance() {
        let err = Token::new(TypeKind::IntegerUnsigned, Operator::None, MAX_INSTANCE).unwrap_err();
        assert!(matches!(err, FastError::InvalidConfig(_)));
    }

    #[test]
    fn test_token_rejects_decimal_in_new() {
        assert!(Token::new(TypeKind::Decimal, Operator::Copy, 0).is_err());
    }

    #[test]
    fn test_token_from_raw_invalid() {
        // operator code 7 is unassigned
        let raw = 7 << OPERATOR_SHIFT;
        assert_eq!(Token::from_raw(raw), Err(FastError::InvalidToken(raw)));
        // kind code 31 is unassigned
        let raw = 31 << KIND_SHIFT;
        assert_eq!(Token::from_raw(raw), Err(FastError::InvalidToken(raw)));
    }

    #[test]
    fn test_token_serde() {
        let token = Token::new(TypeKind::TextAscii, Operator::None, 5).unwrap();
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, token.raw().to_string());
        let back: Token = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn test_type_kind_variants() {
        assert!(TypeKind::IntegerSignedOptional.is_optional());
        assert_eq!(TypeKind::IntegerSignedOptional.mandatory(), TypeKind::IntegerSigned);
        assert_eq!(TypeKind::ByteArray.optional(), TypeKind::ByteArrayOptional);
        assert!(TypeKind::TextUtf8.is_text());
        assert!(!TypeKind::Decimal.is_text());
    }

    #[test]
    fn test_operator_requires_pmap() {
        assert!(!Operator::None.requires_pmap());
        assert!(!Operator::Delta.requires_pmap());
        assert!(Operator::Constant.requires_pmap());
        assert!(Operator::Copy.requires_pmap());
        assert!(Operator::Default.requires_pmap());
        assert!(Operator::Increment.requires_pmap());
    }

    #[test]
    fn test_presence_bits() {
        let seq = Token::new(TypeKind::IntegerUnsigned, Operator::Increment, 0).unwrap();
        let qty = Token::new(TypeKind::LongSigned, Operator::Delta, 0).unwrap();
        let venue = Token::new(TypeKind::TextAscii, Operator::None, 0).unwrap();
        assert_eq!(seq.presence_bits(), 1);
        assert_eq!(qty.presence_bits(), 0);
        assert_eq!(venue.presence_bits(), 0);

        let both = Token::decimal(false, Operator::Copy, Operator::Default, 0).unwrap();
        let one = Token::decimal(true, Operator::Copy, Operator::Delta, 0).unwrap();
        let none = Token::decimal(false, Operator::Delta, Operator::None, 0).unwrap();
        assert_eq!(both.presence_bits(), 2);
        assert_eq!(one.presence_bits(), 1);
        assert_eq!(none.presence_bits(), 0);
    }
}
