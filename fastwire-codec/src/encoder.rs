/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! FAST protocol encoder.
//!
//! The mirror of [`FastDecoder`](crate::FastDecoder). Given the logical
//! value of each field, the encoder decides from the dictionary whether the
//! decoder can predict it (only a zero presence bit is sent) or whether it
//! must be transmitted, and updates the dictionary the same way the decoder
//! will.

use crate::decoder::{expect, expect_text};
use crate::dictionary::Dictionary;
use crate::operators::{self, Scalar};
use fastwire_core::{
    CodecConfig, DecimalValue, FastError, Operator, Result, Token, TypeKind,
};
use fastwire_primitive::{ByteSink, PrimitiveWriter};
use tracing::debug;

type SlotFn<T> = fn(&mut Dictionary, Token) -> &mut <T as Scalar>::Slot;

/// FAST protocol encoder.
#[derive(Debug)]
pub struct FastEncoder<K> {
    writer: PrimitiveWriter<K>,
    dictionary: Dictionary,
}

impl<K: ByteSink> FastEncoder<K> {
    /// Creates an encoder with the default stream configuration.
    #[must_use]
    pub fn new(sink: K, dictionary: Dictionary) -> Self {
        Self::from_writer(PrimitiveWriter::new(sink), dictionary)
    }

    /// Creates an encoder with the given stream configuration.
    ///
    /// # Errors
    /// Returns `FastError::InvalidConfig` if the configuration is rejected.
    pub fn with_config(sink: K, config: &CodecConfig, dictionary: Dictionary) -> Result<Self> {
        let writer = PrimitiveWriter::with_config(sink, config)?;
        Ok(Self::from_writer(writer, dictionary))
    }

    /// Creates an encoder over an existing writer.
    #[must_use]
    pub const fn from_writer(writer: PrimitiveWriter<K>, dictionary: Dictionary) -> Self {
        Self { writer, dictionary }
    }

    /// Returns the dictionary.
    #[must_use]
    pub const fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    /// Returns the dictionary mutably.
    pub fn dictionary_mut(&mut self) -> &mut Dictionary {
        &mut self.dictionary
    }

    /// Returns the underlying primitive writer.
    #[must_use]
    pub const fn writer(&self) -> &PrimitiveWriter<K> {
        &self.writer
    }

    /// Returns the underlying primitive writer mutably, for raw writes.
    pub fn writer_mut(&mut self) -> &mut PrimitiveWriter<K> {
        &mut self.writer
    }

    /// Returns the total number of bytes accepted by the sink.
    #[must_use]
    pub const fn total_written(&self) -> u64 {
        self.writer.total_written()
    }

    /// Flushes completed output to the sink.
    ///
    /// # Errors
    /// Returns `FastError::Io` if the sink fails.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()
    }

    /// Flushes all output and returns the sink.
    ///
    /// # Errors
    /// Returns `FastError::UnbalancedGroup` if a group is still open and
    /// `FastError::Io` if the sink fails.
    pub fn finish(self) -> Result<K> {
        self.writer.finish()
    }

    /// Restores the dictionary's initial values and resets the stream.
    ///
    /// # Errors
    /// Returns `FastError::UnbalancedGroup` if a group is still open.
    pub fn reset(&mut self) -> Result<()> {
        let depth = self.writer.group_depth();
        if depth > 0 {
            return Err(FastError::UnbalancedGroup { depth });
        }
        self.writer.reset();
        self.dictionary.reset();
        debug!("encoder reset");
        Ok(())
    }

    /// Opens a message, optionally transmitting its template id.
    ///
    /// # Errors
    /// Propagates presence map and stream errors.
    pub fn open_message(&mut self, max_bits: usize, template_id: Option<u32>) -> Result<()> {
        self.writer.open_message(max_bits, template_id)
    }

    /// Opens a group with `max_bits` presence bits.
    ///
    /// # Errors
    /// Returns `FastError::NestingOverflow` if too many groups are open.
    pub fn open_group(&mut self, max_bits: usize) -> Result<()> {
        self.writer.open_group(max_bits)
    }

    /// Closes the innermost group, emitting its presence map.
    ///
    /// # Errors
    /// Returns `FastError::UnbalancedGroup` if no group is open.
    pub fn close_group(&mut self) -> Result<()> {
        self.writer.close_group()
    }

    // ------------------------------------------------------------------
    // integers
    // ------------------------------------------------------------------

    /// Writes a mandatory unsigned 32-bit field.
    ///
    /// # Errors
    /// Returns `FastError::TokenMismatch` if the token is not of that kind,
    /// `FastError::ConstantMismatch` if a constant field is given another
    /// value, and propagates stream errors.
    pub fn write_u32(&mut self, token: Token, value: u32) -> Result<()> {
        self.write_scalar(
            token,
            TypeKind::IntegerUnsigned,
            token.operator(),
            value,
            Dictionary::int_slot,
        )
    }

    /// Writes a nullable unsigned 32-bit field.
    ///
    /// # Errors
    /// Also returns `FastError::ValueOutOfRange` for `u32::MAX`, see
    /// [`write_u32`](Self::write_u32).
    pub fn write_u32_optional(&mut self, token: Token, value: Option<u32>) -> Result<()> {
        self.write_optional(
            token,
            TypeKind::IntegerUnsignedOptional,
            token.operator(),
            value,
            Dictionary::int_slot,
        )
    }

    /// Writes a mandatory signed 32-bit field.
    ///
    /// # Errors
    /// See [`write_u32`](Self::write_u32).
    pub fn write_i32(&mut self, token: Token, value: i32) -> Result<()> {
        self.write_scalar(
            token,
            TypeKind::IntegerSigned,
            token.operator(),
            value,
            Dictionary::int_slot,
        )
    }

    /// Writes a nullable signed 32-bit field.
    ///
    /// # Errors
    /// See [`write_u32_optional`](Self::write_u32_optional).
    pub fn write_i32_optional(&mut self, token: Token, value: Option<i32>) -> Result<()> {
        self.write_optional(
            token,
            TypeKind::IntegerSignedOptional,
            token.operator(),
            value,
            Dictionary::int_slot,
        )
    }

    /// Writes a mandatory unsigned 64-bit field.
    ///
    /// # Errors
    /// See [`write_u32`](Self::write_u32).
    pub fn write_u64(&mut self, token: Token, value: u64) -> Result<()> {
        self.write_scalar(
            token,
            TypeKind::LongUnsigned,
            token.operator(),
            value,
            Dictionary::long_slot,
        )
    }

    /// Writes a nullable unsigned 64-bit field.
    ///
    /// # Errors
    /// See [`write_u32_optional`](Self::write_u32_optional).
    pub fn write_u64_optional(&mut self, token: Token, value: Option<u64>) -> Result<()> {
        self.write_optional(
            token,
            TypeKind::LongUnsignedOptional,
            token.operator(),
            value,
            Dictionary::long_slot,
        )
    }

    /// Writes a mandatory signed 64-bit field.
    ///
    /// # Errors
    /// See [`write_u32`](Self::write_u32).
    pub fn write_i64(&mut self, token: Token, value: i64) -> Result<()> {
        self.write_scalar(
            token,
            TypeKind::LongSigned,
            token.operator(),
            value,
            Dictionary::long_slot,
        )
    }

    /// Writes a nullable signed 64-bit field.
    ///
    /// # Errors
    /// See [`write_u32_optional`](Self::write_u32_optional).
    pub fn write_i64_optional(&mut self, token: Token, value: Option<i64>) -> Result<()> {
        self.write_optional(
            token,
            TypeKind::LongSignedOptional,
            token.operator(),
            value,
            Dictionary::long_slot,
        )
    }

    // ------------------------------------------------------------------
    // decimals
    // ------------------------------------------------------------------

    /// Writes the exponent of a mandatory decimal field.
    ///
    /// # Errors
    /// See [`write_u32`](Self::write_u32).
    pub fn write_decimal_exponent(&mut self, token: Token, exponent: i32) -> Result<()> {
        self.write_scalar(
            token,
            TypeKind::Decimal,
            token.operator(),
            exponent,
            Dictionary::exponent_slot,
        )
    }

    /// Writes the exponent of a nullable decimal field; `None` marks the
    /// whole decimal absent and no mantissa may follow.
    ///
    /// # Errors
    /// See [`write_u32_optional`](Self::write_u32_optional).
    pub fn write_decimal_exponent_optional(
        &mut self,
        token: Token,
        exponent: Option<i32>,
    ) -> Result<()> {
        self.write_optional(
            token,
            TypeKind::DecimalOptional,
            token.operator(),
            exponent,
            Dictionary::exponent_slot,
        )
    }

    /// Writes the mantissa of a decimal field, nullable or not.
    ///
    /// # Errors
    /// See [`write_u32`](Self::write_u32).
    pub fn write_decimal_mantissa(&mut self, token: Token, mantissa: i64) -> Result<()> {
        let expected = if token.is_optional() {
            TypeKind::DecimalOptional
        } else {
            TypeKind::Decimal
        };
        self.write_scalar(
            token,
            expected,
            token.mantissa_operator(),
            mantissa,
            Dictionary::mantissa_slot,
        )
    }

    /// Writes the exponent and mantissa of a mandatory decimal field.
    ///
    /// # Errors
    /// See [`write_u32`](Self::write_u32).
    pub fn write_decimal(&mut self, token: Token, value: DecimalValue) -> Result<()> {
        self.write_decimal_exponent(token, value.exponent)?;
        self.write_decimal_mantissa(token, value.mantissa)
    }

    /// Writes a nullable decimal field.
    ///
    /// # Errors
    /// See [`write_u32_optional`](Self::write_u32_optional).
    pub fn write_decimal_optional(
        &mut self,
        token: Token,
        value: Option<DecimalValue>,
    ) -> Result<()> {
        self.write_decimal_exponent_optional(token, value.map(|v| v.exponent))?;
        match value {
            Some(value) => self.write_decimal_mantissa(token, value.mantissa),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // text and byte blocks
    // ------------------------------------------------------------------

    /// Writes a mandatory ASCII field.
    ///
    /// # Errors
    /// Returns `FastError::TokenMismatch` for a token of another kind or with
    /// an operator, `FastError::MalformedField` for text the wire format
    /// cannot carry, and propagates stream errors.
    pub fn write_ascii(&mut self, token: Token, text: &str) -> Result<()> {
        expect_text(token, TypeKind::TextAscii)?;
        self.writer.write_ascii(text)
    }

    /// Writes a nullable ASCII field.
    ///
    /// # Errors
    /// See [`write_ascii`](Self::write_ascii). A lone NUL character is also
    /// rejected, since its encoding is the null marker.
    pub fn write_ascii_optional(&mut self, token: Token, text: Option<&str>) -> Result<()> {
        expect_text(token, TypeKind::TextAsciiOptional)?;
        match text {
            None => self.writer.write_null(),
            Some("\0") => Err(FastError::MalformedField {
                reason: "lone NUL collides with the null marker",
            }),
            Some(text) => self.writer.write_ascii(text),
        }
    }

    /// Writes a mandatory UTF-8 field.
    ///
    /// # Errors
    /// See [`write_ascii`](Self::write_ascii).
    pub fn write_utf8(&mut self, token: Token, text: &str) -> Result<()> {
        expect_text(token, TypeKind::TextUtf8)?;
        let count = length(token, text.chars().count())?;
        self.writer.write_u32(count)?;
        self.writer.write_utf8(text)
    }

    /// Writes a nullable UTF-8 field.
    ///
    /// # Errors
    /// See [`write_ascii`](Self::write_ascii).
    pub fn write_utf8_optional(&mut self, token: Token, text: Option<&str>) -> Result<()> {
        expect_text(token, TypeKind::TextUtf8Optional)?;
        let Some(text) = text else {
            return self.writer.write_null();
        };
        let count = nullable_length(token, text.chars().count())?;
        self.writer.write_u32(count)?;
        self.writer.write_utf8(text)
    }

    /// Writes a mandatory byte array field.
    ///
    /// # Errors
    /// See [`write_ascii`](Self::write_ascii).
    pub fn write_bytes(&mut self, token: Token, data: &[u8]) -> Result<()> {
        expect_text(token, TypeKind::ByteArray)?;
        self.writer.write_u32(length(token, data.len())?)?;
        self.writer.write_bytes(data)
    }

    /// Writes a nullable byte array field.
    ///
    /// # Errors
    /// See [`write_ascii`](Self::write_ascii).
    pub fn write_bytes_optional(&mut self, token: Token, data: Option<&[u8]>) -> Result<()> {
        expect_text(token, TypeKind::ByteArrayOptional)?;
        let Some(data) = data else {
            return self.writer.write_null();
        };
        self.writer.write_u32(nullable_length(token, data.len())?)?;
        self.writer.write_bytes(data)
    }

    // ------------------------------------------------------------------
    // dispatch
    // ------------------------------------------------------------------

    #[inline]
    fn write_scalar<T: Scalar>(
        &mut self,
        token: Token,
        expected: TypeKind,
        operator: Operator,
        value: T,
        slot: SlotFn<T>,
    ) -> Result<()> {
        expect(token, expected)?;
        let cell = slot(&mut self.dictionary, token);
        let mut previous = T::from_slot(*cell);
        let result = operators::encode(&mut self.writer, token, operator, value, &mut previous);
        *cell = previous.into_slot();
        result
    }

    #[inline]
    fn write_optional<T: Scalar>(
        &mut self,
        token: Token,
        expected: TypeKind,
        operator: Operator,
        value: Option<T>,
        slot: SlotFn<T>,
    ) -> Result<()> {
        expect(token, expected)?;
        let cell = slot(&mut self.dictionary, token);
        let mut previous = T::from_slot(*cell);
        let result =
            operators::encode_optional(&mut self.writer, token, operator, value, &mut previous);
        *cell = previous.into_slot();
        result
    }
}

fn length(token: Token, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| FastError::ValueOutOfRange { token })
}

fn nullable_length(token: Token, len: usize) -> Result<u32> {
    length(token, len)?
        .to_nullable()
        .ok_or(FastError::ValueOutOfRange { token })
}
