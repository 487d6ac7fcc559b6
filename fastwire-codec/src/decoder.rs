/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! FAST protocol decoder.
//!
//! [`FastDecoder`] pairs a [`PrimitiveReader`] with a [`Dictionary`] and
//! exposes one read entry point per scalar kind, keyed by [`Token`]. Fields
//! must be read in the order the template declares them, since presence bits
//! and dictionary slots are positional.

use crate::dictionary::Dictionary;
use crate::operators::{self, Scalar};
use bytes::Bytes;
use fastwire_core::{
    CodecConfig, DecimalValue, FastError, Operator, Result, Token, TypeKind,
};
use fastwire_primitive::{ByteSource, PrimitiveReader};
use tracing::debug;

const NULL_BYTE: u8 = 0x80;

type SlotFn<T> = fn(&mut Dictionary, Token) -> &mut <T as Scalar>::Slot;

/// FAST protocol decoder.
#[derive(Debug)]
pub struct FastDecoder<S> {
    reader: PrimitiveReader<S>,
    dictionary: Dictionary,
}

impl<S: ByteSource> FastDecoder<S> {
    /// Creates a decoder with the default stream configuration.
    #[must_use]
    pub fn new(source: S, dictionary: Dictionary) -> Self {
        Self::from_reader(PrimitiveReader::new(source), dictionary)
    }

    /// Creates a decoder with the given stream configuration.
    ///
    /// # Errors
    /// Returns `FastError::InvalidConfig` if the configuration is rejected.
    pub fn with_config(source: S, config: &CodecConfig, dictionary: Dictionary) -> Result<Self> {
        let reader = PrimitiveReader::with_config(source, config)?;
        Ok(Self::from_reader(reader, dictionary))
    }

    /// Creates a decoder over an existing reader.
    #[must_use]
    pub const fn from_reader(reader: PrimitiveReader<S>, dictionary: Dictionary) -> Self {
        Self { reader, dictionary }
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

    /// Returns the underlying primitive reader.
    #[must_use]
    pub const fn reader(&self) -> &PrimitiveReader<S> {
        &self.reader
    }

    /// Returns the underlying primitive reader mutably, for skips and raw reads.
    pub fn reader_mut(&mut self) -> &mut PrimitiveReader<S> {
        &mut self.reader
    }

    /// Returns the total number of bytes pulled from the source.
    #[must_use]
    pub const fn total_read(&self) -> u64 {
        self.reader.total_read()
    }

    /// Returns true once every byte has been consumed and the source is done.
    ///
    /// # Errors
    /// Returns `FastError::Io` if the source fails.
    pub fn is_end_of_stream(&mut self) -> Result<bool> {
        self.reader.is_end_of_stream()
    }

    /// Restores the dictionary's initial values and resets the stream.
    ///
    /// # Errors
    /// Returns `FastError::UnbalancedGroup` if a group is still open.
    pub fn reset(&mut self) -> Result<()> {
        let depth = self.reader.group_depth();
        if depth > 0 {
            return Err(FastError::UnbalancedGroup { depth });
        }
        self.reader.reset();
        self.dictionary.reset();
        debug!("decoder reset");
        Ok(())
    }

    /// Opens a message and returns its template id, if transmitted.
    ///
    /// # Errors
    /// Propagates presence map and stream errors.
    pub fn open_message(&mut self, max_bits: usize) -> Result<Option<u32>> {
        self.reader.open_message(max_bits)
    }

    /// Opens a group with `max_bits` presence bits.
    ///
    /// # Errors
    /// Propagates presence map and stream errors.
    pub fn open_group(&mut self, max_bits: usize) -> Result<()> {
        self.reader.open_group(max_bits)
    }

    /// Closes the innermost group.
    ///
    /// # Errors
    /// Returns `FastError::UnbalancedGroup` if no group is open.
    pub fn close_group(&mut self) -> Result<()> {
        self.reader.close_group()
    }

    // ------------------------------------------------------------------
    // integers
    // ------------------------------------------------------------------

    /// Reads a mandatory unsigned 32-bit field.
    ///
    /// # Errors
    /// Returns `FastError::TokenMismatch` if the token is not of that kind and
    /// propagates operator and stream errors.
    pub fn read_u32(&mut self, token: Token) -> Result<u32> {
        self.read_scalar(token, TypeKind::IntegerUnsigned, token.operator(), Dictionary::int_slot)
    }

    /// Reads a nullable unsigned 32-bit field.
    ///
    /// # Errors
    /// See [`read_u32`](Self::read_u32).
    pub fn read_u32_optional(&mut self, token: Token) -> Result<Option<u32>> {
        self.read_optional(
            token,
            TypeKind::IntegerUnsignedOptional,
            token.operator(),
            Dictionary::int_slot,
        )
    }

    /// Reads a mandatory signed 32-bit field.
    ///
    /// # Errors
    /// See [`read_u32`](Self::read_u32).
    pub fn read_i32(&mut self, token: Token) -> Result<i32> {
        self.read_scalar(token, TypeKind::IntegerSigned, token.operator(), Dictionary::int_slot)
    }

    /// Reads a nullable signed 32-bit field.
    ///
    /// # Errors
    /// See [`read_u32`](Self::read_u32).
    pub fn read_i32_optional(&mut self, token: Token) -> Result<Option<i32>> {
        self.read_optional(
            token,
            TypeKind::IntegerSignedOptional,
            token.operator(),
            Dictionary::int_slot,
        )
    }

    /// Reads a mandatory unsigned 64-bit field.
    ///
    /// # Errors
    /// See [`read_u32`](Self::read_u32).
    pub fn read_u64(&mut self, token: Token) -> Result<u64> {
        self.read_scalar(token, TypeKind::LongUnsigned, token.operator(), Dictionary::long_slot)
    }

    /// Reads a nullable unsigned 64-bit field.
    ///
    /// # Errors
    /// See [`read_u32`](Self::read_u32).
    pub fn read_u64_optional(&mut self, token: Token) -> Result<Option<u64>> {
        self.read_optional(
            token,
            TypeKind::LongUnsignedOptional,
            token.operator(),
            Dictionary::long_slot,
        )
    }

    /// Reads a mandatory signed 64-bit field.
    ///
    /// # Errors
    /// See [`read_u32`](Self::read_u32).
    pub fn read_i64(&mut self, token: Token) -> Result<i64> {
        self.read_scalar(token, TypeKind::LongSigned, token.operator(), Dictionary::long_slot)
    }

    /// Reads a nullable signed 64-bit field.
    ///
    /// # Errors
    /// See [`read_u32`](Self::read_u32).
    pub fn read_i64_optional(&mut self, token: Token) -> Result<Option<i64>> {
        self.read_optional(
            token,
            TypeKind::LongSignedOptional,
            token.operator(),
            Dictionary::long_slot,
        )
    }

    // ------------------------------------------------------------------
    // decimals
    // ------------------------------------------------------------------

    /// Reads the exponent of a mandatory decimal field.
    ///
    /// # Errors
    /// See [`read_u32`](Self::read_u32).
    pub fn read_decimal_exponent(&mut self, token: Token) -> Result<i32> {
        self.read_scalar(token, TypeKind::Decimal, token.operator(), Dictionary::exponent_slot)
    }

    /// Reads the exponent of a nullable decimal field. `None` means the whole
    /// decimal is absent and no mantissa follows.
    ///
    /// # Errors
    /// See [`read_u32`](Self::read_u32).
    pub fn read_decimal_exponent_optional(&mut self, token: Token) -> Result<Option<i32>> {
        self.read_optional(
            token,
            TypeKind::DecimalOptional,
            token.operator(),
            Dictionary::exponent_slot,
        )
    }

    /// Reads the mantissa of a decimal field, nullable or not.
    ///
    /// # Errors
    /// See [`read_u32`](Self::read_u32).
    pub fn read_decimal_mantissa(&mut self, token: Token) -> Result<i64> {
        let expected = if token.is_optional() {
            TypeKind::DecimalOptional
        } else {
            TypeKind::Decimal
        };
        self.read_scalar(
            token,
            expected,
            token.mantissa_operator(),
            Dictionary::mantissa_slot,
        )
    }

    /// Reads the exponent and mantissa of a mandatory decimal field.
    ///
    /// # Errors
    /// See [`read_u32`](Self::read_u32).
    pub fn read_decimal(&mut self, token: Token) -> Result<DecimalValue> {
        let exponent = self.read_decimal_exponent(token)?;
        let mantissa = self.read_decimal_mantissa(token)?;
        Ok(DecimalValue::new(exponent, mantissa))
    }

    /// Reads a nullable decimal field.
    ///
    /// # Errors
    /// See [`read_u32`](Self::read_u32).
    pub fn read_decimal_optional(&mut self, token: Token) -> Result<Option<DecimalValue>> {
        match self.read_decimal_exponent_optional(token)? {
            Some(exponent) => {
                let mantissa = self.read_decimal_mantissa(token)?;
                Ok(Some(DecimalValue::new(exponent, mantissa)))
            }
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // text and byte blocks
    // ------------------------------------------------------------------

    /// Reads a mandatory ASCII field.
    ///
    /// # Errors
    /// Returns `FastError::TokenMismatch` for a token of another kind or with
    /// an operator, and propagates stream errors.
    pub fn read_ascii(&mut self, token: Token) -> Result<String> {
        expect_text(token, TypeKind::TextAscii)?;
        let mut text = String::new();
        self.reader.read_ascii(&mut text)?;
        Ok(text)
    }

    /// Reads a nullable ASCII field.
    ///
    /// # Errors
    /// See [`read_ascii`](Self::read_ascii).
    pub fn read_ascii_optional(&mut self, token: Token) -> Result<Option<String>> {
        expect_text(token, TypeKind::TextAsciiOptional)?;
        if self.reader.peek()? == NULL_BYTE {
            self.reader.skip_bytes(1)?;
            return Ok(None);
        }
        let mut text = String::new();
        self.reader.read_ascii(&mut text)?;
        Ok(Some(text))
    }

    /// Reads a mandatory UTF-8 field.
    ///
    /// # Errors
    /// See [`read_ascii`](Self::read_ascii).
    pub fn read_utf8(&mut self, token: Token) -> Result<String> {
        expect_text(token, TypeKind::TextUtf8)?;
        let count = self.reader.read_u32()?;
        self.read_utf8_body(count)
    }

    /// Reads a nullable UTF-8 field.
    ///
    /// # Errors
    /// See [`read_ascii`](Self::read_ascii).
    pub fn read_utf8_optional(&mut self, token: Token) -> Result<Option<String>> {
        expect_text(token, TypeKind::TextUtf8Optional)?;
        match self.reader.read_u32()?.from_nullable() {
            Some(count) => self.read_utf8_body(count).map(Some),
            None => Ok(None),
        }
    }

    fn read_utf8_body(&mut self, count: u32) -> Result<String> {
        let mut text = String::new();
        self.reader.read_utf8(count as usize, &mut text)?;
        Ok(text)
    }

    /// Reads a mandatory byte array field.
    ///
    /// # Errors
    /// See [`read_ascii`](Self::read_ascii).
    pub fn read_bytes(&mut self, token: Token) -> Result<Bytes> {
        expect_text(token, TypeKind::ByteArray)?;
        let len = self.reader.read_u32()?;
        self.reader.read_bytes(len as usize)
    }

    /// Reads a nullable byte array field.
    ///
    /// # Errors
    /// See [`read_ascii`](Self::read_ascii).
    pub fn read_bytes_optional(&mut self, token: Token) -> Result<Option<Bytes>> {
        expect_text(token, TypeKind::ByteArrayOptional)?;
        match self.reader.read_u32()?.from_nullable() {
            Some(len) => self.reader.read_bytes(len as usize).map(Some),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // dispatch
    // ------------------------------------------------------------------

    #[inline]
    fn read_scalar<T: Scalar>(
        &mut self,
        token: Token,
        expected: TypeKind,
        operator: Operator,
        slot: SlotFn<T>,
    ) -> Result<T> {
        expect(token, expected)?;
        let cell = slot(&mut self.dictionary, token);
        let mut value = T::from_slot(*cell);
        let result = operators::decode(&mut self.reader, operator, &mut value);
        *cell = value.into_slot();
        result
    }

    #[inline]
    fn read_optional<T: Scalar>(
        &mut self,
        token: Token,
        expected: TypeKind,
        operator: Operator,
        slot: SlotFn<T>,
    ) -> Result<Option<T>> {
        expect(token, expected)?;
        let cell = slot(&mut self.dictionary, token);
        let mut value = T::from_slot(*cell);
        let result = operators::decode_optional(&mut self.reader, token, operator, &mut value);
        *cell = value.into_slot();
        result
    }
}

#[inline]
pub(crate) fn expect(token: Token, expected: TypeKind) -> Result<()> {
    if token.kind() == expected {
        Ok(())
    } else {
        Err(FastError::TokenMismatch { token, expected })
    }
}

#[inline]
pub(crate) fn expect_text(token: Token, expected: TypeKind) -> Result<()> {
    expect(token, expected)?;
    if token.operator() == Operator::None {
        Ok(())
    } else {
        Err(FastError::TokenMismatch { token, expected })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::DictionaryBuilder;
    use fastwire_primitive::MemorySource;

    fn token(kind: TypeKind, operator: Operator, instance: u32) -> Token {
        Token::new(kind, operator, instance).unwrap()
    }

    fn decoders(bytes: &[u8], dictionary: &Dictionary) -> [FastDecoder<MemorySource>; 3] {
        [
            FastDecoder::new(MemorySource::new(bytes.to_vec()), dictionary.clone()),
            FastDecoder::new(
                MemorySource::new(bytes.to_vec()).with_chunk_size(1),
                dictionary.clone(),
            ),
            FastDecoder::new(
                MemorySource::new(bytes.to_vec())
                    .with_chunk_size(1)
                    .with_stalls(),
                dictionary.clone(),
            ),
        ]
    }

    #[test]
    fn test_copy_from_initial_value() {
        let price = token(TypeKind::IntegerUnsigned, Operator::Copy, 0);
        let dictionary = Dictionary::builder().with_u32(price, 5).build().unwrap();

        // first field absent (bit 0), second present with 9
        let bytes = [0b1010_0000, 0x89];
        for mut decoder in decoders(&bytes, &dictionary) {
            decoder.open_group(2).unwrap();
            assert_eq!(decoder.read_u32(price).unwrap(), 5);
            assert_eq!(decoder.read_u32(price).unwrap(), 9);
            decoder.close_group().unwrap();
            assert_eq!(decoder.dictionary().int(price), 9);
        }
    }

    #[test]
    fn test_delta_leaves_presence_bits_alone() {
        let seq = token(TypeKind::LongSigned, Operator::Delta, 0);
        let size = token(TypeKind::IntegerSigned, Operator::Copy, 0);
        let dictionary = Dictionary::builder()
            .with_i64(seq, 100)
            .build()
            .unwrap();

        // pmap bit for size only, delta -3, then size -2
        let bytes = [0xC0, 0xFD, 0xFE];
        for mut decoder in decoders(&bytes, &dictionary) {
            decoder.open_group(1).unwrap();
            assert_eq!(decoder.read_i64(seq).unwrap(), 97);
            assert_eq!(decoder.read_i32(size).unwrap(), -2);
            decoder.close_group().unwrap();
            assert_eq!(decoder.dictionary().long(seq), 97);
        }
    }

    #[test]
    fn test_token_kind_checked() {
        let signed = token(TypeKind::IntegerSigned, Operator::None, 0);
        let dictionary = Dictionary::builder().build().unwrap();
        let mut decoder = FastDecoder::new(MemorySource::new(vec![0x81]), dictionary);
        assert_eq!(
            decoder.read_u32(signed),
            Err(FastError::TokenMismatch {
                token: signed,
                expected: TypeKind::IntegerUnsigned,
            })
        );
        assert!(decoder.read_i32_optional(signed).is_err());
        assert_eq!(decoder.read_i32(signed).unwrap(), 1);
    }

    #[test]
    fn test_text_fields() {
        let ascii = token(TypeKind::TextAsciiOptional, Operator::None, 0);
        let utf8 = token(TypeKind::TextUtf8, Operator::None, 0);
        let blob = token(TypeKind::ByteArrayOptional, Operator::None, 0);
        let dictionary = Dictionary::builder().build().unwrap();

        let mut bytes = vec![0x80, 0x00, 0x80, b'o', b'k' | 0x80];
        bytes.push(0x82);
        bytes.extend_from_slice("é!".as_bytes());
        bytes.extend_from_slice(&[0x80, 0x83, 7, 8]);

        for mut decoder in decoders(&bytes, &dictionary) {
            assert_eq!(decoder.read_ascii_optional(ascii).unwrap(), None);
            assert_eq!(decoder.read_ascii_optional(ascii).unwrap(), Some(String::new()));
            assert_eq!(decoder.read_ascii_optional(ascii).unwrap(), Some("ok".to_string()));
            assert_eq!(decoder.read_utf8(utf8).unwrap(), "é!");
            assert_eq!(decoder.read_bytes_optional(blob).unwrap(), None);
            assert_eq!(
                decoder.read_bytes_optional(blob).unwrap().as_deref(),
                Some(&[7u8, 8][..])
            );
            assert!(decoder.is_end_of_stream().unwrap());
        }
    }

    #[test]
    fn test_text_with_operator_rejected() {
        let ascii = token(TypeKind::TextAscii, Operator::Copy, 0);
        let dictionary = Dictionary::builder().build().unwrap();
        let mut decoder = FastDecoder::new(MemorySource::new(vec![0xC1]), dictionary);
        assert!(matches!(
            decoder.read_ascii(ascii),
            Err(FastError::TokenMismatch { .. })
        ));
    }

    #[test]
    fn test_optional_decimal_absent_skips_mantissa() {
        let price = Token::decimal(true, Operator::None, Operator::None, 0).unwrap();
        let qty = token(TypeKind::IntegerUnsigned, Operator::None, 0);
        let dictionary = DictionaryBuilder::for_tokens(&[price, qty]).build().unwrap();

        // null exponent, then exponent -2 (wire -2) with mantissa 1250, then qty 3
        let bytes = [0x80, 0xFE, 0x09, 0xE2, 0x83];
        for mut decoder in decoders(&bytes, &dictionary) {
            assert_eq!(decoder.read_decimal_optional(price).unwrap(), None);
            assert_eq!(
                decoder.read_decimal_optional(price).unwrap(),
                Some(DecimalValue::new(-2, 1250))
            );
            assert_eq!(decoder.read_u32(qty).unwrap(), 3);
        }
    }

    #[test]
    fn test_reset_restores_dictionary() {
        let counter = token(TypeKind::IntegerUnsigned, Operator::Increment, 0);
        let dictionary = Dictionary::builder().with_u32(counter, 10).build().unwrap();
        let mut decoder = FastDecoder::new(MemorySource::new(vec![0x80, 0x80]), dictionary);

        decoder.open_group(1).unwrap();
        assert_eq!(decoder.read_u32(counter).unwrap(), 11);
        assert_eq!(
            decoder.reset(),
            Err(FastError::UnbalancedGroup { depth: 1 })
        );
        decoder.close_group().unwrap();
        decoder.reset().unwrap();
        assert_eq!(decoder.dictionary().int(counter), 10);
    }

    #[test]
    fn test_end_of_stream_mid_field() {
        let qty = token(TypeKind::LongUnsigned, Operator::None, 0);
        let dictionary = Dictionary::builder().build().unwrap();
        for mut decoder in decoders(&[0x01, 0x02], &dictionary) {
            assert_eq!(decoder.read_u64(qty), Err(FastError::EndOfStream));
        }
    }

    #[test]
    fn test_reset_after_truncated_presence_map() {
        let dictionary = Dictionary::builder().build().unwrap();
        for mut decoder in decoders(&[0x00], &dictionary) {
            assert_eq!(decoder.open_message(14), Err(FastError::EndOfStream));
            decoder.reset().unwrap();
        }
    }
}
