/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Quote template shared by the fastwire demos.
//!
//! A quote carries a sequence number, a bid and an optional ask price, an
//! optional size, an optional venue code and a repeating group of legs. The
//! template fixes the field order and the operator applied to each field.

use fastwire::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Template id transmitted in every quote message.
pub const QUOTE_TEMPLATE_ID: u32 = 7;

/// One leg of a multi-leg quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leg {
    /// Instrument id of the leg.
    pub instrument: u64,
    /// Signed ratio, absent for a 1:1 leg.
    pub ratio: Option<i32>,
}

/// A two-sided quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Feed sequence number.
    pub seq: u32,
    /// Bid price.
    pub bid: Decimal,
    /// Ask price, absent for a one-sided quote.
    pub ask: Option<Decimal>,
    /// Quoted size, absent when undisclosed.
    pub size: Option<i64>,
    /// Venue code.
    pub venue: Option<String>,
    /// Legs of a strategy quote.
    pub legs: Vec<Leg>,
}

/// Tokens of the quote template.
#[derive(Debug, Clone)]
pub struct QuoteTemplate {
    seq: Token,
    bid: Token,
    ask: Token,
    size: Token,
    venue: Token,
    leg_count: Token,
    leg_instrument: Token,
    leg_ratio: Token,
    message_bits: usize,
    leg_bits: usize,
}

impl QuoteTemplate {
    /// Builds the template tokens.
    ///
    /// # Errors
    /// Returns `FastError::InvalidConfig` if a token cannot be built.
    pub fn new() -> Result<Self> {
        let seq = Token::new(TypeKind::IntegerUnsigned, Operator::Increment, 0)?;
        let bid = Token::decimal(false, Operator::Copy, Operator::Delta, 0)?;
        let ask = Token::decimal(true, Operator::Copy, Operator::Delta, 1)?;
        let size = Token::new(TypeKind::LongSignedOptional, Operator::Copy, 0)?;
        let venue = Token::new(TypeKind::TextAsciiOptional, Operator::None, 0)?;
        let leg_count = Token::new(TypeKind::IntegerUnsigned, Operator::None, 1)?;
        let leg_instrument = Token::new(TypeKind::LongUnsigned, Operator::Delta, 1)?;
        let leg_ratio = Token::new(TypeKind::IntegerSignedOptional, Operator::Default, 2)?;
        // the message map also carries the template id bit
        let message_bits = 1 + presence_bits(&[seq, bid, ask, size, venue, leg_count]);
        let leg_bits = presence_bits(&[leg_instrument, leg_ratio]);
        Ok(Self {
            seq,
            bid,
            ask,
            size,
            venue,
            leg_count,
            leg_instrument,
            leg_ratio,
            message_bits,
            leg_bits,
        })
    }

    /// Returns every token of the template.
    #[must_use]
    pub fn tokens(&self) -> Vec<Token> {
        vec![
            self.seq,
            self.bid,
            self.ask,
            self.size,
            self.venue,
            self.leg_count,
            self.leg_instrument,
            self.leg_ratio,
        ]
    }

    /// Builds a dictionary sized and validated for the template.
    ///
    /// # Errors
    /// Propagates dictionary construction errors.
    pub fn dictionary(&self) -> Result<Dictionary> {
        let dictionary = DictionaryBuilder::for_tokens(&self.tokens())
            .with_decimal(self.bid, DecimalValue::new(-2, 0))
            .with_decimal(self.ask, DecimalValue::new(-2, 0))
            .build()?;
        dictionary.validate(&self.tokens())?;
        Ok(dictionary)
    }

    /// Encodes one quote message.
    ///
    /// # Errors
    /// Returns `FastError::ValueOutOfRange` for a price whose mantissa does
    /// not fit in 64 bits and propagates encoder errors.
    pub fn encode<K: ByteSink>(&self, encoder: &mut FastEncoder<K>, quote: &Quote) -> Result<()> {
        let bid = price(self.bid, quote.bid)?;
        let ask = quote.ask.map(|ask| price(self.ask, ask)).transpose()?;
        let legs = u32::try_from(quote.legs.len())
            .map_err(|_| FastError::ValueOutOfRange { token: self.leg_count })?;

        encoder.open_message(self.message_bits, Some(QUOTE_TEMPLATE_ID))?;
        encoder.write_u32(self.seq, quote.seq)?;
        encoder.write_decimal(self.bid, bid)?;
        encoder.write_decimal_optional(self.ask, ask)?;
        encoder.write_i64_optional(self.size, quote.size)?;
        encoder.write_ascii_optional(self.venue, quote.venue.as_deref())?;
        encoder.write_u32(self.leg_count, legs)?;
        for leg in &quote.legs {
            encoder.open_group(self.leg_bits)?;
            encoder.write_u64(self.leg_instrument, leg.instrument)?;
            encoder.write_i32_optional(self.leg_ratio, leg.ratio)?;
            encoder.close_group()?;
        }
        encoder.close_group()?;
        trace!(seq = quote.seq, "encoded quote");
        Ok(())
    }

    /// Decodes one quote message, or returns `None` at a clean end of stream.
    ///
    /// # Errors
    /// Returns `FastError::MalformedField` for an unknown template or a price
    /// outside the decimal range, and propagates decoder errors.
    pub fn decode<S: ByteSource>(&self, decoder: &mut FastDecoder<S>) -> Result<Option<Quote>> {
        if decoder.is_end_of_stream()? {
            return Ok(None);
        }
        if decoder.open_message(self.message_bits)? != Some(QUOTE_TEMPLATE_ID) {
            return Err(FastError::MalformedField {
                reason: "unexpected template id",
            });
        }
        let seq = decoder.read_u32(self.seq)?;
        let bid = decoder.read_decimal(self.bid)?.to_decimal()?;
        let ask = decoder
            .read_decimal_optional(self.ask)?
            .map(|ask| ask.to_decimal())
            .transpose()?;
        let size = decoder.read_i64_optional(self.size)?;
        let venue = decoder.read_ascii_optional(self.venue)?;
        let count = decoder.read_u32(self.leg_count)?;
        let mut legs = Vec::with_capacity(count.min(64) as usize);
        for _ in 0..count {
            decoder.open_group(self.leg_bits)?;
            let instrument = decoder.read_u64(self.leg_instrument)?;
            let ratio = decoder.read_i32_optional(self.leg_ratio)?;
            decoder.close_group()?;
            legs.push(Leg { instrument, ratio });
        }
        decoder.close_group()?;
        trace!(seq, "decoded quote");
        Ok(Some(Quote {
            seq,
            bid,
            ask,
            size,
            venue,
            legs,
        }))
    }
}

fn presence_bits(tokens: &[Token]) -> usize {
    tokens.iter().map(Token::presence_bits).sum()
}

fn price(token: Token, value: Decimal) -> Result<DecimalValue> {
    DecimalValue::from_decimal(value).map_err(|_| FastError::ValueOutOfRange { token })
}

/// Generates a deterministic quote feed of `count` messages.
#[must_use]
pub fn sample_feed(count: u32) -> Vec<Quote> {
    (0..count)
        .map(|i| {
            let tick = i64::from(i % 9) - 4;
            Quote {
                seq: 1 + i,
                bid: Decimal::new(10_025 + tick * 5, 2),
                ask: (i % 6 != 5).then(|| Decimal::new(10_030 + tick * 5, 2)),
                size: (i % 4 != 3).then_some(100 * i64::from(1 + i % 5)),
                venue: match i % 3 {
                    0 => Some("XNAS".to_string()),
                    1 => Some("ARCX".to_string()),
                    _ => None,
                },
                legs: (0..i % 3)
                    .map(|l| Leg {
                        instrument: 90_000 + u64::from(i * 4 + l),
                        ratio: (l == 1).then_some(-2),
                    })
                    .collect(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_round_trip() {
        let template = QuoteTemplate::new().unwrap();
        let dictionary = template.dictionary().unwrap();
        let feed = sample_feed(30);

        let mut encoder = FastEncoder::new(MemorySink::new(), dictionary.clone());
        for quote in &feed {
            template.encode(&mut encoder, quote).unwrap();
        }
        let bytes = encoder.finish().unwrap().into_bytes();

        let source = MemorySource::new(bytes).with_chunk_size(3);
        let mut decoder = FastDecoder::new(source, dictionary);
        let mut decoded = Vec::new();
        while let Some(quote) = template.decode(&mut decoder).unwrap() {
            decoded.push(quote);
        }
        assert_eq!(decoded, feed);
    }

    #[test]
    fn test_presence_bit_counts() {
        let template = QuoteTemplate::new().unwrap();
        // template id, seq, bid exponent, ask exponent and size
        assert_eq!(template.message_bits, 5);
        assert_eq!(template.leg_bits, 1);
    }

    #[test]
    fn test_unexpected_template() {
        let template = QuoteTemplate::new().unwrap();
        let dictionary = template.dictionary().unwrap();
        // template bit set, template id 3
        let mut decoder = FastDecoder::new(MemorySource::new(vec![0xC0, 0x83]), dictionary);
        assert!(matches!(
            template.decode(&mut decoder),
            Err(FastError::MalformedField { .. })
        ));
    }
}
