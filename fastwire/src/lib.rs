/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! # fastwire
//!
//! A streaming FAST protocol codec for Rust.
//!
//! FAST is the bit-packed binary encoding used by exchange market-data
//! feeds. fastwire decodes and encodes FAST records field by field against a
//! pluggable byte source or sink, keeping per-field history in a dictionary
//! so that predictable fields cost a single presence bit.
//!
//! ## Features
//!
//! - **Streaming**: partial reads and writes with compaction and backoff
//! - **Zero panics**: every fallible operation returns [`core::Result`]
//! - **Generic operators**: one specialised path per kind and operator
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fastwire::prelude::*;
//!
//! let seq = Token::new(TypeKind::IntegerUnsigned, Operator::Increment, 0)?;
//! let dictionary = DictionaryBuilder::for_tokens(&[seq]).build()?;
//!
//! let mut encoder = FastEncoder::new(MemorySink::new(), dictionary.clone());
//! encoder.open_message(2, Some(1))?;
//! encoder.write_u32(seq, 7)?;
//! encoder.close_group()?;
//! let bytes = encoder.finish()?.into_bytes();
//!
//! let mut decoder = FastDecoder::new(MemorySource::new(bytes), dictionary);
//! assert_eq!(decoder.open_message(2)?, Some(1));
//! assert_eq!(decoder.read_u32(seq)?, 7);
//! ```
//!
//! ## Crate Organization
//!
//! - [`core`]: Error type, tokens, configuration and decimals
//! - [`primitive`]: Byte adapters, primitive reader/writer and presence maps
//! - [`codec`]: Dictionary, field operators, decoder and encoder

pub mod core {
    //! Error type, tokens, configuration and decimals.
    pub use fastwire_core::*;
}

pub mod primitive {
    //! Byte adapters, primitive reader/writer and presence maps.
    pub use fastwire_primitive::*;
}

pub mod codec {
    //! Dictionary, field operators, decoder and encoder.
    pub use fastwire_codec::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    // Core types
    pub use fastwire_core::{
        BackoffConfig, CodecConfig, DecimalValue, FastError, Operator, Result, Token, TypeKind,
    };

    // Primitive stream
    pub use fastwire_primitive::{
        ByteSink, ByteSource, MemorySink, MemorySource, PrimitiveReader, PrimitiveWriter,
        ReadSource, WriteSink,
    };

    // Codec
    pub use fastwire_codec::{Dictionary, DictionaryBuilder, FastDecoder, FastEncoder};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_round_trip() {
        let seq = Token::new(TypeKind::IntegerUnsigned, Operator::Increment, 0).unwrap();
        let dictionary = DictionaryBuilder::for_tokens(&[seq]).build().unwrap();

        let mut encoder = FastEncoder::new(MemorySink::new(), dictionary.clone());
        encoder.open_message(2, Some(1)).unwrap();
        encoder.write_u32(seq, 7).unwrap();
        encoder.close_group().unwrap();
        let bytes = encoder.finish().unwrap().into_bytes();

        let mut decoder = FastDecoder::new(MemorySource::new(bytes), dictionary);
        assert_eq!(decoder.open_message(2).unwrap(), Some(1));
        assert_eq!(decoder.read_u32(seq).unwrap(), 7);
        decoder.close_group().unwrap();
    }

    #[test]
    fn test_default_config() {
        let config = CodecConfig::default();
        assert_eq!(config.buffer_size, 2048);
        assert_eq!(config.max_nesting, 32);
    }
}
