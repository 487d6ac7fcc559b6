/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! # fastwire Codec
//!
//! Dictionary-driven field operator engine for the fastwire FAST codec.
//!
//! FAST compresses a record by predicting each field from the previous
//! record: copied values, incremented counters and small deltas cost a
//! single presence bit or a one-byte difference instead of the full value.
//!
//! ## Features
//!
//! - **Dictionary**: flat power-of-two slot arrays with reset to initial values
//! - **Field operators**: None, Constant, Copy, Increment, Default and Delta
//! - **Nullable fields**: `Option` values over the FAST null encoding
//! - **Decoder and encoder**: token-keyed entry points for every scalar kind

pub mod decoder;
pub mod dictionary;
pub mod encoder;
pub mod operators;

pub use decoder::FastDecoder;
pub use dictionary::{Dictionary, DictionaryBuilder, SlotBank};
pub use encoder::FastEncoder;
pub use operators::Scalar;
