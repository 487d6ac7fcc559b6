/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! # fastwire Primitive
//!
//! Buffered primitive stream for the fastwire FAST codec.
//!
//! FAST packs every field into a handful of wire primitives. This crate reads
//! and writes them against a streaming byte source or sink.
//!
//! ## Features
//!
//! - **Stop-bit integers**: 32/64-bit, signed and unsigned, with fast paths
//! - **Text**: stop-bit ASCII and counted UTF-8 with replacement on bad input
//! - **Presence maps**: nested read and write stacks with trailing-zero trimming
//! - **Streaming**: partial fills and flushes with compaction and backoff

pub mod backoff;
pub mod pmap;
pub mod reader;
pub mod source;
pub mod writer;

pub use backoff::Backoff;
pub use pmap::{PresenceMapStack, PresenceMapWriter, pmap_bytes};
pub use reader::PrimitiveReader;
pub use source::{ByteSink, ByteSource, MemorySink, MemorySource, ReadSource, WriteSink};
pub use writer::{PrimitiveWriter, signed_len, unsigned_len};
