/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Buffered primitive writer.
//!
//! The mirror of [`PrimitiveReader`](crate::PrimitiveReader): encodes FAST
//! primitives into a growable buffer and hands complete prefixes to a
//! [`ByteSink`].
//!
//! Presence maps precede the fields they describe but are only known once
//! those fields are written, so opening a group reserves room for the map
//! and closing it back-fills the reservation. Anything before the outermost
//! open reservation can be flushed at any time.

use crate::backoff::Backoff;
use crate::pmap::PresenceMapWriter;
use crate::source::ByteSink;
use bytes::BytesMut;
use fastwire_core::{BackoffConfig, CodecConfig, FastError, MAX_VARINT_BYTES, Result};
use tracing::{debug, trace, warn};

const STOP_BIT: u8 = 0x80;
const DATA_BITS: u64 = 0x7F;

/// Buffered FAST primitive writer.
#[derive(Debug)]
pub struct PrimitiveWriter<K> {
    sink: K,
    buffer: BytesMut,
    capacity: usize,
    total_written: u64,
    pmap: PresenceMapWriter,
    backoff: BackoffConfig,
}

impl<K: ByteSink> PrimitiveWriter<K> {
    /// Creates a writer with the default configuration.
    #[must_use]
    pub fn new(sink: K) -> Self {
        let config = CodecConfig::default();
        Self::build(sink, &config)
    }

    /// Creates a writer with the given configuration.
    ///
    /// `buffer_size` is the number of pending bytes that triggers an
    /// automatic flush.
    ///
    /// # Errors
    /// Returns `FastError::InvalidConfig` if the configuration is rejected.
    pub fn with_config(sink: K, config: &CodecConfig) -> Result<Self> {
        config.validate().inspect_err(|err| {
            debug!(%err, "rejected writer configuration");
        })?;
        Ok(Self::build(sink, config))
    }

    fn build(sink: K, config: &CodecConfig) -> Self {
        Self {
            sink,
            buffer: BytesMut::with_capacity(config.buffer_size),
            capacity: config.buffer_size,
            total_written: 0,
            pmap: PresenceMapWriter::new(config.max_nesting),
            backoff: config.backoff,
        }
    }

    /// Discards pending output and open groups and zeroes the counter.
    pub fn reset(&mut self) {
        if !self.buffer.is_empty() {
            warn!(pending = self.buffer.len(), "reset discards unflushed output");
        }
        self.buffer.clear();
        self.pmap.clear();
        self.total_written = 0;
        debug!("primitive writer reset");
    }

    /// Returns the total number of bytes accepted by the sink.
    #[must_use]
    pub const fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Returns the number of encoded bytes not yet handed to the sink.
    #[must_use]
    pub fn bytes_pending(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the number of open groups.
    #[must_use]
    pub fn group_depth(&self) -> usize {
        self.pmap.depth()
    }

    /// Returns a reference to the sink.
    #[must_use]
    pub const fn sink(&self) -> &K {
        &self.sink
    }

    /// Flushes everything that is not held back by an open group, then syncs
    /// the sink.
    ///
    /// # Errors
    /// Returns `FastError::Io` if the sink fails.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_ready()?;
        self.sink.sync()
    }

    /// Flushes all output and returns the sink.
    ///
    /// # Errors
    /// Returns `FastError::UnbalancedGroup` if a group is still open and
    /// `FastError::Io` if the sink fails.
    pub fn finish(mut self) -> Result<K> {
        let depth = self.pmap.depth();
        if depth > 0 {
            return Err(FastError::UnbalancedGroup { depth });
        }
        self.flush()?;
        Ok(self.sink)
    }

    fn flush_ready(&mut self) -> Result<()> {
        let ready = self.pmap.outermost_offset().unwrap_or(self.buffer.len());
        if ready == 0 {
            return Ok(());
        }
        let mut backoff = Backoff::new(self.backoff);
        let mut sent = 0;
        while sent < ready {
            match self.sink.flush(&self.buffer[sent..ready]) {
                Ok(0) => backoff.snooze(),
                Ok(accepted) => {
                    sent += accepted;
                    backoff.reset();
                }
                Err(err) => {
                    // the accepted prefix must not be sent twice
                    self.consume(sent);
                    debug!(%err, flushed = sent, "sink failed mid flush");
                    return Err(err);
                }
            }
        }
        self.consume(ready);
        trace!(flushed = ready, held = self.buffer.len(), "flushed output");
        Ok(())
    }

    fn consume(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let _ = self.buffer.split_to(count);
        self.pmap.shift(count);
        self.total_written += count as u64;
    }

    #[inline]
    fn maybe_flush(&mut self) -> Result<()> {
        if self.buffer.len() >= self.capacity {
            self.flush_ready()
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // varints
    // ------------------------------------------------------------------

    /// Writes an unsigned 32-bit stop-bit integer.
    ///
    /// # Errors
    /// Returns `FastError::Io` if an automatic flush fails.
    #[inline]
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_u64(u64::from(value))
    }

    /// Writes a signed 32-bit stop-bit integer.
    ///
    /// # Errors
    /// Returns `FastError::Io` if an automatic flush fails.
    #[inline]
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_i64(i64::from(value))
    }

    /// Writes an unsigned 64-bit stop-bit integer.
    ///
    /// # Errors
    /// Returns `FastError::Io` if an automatic flush fails.
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        let mut scratch = [0u8; MAX_VARINT_BYTES];
        let len = unsigned_len(value);
        encode_groups(value, len, &mut scratch);
        self.buffer.extend_from_slice(&scratch[..len]);
        self.maybe_flush()
    }

    /// Writes a signed 64-bit stop-bit integer.
    ///
    /// # Errors
    /// Returns `FastError::Io` if an automatic flush fails.
    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        let mut scratch = [0u8; MAX_VARINT_BYTES];
        let len = signed_len(value);
        encode_signed_groups(value, len, &mut scratch);
        self.buffer.extend_from_slice(&scratch[..len]);
        self.maybe_flush()
    }

    /// Writes the nullable encoding of an absent value (a single `0x80`).
    ///
    /// # Errors
    /// Returns `FastError::Io` if an automatic flush fails.
    pub fn write_null(&mut self) -> Result<()> {
        self.buffer.extend_from_slice(&[STOP_BIT]);
        self.maybe_flush()
    }

    // ------------------------------------------------------------------
    // text and byte blocks
    // ------------------------------------------------------------------

    /// Writes a raw byte block.
    ///
    /// # Errors
    /// Returns `FastError::Io` if an automatic flush fails.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(data);
        self.maybe_flush()
    }

    /// Writes stop-bit terminated ASCII text.
    ///
    /// An empty string is written as the zero-length marker `0x00 0x80`.
    ///
    /// # Errors
    /// Returns `FastError::MalformedField` if the text is not ASCII or starts
    /// with a NUL character, which the wire format cannot represent.
    pub fn write_ascii(&mut self, text: &str) -> Result<()> {
        let bytes = text.as_bytes();
        let Some((&last, head)) = bytes.split_last() else {
            self.buffer.extend_from_slice(&[0x00, STOP_BIT]);
            return self.maybe_flush();
        };
        if !text.is_ascii() {
            return Err(FastError::MalformedField {
                reason: "ascii field contains non-ascii characters",
            });
        }
        if bytes[0] == 0 && bytes.len() > 1 {
            return Err(FastError::MalformedField {
                reason: "ascii field starts with NUL",
            });
        }
        self.buffer.extend_from_slice(head);
        self.buffer.extend_from_slice(&[last | STOP_BIT]);
        self.maybe_flush()
    }

    /// Writes the UTF-8 bytes of `text`; the codepoint count is written
    /// separately by the caller.
    ///
    /// # Errors
    /// Returns `FastError::Io` if an automatic flush fails.
    pub fn write_utf8(&mut self, text: &str) -> Result<()> {
        self.write_bytes(text.as_bytes())
    }

    // ------------------------------------------------------------------
    // presence maps
    // ------------------------------------------------------------------

    /// Opens a group, reserving room for its presence map.
    ///
    /// # Errors
    /// Returns `FastError::NestingOverflow` if too many groups are open.
    pub fn open_group(&mut self, max_bits: usize) -> Result<()> {
        let offset = self.buffer.len();
        let reserved = self.pmap.begin(offset, max_bits)?;
        self.buffer.resize(offset + reserved, 0);
        trace!(depth = self.pmap.depth(), max_bits, "opened group");
        Ok(())
    }

    /// Records the next presence bit of the innermost open group.
    ///
    /// # Errors
    /// Returns `FastError::UnbalancedGroup` if no group is open and
    /// `FastError::PresenceMapOverflow` if the group's bits are used up.
    #[inline]
    pub fn push_bit(&mut self, set: bool) -> Result<()> {
        self.pmap.push_bit(set)
    }

    /// Closes the innermost group, writing its presence map in front of the
    /// group's fields.
    ///
    /// # Errors
    /// Returns `FastError::UnbalancedGroup` if no group is open.
    pub fn close_group(&mut self) -> Result<()> {
        let closed = self.pmap.end()?;
        let start = closed.offset;
        let used = closed.bytes.len();
        self.buffer[start..start + used].copy_from_slice(&closed.bytes);
        if used < closed.reserved {
            let tail = start + closed.reserved;
            let len = self.buffer.len();
            self.buffer.copy_within(tail..len, start + used);
            self.buffer.truncate(len - (closed.reserved - used));
        }
        trace!(depth = self.pmap.depth(), pmap_bytes = used, "closed group");
        self.maybe_flush()
    }

    /// Opens a message: its presence map followed by an optional template id.
    ///
    /// # Errors
    /// See [`open_group`](Self::open_group) and [`push_bit`](Self::push_bit).
    pub fn open_message(&mut self, max_bits: usize, template_id: Option<u32>) -> Result<()> {
        self.open_group(max_bits)?;
        self.push_bit(template_id.is_some())?;
        match template_id {
            Some(id) => self.write_u32(id),
            None => Ok(()),
        }
    }
}

/// Number of bytes needed for the unsigned encoding of `value`.
#[inline]
#[must_use]
pub const fn unsigned_len(value: u64) -> usize {
    let bits = (u64::BITS - value.leading_zeros()) as usize;
    if bits == 0 { 1 } else { bits.div_ceil(7) }
}

/// Number of bytes needed for the signed encoding of `value`, sign bit
/// included.
#[inline]
#[must_use]
pub const fn signed_len(value: i64) -> usize {
    let magnitude = if value < 0 {
        u64::BITS - value.leading_ones()
    } else {
        u64::BITS - value.leading_zeros()
    };
    (magnitude as usize + 1).div_ceil(7)
}

#[inline]
fn encode_groups(value: u64, len: usize, out: &mut [u8]) {
    for (index, slot) in out[..len].iter_mut().enumerate() {
        let shift = 7 * (len - 1 - index);
        *slot = ((value >> shift) & DATA_BITS) as u8;
    }
    out[len - 1] |= STOP_BIT;
}

// Arithmetic shift so the leading group of a ten byte negative value keeps
// its sign bits.
#[inline]
fn encode_signed_groups(value: i64, len: usize, out: &mut [u8]) {
    for (index, slot) in out[..len].iter_mut().enumerate() {
        let shift = 7 * (len - 1 - index);
        *slot = ((value >> shift) & 0x7F) as u8;
    }
    out[len - 1] |= STOP_BIT;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::PrimitiveReader;
    use crate::source::{MemorySink, MemorySource};
    use proptest::prelude::*;

    fn written(f: impl FnOnce(&mut PrimitiveWriter<MemorySink>) -> Result<()>) -> Vec<u8> {
        let mut writer = PrimitiveWriter::new(MemorySink::new());
        f(&mut writer).unwrap();
        writer.finish().unwrap().into_bytes().to_vec()
    }

    #[test]
    fn test_lengths() {
        assert_eq!(unsigned_len(0), 1);
        assert_eq!(unsigned_len(127), 1);
        assert_eq!(unsigned_len(128), 2);
        assert_eq!(unsigned_len(u64::from(u32::MAX)), 5);
        assert_eq!(unsigned_len(u64::MAX), 10);
        assert_eq!(signed_len(0), 1);
        assert_eq!(signed_len(-1), 1);
        assert_eq!(signed_len(63), 1);
        assert_eq!(signed_len(64), 2);
        assert_eq!(signed_len(-64), 1);
        assert_eq!(signed_len(-65), 2);
        assert_eq!(signed_len(i64::from(i32::MIN)), 5);
        assert_eq!(signed_len(i64::from(i32::MAX)), 5);
        assert_eq!(signed_len(i64::MIN), 10);
        assert_eq!(signed_len(i64::MAX), 10);
    }

    #[test]
    fn test_write_varints() {
        assert_eq!(written(|w| w.write_u32(942)), vec![0x07, 0xAE]);
        assert_eq!(written(|w| w.write_u32(0)), vec![0x80]);
        assert_eq!(written(|w| w.write_i32(-1)), vec![0xFF]);
        assert_eq!(written(|w| w.write_i32(64)), vec![0x00, 0xC0]);
        assert_eq!(written(|w| w.write_i64(-65)), vec![0x7F, 0xBF]);
    }

    #[test]
    fn test_write_ascii() {
        assert_eq!(written(|w| w.write_ascii("Hi!")), vec![b'H', b'i', b'!' | 0x80]);
        assert_eq!(written(|w| w.write_ascii("")), vec![0x00, 0x80]);
        assert_eq!(written(|w| w.write_ascii("\0")), vec![0x80]);

        let mut writer = PrimitiveWriter::new(MemorySink::new());
        assert!(writer.write_ascii("café").is_err());
        assert!(writer.write_ascii("\0x").is_err());
    }

    #[test]
    fn test_group_trims_trailing_zero_bytes() {
        let bytes = written(|w| {
            w.open_group(14)?;
            w.push_bit(true)?;
            w.push_bit(false)?;
            w.write_u32(5)?;
            w.close_group()
        });
        assert_eq!(bytes, vec![0b1100_0000, 0x85]);
    }

    #[test]
    fn test_nested_groups_round_trip() {
        let bytes = written(|w| {
            w.open_group(5)?;
            w.push_bit(true)?;
            w.write_u32(1)?;
            w.open_group(3)?;
            w.push_bit(false)?;
            w.push_bit(true)?;
            w.push_bit(true)?;
            w.write_u32(2)?;
            w.close_group()?;
            w.push_bit(false)?;
            w.push_bit(true)?;
            w.write_u32(3)?;
            w.close_group()
        });

        let mut r = PrimitiveReader::new(MemorySource::new(bytes).with_chunk_size(1));
        r.open_group(5).unwrap();
        assert!(r.pop_bit().unwrap());
        assert_eq!(r.read_u32().unwrap(), 1);
        r.open_group(3).unwrap();
        assert!(!r.pop_bit().unwrap());
        assert!(r.pop_bit().unwrap());
        assert!(r.pop_bit().unwrap());
        assert_eq!(r.read_u32().unwrap(), 2);
        r.close_group().unwrap();
        assert!(!r.pop_bit().unwrap());
        assert!(r.pop_bit().unwrap());
        assert_eq!(r.read_u32().unwrap(), 3);
        assert!(!r.pop_bit().unwrap());
        r.close_group().unwrap();
        assert!(r.is_end_of_stream().unwrap());
    }

    #[test]
    fn test_open_message_round_trip() {
        let bytes = written(|w| {
            w.open_message(7, Some(942))?;
            w.close_group()?;
            w.open_message(7, None)?;
            w.close_group()
        });
        assert_eq!(bytes, vec![0xC0, 0x07, 0xAE, 0x80]);

        let mut r = PrimitiveReader::new(MemorySource::new(bytes));
        assert_eq!(r.open_message(7).unwrap(), Some(942));
        r.close_group().unwrap();
        assert_eq!(r.open_message(7).unwrap(), None);
        r.close_group().unwrap();
    }

    #[test]
    fn test_open_group_holds_back_flush() {
        let config = CodecConfig::new().with_buffer_size(16);
        let mut writer = PrimitiveWriter::with_config(MemorySink::new(), &config).unwrap();
        writer.write_u32(1).unwrap();
        writer.open_group(7).unwrap();
        writer.push_bit(true).unwrap();
        for _ in 0..20 {
            writer.write_u32(100).unwrap();
        }
        // only the bytes before the reservation may leave
        assert_eq!(writer.sink().as_bytes(), &[0x81]);
        writer.close_group().unwrap();
        assert!(writer.sink().len() > 1);
        let sink = writer.finish().unwrap();
        assert_eq!(sink.len(), 1 + 1 + 20);
    }

    #[test]
    fn test_partial_sink_accepts_everything() {
        let config = CodecConfig::new().with_buffer_size(10);
        let sink = MemorySink::with_max_accept(3);
        let mut writer = PrimitiveWriter::with_config(sink, &config).unwrap();
        for value in 0..50u32 {
            writer.write_u32(value * 1_000).unwrap();
        }
        writer.flush().unwrap();
        let total = writer.total_written();
        let bytes = writer.finish().unwrap().into_bytes();
        assert_eq!(total, bytes.len() as u64);

        let mut r = PrimitiveReader::new(MemorySource::new(bytes));
        for value in 0..50u32 {
            assert_eq!(r.read_u32().unwrap(), value * 1_000);
        }
    }

    #[test]
    fn test_finish_with_open_group() {
        let mut writer = PrimitiveWriter::new(MemorySink::new());
        writer.open_group(7).unwrap();
        assert_eq!(
            writer.finish().unwrap_err(),
            FastError::UnbalancedGroup { depth: 1 }
        );
    }

    #[test]
    fn test_close_without_open() {
        let mut writer = PrimitiveWriter::new(MemorySink::new());
        assert!(matches!(
            writer.close_group(),
            Err(FastError::UnbalancedGroup { .. })
        ));
    }

    #[test]
    fn test_utf8_and_bytes_round_trip() {
        let bytes = written(|w| {
            w.write_u32(3)?;
            w.write_utf8("a€b")?;
            w.write_bytes(&[1, 2, 3])
        });
        let mut r = PrimitiveReader::new(MemorySource::new(bytes));
        let count = r.read_u32().unwrap() as usize;
        let mut text = String::new();
        r.read_utf8(count, &mut text).unwrap();
        assert_eq!(text, "a€b");
        assert_eq!(r.read_bytes(3).unwrap().as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn test_write_i64_min() {
        let bytes = written(|w| w.write_i64(i64::MIN));
        assert_eq!(bytes, vec![0x7F, 0, 0, 0, 0, 0, 0, 0, 0, 0x80]);
        let mut r = PrimitiveReader::new(MemorySource::new(bytes));
        assert_eq!(r.read_i64().unwrap(), i64::MIN);
    }

    #[test]
    fn test_ten_byte_negative_round_trip() {
        let value = -(1i64 << 62) - 1;
        let bytes = written(|w| w.write_i64(value));
        assert_eq!(bytes.len(), 10);
        assert_eq!(bytes[0], 0x7F);

        let mut whole = PrimitiveReader::new(MemorySource::new(bytes.clone()));
        assert_eq!(whole.read_i64().unwrap(), value);
        let mut trickled = PrimitiveReader::new(MemorySource::new(bytes).with_chunk_size(1));
        assert_eq!(trickled.read_i64().unwrap(), value);
    }

    /// Accepts at most `max_accept` bytes per call and fails once after
    /// `fail_at` bytes have been taken.
    #[derive(Debug, Default)]
    struct FailingSink {
        data: Vec<u8>,
        max_accept: usize,
        fail_at: usize,
        failed: bool,
    }

    impl ByteSink for FailingSink {
        fn flush(&mut self, data: &[u8]) -> Result<usize> {
            if !self.failed && self.data.len() >= self.fail_at {
                self.failed = true;
                return Err(FastError::Io("connection reset".to_string()));
            }
            let take = data.len().min(self.max_accept);
            self.data.extend_from_slice(&data[..take]);
            Ok(take)
        }
    }

    #[test]
    fn test_sink_error_mid_flush_does_not_resend() {
        let expected = written(|w| {
            for value in 0..8u32 {
                w.write_u32(value * 1_000)?;
            }
            Ok(())
        });

        let sink = FailingSink {
            max_accept: 3,
            fail_at: 6,
            ..FailingSink::default()
        };
        let mut writer = PrimitiveWriter::new(sink);
        for value in 0..8u32 {
            writer.write_u32(value * 1_000).unwrap();
        }
        assert!(matches!(writer.flush(), Err(FastError::Io(_))));
        assert_eq!(writer.total_written(), 6);
        assert_eq!(writer.bytes_pending(), expected.len() - 6);

        writer.flush().unwrap();
        assert_eq!(writer.total_written(), expected.len() as u64);
        assert_eq!(writer.sink().data, expected);
    }

    #[test]
    fn test_sink_error_keeps_open_group_offsets() {
        let sink = FailingSink {
            max_accept: 1,
            fail_at: 2,
            ..FailingSink::default()
        };
        let mut writer = PrimitiveWriter::new(sink);
        writer.write_u32(1).unwrap();
        writer.write_u32(2).unwrap();
        writer.write_u32(3).unwrap();
        writer.open_group(7).unwrap();
        writer.push_bit(true).unwrap();
        writer.write_u32(4).unwrap();
        assert!(writer.flush().is_err());
        assert_eq!(writer.total_written(), 2);

        writer.close_group().unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.sink().data, vec![0x81, 0x82, 0x83, 0xC0, 0x84]);
    }

    proptest! {
        #[test]
        fn prop_u64_round_trip(value in any::<u64>()) {
            let bytes = written(|w| w.write_u64(value));
            prop_assert_eq!(bytes.len(), unsigned_len(value));
            let mut r = PrimitiveReader::new(MemorySource::new(bytes).with_chunk_size(1));
            prop_assert_eq!(r.read_u64().unwrap(), value);
        }

        #[test]
        fn prop_i64_round_trip(value in any::<i64>()) {
            let bytes = written(|w| w.write_i64(value));
            let mut r = PrimitiveReader::new(MemorySource::new(bytes).with_chunk_size(1));
            prop_assert_eq!(r.read_i64().unwrap(), value);
        }

        #[test]
        fn prop_i32_round_trip(value in any::<i32>()) {
            let bytes = written(|w| w.write_i32(value));
            prop_assert!(bytes.len() <= 5);
            let mut r = PrimitiveReader::new(MemorySource::new(bytes));
            prop_assert_eq!(r.read_i32().unwrap(), value);
        }

        #[test]
        fn prop_ascii_round_trip(text in "[a-zA-Z0-9 ]{0,40}") {
            let bytes = written(|w| w.write_ascii(&text));
            let mut r = PrimitiveReader::new(MemorySource::new(bytes).with_chunk_size(3));
            let mut out = String::new();
            r.read_ascii(&mut out).unwrap();
            prop_assert_eq!(out, text);
        }
    }
}
