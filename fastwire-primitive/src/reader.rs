/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Buffered primitive reader.
//!
//! This module decodes FAST primitives (stop-bit varints, ASCII and UTF-8
//! text, byte blocks and presence maps) from a fixed-capacity window filled
//! from a [`ByteSource`].
//!
//! Every read is safe across refills: when the window runs dry in the middle
//! of a value the reader compacts the unread tail to the front, fetches more
//! bytes and continues with the state it has already accumulated. Varint
//! reads take a fast path without per-byte refill checks whenever the window
//! holds enough bytes for the longest legal encoding.

use crate::backoff::Backoff;
use crate::pmap::{PresenceMapStack, pmap_bytes};
use crate::source::ByteSource;
use bytes::{Bytes, BytesMut};
use fastwire_core::{BackoffConfig, CodecConfig, FastError, Result};
use tracing::{debug, trace, warn};

const STOP_BIT: u8 = 0x80;
const DATA_BITS: u8 = 0x7F;
const SIGN_BIT: u8 = 0x40;

/// Longest legal encoding of a 32-bit varint.
pub const MAX_BYTES_32: usize = 5;
/// Longest legal encoding of a 64-bit varint.
pub const MAX_BYTES_64: usize = 10;

const TOO_LONG: FastError = FastError::MalformedField {
    reason: "varint exceeds maximum encoded length",
};
const OVERFLOW: FastError = FastError::MalformedField {
    reason: "varint overflows the field width",
};

/// Buffered FAST primitive reader.
#[derive(Debug)]
pub struct PrimitiveReader<S> {
    source: S,
    buffer: Box<[u8]>,
    position: usize,
    limit: usize,
    total_read: u64,
    pmap: PresenceMapStack,
    backoff: BackoffConfig,
}

impl<S: ByteSource> PrimitiveReader<S> {
    /// Creates a reader with the default configuration.
    #[must_use]
    pub fn new(source: S) -> Self {
        let config = CodecConfig::default();
        Self::build(source, &config)
    }

    /// Creates a reader with the given configuration.
    ///
    /// # Errors
    /// Returns `FastError::InvalidConfig` if the configuration is rejected.
    pub fn with_config(source: S, config: &CodecConfig) -> Result<Self> {
        config.validate().inspect_err(|err| {
            debug!(%err, "rejected reader configuration");
        })?;
        Ok(Self::build(source, config))
    }

    fn build(source: S, config: &CodecConfig) -> Self {
        Self {
            source,
            buffer: vec![0u8; config.buffer_size].into_boxed_slice(),
            position: 0,
            limit: 0,
            total_read: 0,
            pmap: PresenceMapStack::new(config.max_nesting),
            backoff: config.backoff,
        }
    }

    /// Discards buffered input and open groups and zeroes the counters.
    pub fn reset(&mut self) {
        let unread = self.limit - self.position;
        if unread > 0 {
            warn!(unread, "reset discards buffered input");
        }
        self.position = 0;
        self.limit = 0;
        self.total_read = 0;
        self.pmap.clear();
        debug!("primitive reader reset");
    }

    /// Returns the total number of bytes pulled from the source.
    #[must_use]
    pub const fn total_read(&self) -> u64 {
        self.total_read
    }

    /// Returns the number of buffered bytes not yet consumed.
    #[must_use]
    pub const fn bytes_ready(&self) -> usize {
        self.limit - self.position
    }

    /// Returns the number of open groups.
    #[must_use]
    pub fn group_depth(&self) -> usize {
        self.pmap.depth()
    }

    /// Returns a reference to the byte source.
    #[must_use]
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// Returns true if no more bytes are buffered and the source is exhausted.
    ///
    /// Performs at most one non-blocking fill.
    ///
    /// # Errors
    /// Returns `FastError::Io` if the source fails.
    pub fn is_end_of_stream(&mut self) -> Result<bool> {
        if self.position < self.limit {
            return Ok(false);
        }
        if self.fill_window()? > 0 {
            return Ok(false);
        }
        Ok(self.source.is_end_of_stream())
    }

    // ------------------------------------------------------------------
    // window management
    // ------------------------------------------------------------------

    /// Pulls whatever the source has into the free tail of the window.
    fn fill_window(&mut self) -> Result<usize> {
        if self.position >= self.limit {
            self.position = 0;
            self.limit = 0;
        } else if self.limit == self.buffer.len() && self.position > 0 {
            let unread = self.limit - self.position;
            self.buffer.copy_within(self.position..self.limit, 0);
            trace!(unread, shifted = self.position, "compacted read window");
            self.position = 0;
            self.limit = unread;
        }
        if self.limit == self.buffer.len() {
            return Ok(0);
        }
        let filled = self.source.fill(&mut self.buffer[self.limit..])?;
        self.limit += filled;
        self.total_read += filled as u64;
        Ok(filled)
    }

    /// Blocks until at least `need` unread bytes are resident.
    fn fetch(&mut self, need: usize) -> Result<()> {
        if need > self.buffer.len() {
            return Err(FastError::BufferTooSmall {
                needed: need,
                capacity: self.buffer.len(),
            });
        }
        if self.buffer.len() - self.position < need {
            let unread = self.limit - self.position;
            self.buffer.copy_within(self.position..self.limit, 0);
            trace!(unread, shifted = self.position, "compacted read window");
            self.position = 0;
            self.limit = unread;
        }
        let mut backoff = Backoff::new(self.backoff);
        while self.limit - self.position < need {
            if self.fill_window()? > 0 {
                backoff.reset();
            } else if self.source.is_end_of_stream() {
                debug!(
                    need,
                    ready = self.limit - self.position,
                    "source exhausted mid-value"
                );
                return Err(FastError::EndOfStream);
            } else {
                backoff.snooze();
            }
        }
        Ok(())
    }

    #[inline]
    fn next_byte(&mut self) -> Result<u8> {
        if self.position >= self.limit {
            self.fetch(1)?;
        }
        let byte = self.buffer[self.position];
        self.position += 1;
        Ok(byte)
    }

    #[inline]
    fn peek_byte(&mut self) -> Result<u8> {
        if self.position >= self.limit {
            self.fetch(1)?;
        }
        Ok(self.buffer[self.position])
    }

    /// Returns the next byte without consuming it.
    ///
    /// # Errors
    /// Returns `FastError::EndOfStream` if no byte can be fetched.
    pub fn peek(&mut self) -> Result<u8> {
        self.peek_byte()
    }

    // ------------------------------------------------------------------
    // varints
    // ------------------------------------------------------------------

    /// Reads an unsigned 32-bit stop-bit integer.
    ///
    /// # Errors
    /// Returns `FastError::EndOfStream` if the source runs dry mid-value and
    /// `FastError::MalformedField` if the value is over-long or exceeds 32 bits.
    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        let value = if self.bytes_ready() >= MAX_BYTES_32 {
            self.read_unsigned_fast(MAX_BYTES_32)?
        } else {
            self.read_unsigned_slow(MAX_BYTES_32)?
        };
        u32::try_from(value).map_err(|_| OVERFLOW)
    }

    /// Reads a signed 32-bit stop-bit integer.
    ///
    /// # Errors
    /// See [`read_u32`](Self::read_u32).
    #[inline]
    pub fn read_i32(&mut self) -> Result<i32> {
        let value = if self.bytes_ready() >= MAX_BYTES_32 {
            self.read_signed_fast(MAX_BYTES_32)?
        } else {
            self.read_signed_slow(MAX_BYTES_32)?
        };
        i32::try_from(value).map_err(|_| OVERFLOW)
    }

    /// Reads an unsigned 64-bit stop-bit integer.
    ///
    /// # Errors
    /// See [`read_u32`](Self::read_u32).
    #[inline]
    pub fn read_u64(&mut self) -> Result<u64> {
        if self.bytes_ready() >= MAX_BYTES_64 {
            self.read_unsigned_fast(MAX_BYTES_64)
        } else {
            self.read_unsigned_slow(MAX_BYTES_64)
        }
    }

    /// Reads a signed 64-bit stop-bit integer.
    ///
    /// # Errors
    /// See [`read_u32`](Self::read_u32).
    #[inline]
    pub fn read_i64(&mut self) -> Result<i64> {
        if self.bytes_ready() >= MAX_BYTES_64 {
            self.read_signed_fast(MAX_BYTES_64)
        } else {
            self.read_signed_slow(MAX_BYTES_64)
        }
    }

    fn read_unsigned_fast(&mut self, max_bytes: usize) -> Result<u64> {
        let window = &self.buffer[self.position..self.position + max_bytes];
        let first = window[0];
        if first & STOP_BIT != 0 {
            self.position += 1;
            return Ok(u64::from(first & DATA_BITS));
        }
        let mut acc = u64::from(first);
        for (index, &byte) in window.iter().enumerate().skip(1) {
            acc = push_unsigned(acc, byte)?;
            if byte & STOP_BIT != 0 {
                self.position += index + 1;
                return Ok(acc);
            }
        }
        Err(TOO_LONG)
    }

    fn read_unsigned_slow(&mut self, max_bytes: usize) -> Result<u64> {
        let first = self.next_byte()?;
        if first & STOP_BIT != 0 {
            return Ok(u64::from(first & DATA_BITS));
        }
        let mut acc = u64::from(first);
        for _ in 1..max_bytes {
            let byte = self.next_byte()?;
            acc = push_unsigned(acc, byte)?;
            if byte & STOP_BIT != 0 {
                return Ok(acc);
            }
        }
        Err(TOO_LONG)
    }

    fn read_signed_fast(&mut self, max_bytes: usize) -> Result<i64> {
        let window = &self.buffer[self.position..self.position + max_bytes];
        let mut acc = seed_signed(window[0]);
        for (index, &byte) in window.iter().enumerate() {
            acc = push_signed(acc, byte)?;
            if byte & STOP_BIT != 0 {
                self.position += index + 1;
                return Ok(acc);
            }
        }
        Err(TOO_LONG)
    }

    fn read_signed_slow(&mut self, max_bytes: usize) -> Result<i64> {
        let first = self.peek_byte()?;
        let mut acc = seed_signed(first);
        for _ in 0..max_bytes {
            let byte = self.next_byte()?;
            acc = push_signed(acc, byte)?;
            if byte & STOP_BIT != 0 {
                return Ok(acc);
            }
        }
        Err(TOO_LONG)
    }

    // ------------------------------------------------------------------
    // text and byte blocks
    // ------------------------------------------------------------------

    /// Reads stop-bit terminated ASCII text, appending it to `target`.
    ///
    /// The two-byte sequence `0x00 0x80` is the zero-length marker and
    /// appends nothing. Returns the number of characters appended.
    ///
    /// # Errors
    /// Returns `FastError::MalformedField` if a leading `0x00` is not followed
    /// by `0x80`, and `FastError::EndOfStream` if the text is cut short.
    pub fn read_ascii(&mut self, target: &mut String) -> Result<usize> {
        let first = self.peek_byte()?;
        if first == 0 {
            self.position += 1;
            if self.next_byte()? != STOP_BIT {
                return Err(FastError::MalformedField {
                    reason: "ascii zero-length marker 0x00 not followed by 0x80",
                });
            }
            return Ok(0);
        }

        let window = &self.buffer[self.position..self.limit];
        if let Some(end) = window.iter().position(|&b| b & STOP_BIT != 0) {
            target.extend(window[..end].iter().map(|&b| char::from(b)));
            target.push(char::from(window[end] & DATA_BITS));
            self.position += end + 1;
            return Ok(end + 1);
        }

        let mut count = 0;
        loop {
            let byte = self.next_byte()?;
            count += 1;
            if byte & STOP_BIT != 0 {
                target.push(char::from(byte & DATA_BITS));
                return Ok(count);
            }
            target.push(char::from(byte));
        }
    }

    /// Reads `char_count` UTF-8 encoded characters, appending them to `target`.
    ///
    /// Invalid sequences are replaced by U+FFFD and the reader skips the
    /// number of bytes the lead byte announced, so one bad character never
    /// misaligns the rest of the stream.
    ///
    /// # Errors
    /// Returns `FastError::EndOfStream` if the text is cut short.
    pub fn read_utf8(&mut self, char_count: usize, target: &mut String) -> Result<()> {
        target.reserve(char_count);
        for _ in 0..char_count {
            let lead = self.next_byte()?;
            if lead < STOP_BIT {
                target.push(char::from(lead));
            } else {
                let ch = self.decode_utf8_tail(lead)?;
                target.push(ch);
            }
        }
        Ok(())
    }

    fn decode_utf8_tail(&mut self, lead: u8) -> Result<char> {
        let (len, mut code) = match lead.leading_ones() {
            // stray continuation byte
            1 => return Ok(char::REPLACEMENT_CHARACTER),
            2 => (2, u32::from(lead & 0x1F)),
            3 => (3, u32::from(lead & 0x0F)),
            4 => (4, u32::from(lead & 0x07)),
            5 => (5, u32::from(lead & 0x03)),
            6 => (6, u32::from(lead & 0x01)),
            _ => {
                self.skip_bytes(5)?;
                return Ok(char::REPLACEMENT_CHARACTER);
            }
        };
        for consumed in 1..len {
            let byte = self.peek_byte()?;
            if byte & 0xC0 != 0x80 {
                self.skip_bytes(len - consumed)?;
                return Ok(char::REPLACEMENT_CHARACTER);
            }
            self.position += 1;
            code = (code << 6) | u32::from(byte & 0x3F);
        }
        Ok(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER))
    }

    /// Fills `target` with the next `target.len()` raw bytes.
    ///
    /// Blocks larger than the window are copied in window-sized pieces.
    ///
    /// # Errors
    /// Returns `FastError::EndOfStream` if the source runs dry first.
    pub fn read_bytes_into(&mut self, target: &mut [u8]) -> Result<()> {
        let mut copied = 0;
        while copied < target.len() {
            if self.position >= self.limit {
                self.fetch(1)?;
            }
            let count = (self.limit - self.position).min(target.len() - copied);
            target[copied..copied + count]
                .copy_from_slice(&self.buffer[self.position..self.position + count]);
            self.position += count;
            copied += count;
        }
        Ok(())
    }

    /// Reads the next `len` raw bytes.
    ///
    /// # Errors
    /// Returns `FastError::EndOfStream` if the source runs dry first.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity(len.min(self.buffer.len()));
        let mut remaining = len;
        while remaining > 0 {
            if self.position >= self.limit {
                self.fetch(1)?;
            }
            let count = (self.limit - self.position).min(remaining);
            out.extend_from_slice(&self.buffer[self.position..self.position + count]);
            self.position += count;
            remaining -= count;
        }
        Ok(out.freeze())
    }

    // ------------------------------------------------------------------
    // skipping
    // ------------------------------------------------------------------

    /// Skips one stop-bit terminated value of any type.
    ///
    /// # Errors
    /// Returns `FastError::EndOfStream` if the value is cut short.
    pub fn skip_by_stop(&mut self) -> Result<()> {
        while self.next_byte()? & STOP_BIT == 0 {}
        Ok(())
    }

    /// Skips `len` raw bytes.
    ///
    /// # Errors
    /// Returns `FastError::EndOfStream` if the source runs dry first.
    pub fn skip_bytes(&mut self, len: usize) -> Result<()> {
        let mut remaining = len;
        while remaining > 0 {
            if self.position >= self.limit {
                self.fetch(1)?;
            }
            let count = (self.limit - self.position).min(remaining);
            self.position += count;
            remaining -= count;
        }
        Ok(())
    }

    /// Skips `char_count` UTF-8 characters without validating them.
    ///
    /// # Errors
    /// Returns `FastError::EndOfStream` if the text is cut short.
    pub fn skip_utf8(&mut self, char_count: usize) -> Result<()> {
        for _ in 0..char_count {
            let lead = self.next_byte()?;
            let extra = match lead.leading_ones() {
                0 | 1 => 0,
                n @ 2..=6 => n as usize - 1,
                _ => 5,
            };
            self.skip_bytes(extra)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // presence maps
    // ------------------------------------------------------------------

    /// Opens a group, loading its presence map.
    ///
    /// # Arguments
    /// * `max_bits` - Presence bits the group declares
    ///
    /// # Errors
    /// Returns `FastError::NestingOverflow` if too many groups are open,
    /// `FastError::MalformedField` if the transmitted map is longer than
    /// declared, and `FastError::EndOfStream` if it is cut short.
    pub fn open_group(&mut self, max_bits: usize) -> Result<()> {
        let max_bytes = pmap_bytes(max_bits);
        self.pmap.begin()?;

        let window = &self.buffer[self.position..self.limit];
        if let Some(end) = window
            .iter()
            .take(max_bytes)
            .position(|&b| b & STOP_BIT != 0)
        {
            self.pmap.extend(&window[..=end]);
            self.position += end + 1;
        } else if let Err(err) = self.load_pmap(max_bytes) {
            // a group that failed to open must not stay on the stack
            let _ = self.pmap.end();
            return Err(err);
        }
        trace!(depth = self.pmap.depth(), max_bits, "opened group");
        Ok(())
    }

    fn load_pmap(&mut self, max_bytes: usize) -> Result<()> {
        for _ in 0..max_bytes {
            let byte = self.next_byte()?;
            self.pmap.push_byte(byte);
            if byte & STOP_BIT != 0 {
                return Ok(());
            }
        }
        Err(FastError::MalformedField {
            reason: "presence map longer than declared",
        })
    }

    /// Pops the next presence bit of the innermost open group.
    ///
    /// # Errors
    /// Returns `FastError::UnbalancedGroup` if no group is open.
    #[inline]
    pub fn pop_bit(&mut self) -> Result<bool> {
        self.pmap.pop_bit()
    }

    /// Closes the innermost group and resumes the enclosing one.
    ///
    /// # Errors
    /// Returns `FastError::UnbalancedGroup` if no group is open.
    pub fn close_group(&mut self) -> Result<()> {
        self.pmap.end()?;
        trace!(depth = self.pmap.depth(), "closed group");
        Ok(())
    }

    /// Opens a message: its presence map followed by an optional template id.
    ///
    /// The first presence bit says whether a template id is on the wire.
    ///
    /// # Errors
    /// See [`open_group`](Self::open_group) and [`read_u32`](Self::read_u32).
    pub fn open_message(&mut self, max_bits: usize) -> Result<Option<u32>> {
        self.open_group(max_bits)?;
        if self.pop_bit()? {
            self.read_u32().map(Some)
        } else {
            Ok(None)
        }
    }
}

#[inline]
fn push_unsigned(acc: u64, byte: u8) -> Result<u64> {
    if acc > u64::MAX >> 7 {
        return Err(OVERFLOW);
    }
    Ok((acc << 7) | u64::from(byte & DATA_BITS))
}

#[inline]
fn seed_signed(first: u8) -> i64 {
    if first & SIGN_BIT != 0 { -1 } else { 0 }
}

#[inline]
fn push_signed(acc: i64, byte: u8) -> Result<i64> {
    if acc > i64::MAX >> 7 || acc < i64::MIN >> 7 {
        return Err(OVERFLOW);
    }
    Ok((acc << 7) | i64::from(byte & DATA_BITS))
}
