/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! FAST presence map handling.
//!
//! The presence map (PMAP) is a bitmap that indicates which fields of a group
//! are present on the wire. Each byte carries seven bits, most significant
//! first; the high bit of a byte marks the last PMAP byte. Senders may drop
//! trailing all-zero bytes, so bits past the transmitted ones read as zero.
//!
//! Groups nest (sequences, nested templates), so both the read and the write
//! side keep a bounded stack of frames, one per open group. All frames of the
//! read side share one byte arena; closing a group truncates the arena back to
//! where the group started.

use fastwire_core::{FastError, Result};
use smallvec::SmallVec;

/// Data bits carried by each presence map byte.
pub const BITS_PER_BYTE: usize = 7;

const STOP_BIT: u8 = 0x80;

/// Returns the number of PMAP bytes needed for `max_bits` presence bits.
#[inline]
#[must_use]
pub const fn pmap_bytes(max_bits: usize) -> usize {
    if max_bits == 0 {
        1
    } else {
        max_bits.div_ceil(BITS_PER_BYTE)
    }
}

#[derive(Debug, Clone, Copy)]
struct ReadFrame {
    start: usize,
    end: usize,
    byte: usize,
    bit: u8,
}

/// Read-side stack of open presence maps.
#[derive(Debug, Clone)]
pub struct PresenceMapStack {
    bytes: Vec<u8>,
    frames: SmallVec<[ReadFrame; 8]>,
    max_depth: usize,
}

impl PresenceMapStack {
    /// Creates an empty stack allowing `max_depth` open groups.
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(max_depth * 2),
            frames: SmallVec::new(),
            max_depth,
        }
    }

    /// Returns the number of open groups.
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Starts a new frame; its bytes follow via [`push_byte`](Self::push_byte).
    ///
    /// # Errors
    /// Returns `FastError::NestingOverflow` if the stack is full.
    pub fn begin(&mut self) -> Result<()> {
        if self.frames.len() >= self.max_depth {
            return Err(FastError::NestingOverflow {
                max_depth: self.max_depth,
            });
        }
        let start = self.bytes.len();
        self.frames.push(ReadFrame {
            start,
            end: start,
            byte: start,
            bit: 0,
        });
        Ok(())
    }

    /// Appends a wire byte to the innermost frame.
    #[inline]
    pub fn push_byte(&mut self, byte: u8) {
        if let Some(frame) = self.frames.last_mut() {
            self.bytes.push(byte);
            frame.end += 1;
        }
    }

    /// Appends several wire bytes to the innermost frame.
    pub fn extend(&mut self, bytes: &[u8]) {
        if let Some(frame) = self.frames.last_mut() {
            self.bytes.extend_from_slice(bytes);
            frame.end += bytes.len();
        }
    }

    /// Pops the next presence bit of the innermost group.
    ///
    /// Bits beyond the transmitted bytes are `false`.
    ///
    /// # Errors
    /// Returns `FastError::UnbalancedGroup` if no group is open.
    #[inline]
    pub fn pop_bit(&mut self) -> Result<bool> {
        let frame = self
            .frames
            .last_mut()
            .ok_or(FastError::UnbalancedGroup { depth: 0 })?;
        if frame.byte >= frame.end {
            return Ok(false);
        }
        let set = self.bytes[frame.byte] & (0x40 >> frame.bit) != 0;
        frame.bit += 1;
        if frame.bit as usize == BITS_PER_BYTE {
            frame.bit = 0;
            frame.byte += 1;
        }
        Ok(set)
    }

    /// Closes the innermost group, resuming the enclosing one where it stopped.
    ///
    /// # Errors
    /// Returns `FastError::UnbalancedGroup` if no group is open.
    pub fn end(&mut self) -> Result<()> {
        let frame = self
            .frames
            .pop()
            .ok_or(FastError::UnbalancedGroup { depth: 0 })?;
        self.bytes.truncate(frame.start);
        Ok(())
    }

    /// Drops every open frame.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.bytes.clear();
    }
}

#[derive(Debug, Clone)]
struct WriteFrame {
    offset: usize,
    reserved: usize,
    max_bits: usize,
    bits: usize,
    packed: SmallVec<[u8; 8]>,
}

/// A closed write-side presence map, ready to be placed into its reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedPresenceMap {
    /// Buffer offset of the reserved bytes.
    pub offset: usize,
    /// Number of reserved bytes.
    pub reserved: usize,
    /// Encoded bytes, trailing zero bytes removed and stop bit set.
    pub bytes: SmallVec<[u8; 8]>,
}

/// Write-side stack of open presence maps.
#[derive(Debug, Clone)]
pub struct PresenceMapWriter {
    frames: SmallVec<[WriteFrame; 8]>,
    max_depth: usize,
}

impl PresenceMapWriter {
    /// Creates an empty stack allowing `max_depth` open groups.
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            frames: SmallVec::new(),
            max_depth,
        }
    }

    /// Returns the number of open groups.
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Opens a group whose PMAP reservation starts at `offset`.
    ///
    /// Returns the number of bytes the caller must reserve.
    ///
    /// # Errors
    /// Returns `FastError::NestingOverflow` if the stack is full.
    pub fn begin(&mut self, offset: usize, max_bits: usize) -> Result<usize> {
        if self.frames.len() >= self.max_depth {
            return Err(FastError::NestingOverflow {
                max_depth: self.max_depth,
            });
        }
        let reserved = pmap_bytes(max_bits);
        self.frames.push(WriteFrame {
            offset,
            reserved,
            max_bits: reserved * BITS_PER_BYTE,
            bits: 0,
            packed: SmallVec::new(),
        });
        Ok(reserved)
    }

    /// Records the next presence bit of the innermost group.
    ///
    /// # Errors
    /// Returns `FastError::UnbalancedGroup` if no group is open and
    /// `FastError::PresenceMapOverflow` if the group's bits are used up.
    #[inline]
    pub fn push_bit(&mut self, set: bool) -> Result<()> {
        let frame = self
            .frames
            .last_mut()
            .ok_or(FastError::UnbalancedGroup { depth: 0 })?;
        if frame.bits >= frame.max_bits {
            return Err(FastError::PresenceMapOverflow {
                max_bits: frame.max_bits,
            });
        }
        let index = frame.bits / BITS_PER_BYTE;
        if index == frame.packed.len() {
            frame.packed.push(0);
        }
        if set {
            frame.packed[index] |= 0x40 >> (frame.bits % BITS_PER_BYTE);
        }
        frame.bits += 1;
        Ok(())
    }

    /// Closes the innermost group and returns its encoded presence map.
    ///
    /// # Errors
    /// Returns `FastError::UnbalancedGroup` if no group is open.
    pub fn end(&mut self) -> Result<ClosedPresenceMap> {
        let frame = self
            .frames
            .pop()
            .ok_or(FastError::UnbalancedGroup { depth: 0 })?;
        let mut bytes = frame.packed;
        while bytes.len() > 1 && bytes.last() == Some(&0) {
            bytes.pop();
        }
        match bytes.last_mut() {
            Some(last) => *last |= STOP_BIT,
            None => bytes.push(STOP_BIT),
        }
        Ok(ClosedPresenceMap {
            offset: frame.offset,
            reserved: frame.reserved,
            bytes,
        })
    }

    /// Returns the reservation offset of the outermost open group.
    #[must_use]
    pub fn outermost_offset(&self) -> Option<usize> {
        self.frames.first().map(|frame| frame.offset)
    }

    /// Moves every reservation `count` bytes towards the buffer start.
    pub fn shift(&mut self, count: usize) {
        for frame in &mut self.frames {
            frame.offset -= count;
        }
    }

    /// Drops every open frame.
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pmap_bytes() {
        assert_eq!(pmap_bytes(0), 1);
        assert_eq!(pmap_bytes(1), 1);
        assert_eq!(pmap_bytes(7), 1);
        assert_eq!(pmap_bytes(8), 2);
        assert_eq!(pmap_bytes(14), 2);
        assert_eq!(pmap_bytes(15), 3);
    }

    #[test]
    fn test_read_single_byte() {
        let mut stack = PresenceMapStack::new(4);
        stack.begin().unwrap();
        stack.push_byte(0b1101_0000);

        assert!(stack.pop_bit().unwrap());
        assert!(!stack.pop_bit().unwrap());
        assert!(stack.pop_bit().unwrap());
        for _ in 0..4 {
            assert!(!stack.pop_bit().unwrap());
        }
        // past the transmitted bits
        assert!(!stack.pop_bit().unwrap());
        stack.end().unwrap();
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_read_crosses_byte_boundary() {
        let mut stack = PresenceMapStack::new(4);
        stack.begin().unwrap();
        stack.extend(&[0b0000_0001, 0b1100_0000]);

        let bits: Vec<bool> = (0..9).map(|_| stack.pop_bit().unwrap()).collect();
        assert_eq!(
            bits,
            vec![false, false, false, false, false, false, true, true, false]
        );
    }

    #[test]
    fn test_read_nested_resume() {
        let mut stack = PresenceMapStack::new(4);
        stack.begin().unwrap();
        stack.push_byte(0b1101_1000);
        assert!(stack.pop_bit().unwrap());

        stack.begin().unwrap();
        stack.push_byte(0b1110_0000);
        assert!(stack.pop_bit().unwrap());
        assert!(stack.pop_bit().unwrap());
        stack.end().unwrap();

        assert!(!stack.pop_bit().unwrap());
        assert!(stack.pop_bit().unwrap());
        assert!(stack.pop_bit().unwrap());
    }

    #[test]
    fn test_read_nesting_overflow() {
        let mut stack = PresenceMapStack::new(2);
        stack.begin().unwrap();
        stack.begin().unwrap();
        assert_eq!(
            stack.begin(),
            Err(FastError::NestingOverflow { max_depth: 2 })
        );
    }

    #[test]
    fn test_read_without_group() {
        let mut stack = PresenceMapStack::new(2);
        assert!(stack.pop_bit().is_err());
        assert!(stack.end().is_err());
    }

    #[test]
    fn test_write_trims_trailing_zero_bytes() {
        let mut writer = PresenceMapWriter::new(4);
        assert_eq!(writer.begin(10, 20).unwrap(), 3);
        writer.push_bit(true).unwrap();
        writer.push_bit(false).unwrap();
        writer.push_bit(true).unwrap();
        for _ in 0..10 {
            writer.push_bit(false).unwrap();
        }

        let closed = writer.end().unwrap();
        assert_eq!(closed.offset, 10);
        assert_eq!(closed.reserved, 3);
        assert_eq!(closed.bytes.as_slice(), &[0b1101_0000]);
    }

    #[test]
    fn test_write_empty_group() {
        let mut writer = PresenceMapWriter::new(4);
        writer.begin(0, 3).unwrap();
        let closed = writer.end().unwrap();
        assert_eq!(closed.bytes.as_slice(), &[0x80]);
    }

    #[test]
    fn test_write_overflow() {
        let mut writer = PresenceMapWriter::new(4);
        writer.begin(0, 7).unwrap();
        for _ in 0..7 {
            writer.push_bit(true).unwrap();
        }
        assert_eq!(
            writer.push_bit(true),
            Err(FastError::PresenceMapOverflow { max_bits: 7 })
        );
    }

    #[test]
    fn test_write_shift() {
        let mut writer = PresenceMapWriter::new(4);
        writer.begin(12, 7).unwrap();
        writer.begin(20, 7).unwrap();
        writer.shift(12);
        assert_eq!(writer.outermost_offset(), Some(0));
        assert_eq!(writer.end().unwrap().offset, 8);
    }
}
