/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Byte source and sink adapters.
//!
//! The codec never talks to sockets or files directly. It pulls bytes through
//! a [`ByteSource`] and pushes them through a [`ByteSink`]; both may move
//! fewer bytes than asked for, including zero, which the primitive stream
//! treats as back-pressure and retries.

use bytes::{Bytes, BytesMut};
use fastwire_core::{FastError, Result};
use std::io::{self, Read, Write};

/// Supplier of raw bytes for a [`PrimitiveReader`](crate::PrimitiveReader).
pub trait ByteSource {
    /// Copies up to `buf.len()` bytes into `buf`.
    ///
    /// Returns the number of bytes written. Zero means "nothing right now";
    /// the caller retries unless [`is_end_of_stream`](Self::is_end_of_stream)
    /// reports that no more bytes will ever arrive.
    ///
    /// # Errors
    /// Returns `FastError::Io` if the underlying transport fails.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Returns true once the source is permanently exhausted.
    fn is_end_of_stream(&self) -> bool;
}

/// Consumer of encoded bytes for a [`PrimitiveWriter`](crate::PrimitiveWriter).
pub trait ByteSink {
    /// Accepts a prefix of `data`, returning its length (zero is allowed).
    ///
    /// # Errors
    /// Returns `FastError::Io` if the underlying transport fails.
    fn flush(&mut self, data: &[u8]) -> Result<usize>;

    /// Pushes anything the sink itself buffers to its destination.
    ///
    /// # Errors
    /// Returns `FastError::Io` if the underlying transport fails.
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).fill(buf)
    }

    fn is_end_of_stream(&self) -> bool {
        (**self).is_end_of_stream()
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).fill(buf)
    }

    fn is_end_of_stream(&self) -> bool {
        (**self).is_end_of_stream()
    }
}

impl<K: ByteSink + ?Sized> ByteSink for &mut K {
    fn flush(&mut self, data: &[u8]) -> Result<usize> {
        (**self).flush(data)
    }

    fn sync(&mut self) -> Result<()> {
        (**self).sync()
    }
}

/// In-memory byte source.
///
/// Optionally hands out at most `chunk_size` bytes per fill and can be made
/// to stall (return zero) on every other call, which is how tests reproduce
/// a slow network feed.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
    position: usize,
    chunk_size: usize,
    stall: bool,
    stalled: bool,
}

impl MemorySource {
    /// Creates a source over the given bytes.
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            position: 0,
            chunk_size: usize::MAX,
            stall: false,
            stalled: false,
        }
    }

    /// Limits every fill to at most `chunk_size` bytes.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Makes every other fill return zero bytes.
    #[must_use]
    pub const fn with_stalls(mut self) -> Self {
        self.stall = true;
        self
    }

    /// Returns the number of bytes not yet handed out.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }
}

impl ByteSource for MemorySource {
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.stall {
            self.stalled = !self.stalled;
            if self.stalled {
                return Ok(0);
            }
        }
        let count = buf.len().min(self.chunk_size).min(self.remaining());
        buf[..count].copy_from_slice(&self.data[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }

    fn is_end_of_stream(&self) -> bool {
        self.position >= self.data.len()
    }
}

/// Byte source over any [`std::io::Read`].
///
/// A zero-length read marks end of stream. `Interrupted` and `WouldBlock`
/// are reported as empty fills so the caller backs off and retries.
#[derive(Debug)]
pub struct ReadSource<R> {
    inner: R,
    eof: bool,
}

impl<R: Read> ReadSource<R> {
    /// Wraps a reader.
    #[must_use]
    pub const fn new(inner: R) -> Self {
        Self { inner, eof: false }
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> ByteSource for ReadSource<R> {
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.eof || buf.is_empty() {
            return Ok(0);
        }
        match self.inner.read(buf) {
            Ok(0) => {
                self.eof = true;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) if is_transient(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn is_end_of_stream(&self) -> bool {
        self.eof
    }
}

/// In-memory byte sink backed by `BytesMut`.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buffer: BytesMut,
    max_accept: Option<usize>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sink that accepts at most `max_accept` bytes per flush.
    #[must_use]
    pub fn with_max_accept(max_accept: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_accept: Some(max_accept.max(1)),
        }
    }

    /// Returns the bytes received so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Returns the number of bytes received so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing has been received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consumes the sink and returns the received bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }
}

impl ByteSink for MemorySink {
    fn flush(&mut self, data: &[u8]) -> Result<usize> {
        let count = self.max_accept.map_or(data.len(), |max| data.len().min(max));
        self.buffer.extend_from_slice(&data[..count]);
        Ok(count)
    }
}

/// Byte sink over any [`std::io::Write`].
#[derive(Debug)]
pub struct WriteSink<W> {
    inner: W,
}

impl<W: Write> WriteSink<W> {
    /// Wraps a writer.
    #[must_use]
    pub const fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> ByteSink for WriteSink<W> {
    fn flush(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        match self.inner.write(data) {
            Ok(0) => Err(FastError::Io("writer accepted zero bytes".to_string())),
            Ok(n) => Ok(n),
            Err(e) if is_transient(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn sync(&mut self) -> Result<()> {
        self.inner.flush().map_err(FastError::from)
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}
