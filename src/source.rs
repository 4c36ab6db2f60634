// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Byte sources and bounded views over them.
//!
//! Parsing never moves a shared cursor. Every box gets its own [`RangeReader`]
//! covering exactly its payload, so a sub-parser that stops early cannot leave
//! the enclosing parser out of sync.

use std::cell::RefCell;
use std::io::{Read, Seek, SeekFrom};

use crate::{Error, Result, ToU64};

/// Random-access input for the container parser.
///
/// Implemented for in-memory buffers and, through [`StreamSource`], for any
/// seekable reader.
pub trait ByteSource {
    /// Total length of the source in bytes.
    fn len(&self) -> u64;

    /// Fill `buf` with the bytes starting at absolute `offset`.
    ///
    /// Fails with [`Error::UnexpectedEOF`] if the range is not fully available.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ByteSource for [u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self).to_u64()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = usize::try_from(offset).map_err(|_| Error::UnexpectedEOF)?;
        let end = start.checked_add(buf.len()).ok_or(Error::UnexpectedEOF)?;
        let src = self.get(start..end).ok_or(Error::UnexpectedEOF)?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

impl ByteSource for std::vec::Vec<u8> {
    fn len(&self) -> u64 {
        self.as_slice().len().to_u64()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.as_slice().read_exact_at(offset, buf)
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &S {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

/// Adapts a blocking `Read + Seek` stream (e.g. a `File`) into a [`ByteSource`].
///
/// Every read seeks to an absolute position first, so the stream position is
/// never relied upon between calls. Not `Sync`: one parse at a time.
pub struct StreamSource<R> {
    inner: RefCell<R>,
    len: u64,
}

impl<R: Read + Seek> StreamSource<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self { inner: RefCell::new(inner), len })
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

impl<R: Read + Seek> ByteSource for StreamSource<R> {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset.checked_add(buf.len().to_u64()).ok_or(Error::UnexpectedEOF)?;
        if end > self.len {
            return Err(Error::UnexpectedEOF);
        }
        let mut inner = self.inner.borrow_mut();
        inner.seek(SeekFrom::Start(offset))?;
        inner.read_exact(buf)?;
        Ok(())
    }
}

/// Owned, bounded view `[start, end)` over a [`ByteSource`].
///
/// Implements `Read`; reads stop at `end` regardless of how much the source holds.
pub(crate) struct RangeReader<'a, S: ?Sized> {
    source: &'a S,
    position: u64,
    end: u64,
}

impl<S: ?Sized> RangeReader<'_, S> {
    /// Absolute offset of the next byte to be read.
    pub(crate) fn offset(&self) -> u64 {
        self.position
    }

    /// Absolute offset one past the last readable byte.
    pub(crate) fn end(&self) -> u64 {
        self.end
    }

    pub(crate) fn bytes_left(&self) -> u64 {
        self.end - self.position
    }
}

impl<'a, S: ByteSource + ?Sized> RangeReader<'a, S> {
    /// View over the whole source.
    pub(crate) fn new(source: &'a S) -> Self {
        Self { source, position: 0, end: source.len() }
    }

    /// View over `[start, end)`. The range must lie within the source.
    #[cfg(test)]
    pub(crate) fn with_range(source: &'a S, start: u64, end: u64) -> Result<Self> {
        if start > end || end > source.len() {
            return Err(Error::MalformedContainer("range outside of source"));
        }
        Ok(Self { source, position: start, end })
    }

    /// Split off the next `len` bytes as an independent view and move past them.
    pub(crate) fn take_range(&mut self, len: u64) -> Result<RangeReader<'a, S>> {
        if len > self.bytes_left() {
            return Err(Error::MalformedContainer("box extends past the end of its container"));
        }
        let start = self.position;
        self.position += len;
        Ok(RangeReader { source: self.source, position: start, end: start + len })
    }

    /// Move past `len` bytes without reading them.
    #[cfg(test)]
    pub(crate) fn skip(&mut self, len: u64) -> Result<()> {
        if len > self.bytes_left() {
            return Err(Error::UnexpectedEOF);
        }
        self.position += len;
        Ok(())
    }

    /// Skip everything that is left in this view.
    pub(crate) fn skip_to_end(&mut self) {
        self.position = self.end;
    }

    /// Read the rest of the view into a buffer.
    pub(crate) fn read_remaining(&mut self) -> Result<crate::TryVec<u8>> {
        let len = usize::try_from(self.bytes_left())?;
        let mut buf = std::vec::Vec::new();
        buf.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
        buf.resize(len, 0);
        self.source.read_exact_at(self.position, &mut buf)?;
        self.position = self.end;
        Ok(buf.into())
    }
}

impl<S: ByteSource + ?Sized> Read for RangeReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let available = usize::try_from(self.bytes_left()).unwrap_or(usize::MAX);
        let len = buf.len().min(available);
        if len == 0 {
            return Ok(0);
        }
        self.source.read_exact_at(self.position, &mut buf[..len])?;
        self.position += len.to_u64();
        Ok(len)
    }
}

#[test]
fn range_reader_stays_within_bounds() {
    let data = b"0123456789".as_slice();
    let mut outer = RangeReader::with_range(data, 2, 8).unwrap();
    let mut inner = outer.take_range(3).unwrap();
    assert_eq!(outer.offset(), 5);

    let mut buf = [0u8; 8];
    let n = inner.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"234");
    assert_eq!(inner.read(&mut buf).unwrap(), 0);

    assert!(outer.take_range(4).is_err());
    assert_eq!(outer.read_remaining().unwrap(), b"567".as_ref());
}

#[test]
fn stream_source_reads_at_absolute_offsets() {
    let source = StreamSource::new(std::io::Cursor::new(b"abcdef".to_vec())).unwrap();
    assert_eq!(source.len(), 6);
    let mut buf = [0u8; 2];
    source.read_exact_at(4, &mut buf).unwrap();
    assert_eq!(&buf, b"ef");
    source.read_exact_at(0, &mut buf).unwrap();
    assert_eq!(&buf, b"ab");
    assert!(matches!(source.read_exact_at(5, &mut buf), Err(Error::UnexpectedEOF)));
}
