// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use std::io::{Read, Write};

use crate::boxes::{BoxType, FourCC};
use crate::source::{ByteSource, RangeReader};
use crate::{Error, ParseOptions, Result, TryString, TryVec};

/// Basic ISO box structure.
///
/// The container is a sequence of possibly-nested 'box' structures. Each box
/// begins with a header describing the length of the box's data and a
/// four-byte box type which identifies the type of the box. Together these
/// are enough to interpret the contents of that section of the file.
///
/// See ISO 14496-12:2015 § 4.2
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxHeader {
    /// Box type.
    pub(crate) name: BoxType,
    /// Size of the box in bytes, header included.
    pub(crate) size: u64,
    /// Length of the header (8, 16, or 24/32 for `uuid` boxes).
    pub(crate) offset: u64,
    /// Absolute position of the first header byte.
    pub(crate) start: u64,
    /// The stored size was 0: the box runs to the end of its container.
    pub(crate) to_end: bool,
    /// Uuid for extended type.
    pub(crate) uuid: Option<[u8; 16]>,
}

impl BoxHeader {
    /// 4-byte size + 4-byte type
    pub const MIN_SIZE: u64 = 8;
    /// 4-byte size + 4-byte type + 8-byte size
    pub const MIN_LARGE_SIZE: u64 = 16;

    /// Header for a box of type `name` carrying `payload_len` bytes, using the
    /// compact 32-bit size field whenever the total fits in it.
    pub fn for_payload(name: BoxType, payload_len: u64) -> Result<Self> {
        let compact = payload_len
            .checked_add(Self::MIN_SIZE)
            .filter(|&size| size <= u64::from(u32::MAX));
        let (size, offset) = match compact {
            Some(size) => (size, Self::MIN_SIZE),
            None => {
                let size = payload_len
                    .checked_add(Self::MIN_LARGE_SIZE)
                    .ok_or(Error::InvalidData("box size overflow"))?;
                (size, Self::MIN_LARGE_SIZE)
            },
        };
        Ok(Self { name, size, offset, start: 0, to_end: false, uuid: None })
    }

    pub fn box_type(&self) -> BoxType {
        self.name
    }

    /// Total box size, header included.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn header_size(&self) -> u64 {
        self.offset
    }

    /// Absolute offset of the first payload byte.
    pub fn payload_start(&self) -> u64 {
        self.start + self.offset
    }

    /// Absolute offset one past the last payload byte.
    pub fn payload_end(&self) -> u64 {
        self.start + self.size
    }

    pub fn payload_len(&self) -> u64 {
        self.size - self.offset
    }

    /// Whether the size field used the 64-bit form.
    pub fn is_large(&self) -> bool {
        self.offset >= Self::MIN_LARGE_SIZE
    }

    pub fn extends_to_end(&self) -> bool {
        self.to_end
    }

    pub fn uuid(&self) -> Option<&[u8; 16]> {
        self.uuid.as_ref()
    }
}

/// Read and parse a box header.
///
/// Call this first to determine the type of a particular box and its
/// length. Returns `None` when `src` is exhausted exactly at a box boundary.
/// Only the header is consumed; the payload is left for the caller.
///
/// See ISO 14496-12:2015 § 4.2
pub(crate) fn read_box_header<S: ByteSource + ?Sized>(src: &mut RangeReader<'_, S>) -> Result<Option<BoxHeader>> {
    if src.bytes_left() == 0 {
        return Ok(None);
    }
    if src.bytes_left() < BoxHeader::MIN_SIZE {
        return Err(Error::MalformedContainer("truncated box header"));
    }
    let start = src.offset();
    let enclosing_end = src.end();
    let size32 = be_u32(src)?;
    let name = BoxType::from(be_u32(src)?);
    let mut offset = BoxHeader::MIN_SIZE;
    let mut to_end = false;
    let size = match size32 {
        // Size=0 means the box extends to the end of its container (usually the last mdat).
        0 => {
            to_end = true;
            enclosing_end - start
        },
        1 => {
            if src.bytes_left() < 8 {
                return Err(Error::MalformedContainer("truncated box header"));
            }
            let size64 = be_u64(src)?;
            offset = BoxHeader::MIN_LARGE_SIZE;
            if size64 < BoxHeader::MIN_LARGE_SIZE {
                return Err(Error::MalformedContainer("malformed wide size"));
            }
            size64
        },
        _ => {
            if u64::from(size32) < BoxHeader::MIN_SIZE {
                return Err(Error::MalformedContainer("malformed size"));
            }
            u64::from(size32)
        },
    };
    let end = start.checked_add(size).ok_or(Error::MalformedContainer("box size overflow"))?;
    if end > enclosing_end {
        return Err(Error::MalformedContainer("box extends past the end of its container"));
    }
    let uuid = if name == BoxType::UuidBox {
        if size < offset + 16 {
            return Err(Error::MalformedContainer("malformed uuid box"));
        }
        let mut buffer = [0u8; 16];
        src.read_exact(&mut buffer)?;
        offset += 16;
        Some(buffer)
    } else {
        None
    };
    Ok(Some(BoxHeader { name, size, offset, start, to_end, uuid }))
}

/// Write a box header, the mirror of [`read_box_header`].
///
/// Boxes of unknown length (size 0) are never written; the extended 64-bit
/// size is used exactly when `header.size` does not fit in 32 bits.
pub fn write_box_header<W: Write>(header: &BoxHeader, dest: &mut W) -> Result<()> {
    let fourcc = u32::from(header.name);
    if header.size > u64::from(u32::MAX) || header.is_large() {
        dest.write_u32::<BigEndian>(1)?;
        dest.write_u32::<BigEndian>(fourcc)?;
        dest.write_u64::<BigEndian>(header.size)?;
    } else {
        let size = u32::try_from(header.size)?;
        dest.write_u32::<BigEndian>(size)?;
        dest.write_u32::<BigEndian>(fourcc)?;
    }
    if let Some(uuid) = &header.uuid {
        dest.write_all(uuid)?;
    }
    Ok(())
}

/// A box together with an independent reader over its payload.
///
/// See ISO 14496-12:2015 § 4.2
pub(crate) struct BMFFBox<'a, S: ?Sized> {
    pub(crate) head: BoxHeader,
    pub(crate) content: RangeReader<'a, S>,
}

impl<'a, S: ByteSource + ?Sized> BMFFBox<'a, S> {
    pub(crate) fn bytes_left(&self) -> u64 {
        self.content.bytes_left()
    }

    pub(crate) fn box_iter(&mut self) -> BoxIter<'_, 'a, S> {
        BoxIter::new(&mut self.content)
    }

    pub(crate) fn read_into_try_vec(&mut self) -> Result<TryVec<u8>> {
        self.content.read_remaining()
    }
}

impl<S: ByteSource + ?Sized> Read for BMFFBox<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.content.read(buf)
    }
}

impl<S: ?Sized> Drop for BMFFBox<'_, S> {
    fn drop(&mut self) {
        if self.content.bytes_left() > 0 {
            let name: FourCC = From::from(self.head.name);
            debug!("Dropping {} bytes in '{}'", self.content.bytes_left(), name);
        }
    }
}

pub(crate) struct BoxIter<'r, 'a, S: ?Sized> {
    src: &'r mut RangeReader<'a, S>,
}

impl<'r, 'a, S: ByteSource + ?Sized> BoxIter<'r, 'a, S> {
    pub(crate) fn new(src: &'r mut RangeReader<'a, S>) -> Self {
        BoxIter { src }
    }

    /// Read the next header and hand out its payload as a separate view.
    ///
    /// The enclosing reader is already positioned after the box when this
    /// returns, however much of the payload the caller ends up reading.
    pub(crate) fn next_box(&mut self) -> Result<Option<BMFFBox<'a, S>>> {
        let Some(head) = read_box_header(self.src)? else {
            return Ok(None);
        };
        let content = self.src.take_range(head.payload_len())?;
        Ok(Some(BMFFBox { head, content }))
    }
}

/// Parse the extra header fields for a full box.
pub(crate) fn read_fullbox_extra<T: ReadBytesExt>(src: &mut T) -> Result<(u8, u32)> {
    let version = src.read_u8()?;
    let flags_a = src.read_u8()?;
    let flags_b = src.read_u8()?;
    let flags_c = src.read_u8()?;
    Ok((
        version,
        u32::from(flags_a) << 16 | u32::from(flags_b) << 8 | u32::from(flags_c),
    ))
}

// Parse the extra fields for a full box whose flag fields must be zero.
pub(crate) fn read_fullbox_version_no_flags<T: ReadBytesExt>(src: &mut T, options: &ParseOptions) -> Result<u8> {
    let (version, flags) = read_fullbox_extra(src)?;

    if flags != 0 && !options.lenient {
        return Err(Error::Unsupported("expected flags to be 0"));
    }

    Ok(version)
}

/// Skip over the entire contents of a box.
pub(crate) fn skip_box_content<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>) {
    debug!("{:?} (skipped)", src.head);
    src.content.skip_to_end();
}

/// Skip over the remain data of a box.
pub(crate) fn skip_box_remain<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>) {
    let len = src.bytes_left();
    if len > 0 {
        debug!("remain {len} (skipped) in {:?}", src.head);
    }
    src.content.skip_to_end();
}

/// Fail if a box parser left payload bytes unread.
#[cfg_attr(debug_assertions, track_caller)]
pub(crate) fn check_parser_state<S: ByteSource + ?Sized>(src: &BMFFBox<'_, S>, options: &ParseOptions) -> Result<()> {
    let left = src.bytes_left();
    if left == 0 {
        Ok(())
    } else if options.lenient {
        debug!("ignoring {left} trailing bytes in {:?}", src.head);
        Ok(())
    } else {
        let name: FourCC = src.head.name.into();
        log::warn!("{left} unread bytes at the end of '{name}'");
        Err(Error::InvalidData("unread box content or bad parser sync"))
    }
}

/// Read a NUL-terminated string. A string cut off by the end of the box is
/// accepted as if it were terminated there.
pub(crate) fn read_c_string<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>) -> Result<TryString> {
    let mut string = TryVec::new();
    while src.bytes_left() > 0 {
        match src.read_u8()? {
            0 => return Ok(string),
            byte => string.push(byte)?,
        }
    }
    debug!("unterminated string in {:?}", src.head);
    Ok(string)
}

pub(crate) fn be_u16<T: ReadBytesExt>(src: &mut T) -> Result<u16> {
    src.read_u16::<BigEndian>().map_err(From::from)
}

pub(crate) fn be_u32<T: ReadBytesExt>(src: &mut T) -> Result<u32> {
    src.read_u32::<BigEndian>().map_err(From::from)
}

pub(crate) fn be_u64<T: ReadBytesExt>(src: &mut T) -> Result<u64> {
    src.read_u64::<BigEndian>().map_err(From::from)
}

#[test]
fn box_header_sizes() {
    let compact = BoxHeader::for_payload(BoxType::MediaDataBox, 100).unwrap();
    assert_eq!((compact.size(), compact.header_size()), (108, 8));
    assert!(!compact.is_large());

    let edge = BoxHeader::for_payload(BoxType::MediaDataBox, u64::from(u32::MAX) - 8).unwrap();
    assert!(!edge.is_large());
    assert_eq!(edge.size(), u64::from(u32::MAX));

    let large = BoxHeader::for_payload(BoxType::MediaDataBox, u64::from(u32::MAX) - 7).unwrap();
    assert!(large.is_large());
    assert_eq!(large.size(), u64::from(u32::MAX) + 9);
    assert_eq!(large.encoded_len(), 16);
    assert_eq!(compact.encoded_len(), 8);
}

#[cfg(test)]
impl BoxHeader {
    fn encoded_len(&self) -> u64 {
        let mut buf = std::vec::Vec::new();
        write_box_header(self, &mut buf).unwrap();
        crate::ToU64::to_u64(buf.len())
    }
}
