#![deny(unsafe_code)]
//! Parser and writer for the ISOBMFF-derived container used by AVIF images.
//!
//! The container is a tree of length-prefixed boxes. Its `meta` box describes
//! coded image *items*, where their bytes live (`iloc`), which properties apply
//! to them (`iprp`) and how they relate to each other (`iref`). This crate
//! resolves all of that into byte ranges and metadata; the AV1 bitstream itself
//! is handed to an external decoder through [`Av1Decoder`].
//!
//! ```no_run
//! use avif_container::AvifContainer;
//!
//! let bytes = std::fs::read("image.avif")?;
//! let container = AvifContainer::from_bytes(&bytes)?;
//! let primary = container.primary_image_data()?;
//! println!("{} bytes of AV1 data", primary.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! This crate is written entirely in safe Rust code.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use fallible_collections::TryReserveError;
use std::convert::TryInto as _;

mod bmff;
mod boxes;
mod codec;
mod grid;
mod item_data;
mod meta;
mod offset;
mod parser;
mod source;
mod tables;
mod transform;
pub mod writer;

#[cfg(test)]
mod tests;

pub use crate::bmff::{BoxHeader, write_box_header};
pub use crate::boxes::{BoxType, FourCC, brand, item_type, reference_type};
pub use crate::codec::{Av1Decoder, DecodeError, DecodedImage};
pub use crate::grid::{ImageGridDescriptor, ImageGridInfo};
pub use crate::item_data::{AvifItemData, BufferPool, BufferProvider, OwnedBuffers};
pub use crate::meta::MetaContainer;
pub use crate::offset::OffsetResolver;
pub use crate::parser::AvifContainer;
pub use crate::source::{ByteSource, StreamSource};
pub use crate::tables::{
    AV1Config, AuxiliaryTypeProperty, ColorInformation, ConstructionMethod, Extent, ImageSpatialExtents, ItemDataBox, ItemInfoEntry, ItemKind,
    ItemLocationEntry, ItemProperty, ItemReferenceEntry, Nclx, PropertyAssociation,
};
pub use crate::transform::{CleanAperture, CropRect, ImageTransforms, MirrorAxis, Rotation, Transform};

/// A trait to indicate a type can be infallibly converted to `u64`.
/// This should only be implemented for infallible conversions, so only unsigned types are valid.
trait ToU64 {
    fn to_u64(self) -> u64;
}

/// Statically verify that the platform `usize` can fit within a `u64`.
/// If the size won't fit on the given platform, this will fail at compile time, but if a type
/// which can fail `TryInto<usize>` is used, it may panic.
impl ToU64 for usize {
    fn to_u64(self) -> u64 {
        const _: () = assert!(std::mem::size_of::<usize>() <= std::mem::size_of::<u64>());
        self.try_into().ok().unwrap()
    }
}

/// A trait to indicate a type can be infallibly converted to `usize`.
/// This should only be implemented for infallible conversions, so only unsigned types are valid.
pub(crate) trait ToUsize {
    fn to_usize(self) -> usize;
}

/// Statically verify that the given type can fit within a `usize`.
/// If the size won't fit on the given platform, this will fail at compile time, but if a type
/// which can fail `TryInto<usize>` is used, it may panic.
macro_rules! impl_to_usize_from {
    ( $from_type:ty ) => {
        impl ToUsize for $from_type {
            fn to_usize(self) -> usize {
                const _: () = assert!(std::mem::size_of::<$from_type>() <= std::mem::size_of::<usize>());
                self.try_into().ok().unwrap()
            }
        }
    };
}

impl_to_usize_from!(u8);
impl_to_usize_from!(u16);
impl_to_usize_from!(u32);

#[doc(hidden)]
pub type TryVec<T> = fallible_collections::TryVec<T>;
type TryString = fallible_collections::TryVec<u8>;

// To ensure we don't use stdlib allocating types by accident
#[allow(dead_code)]
struct Vec;
#[allow(dead_code)]
struct Box;
#[allow(dead_code)]
struct HashMap;
#[allow(dead_code)]
struct String;

/// Describes parser failures.
///
/// Every variant is terminal for the call that produced it; nothing is retried.
#[derive(Debug)]
pub enum Error {
    /// Parse error caused by corrupt or malformed data.
    InvalidData(&'static str),
    /// Parse error caused by limited parser support rather than invalid data.
    Unsupported(&'static str),
    /// The `ftyp` box does not list an AVIF brand.
    UnsupportedFormat,
    /// Duplicate or missing top-level boxes, truncated headers, boxes overrunning their parent.
    MalformedContainer(&'static str),
    /// The `meta` box lacks one of `iinf`, `iloc` or `iprp`.
    MissingRequiredBox(&'static str),
    /// The item has an essential property association that cannot be interpreted.
    UnsupportedEssentialProperty(u32),
    /// An item location overflows or points outside of the file or `idat`.
    InvalidOffset(&'static str),
    /// The extents of an item disagree with its declared total size.
    ExtentSizeMismatch,
    /// The grid descriptor and the number of `dimg` children disagree.
    GridTileCountMismatch { expected: u32, actual: u32 },
    /// The item is not a coded AV1 image (or is an unsupported derived image).
    UnsupportedItemType(FourCC),
    /// Reflect `std::io::ErrorKind::UnexpectedEof` for short data.
    UnexpectedEOF,
    /// Propagate underlying errors from `std::io`.
    Io(std::io::Error),
    /// Out of memory
    OutOfMemory,
    /// Resource limit exceeded during parsing
    ResourceLimitExceeded(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::InvalidData(s)
            | Self::Unsupported(s)
            | Self::MalformedContainer(s)
            | Self::InvalidOffset(s)
            | Self::ResourceLimitExceeded(s) => s,
            Self::MissingRequiredBox(name) => return write!(f, "required '{name}' box is missing"),
            Self::UnsupportedFormat => "not an AVIF file (no 'avif' brand in ftyp)",
            Self::UnsupportedEssentialProperty(id) => {
                return write!(f, "item {id} has an unsupported essential property");
            },
            Self::ExtentSizeMismatch => "item extents do not add up to the item size",
            Self::GridTileCountMismatch { expected, actual } => {
                return write!(f, "grid expects {expected} tiles but references {actual}");
            },
            Self::UnsupportedItemType(t) => return write!(f, "unsupported item type '{t}'"),
            Self::UnexpectedEOF => "EOF",
            Self::Io(err) => return err.fmt(f),
            Self::OutOfMemory => "OOM",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {}

impl From<bitreader::BitReaderError> for Error {
    #[cold]
    #[cfg_attr(debug_assertions, track_caller)]
    fn from(err: bitreader::BitReaderError) -> Self {
        log::warn!("bitreader: {err}");
        debug_assert!(!matches!(err, bitreader::BitReaderError::TooManyBitsForType { .. })); // bug
        Self::InvalidData("truncated bits")
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::UnexpectedEOF,
            _ => Self::Io(err),
        }
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(_: std::num::TryFromIntError) -> Self {
        Self::Unsupported("integer conversion failed")
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        let kind = match err {
            Error::InvalidData(_) => std::io::ErrorKind::InvalidData,
            Error::UnexpectedEOF => std::io::ErrorKind::UnexpectedEof,
            Error::Io(io_err) => return io_err,
            _ => std::io::ErrorKind::Other,
        };
        Self::new(kind, err)
    }
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

/// Result shorthand using our Error enum.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Options passed down to the individual box parsers.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ParseOptions {
    /// When true, non-critical validation errors (like non-zero flags in boxes
    /// that expect zero flags) are ignored instead of returned.
    pub lenient: bool,
}

/// Configuration for parsing AVIF containers and reading item data.
///
/// # Examples
///
/// ```rust
/// use avif_container::DecodeConfig;
///
/// // Default limits (suitable for most apps)
/// let config = DecodeConfig::default();
///
/// // Strict limits for untrusted input
/// let config = DecodeConfig::default()
///     .with_max_item_size(16 * 1024 * 1024)
///     .with_max_grid_tiles(64);
///
/// // No limits
/// let config = DecodeConfig::unlimited();
/// ```
#[derive(Debug, Clone)]
pub struct DecodeConfig {
    /// Items smaller than this many bytes are read into pooled buffers,
    /// larger ones into buffers allocated for the item alone.
    /// Default: 64 KiB
    pub pooled_buffer_threshold: usize,

    /// Maximum size of a single item's data in bytes.
    /// Default: 256 MiB
    pub max_item_size: Option<u64>,

    /// Maximum number of grid tiles.
    /// Default: 1,000 tiles
    pub max_grid_tiles: Option<u32>,

    /// Enable lenient parsing mode.
    /// Default: false (strict validation)
    pub lenient: bool,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            pooled_buffer_threshold: 64 * 1024,
            max_item_size: Some(256 * 1024 * 1024),
            max_grid_tiles: Some(1_000),
            lenient: false,
        }
    }
}

impl DecodeConfig {
    /// Create a configuration with no resource limits.
    pub fn unlimited() -> Self {
        Self {
            max_item_size: None,
            max_grid_tiles: None,
            ..Self::default()
        }
    }

    /// Set the size below which item data goes into pooled buffers
    pub fn with_pooled_buffer_threshold(mut self, bytes: usize) -> Self {
        self.pooled_buffer_threshold = bytes;
        self
    }

    /// Set the maximum item size in bytes
    pub fn with_max_item_size(mut self, bytes: u64) -> Self {
        self.max_item_size = Some(bytes);
        self
    }

    /// Set the maximum grid tile count
    pub fn with_max_grid_tiles(mut self, tiles: u32) -> Self {
        self.max_grid_tiles = Some(tiles);
        self
    }

    /// Enable lenient parsing mode
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    pub(crate) fn parse_options(&self) -> ParseOptions {
        ParseOptions { lenient: self.lenient }
    }

    pub(crate) fn validate_item_size(&self, bytes: u64) -> Result<()> {
        if let Some(limit) = self.max_item_size {
            if bytes > limit {
                return Err(Error::ResourceLimitExceeded("item size limit exceeded"));
            }
        }
        Ok(())
    }

    pub(crate) fn validate_grid_tiles(&self, count: u32) -> Result<()> {
        if let Some(limit) = self.max_grid_tiles {
            if count > limit {
                return Err(Error::ResourceLimitExceeded("grid tile count limit exceeded"));
            }
        }
        Ok(())
    }
}
