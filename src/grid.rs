// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use std::io::Write;

use crate::bmff::{be_u16, be_u32};
use crate::boxes::item_type;
use crate::meta::MetaContainer;
use crate::{DecodeConfig, Error, Result, ToUsize, TryVec};

/// Payload of a 'grid' item.
/// See ISO/IEC 23008-12:2017 § 6.6.2.3.2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageGridDescriptor {
    pub rows_minus_one: u8,
    pub columns_minus_one: u8,
    pub output_width: u32,
    pub output_height: u32,
}

impl ImageGridDescriptor {
    /// `flags` bit 0: output dimensions are 32-bit.
    const LARGE_FIELDS: u8 = 1;

    pub fn tile_rows(&self) -> u32 {
        u32::from(self.rows_minus_one) + 1
    }

    pub fn tile_columns(&self) -> u32 {
        u32::from(self.columns_minus_one) + 1
    }

    pub fn tile_count(&self) -> u32 {
        self.tile_rows() * self.tile_columns()
    }

    pub fn parse(mut data: &[u8]) -> Result<Self> {
        let src = &mut data;
        let version = src.read_u8()?;
        if version != 0 {
            return Err(Error::Unsupported("grid version > 0"));
        }
        let flags = src.read_u8()?;
        let rows_minus_one = src.read_u8()?;
        let columns_minus_one = src.read_u8()?;
        let (output_width, output_height) = if flags & Self::LARGE_FIELDS == 0 {
            (u32::from(be_u16(src)?), u32::from(be_u16(src)?))
        } else {
            (be_u32(src)?, be_u32(src)?)
        };
        if output_width == 0 || output_height == 0 {
            return Err(Error::InvalidData("grid output dimensions cannot be zero"));
        }
        Ok(Self { rows_minus_one, columns_minus_one, output_width, output_height })
    }

    /// Encode with 16-bit dimensions when both fit.
    pub fn write<W: Write>(&self, dest: &mut W) -> Result<()> {
        let small = u16::try_from(self.output_width).ok().zip(u16::try_from(self.output_height).ok());
        dest.write_u8(0)?;
        dest.write_u8(if small.is_some() { 0 } else { Self::LARGE_FIELDS })?;
        dest.write_u8(self.rows_minus_one)?;
        dest.write_u8(self.columns_minus_one)?;
        match small {
            Some((width, height)) => {
                dest.write_u16::<BigEndian>(width)?;
                dest.write_u16::<BigEndian>(height)?;
            },
            None => {
                dest.write_u32::<BigEndian>(self.output_width)?;
                dest.write_u32::<BigEndian>(self.output_height)?;
            },
        }
        Ok(())
    }
}

/// A validated grid: its descriptor plus the tiles that make it up.
#[derive(Debug, PartialEq)]
pub struct ImageGridInfo {
    /// Row-major, left to right, top to bottom.
    pub child_image_ids: TryVec<u32>,
    pub tile_columns: u32,
    pub tile_rows: u32,
    pub output_width: u32,
    pub output_height: u32,
}

/// Build the grid info for `item_id`, or `None` if it is not a grid item.
///
/// `descriptor_data` reads the item's own bytes; it is only called for grids.
pub(crate) fn resolve_grid(
    meta: &MetaContainer,
    item_id: u32,
    config: &DecodeConfig,
    descriptor_data: impl FnOnce() -> Result<ImageGridDescriptor>,
) -> Result<Option<ImageGridInfo>> {
    match meta.item_info(item_id) {
        Some(info) if info.item_type == item_type::IMAGE_GRID => (),
        _ => return Ok(None),
    }
    meta.check_essential_properties(item_id)?;

    let descriptor = descriptor_data()?;
    let expected = descriptor.tile_count();
    config.validate_grid_tiles(expected)?;

    let mut dimg = meta.references(item_id, crate::reference_type::DERIVED_IMAGE);
    let reference = dimg
        .next()
        .ok_or(Error::InvalidData("grid item has no dimg reference"))?;
    if dimg.next().is_some() {
        return Err(Error::InvalidData("grid item has more than one dimg reference"));
    }

    let children = reference.to_item_ids();
    let actual = u32::try_from(children.len())?;
    if actual != expected {
        return Err(Error::GridTileCountMismatch { expected, actual });
    }

    let mut child_image_ids = TryVec::with_capacity(expected.to_usize())?;
    child_image_ids.extend_from_slice(children)?;
    debug!(
        "grid {item_id}: {}x{} tiles, {}x{} output",
        descriptor.tile_columns(),
        descriptor.tile_rows(),
        descriptor.output_width,
        descriptor.output_height
    );

    Ok(Some(ImageGridInfo {
        child_image_ids,
        tile_columns: descriptor.tile_columns(),
        tile_rows: descriptor.tile_rows(),
        output_width: descriptor.output_width,
        output_height: descriptor.output_height,
    }))
}
