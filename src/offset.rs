// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::tables::{ConstructionMethod, Extent, ItemDataBox};
use crate::{Error, Result};

/// Turns item extents into absolute, bounds-checked file offsets.
///
/// Pure: it only needs the file length and the location of 'idat', and never
/// touches the file itself.
#[derive(Debug, Clone, Copy)]
pub struct OffsetResolver {
    file_length: u64,
    idat: Option<ItemDataBox>,
}

impl OffsetResolver {
    pub fn new(file_length: u64, idat: Option<ItemDataBox>) -> Self {
        Self { file_length, idat }
    }

    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    /// Absolute file offset of the first byte of `extent`.
    ///
    /// The returned range `[offset, offset + extent.length)` is guaranteed to
    /// lie inside the file (and inside 'idat' for idat items).
    pub fn resolve(&self, base_offset: u64, method: ConstructionMethod, extent: &Extent) -> Result<u64> {
        let relative = base_offset
            .checked_add(extent.offset)
            .ok_or(Error::InvalidOffset("extent offset overflow"))?;

        let absolute = match method {
            ConstructionMethod::File => relative,
            ConstructionMethod::Idat => {
                let idat = self
                    .idat
                    .ok_or(Error::InvalidOffset("idat box missing but construction_method is idat"))?;
                let relative_end = relative
                    .checked_add(extent.length)
                    .ok_or(Error::InvalidOffset("idat extent overflow"))?;
                if relative_end > idat.length {
                    return Err(Error::InvalidOffset("idat extent out of bounds"));
                }
                idat.offset
                    .checked_add(relative)
                    .ok_or(Error::InvalidOffset("idat extent overflow"))?
            },
        };

        let end = absolute
            .checked_add(extent.length)
            .ok_or(Error::InvalidOffset("extent end overflow"))?;
        if end > self.file_length {
            return Err(Error::InvalidOffset("extent extends past the end of the file"));
        }
        if i64::try_from(absolute).is_err() {
            return Err(Error::InvalidOffset("extent offset is not seekable"));
        }
        Ok(absolute)
    }
}
