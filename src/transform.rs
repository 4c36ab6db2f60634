// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Display transforms attached to an image item.
//!
//! The container only reports them; applying them to pixels is up to the
//! caller, always as crop, then rotate, then mirror.

use crate::{Error, Result};

/// Anti-clockwise rotation from the 'irot' property.
/// See ISO/IEC 23008-12:2017 § 6.5.10
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    None,
    Ccw90,
    Ccw180,
    Ccw270,
}

impl Rotation {
    /// Decode the 2-bit `angle` field (multiples of 90°).
    pub(crate) fn from_angle_bits(angle: u8) -> Self {
        match angle & 0b11 {
            0 => Self::None,
            1 => Self::Ccw90,
            2 => Self::Ccw180,
            _ => Self::Ccw270,
        }
    }

    pub fn angle_bits(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Ccw90 => 1,
            Self::Ccw180 => 2,
            Self::Ccw270 => 3,
        }
    }

    pub fn degrees(self) -> u16 {
        u16::from(self.angle_bits()) * 90
    }
}

/// Axis from the 'imir' property.
/// See ISO/IEC 23008-12:2017 § 6.5.12
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorAxis {
    /// `axis` = 0: mirror about a vertical axis (left and right swap).
    Vertical,
    /// `axis` = 1: mirror about a horizontal axis (top and bottom swap).
    Horizontal,
}

/// The 'clap' property, kept as the stored fractions.
/// See ISO 14496-12:2015 § 12.1.4
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanAperture {
    pub width_n: u32,
    pub width_d: u32,
    pub height_n: u32,
    pub height_d: u32,
    pub horiz_off_n: i32,
    pub horiz_off_d: u32,
    pub vert_off_n: i32,
    pub vert_off_d: u32,
}

/// Integer crop rectangle in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CleanAperture {
    /// Crop rectangle for an image of `image_width` × `image_height`.
    ///
    /// Fails unless the aperture has integer size, lands on whole pixels and
    /// lies entirely inside the image.
    pub fn crop_rect(&self, image_width: u32, image_height: u32) -> Result<CropRect> {
        let (x, width) = Self::axis(self.width_n, self.width_d, self.horiz_off_n, self.horiz_off_d, image_width)?;
        let (y, height) = Self::axis(self.height_n, self.height_d, self.vert_off_n, self.vert_off_d, image_height)?;
        Ok(CropRect { x, y, width, height })
    }

    /// The aperture is centered at `(size - 1) / 2 + off`, so its first pixel
    /// is at `(size - clean) / 2 + off`.
    fn axis(clean_n: u32, clean_d: u32, off_n: i32, off_d: u32, size: u32) -> Result<(u32, u32)> {
        if clean_d == 0 || off_d == 0 {
            return Err(Error::InvalidData("clap denominator is zero"));
        }
        if clean_n % clean_d != 0 {
            return Err(Error::InvalidData("clap size is not an integer"));
        }
        let clean = clean_n / clean_d;
        if clean == 0 || clean > size {
            return Err(Error::InvalidData("clap size outside of the image"));
        }

        // start = ((size - clean) * off_d + 2 * off_n) / (2 * off_d)
        let off_d = i64::from(off_d);
        let numerator = i64::from(size - clean)
            .checked_mul(off_d)
            .and_then(|n| n.checked_add(i64::from(off_n).checked_mul(2)?))
            .ok_or(Error::InvalidData("clap offset overflow"))?;
        let denominator = off_d * 2;
        if numerator < 0 || numerator % denominator != 0 {
            return Err(Error::InvalidData("clap offset is not a whole pixel inside the image"));
        }
        let start = u32::try_from(numerator / denominator)?;
        if u64::from(start) + u64::from(clean) > u64::from(size) {
            return Err(Error::InvalidData("clap extends past the image"));
        }
        Ok((start, clean))
    }
}

/// One display operation, see [`ImageTransforms::operations`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Crop(CropRect),
    Rotate(Rotation),
    Mirror(MirrorAxis),
}

/// At most one crop, rotation and mirror associated with an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageTransforms {
    pub crop: Option<CropRect>,
    pub rotation: Option<Rotation>,
    pub mirror: Option<MirrorAxis>,
}

impl ImageTransforms {
    pub fn is_identity(&self) -> bool {
        self.crop.is_none() && matches!(self.rotation, None | Some(Rotation::None)) && self.mirror.is_none()
    }

    /// The present transforms in the order they must be applied: crop, rotate, mirror.
    pub fn operations(&self) -> impl Iterator<Item = Transform> + '_ {
        let crop = self.crop.map(Transform::Crop);
        let rotate = self.rotation.filter(|r| *r != Rotation::None).map(Transform::Rotate);
        let mirror = self.mirror.map(Transform::Mirror);
        crop.into_iter().chain(rotate).chain(mirror)
    }
}

#[test]
fn centered_clean_aperture() {
    let clap = CleanAperture {
        width_n: 100,
        width_d: 1,
        height_n: 50,
        height_d: 1,
        horiz_off_n: 0,
        horiz_off_d: 1,
        vert_off_n: -10,
        vert_off_d: 1,
    };
    let rect = clap.crop_rect(120, 80).unwrap();
    assert_eq!(rect, CropRect { x: 10, y: 5, width: 100, height: 50 });

    // Half-pixel start
    assert!(clap.crop_rect(121, 80).is_err());
    // Larger than the image
    assert!(clap.crop_rect(90, 80).is_err());
}
