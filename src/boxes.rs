// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

/// A four-character code identifying a box, item or reference type.
#[derive(Default, PartialEq, Eq, Clone, Copy, Hash)]
pub struct FourCC {
    pub value: [u8; 4],
}

impl FourCC {
    pub const fn new(value: &[u8; 4]) -> Self {
        Self { value: *value }
    }
}

impl From<u32> for FourCC {
    fn from(number: u32) -> Self {
        Self { value: number.to_be_bytes() }
    }
}

impl From<FourCC> for u32 {
    fn from(fourcc: FourCC) -> Self {
        Self::from_be_bytes(fourcc.value)
    }
}

impl From<BoxType> for FourCC {
    fn from(t: BoxType) -> Self {
        let boxtype_val: u32 = t.into();
        From::from(boxtype_val)
    }
}

impl From<[u8; 4]> for FourCC {
    fn from(value: [u8; 4]) -> Self {
        Self { value }
    }
}

impl From<&[u8; 4]> for FourCC {
    fn from(value: &[u8; 4]) -> Self {
        Self { value: *value }
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.value) {
            Ok(s) => f.write_str(s),
            Err(_) => self.value.fmt(f),
        }
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(std::str::from_utf8(&self.value).unwrap_or("null"))
    }
}

impl PartialEq<&[u8; 4]> for FourCC {
    fn eq(&self, other: &&[u8; 4]) -> bool {
        self.value.eq(*other)
    }
}

impl PartialEq<BoxType> for FourCC {
    fn eq(&self, other: &BoxType) -> bool {
        u32::from(*self) == u32::from(*other)
    }
}

macro_rules! box_database {
    ($($(#[$attr:meta])* $boxenum:ident $boxtype:expr),*,) => {
        /// Box types known to the parser.
        ///
        /// Anything else is carried as `UnknownBox` and skipped by callers.
        #[derive(Clone, Copy, PartialEq, Eq)]
        pub enum BoxType {
            $($(#[$attr])* $boxenum),*,
            UnknownBox(u32),
        }

        impl From<u32> for BoxType {
            fn from(t: u32) -> BoxType {
                use self::BoxType::*;
                match t {
                    $($boxtype => $boxenum),*,
                    _ => UnknownBox(t),
                }
            }
        }

        impl From<BoxType> for u32 {
            fn from(b: BoxType) -> u32 {
                use self::BoxType::*;
                match b {
                    $($boxenum => $boxtype),*,
                    UnknownBox(t) => t,
                }
            }
        }

        impl fmt::Debug for BoxType {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let fourcc: FourCC = From::from(*self);
                fourcc.fmt(f)
            }
        }
    }
}

box_database!(
    FileTypeBox                       0x6674_7970, // "ftyp"
    MediaDataBox                      0x6d64_6174, // "mdat"
    MetadataBox                       0x6d65_7461, // "meta"
    HandlerBox                        0x6864_6c72, // "hdlr"
    PrimaryItemBox                    0x7069_746d, // "pitm"
    ItemLocationBox                   0x696c_6f63, // "iloc"
    ItemInfoBox                       0x6969_6e66, // "iinf"
    ItemInfoEntry                     0x696e_6665, // "infe"
    ItemReferenceBox                  0x6972_6566, // "iref"
    ItemPropertiesBox                 0x6970_7270, // "iprp"
    ItemPropertyContainerBox          0x6970_636f, // "ipco"
    ItemPropertyAssociationBox        0x6970_6d61, // "ipma"
    ItemDataBox                       0x6964_6174, // "idat"
    ImageSpatialExtentsProperty       0x6973_7065, // "ispe"
    PixelInformationProperty          0x7069_7869, // "pixi"
    AuxiliaryTypeProperty             0x6175_7843, // "auxC"
    AV1CodecConfigurationProperty     0x6176_3143, // "av1C"
    ColorInformationProperty          0x636f_6c72, // "colr"
    CleanApertureProperty             0x636c_6170, // "clap"
    ImageRotationProperty             0x6972_6f74, // "irot"
    ImageMirrorProperty               0x696d_6972, // "imir"
    FreeSpaceBox                      0x6672_6565, // "free"
    SkipBox                           0x736b_6970, // "skip"
    UuidBox                           0x7575_6964, // "uuid"
);

/// Item types (`infe.item_type`).
pub mod item_type {
    use super::FourCC;

    pub const AV1_IMAGE: FourCC = FourCC::new(b"av01");
    pub const IMAGE_GRID: FourCC = FourCC::new(b"grid");
    pub const EXIF: FourCC = FourCC::new(b"Exif");
    pub const MIME: FourCC = FourCC::new(b"mime");
    pub const URI: FourCC = FourCC::new(b"uri ");
}

/// Reference types (`iref` child box types).
pub mod reference_type {
    use super::FourCC;

    /// Derived image. The `from` item is the derived (parent) item.
    pub const DERIVED_IMAGE: FourCC = FourCC::new(b"dimg");
    pub const AUXILIARY: FourCC = FourCC::new(b"auxl");
    pub const CONTENT_DESCRIBES: FourCC = FourCC::new(b"cdsc");
    pub const PREMULTIPLIED: FourCC = FourCC::new(b"prem");
}

/// File type brands.
pub mod brand {
    use super::FourCC;

    pub const AVIF: FourCC = FourCC::new(b"avif");
    pub const AVIS: FourCC = FourCC::new(b"avis");
    pub const MIF1: FourCC = FourCC::new(b"mif1");
    pub const MIAF: FourCC = FourCC::new(b"miaf");
}

#[test]
fn fourcc_round_trips_box_type() {
    let fourcc = FourCC::from(BoxType::ItemLocationBox);
    assert_eq!(fourcc, b"iloc");
    assert_eq!(BoxType::from(u32::from(fourcc)), BoxType::ItemLocationBox);
    assert_eq!(format!("{:?}", BoxType::from(0x7465_7374)), "test");
}
