// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed decodings of the boxes found inside `meta`.
//!
//! Each reader consumes exactly one box and can be used on its own; putting the
//! tables together is the job of [`crate::meta`].

use arrayvec::ArrayVec;
use bitreader::BitReader;
use byteorder::ReadBytesExt;
use log::{debug, warn};
use std::io::Read;

use crate::bmff::{
    BMFFBox, be_u16, be_u32, check_parser_state, read_c_string, read_fullbox_extra,
    read_fullbox_version_no_flags, skip_box_content, skip_box_remain,
};
use crate::boxes::{BoxType, FourCC, brand, item_type};
use crate::source::ByteSource;
use crate::transform::{CleanAperture, MirrorAxis, Rotation};
use crate::{Error, ParseOptions, Result, ToUsize, TryString, TryVec};

/// File type box 'ftyp'.
#[derive(Debug)]
pub(crate) struct FileTypeBox {
    pub(crate) major_brand: FourCC,
    #[allow(unused)]
    pub(crate) minor_version: u32,
    pub(crate) compatible_brands: TryVec<FourCC>,
}

impl FileTypeBox {
    /// Either the major brand or one of the compatible brands is 'avif'.
    pub(crate) fn is_avif(&self) -> bool {
        self.major_brand == brand::AVIF || self.compatible_brands.iter().any(|b| *b == brand::AVIF)
    }
}

/// Parse an ftyp box.
/// See ISO 14496-12:2015 § 4.3
pub(crate) fn read_ftyp<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>) -> Result<FileTypeBox> {
    let major = be_u32(src)?;
    let minor = be_u32(src)?;
    let bytes_left = src.bytes_left();
    if bytes_left % 4 != 0 {
        return Err(Error::InvalidData("invalid ftyp size"));
    }
    let brand_count = bytes_left / 4;
    let mut brands = TryVec::with_capacity(brand_count.try_into()?)?;
    for _ in 0..brand_count {
        brands.push(be_u32(src)?.into())?;
    }
    Ok(FileTypeBox {
        major_brand: From::from(major),
        minor_version: minor,
        compatible_brands: brands,
    })
}

/// Parse a handler box and return its handler type.
/// See ISO 14496-12:2015 § 8.4.3
pub(crate) fn read_hdlr<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>, options: &ParseOptions) -> Result<FourCC> {
    let version = read_fullbox_version_no_flags(src, options)?;
    if version != 0 {
        return Err(Error::Unsupported("hdlr version"));
    }
    let _pre_defined = be_u32(src)?;
    let handler_type = FourCC::from(be_u32(src)?);
    for _ in 0..3 {
        let _reserved = be_u32(src)?;
    }
    // Name is free-form, and not always NUL-terminated
    skip_box_remain(src);
    Ok(handler_type)
}

/// What an item is, decided once from its `item_type` when `infe` is read.
#[derive(Debug, PartialEq)]
pub enum ItemKind {
    /// Coded AV1 image (`av01`).
    Av1Image,
    /// Derived image grid (`grid`).
    ImageGrid,
    /// Exif metadata blob (`Exif`).
    Exif,
    /// MIME-typed blob, e.g. XMP as `application/rdf+xml`.
    Mime { content_type: TryString, content_encoding: TryString },
    /// URI-typed item.
    Uri { uri_type: TryString },
    /// Anything else; its `item_type` is kept on the entry.
    Other,
}

/// Used for 'infe' boxes within 'iinf' boxes
/// See ISO 14496-12:2015 § 8.11.6
/// Only versions {2, 3} are supported
#[derive(Debug)]
pub struct ItemInfoEntry {
    pub(crate) item_id: u32,
    pub(crate) item_type: FourCC,
    pub(crate) item_name: TryString,
    pub(crate) kind: ItemKind,
    pub(crate) hidden: bool,
}

impl ItemInfoEntry {
    pub fn item_id(&self) -> u32 {
        self.item_id
    }

    pub fn item_type(&self) -> FourCC {
        self.item_type
    }

    pub fn kind(&self) -> &ItemKind {
        &self.kind
    }

    /// The item name, if it is valid UTF-8 and not empty.
    pub fn name(&self) -> Option<&str> {
        std::str::from_utf8(&self.item_name).ok().filter(|s| !s.is_empty())
    }

    /// MIME content type for `mime` items.
    pub fn content_type(&self) -> Option<&str> {
        match &self.kind {
            ItemKind::Mime { content_type, .. } => std::str::from_utf8(content_type).ok(),
            _ => None,
        }
    }

    /// Hidden items are not meant to be displayed on their own.
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }
}

/// Parse an Item Information Box
/// See ISO 14496-12:2015 § 8.11.6
pub(crate) fn read_iinf<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>, options: &ParseOptions) -> Result<TryVec<ItemInfoEntry>> {
    let version = read_fullbox_version_no_flags(src, options)?;

    match version {
        0 | 1 => (),
        _ => return Err(Error::Unsupported("unsupported iinf version")),
    }

    let entry_count = if version == 0 {
        be_u16(src)?.to_usize()
    } else {
        be_u32(src)?.to_usize()
    };
    // Don't trust the count for preallocation; each entry is at least 12 bytes
    let plausible = usize::try_from(src.bytes_left() / 12)?;
    let mut item_infos = TryVec::with_capacity(entry_count.min(plausible))?;

    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        if b.head.name != BoxType::ItemInfoEntry {
            return Err(Error::InvalidData("iinf box should contain only infe boxes"));
        }

        let entry = read_infe(&mut b)?;
        if item_infos.iter().any(|e: &ItemInfoEntry| e.item_id == entry.item_id) {
            return Err(Error::InvalidData("duplicate item_ID in iinf"));
        }
        item_infos.push(entry)?;
    }

    if item_infos.len() != entry_count {
        warn!("iinf declares {entry_count} entries but contains {}", item_infos.len());
        if !options.lenient {
            return Err(Error::InvalidData("iinf entry_count does not match its infe boxes"));
        }
    }

    Ok(item_infos)
}

/// Parse an Item Info Entry
/// See ISO 14496-12:2015 § 8.11.6.2
fn read_infe<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>) -> Result<ItemInfoEntry> {
    // According to the standard, it seems the flags field should be 0, but
    // at least one sample AVIF image has a nonzero value.
    let (version, flags) = read_fullbox_extra(src)?;

    // mif1 brand (see ISO 23008-12:2017 § 10.2.1) only requires v2 and 3
    let item_id = match version {
        2 => be_u16(src)?.into(),
        3 => be_u32(src)?,
        _ => return Err(Error::Unsupported("unsupported version in 'infe' box")),
    };

    let item_protection_index = be_u16(src)?;

    if item_protection_index != 0 {
        return Err(Error::Unsupported("protected items (infe.item_protection_index != 0) are not supported"));
    }

    let item_type = FourCC::from(be_u32(src)?);
    let item_name = read_c_string(src)?;
    debug!("infe item_id {item_id} item_type: {item_type}");

    let kind = if item_type == item_type::AV1_IMAGE {
        ItemKind::Av1Image
    } else if item_type == item_type::IMAGE_GRID {
        ItemKind::ImageGrid
    } else if item_type == item_type::EXIF {
        ItemKind::Exif
    } else if item_type == item_type::MIME {
        let content_type = read_c_string(src)?;
        let content_encoding = if src.bytes_left() > 0 { read_c_string(src)? } else { TryVec::new() };
        ItemKind::Mime { content_type, content_encoding }
    } else if item_type == item_type::URI {
        ItemKind::Uri { uri_type: read_c_string(src)? }
    } else {
        ItemKind::Other
    };

    // There are no more fields we are interested in
    skip_box_remain(src);

    Ok(ItemInfoEntry {
        item_id,
        item_type,
        item_name,
        kind,
        hidden: flags & 1 == 1,
    })
}

/// Potential sizes (in bytes) of variable-sized fields of the 'iloc' box
/// See ISO 14496-12:2015 § 8.11.3
#[derive(Debug)]
enum IlocFieldSize {
    Zero,
    Four,
    Eight,
}

impl IlocFieldSize {
    const fn to_bits(&self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::Four => 32,
            Self::Eight => 64,
        }
    }
}

impl TryFrom<u8> for IlocFieldSize {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Zero),
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            _ => Err(Error::InvalidData("value must be in the set {0, 4, 8}")),
        }
    }
}

#[derive(PartialEq)]
enum IlocVersion {
    Zero,
    One,
    Two,
}

impl TryFrom<u8> for IlocVersion {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Zero),
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            _ => Err(Error::Unsupported("unsupported version in 'iloc' box")),
        }
    }
}

/// Where an item's extents are counted from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstructionMethod {
    /// Offsets are absolute file positions (`construction_method` 0).
    File,
    /// Offsets are relative to the payload of the `idat` box (`construction_method` 1).
    Idat,
}

/// One contiguous piece of an item, relative to the item's base offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Extent {
    pub offset: u64,
    pub length: u64,
}

/// Used for 'iloc' boxes
/// See ISO 14496-12:2015 § 8.11.3
/// `data_reference_index` is omitted, since only 0 (i.e., this file) is supported
#[derive(Debug)]
pub struct ItemLocationEntry {
    pub(crate) item_id: u32,
    pub(crate) construction_method: ConstructionMethod,
    pub(crate) base_offset: u64,
    /// In stored order, which is also the order the bytes are concatenated in.
    pub(crate) extents: TryVec<Extent>,
}

impl ItemLocationEntry {
    pub fn item_id(&self) -> u32 {
        self.item_id
    }

    pub fn construction_method(&self) -> ConstructionMethod {
        self.construction_method
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    /// Sum of all extent lengths.
    pub fn total_size(&self) -> Result<u64> {
        self.extents.iter().try_fold(0u64, |total, extent| {
            total
                .checked_add(extent.length)
                .ok_or(Error::InvalidOffset("item size overflow"))
        })
    }
}

/// Parse an item location box inside a meta box
/// See ISO 14496-12:2015 § 8.11.3
pub(crate) fn read_iloc<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>, options: &ParseOptions) -> Result<TryVec<ItemLocationEntry>> {
    let version: IlocVersion = read_fullbox_version_no_flags(src, options)?.try_into()?;

    let iloc = src.read_into_try_vec()?;
    let mut iloc = BitReader::new(&iloc);

    let offset_size: IlocFieldSize = iloc.read_u8(4)?.try_into()?;
    let length_size: IlocFieldSize = iloc.read_u8(4)?.try_into()?;
    let base_offset_size: IlocFieldSize = iloc.read_u8(4)?.try_into()?;

    let index_size: Option<IlocFieldSize> = match version {
        IlocVersion::One | IlocVersion::Two => Some(iloc.read_u8(4)?.try_into()?),
        IlocVersion::Zero => {
            let _reserved = iloc.read_u8(4)?;
            None
        },
    };

    let item_count = match version {
        IlocVersion::Zero | IlocVersion::One => iloc.read_u32(16)?,
        IlocVersion::Two => iloc.read_u32(32)?,
    };

    // Every item takes at least 6 bytes, so a huge count can't be real
    let plausible = usize::try_from(iloc.remaining() / 48)?;
    let mut items = TryVec::with_capacity(item_count.to_usize().min(plausible))?;

    for _ in 0..item_count {
        let item_id = match version {
            IlocVersion::Zero | IlocVersion::One => iloc.read_u32(16)?,
            IlocVersion::Two => iloc.read_u32(32)?,
        };

        // Version 0 has no `construction_method` field; "version 0 of this box
        // should be used in preference to version 1 with construction_method==0",
        // so it is interpreted as using file offsets.
        let construction_method = match version {
            IlocVersion::Zero => ConstructionMethod::File,
            IlocVersion::One | IlocVersion::Two => {
                let _reserved = iloc.read_u16(12)?;
                match iloc.read_u16(4)? {
                    0 => ConstructionMethod::File,
                    1 => ConstructionMethod::Idat,
                    2 => return Err(Error::Unsupported("construction_method 'item_offset' is not supported")),
                    _ => return Err(Error::InvalidData("construction_method is taken from the set 0, 1 or 2 per ISO 14496-12:2015 § 8.11.3.3")),
                }
            },
        };

        let data_reference_index = iloc.read_u16(16)?;

        if data_reference_index != 0 {
            return Err(Error::Unsupported("external file references (iloc.data_reference_index != 0) are not supported"));
        }

        let base_offset = iloc.read_u64(base_offset_size.to_bits())?;
        let extent_count = iloc.read_u16(16)?;

        if extent_count < 1 {
            return Err(Error::InvalidData("extent_count must have a value 1 or greater per ISO 14496-12:2015 § 8.11.3.3"));
        }

        let mut extents = TryVec::with_capacity(extent_count.to_usize())?;

        for _ in 0..extent_count {
            // Only meaningful for construction_method 2, which is rejected above
            if let Some(index_size) = &index_size {
                let _extent_index = iloc.read_u64(index_size.to_bits())?;
            }

            // A zero-sized offset field implies offset 0; this follows from
            // BitReader::read_u64(0) -> 0.
            let offset = iloc.read_u64(offset_size.to_bits())?;
            let length = iloc.read_u64(length_size.to_bits())?;

            extents.push(Extent { offset, length })?;
        }

        if items.iter().any(|e: &ItemLocationEntry| e.item_id == item_id) {
            return Err(Error::InvalidData("duplicate item_ID in iloc"));
        }
        items.push(ItemLocationEntry { item_id, construction_method, base_offset, extents })?;
    }

    if iloc.remaining() == 0 {
        Ok(items)
    } else {
        Err(Error::InvalidData("invalid iloc size"))
    }
}

/// Parse a Primary Item Box
/// See ISO 14496-12:2015 § 8.11.4
pub(crate) fn read_pitm<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>, options: &ParseOptions) -> Result<u32> {
    let version = read_fullbox_version_no_flags(src, options)?;

    let item_id = match version {
        0 => be_u16(src)?.into(),
        1 => be_u32(src)?,
        _ => return Err(Error::Unsupported("unsupported pitm version")),
    };

    Ok(item_id)
}

/// One reference box inside 'iref': a typed link from one item to an ordered list of items.
/// See ISO 14496-12:2015 § 8.11.12
#[derive(Debug)]
pub struct ItemReferenceEntry {
    pub(crate) reference_type: FourCC,
    pub(crate) from_item_id: u32,
    /// Stored order. For `dimg` this is the tile order of a grid.
    pub(crate) to_item_ids: TryVec<u32>,
}

impl ItemReferenceEntry {
    pub fn reference_type(&self) -> FourCC {
        self.reference_type
    }

    pub fn from_item_id(&self) -> u32 {
        self.from_item_id
    }

    pub fn to_item_ids(&self) -> &[u32] {
        &self.to_item_ids
    }
}

pub(crate) fn read_iref<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>, options: &ParseOptions) -> Result<TryVec<ItemReferenceEntry>> {
    let mut item_references = TryVec::new();
    let version = read_fullbox_version_no_flags(src, options)?;
    if version > 1 {
        return Err(Error::Unsupported("iref version"));
    }

    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        let from_item_id = if version == 0 {
            be_u16(&mut b)?.into()
        } else {
            be_u32(&mut b)?
        };
        let reference_count = be_u16(&mut b)?;
        let mut to_item_ids = TryVec::with_capacity(reference_count.to_usize())?;
        for _ in 0..reference_count {
            let to_item_id = if version == 0 {
                be_u16(&mut b)?.into()
            } else {
                be_u32(&mut b)?
            };
            if from_item_id == to_item_id {
                return Err(Error::InvalidData("from_item_id and to_item_id must be different"));
            }
            to_item_ids.push(to_item_id)?;
        }
        check_parser_state(&b, options)?;
        item_references.push(ItemReferenceEntry {
            reference_type: b.head.name.into(),
            from_item_id,
            to_item_ids,
        })?;
    }
    Ok(item_references)
}

/// Location of the 'idat' payload within the file.
/// See ISO 14496-12:2015 § 8.11.11
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemDataBox {
    /// Absolute file offset of the first payload byte.
    pub offset: u64,
    pub length: u64,
}

/// Image spatial extents (dimensions)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSpatialExtents {
    pub width: u32,
    pub height: u32,
}

/// The decoded 'av1C' property.
/// See AV1 Codec ISO Media File Format Binding § 2.3
#[derive(Debug, PartialEq)]
pub struct AV1Config {
    pub seq_profile: u8,
    pub seq_level_idx_0: u8,
    pub seq_tier_0: u8,
    pub high_bitdepth: bool,
    pub twelve_bit: bool,
    pub monochrome: bool,
    pub chroma_subsampling_x: u8,
    pub chroma_subsampling_y: u8,
    pub chroma_sample_position: u8,
    /// Always absent for still images.
    pub initial_presentation_delay_minus_one: Option<u8>,
    pub config_obus: TryVec<u8>,
}

impl AV1Config {
    /// `marker` (1) and `version` (1) packed into the first byte.
    pub const MARKER_AND_VERSION: u8 = 0x81;

    /// 8, 10, or 12
    pub fn bit_depth(&self) -> u8 {
        match (self.high_bitdepth, self.twelve_bit) {
            (true, true) => 12,
            (true, false) => 10,
            _ => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nclx {
    pub color_primaries: u16,
    pub transfer_characteristics: u16,
    pub matrix_coefficients: u16,
    pub full_range: bool,
}

/// The decoded 'colr' property.
#[derive(Debug, PartialEq)]
pub enum ColorInformation {
    Nclx(Nclx),
    /// Raw ICC profile bytes ('rICC' or 'prof').
    Icc(TryVec<u8>),
}

#[derive(Debug, PartialEq)]
pub struct AuxiliaryTypeProperty {
    aux_data: TryString,
}

impl AuxiliaryTypeProperty {
    /// URN identifying an alpha plane.
    pub const ALPHA_URN: &'static str = "urn:mpeg:mpegB:cicp:systems:auxiliary:alpha";

    /// Property for `aux_type`, with no subtype.
    pub fn new(aux_type: &str) -> Result<Self> {
        let mut aux_data = TryVec::with_capacity(aux_type.len() + 1)?;
        aux_data.extend_from_slice(aux_type.as_bytes())?;
        aux_data.push(0)?;
        Ok(Self { aux_data })
    }

    /// Raw payload: NUL-terminated type followed by the subtype.
    pub fn aux_data(&self) -> &[u8] {
        &self.aux_data
    }

    /// The auxiliary type URN and the (possibly empty) subtype bytes after it.
    #[must_use]
    pub fn type_subtype(&self) -> (&[u8], &[u8]) {
        let split = self.aux_data.iter().position(|&b| b == b'\0')
            .map(|pos| self.aux_data.split_at(pos));
        if let Some((aux_type, rest)) = split {
            (aux_type, &rest[1..])
        } else {
            (&self.aux_data, &[])
        }
    }

    pub(crate) fn is_alpha(&self) -> bool {
        matches!(
            self.type_subtype().0,
            b"urn:mpeg:mpegB:cicp:systems:auxiliary:alpha" | b"urn:mpeg:hevc:2015:auxid:1"
        )
    }
}

impl AV1Config {
    /// A still-image configuration with no config OBUs.
    pub fn new(seq_profile: u8, seq_level_idx_0: u8, bit_depth: u8, monochrome: bool, chroma_subsampling: (u8, u8)) -> Self {
        Self {
            seq_profile,
            seq_level_idx_0,
            seq_tier_0: 0,
            high_bitdepth: bit_depth > 8,
            twelve_bit: bit_depth == 12,
            monochrome,
            chroma_subsampling_x: chroma_subsampling.0,
            chroma_subsampling_y: chroma_subsampling.1,
            chroma_sample_position: 0,
            initial_presentation_delay_minus_one: None,
            config_obus: TryVec::new(),
        }
    }
}

/// An entry of 'ipco'.
///
/// Unrecognized boxes are kept as `Unknown` so that 'ipma' indices keep lining up.
#[derive(Debug, PartialEq)]
pub enum ItemProperty {
    ImageSpatialExtents(ImageSpatialExtents),
    PixelInformation(ArrayVec<u8, 16>),
    AuxiliaryType(AuxiliaryTypeProperty),
    AV1Config(AV1Config),
    ColorInformation(ColorInformation),
    CleanAperture(CleanAperture),
    Rotation(Rotation),
    Mirror(MirrorAxis),
    Unknown(FourCC),
}

impl ItemProperty {
    pub fn box_type(&self) -> BoxType {
        match self {
            Self::ImageSpatialExtents(_) => BoxType::ImageSpatialExtentsProperty,
            Self::PixelInformation(_) => BoxType::PixelInformationProperty,
            Self::AuxiliaryType(_) => BoxType::AuxiliaryTypeProperty,
            Self::AV1Config(_) => BoxType::AV1CodecConfigurationProperty,
            Self::ColorInformation(_) => BoxType::ColorInformationProperty,
            Self::CleanAperture(_) => BoxType::CleanApertureProperty,
            Self::Rotation(_) => BoxType::ImageRotationProperty,
            Self::Mirror(_) => BoxType::ImageMirrorProperty,
            Self::Unknown(fourcc) => BoxType::from(u32::from(*fourcc)),
        }
    }

    /// Whether this crate understands the property well enough to honor it
    /// when it is marked essential.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

/// One entry of an item's 'ipma' association list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyAssociation {
    /// 1-based index into 'ipco'; 0 means "no property".
    pub property_index: u32,
    pub essential: bool,
}

/// All associations of one item, in stored order.
#[derive(Debug)]
pub(crate) struct ItemPropertyAssociation {
    pub(crate) item_id: u32,
    pub(crate) associations: TryVec<PropertyAssociation>,
}

#[derive(Debug)]
pub(crate) struct ItemPropertiesTable {
    pub(crate) properties: TryVec<ItemProperty>,
    pub(crate) associations: TryVec<ItemPropertyAssociation>,
}

pub(crate) fn read_iprp<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>, options: &ParseOptions) -> Result<ItemPropertiesTable> {
    let mut iter = src.box_iter();
    let mut properties = None;
    let mut associations: TryVec<ItemPropertyAssociation> = TryVec::new();

    while let Some(mut b) = iter.next_box()? {
        match b.head.name {
            BoxType::ItemPropertyContainerBox => {
                if properties.is_some() {
                    return Err(Error::InvalidData("There should be exactly one ipco box per ISO 23008-12:2017 § 9.3.1"));
                }
                properties = Some(read_ipco(&mut b, options)?);
            },
            BoxType::ItemPropertyAssociationBox => {
                for entry in read_ipma(&mut b, options)? {
                    if associations.iter().any(|a| a.item_id == entry.item_id) {
                        return Err(Error::InvalidData("item appears in more than one ipma entry"));
                    }
                    associations.push(entry)?;
                }
            },
            _ => return Err(Error::InvalidData("unexpected iprp child")),
        }
    }

    Ok(ItemPropertiesTable {
        properties: properties.ok_or(Error::InvalidData("iprp has no ipco box"))?,
        associations,
    })
}

fn read_ipma<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>, options: &ParseOptions) -> Result<TryVec<ItemPropertyAssociation>> {
    let (version, flags) = read_fullbox_extra(src)?;

    let entry_count = be_u32(src)?;
    let plausible = usize::try_from(src.bytes_left() / 3)?;
    let mut entries = TryVec::with_capacity(entry_count.to_usize().min(plausible))?;

    for _ in 0..entry_count {
        let item_id = if version == 0 {
            be_u16(src)?.into()
        } else {
            be_u32(src)?
        };
        let association_count = src.read_u8()?;
        let mut associations = TryVec::with_capacity(association_count.to_usize())?;
        for _ in 0..association_count {
            let num_association_bytes = if flags & 1 == 1 { 2 } else { 1 };
            let association = &mut [0; 2][..num_association_bytes];
            src.read_exact(association)?;
            let mut association = BitReader::new(association);
            let essential = association.read_bool()?;
            let property_index = association.read_u32(association.remaining().try_into()?)?;
            associations.push(PropertyAssociation { property_index, essential })?;
        }
        entries.push(ItemPropertyAssociation { item_id, associations })?;
    }
    check_parser_state(src, options)?;
    Ok(entries)
}

fn read_ipco<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>, options: &ParseOptions) -> Result<TryVec<ItemProperty>> {
    let mut properties = TryVec::new();

    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        // Must push for every property to have correct index for them
        let prop = match b.head.name {
            BoxType::ImageSpatialExtentsProperty => ItemProperty::ImageSpatialExtents(read_ispe(&mut b, options)?),
            BoxType::PixelInformationProperty => ItemProperty::PixelInformation(read_pixi(&mut b, options)?),
            BoxType::AuxiliaryTypeProperty => ItemProperty::AuxiliaryType(read_auxc(&mut b, options)?),
            BoxType::AV1CodecConfigurationProperty => ItemProperty::AV1Config(read_av1c(&mut b)?),
            BoxType::ColorInformationProperty => read_colr(&mut b, options)?,
            BoxType::CleanApertureProperty => ItemProperty::CleanAperture(read_clap(&mut b)?),
            BoxType::ImageRotationProperty => ItemProperty::Rotation(read_irot(&mut b, options)?),
            BoxType::ImageMirrorProperty => ItemProperty::Mirror(read_imir(&mut b)?),
            name => {
                skip_box_content(&mut b);
                ItemProperty::Unknown(name.into())
            },
        };
        check_parser_state(&b, options)?;
        properties.push(prop)?;
    }
    Ok(properties)
}

/// Parse an Image Spatial Extents property box
/// See ISO/IEC 23008-12:2017 § 6.5.3
fn read_ispe<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>, options: &ParseOptions) -> Result<ImageSpatialExtents> {
    let _version = read_fullbox_version_no_flags(src, options)?;
    // Version is always 0 for ispe

    let width = be_u32(src)?;
    let height = be_u32(src)?;

    // Validate dimensions are non-zero (0×0 images are invalid)
    if width == 0 || height == 0 {
        return Err(Error::InvalidData("ispe dimensions cannot be zero"));
    }

    Ok(ImageSpatialExtents { width, height })
}

fn read_pixi<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>, options: &ParseOptions) -> Result<ArrayVec<u8, 16>> {
    let version = read_fullbox_version_no_flags(src, options)?;
    if version != 0 {
        return Err(Error::Unsupported("pixi version"));
    }

    let num_channels = usize::from(src.read_u8()?);
    if num_channels > 16 {
        return Err(Error::InvalidData("invalid num_channels"));
    }
    let mut channels = ArrayVec::new();
    channels.extend((0..num_channels).map(|_| 0));
    src.read_exact(&mut channels).map_err(|_| Error::InvalidData("invalid num_channels"))?;

    // In lenient mode, skip any extra bytes (some encoders write extended pixi)
    if options.lenient {
        skip_box_remain(src);
    }

    Ok(channels)
}

fn read_auxc<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>, options: &ParseOptions) -> Result<AuxiliaryTypeProperty> {
    let version = read_fullbox_version_no_flags(src, options)?;
    if version != 0 {
        return Err(Error::Unsupported("auxC version"));
    }

    let aux_data = src.read_into_try_vec()?;

    Ok(AuxiliaryTypeProperty { aux_data })
}

/// Parse an AV1 Codec Configuration property
fn read_av1c<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>) -> Result<AV1Config> {
    let mut header = [0u8; 4];
    src.read_exact(&mut header)?;
    if header[0] != AV1Config::MARKER_AND_VERSION {
        return Err(Error::InvalidData("av1C marker or version is not 1"));
    }
    let mut bits = BitReader::new(&header[1..]);
    let seq_profile = bits.read_u8(3)?;
    let seq_level_idx_0 = bits.read_u8(5)?;
    let seq_tier_0 = bits.read_u8(1)?;
    let high_bitdepth = bits.read_bool()?;
    let twelve_bit = bits.read_bool()?;
    let monochrome = bits.read_bool()?;
    let chroma_subsampling_x = bits.read_u8(1)?;
    let chroma_subsampling_y = bits.read_u8(1)?;
    let chroma_sample_position = bits.read_u8(2)?;
    let _reserved = bits.read_u8(3)?;
    let initial_presentation_delay_present = bits.read_bool()?;
    let initial_presentation_delay_minus_one = bits.read_u8(4)?;

    Ok(AV1Config {
        seq_profile,
        seq_level_idx_0,
        seq_tier_0,
        high_bitdepth,
        twelve_bit,
        monochrome,
        chroma_subsampling_x,
        chroma_subsampling_y,
        chroma_sample_position,
        initial_presentation_delay_minus_one: initial_presentation_delay_present
            .then_some(initial_presentation_delay_minus_one),
        config_obus: src.read_into_try_vec()?,
    })
}

/// Parse a Colour Information property
/// See ISO 14496-12:2015 § 12.1.5
fn read_colr<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>, options: &ParseOptions) -> Result<ItemProperty> {
    let colour_type = FourCC::from(be_u32(src)?);
    if colour_type == b"nclx" {
        let color_primaries = be_u16(src)?;
        let transfer_characteristics = be_u16(src)?;
        let matrix_coefficients = be_u16(src)?;
        let byte = src.read_u8()?;
        if byte & 0x7f != 0 && !options.lenient {
            return Err(Error::InvalidData("colr reserved bits must be 0"));
        }
        Ok(ItemProperty::ColorInformation(ColorInformation::Nclx(Nclx {
            color_primaries,
            transfer_characteristics,
            matrix_coefficients,
            full_range: byte & 0x80 != 0,
        })))
    } else if colour_type == b"rICC" || colour_type == b"prof" {
        Ok(ItemProperty::ColorInformation(ColorInformation::Icc(src.read_into_try_vec()?)))
    } else {
        debug!("unsupported colour_type {colour_type}");
        skip_box_remain(src);
        Ok(ItemProperty::Unknown(src.head.name.into()))
    }
}

/// Parse a Clean Aperture property
/// See ISO 14496-12:2015 § 12.1.4
fn read_clap<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>) -> Result<CleanAperture> {
    Ok(CleanAperture {
        width_n: be_u32(src)?,
        width_d: be_u32(src)?,
        height_n: be_u32(src)?,
        height_d: be_u32(src)?,
        horiz_off_n: be_u32(src)? as i32,
        horiz_off_d: be_u32(src)?,
        vert_off_n: be_u32(src)? as i32,
        vert_off_d: be_u32(src)?,
    })
}

/// Parse an Image Rotation property
/// See ISO/IEC 23008-12:2017 § 6.5.10
fn read_irot<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>, options: &ParseOptions) -> Result<Rotation> {
    let byte = [src.read_u8()?];
    let mut bits = BitReader::new(&byte);
    if bits.read_u8(6)? != 0 && !options.lenient {
        return Err(Error::InvalidData("irot reserved bits must be 0"));
    }
    Ok(Rotation::from_angle_bits(bits.read_u8(2)?))
}

/// Parse an Image Mirror property
/// See ISO/IEC 23008-12:2017 § 6.5.12
fn read_imir<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>) -> Result<MirrorAxis> {
    let byte = [src.read_u8()?];
    let mut bits = BitReader::new(&byte);
    if bits.read_u8(7)? != 0 {
        return Err(Error::InvalidData("imir reserved bits must be 0"));
    }
    Ok(if bits.read_bool()? { MirrorAxis::Horizontal } else { MirrorAxis::Vertical })
}
