// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Building AVIF files.
//!
//! [`BoxWriter`] nests boxes and sizes them automatically. The `write_*`
//! functions emit single boxes mirroring what the parser reads.
//! [`ContainerWriter`] lays out a complete file from items, properties and
//! references, and [`StillImageWriter`] wraps it for the usual still image
//! with optional alpha, Exif and XMP.

use byteorder::{BigEndian, WriteBytesExt};
use log::debug;
use std::io::Write;

use crate::bmff::{BoxHeader, write_box_header};
use crate::boxes::{BoxType, FourCC, brand, item_type, reference_type};
use crate::tables::{
    AV1Config, AuxiliaryTypeProperty, ColorInformation, ConstructionMethod, Extent, ImageSpatialExtents,
    ItemProperty, Nclx, PropertyAssociation,
};
use crate::transform::{CleanAperture, MirrorAxis, Rotation};
use crate::{Error, Result, ToU64};

/// In-memory output with nested, automatically sized boxes.
#[derive(Debug, Default)]
pub struct BoxWriter {
    buf: std::vec::Vec<u8>,
}

impl BoxWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> u64 {
        self.buf.len().to_u64()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write a box of type `name` whose payload is produced by `content`.
    ///
    /// The compact header is used unless the box is 4 GiB or larger.
    pub fn write_box<F>(&mut self, name: BoxType, content: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let mut payload = Self::new();
        content(&mut payload)?;
        let header = BoxHeader::for_payload(name, payload.len())?;
        write_box_header(&header, &mut self.buf)?;
        self.buf.extend_from_slice(&payload.buf);
        Ok(())
    }

    /// Like [`Self::write_box`], with the full box version and 24-bit flags first.
    pub fn write_full_box<F>(&mut self, name: BoxType, version: u8, flags: u32, content: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        if flags > 0x00ff_ffff {
            return Err(Error::InvalidData("full box flags are 24 bits"));
        }
        self.write_box(name, |w| {
            w.write_u32::<BigEndian>(u32::from(version) << 24 | flags)?;
            content(w)
        })
    }

    pub fn write_fourcc(&mut self, fourcc: FourCC) -> Result<()> {
        self.buf.extend_from_slice(&fourcc.value);
        Ok(())
    }

    /// UTF-8 string followed by a NUL byte.
    pub fn write_c_string(&mut self, s: &str) -> Result<()> {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> std::vec::Vec<u8> {
        self.buf
    }
}

impl Write for BoxWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn box_type(fourcc: FourCC) -> BoxType {
    BoxType::from(u32::from(fourcc))
}

fn fits_u16(id: u32) -> bool {
    u16::try_from(id).is_ok()
}

/// See ISO 14496-12:2015 § 4.3
pub fn write_ftyp(w: &mut BoxWriter, major_brand: FourCC, minor_version: u32, compatible_brands: &[FourCC]) -> Result<()> {
    w.write_box(BoxType::FileTypeBox, |w| {
        w.write_fourcc(major_brand)?;
        w.write_u32::<BigEndian>(minor_version)?;
        for brand in compatible_brands {
            w.write_fourcc(*brand)?;
        }
        Ok(())
    })
}

/// See ISO 14496-12:2015 § 8.4.3
pub fn write_hdlr(w: &mut BoxWriter, handler_type: FourCC) -> Result<()> {
    w.write_full_box(BoxType::HandlerBox, 0, 0, |w| {
        w.write_u32::<BigEndian>(0)?; // pre_defined
        w.write_fourcc(handler_type)?;
        for _ in 0..3 {
            w.write_u32::<BigEndian>(0)?;
        }
        w.write_c_string("")
    })
}

/// Version 0 (16-bit id) whenever the id allows it.
/// See ISO 14496-12:2015 § 8.11.4
pub fn write_pitm(w: &mut BoxWriter, item_id: u32) -> Result<()> {
    let version = if fits_u16(item_id) { 0 } else { 1 };
    w.write_full_box(BoxType::PrimaryItemBox, version, 0, |w| {
        if version == 0 {
            w.write_u16::<BigEndian>(u16::try_from(item_id)?)?;
        } else {
            w.write_u32::<BigEndian>(item_id)?;
        }
        Ok(())
    })
}

/// One 'infe' to write.
#[derive(Debug, Clone)]
pub struct InfeEntry<'a> {
    pub item_id: u32,
    pub item_type: FourCC,
    pub name: &'a str,
    /// Written for `mime` items.
    pub content_type: Option<&'a str>,
    pub hidden: bool,
}

/// See ISO 14496-12:2015 § 8.11.6
pub fn write_iinf(w: &mut BoxWriter, entries: &[InfeEntry<'_>]) -> Result<()> {
    let count = u32::try_from(entries.len())?;
    let version = if fits_u16(count) { 0 } else { 1 };
    w.write_full_box(BoxType::ItemInfoBox, version, 0, |w| {
        if version == 0 {
            w.write_u16::<BigEndian>(u16::try_from(count)?)?;
        } else {
            w.write_u32::<BigEndian>(count)?;
        }
        for entry in entries {
            write_infe(w, entry)?;
        }
        Ok(())
    })
}

fn write_infe(w: &mut BoxWriter, entry: &InfeEntry<'_>) -> Result<()> {
    let version = if fits_u16(entry.item_id) { 2 } else { 3 };
    w.write_full_box(BoxType::ItemInfoEntry, version, u32::from(entry.hidden), |w| {
        if version == 2 {
            w.write_u16::<BigEndian>(u16::try_from(entry.item_id)?)?;
        } else {
            w.write_u32::<BigEndian>(entry.item_id)?;
        }
        w.write_u16::<BigEndian>(0)?; // item_protection_index
        w.write_fourcc(entry.item_type)?;
        w.write_c_string(entry.name)?;
        if entry.item_type == item_type::MIME {
            w.write_c_string(entry.content_type.unwrap_or(""))?;
        }
        Ok(())
    })
}

/// One 'iloc' item to write.
#[derive(Debug, Clone)]
pub struct IlocEntry<'a> {
    pub item_id: u32,
    pub construction_method: ConstructionMethod,
    pub base_offset: u64,
    pub extents: &'a [Extent],
}

/// Field sizes are 4 bytes unless a value needs 8; version 1 is used only
/// when an item lives in 'idat', version 2 only for 32-bit item ids.
/// See ISO 14496-12:2015 § 8.11.3
pub fn write_iloc(w: &mut BoxWriter, entries: &[IlocEntry<'_>]) -> Result<()> {
    let needs_64 = |v: u64| u32::try_from(v).is_err();
    let offset_size: u8 = if entries.iter().flat_map(|e| e.extents).any(|x| needs_64(x.offset)) { 8 } else { 4 };
    let length_size: u8 = if entries.iter().flat_map(|e| e.extents).any(|x| needs_64(x.length)) { 8 } else { 4 };
    let base_offset_size: u8 = if entries.iter().all(|e| e.base_offset == 0) {
        0
    } else if entries.iter().any(|e| needs_64(e.base_offset)) {
        8
    } else {
        4
    };
    let version = if !entries.iter().all(|e| fits_u16(e.item_id)) {
        2
    } else if entries.iter().any(|e| e.construction_method == ConstructionMethod::Idat) {
        1
    } else {
        0
    };

    let write_sized = |w: &mut BoxWriter, size: u8, value: u64| -> Result<()> {
        match size {
            0 => (),
            4 => w.write_u32::<BigEndian>(u32::try_from(value)?)?,
            _ => w.write_u64::<BigEndian>(value)?,
        }
        Ok(())
    };

    w.write_full_box(BoxType::ItemLocationBox, version, 0, |w| {
        w.write_u8(offset_size << 4 | length_size)?;
        // base_offset_size, then index_size (v1/v2) or reserved (v0)
        w.write_u8(base_offset_size << 4)?;
        let count = u32::try_from(entries.len())?;
        if version == 2 {
            w.write_u32::<BigEndian>(count)?;
        } else {
            w.write_u16::<BigEndian>(u16::try_from(count)?)?;
        }
        for entry in entries {
            if version == 2 {
                w.write_u32::<BigEndian>(entry.item_id)?;
            } else {
                w.write_u16::<BigEndian>(u16::try_from(entry.item_id)?)?;
            }
            if version >= 1 {
                let method = match entry.construction_method {
                    ConstructionMethod::File => 0,
                    ConstructionMethod::Idat => 1,
                };
                w.write_u16::<BigEndian>(method)?;
            } else if entry.construction_method != ConstructionMethod::File {
                return Err(Error::InvalidData("iloc version 0 cannot express construction_method"));
            }
            w.write_u16::<BigEndian>(0)?; // data_reference_index
            write_sized(w, base_offset_size, entry.base_offset)?;
            let extent_count = u16::try_from(entry.extents.len())?;
            if extent_count == 0 {
                return Err(Error::InvalidData("an item needs at least one extent"));
            }
            w.write_u16::<BigEndian>(extent_count)?;
            for extent in entry.extents {
                write_sized(w, offset_size, extent.offset)?;
                write_sized(w, length_size, extent.length)?;
            }
        }
        Ok(())
    })
}

/// One reference box inside 'iref' to write.
#[derive(Debug, Clone)]
pub struct IrefEntry<'a> {
    pub reference_type: FourCC,
    pub from_item_id: u32,
    pub to_item_ids: &'a [u32],
}

/// See ISO 14496-12:2015 § 8.11.12
pub fn write_iref(w: &mut BoxWriter, entries: &[IrefEntry<'_>]) -> Result<()> {
    let small = entries
        .iter()
        .all(|e| fits_u16(e.from_item_id) && e.to_item_ids.iter().all(|&id| fits_u16(id)));
    let write_id = move |w: &mut BoxWriter, id: u32| -> Result<()> {
        if small {
            w.write_u16::<BigEndian>(u16::try_from(id)?)?;
        } else {
            w.write_u32::<BigEndian>(id)?;
        }
        Ok(())
    };
    w.write_full_box(BoxType::ItemReferenceBox, u8::from(!small), 0, |w| {
        for entry in entries {
            w.write_box(box_type(entry.reference_type), |w| {
                write_id(w, entry.from_item_id)?;
                w.write_u16::<BigEndian>(u16::try_from(entry.to_item_ids.len())?)?;
                for &id in entry.to_item_ids {
                    write_id(w, id)?;
                }
                Ok(())
            })?;
        }
        Ok(())
    })
}

/// Write one 'ipco' entry.
pub fn write_property(w: &mut BoxWriter, property: &ItemProperty) -> Result<()> {
    match property {
        ItemProperty::ImageSpatialExtents(ispe) => write_ispe(w, *ispe),
        ItemProperty::PixelInformation(depths) => {
            w.write_full_box(BoxType::PixelInformationProperty, 0, 0, |w| {
                w.write_u8(u8::try_from(depths.len())?)?;
                w.write_all(depths)?;
                Ok(())
            })
        },
        ItemProperty::AuxiliaryType(aux) => {
            w.write_full_box(BoxType::AuxiliaryTypeProperty, 0, 0, |w| {
                w.write_all(aux.aux_data())?;
                Ok(())
            })
        },
        ItemProperty::AV1Config(config) => write_av1c(w, config),
        ItemProperty::ColorInformation(colr) => write_colr(w, colr),
        ItemProperty::CleanAperture(clap) => write_clap(w, clap),
        ItemProperty::Rotation(rotation) => {
            w.write_box(BoxType::ImageRotationProperty, |w| Ok(w.write_u8(rotation.angle_bits())?))
        },
        ItemProperty::Mirror(axis) => {
            w.write_box(BoxType::ImageMirrorProperty, |w| {
                Ok(w.write_u8(u8::from(*axis == MirrorAxis::Horizontal))?)
            })
        },
        ItemProperty::Unknown(_) => Err(Error::Unsupported("cannot write a property of unknown type")),
    }
}

fn write_ispe(w: &mut BoxWriter, ispe: ImageSpatialExtents) -> Result<()> {
    w.write_full_box(BoxType::ImageSpatialExtentsProperty, 0, 0, |w| {
        w.write_u32::<BigEndian>(ispe.width)?;
        w.write_u32::<BigEndian>(ispe.height)?;
        Ok(())
    })
}

/// See AV1 Codec ISO Media File Format Binding § 2.3.3
pub fn write_av1c(w: &mut BoxWriter, config: &AV1Config) -> Result<()> {
    if config.seq_profile > 7 || config.seq_level_idx_0 > 31 || config.chroma_sample_position > 3 {
        return Err(Error::InvalidData("av1C field out of range"));
    }
    w.write_box(BoxType::AV1CodecConfigurationProperty, |w| {
        w.write_u8(AV1Config::MARKER_AND_VERSION)?;
        w.write_u8(config.seq_profile << 5 | config.seq_level_idx_0)?;
        w.write_u8(
            (config.seq_tier_0 & 1) << 7
                | u8::from(config.high_bitdepth) << 6
                | u8::from(config.twelve_bit) << 5
                | u8::from(config.monochrome) << 4
                | (config.chroma_subsampling_x & 1) << 3
                | (config.chroma_subsampling_y & 1) << 2
                | config.chroma_sample_position,
        )?;
        w.write_u8(match config.initial_presentation_delay_minus_one {
            Some(delay) => 0x10 | (delay & 0x0f),
            None => 0,
        })?;
        w.write_all(&config.config_obus)?;
        Ok(())
    })
}

/// See ISO 14496-12:2015 § 12.1.5
pub fn write_colr(w: &mut BoxWriter, colr: &ColorInformation) -> Result<()> {
    w.write_box(BoxType::ColorInformationProperty, |w| {
        match colr {
            ColorInformation::Nclx(nclx) => {
                w.write_fourcc(FourCC::new(b"nclx"))?;
                w.write_u16::<BigEndian>(nclx.color_primaries)?;
                w.write_u16::<BigEndian>(nclx.transfer_characteristics)?;
                w.write_u16::<BigEndian>(nclx.matrix_coefficients)?;
                w.write_u8(u8::from(nclx.full_range) << 7)?;
            },
            ColorInformation::Icc(icc) => {
                w.write_fourcc(FourCC::new(b"prof"))?;
                w.write_all(icc)?;
            },
        }
        Ok(())
    })
}

/// See ISO 14496-12:2015 § 12.1.4
pub fn write_clap(w: &mut BoxWriter, clap: &CleanAperture) -> Result<()> {
    w.write_box(BoxType::CleanApertureProperty, |w| {
        w.write_u32::<BigEndian>(clap.width_n)?;
        w.write_u32::<BigEndian>(clap.width_d)?;
        w.write_u32::<BigEndian>(clap.height_n)?;
        w.write_u32::<BigEndian>(clap.height_d)?;
        w.write_i32::<BigEndian>(clap.horiz_off_n)?;
        w.write_u32::<BigEndian>(clap.horiz_off_d)?;
        w.write_i32::<BigEndian>(clap.vert_off_n)?;
        w.write_u32::<BigEndian>(clap.vert_off_d)?;
        Ok(())
    })
}

/// All associations of one item, for [`write_iprp`].
#[derive(Debug, Clone)]
pub struct IpmaEntry<'a> {
    pub item_id: u32,
    pub associations: &'a [PropertyAssociation],
}

/// 'iprp' with its 'ipco' and a single 'ipma'.
/// See ISO/IEC 23008-12:2017 § 9.3
pub fn write_iprp(w: &mut BoxWriter, properties: &[ItemProperty], associations: &[IpmaEntry<'_>]) -> Result<()> {
    let small_ids = associations.iter().all(|e| fits_u16(e.item_id));
    let max_index = associations
        .iter()
        .flat_map(|e| e.associations)
        .map(|a| a.property_index)
        .max()
        .unwrap_or(0);
    if max_index > 0x7fff {
        return Err(Error::InvalidData("ipma property index is limited to 15 bits"));
    }
    let wide_index = max_index > 0x7f;

    w.write_box(BoxType::ItemPropertiesBox, |w| {
        w.write_box(BoxType::ItemPropertyContainerBox, |w| {
            for property in properties {
                write_property(w, property)?;
            }
            Ok(())
        })?;
        w.write_full_box(BoxType::ItemPropertyAssociationBox, u8::from(!small_ids), u32::from(wide_index), |w| {
            w.write_u32::<BigEndian>(u32::try_from(associations.len())?)?;
            for entry in associations {
                if small_ids {
                    w.write_u16::<BigEndian>(u16::try_from(entry.item_id)?)?;
                } else {
                    w.write_u32::<BigEndian>(entry.item_id)?;
                }
                w.write_u8(u8::try_from(entry.associations.len())?)?;
                for a in entry.associations {
                    let essential = u16::from(a.essential);
                    let index = u16::try_from(a.property_index)?;
                    if wide_index {
                        w.write_u16::<BigEndian>(essential << 15 | index)?;
                    } else {
                        w.write_u8(u8::try_from(essential << 7 | index)?)?;
                    }
                }
            }
            Ok(())
        })
    })
}

#[derive(Debug)]
struct PendingItem {
    item_id: u32,
    item_type: FourCC,
    name: std::string::String,
    content_type: Option<std::string::String>,
    hidden: bool,
    in_idat: bool,
    /// One extent per chunk, stored in this order.
    chunks: std::vec::Vec<std::vec::Vec<u8>>,
}

/// Lays out a complete file: `ftyp`, `meta`, then one `mdat` with every item
/// that does not live in `idat`.
///
/// Item ids are assigned from 1 in the order items are added.
#[derive(Debug)]
pub struct ContainerWriter {
    major_brand: FourCC,
    compatible_brands: std::vec::Vec<FourCC>,
    write_handler: bool,
    primary_item_id: Option<u32>,
    items: std::vec::Vec<PendingItem>,
    properties: std::vec::Vec<ItemProperty>,
    associations: std::vec::Vec<(u32, std::vec::Vec<PropertyAssociation>)>,
    references: std::vec::Vec<(FourCC, u32, std::vec::Vec<u32>)>,
}

impl Default for ContainerWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerWriter {
    pub fn new() -> Self {
        Self {
            major_brand: brand::AVIF,
            compatible_brands: std::vec::Vec::from([brand::AVIF, brand::MIF1, brand::MIAF]),
            write_handler: true,
            primary_item_id: None,
            items: std::vec::Vec::new(),
            properties: std::vec::Vec::new(),
            associations: std::vec::Vec::new(),
            references: std::vec::Vec::new(),
        }
    }

    pub fn set_brands(&mut self, major_brand: FourCC, compatible_brands: &[FourCC]) {
        self.major_brand = major_brand;
        self.compatible_brands = compatible_brands.to_vec();
    }

    /// Leave out the 'hdlr' box (only useful to produce invalid files).
    pub fn omit_handler(&mut self) {
        self.write_handler = false;
    }

    pub fn set_primary_item(&mut self, item_id: u32) {
        self.primary_item_id = Some(item_id);
    }

    fn push_item(&mut self, item_type: FourCC, chunks: &[&[u8]], in_idat: bool) -> Result<u32> {
        if chunks.is_empty() {
            return Err(Error::InvalidData("an item needs at least one extent"));
        }
        let item_id = u32::try_from(self.items.len())? + 1;
        self.items.push(PendingItem {
            item_id,
            item_type,
            name: std::string::String::new(),
            content_type: None,
            hidden: false,
            in_idat,
            chunks: chunks.iter().map(|c| c.to_vec()).collect(),
        });
        Ok(item_id)
    }

    /// Add an item stored in 'mdat'; every chunk becomes one extent.
    pub fn add_item(&mut self, item_type: FourCC, chunks: &[&[u8]]) -> Result<u32> {
        self.push_item(item_type, chunks, false)
    }

    /// Add an item stored in 'idat'.
    pub fn add_idat_item(&mut self, item_type: FourCC, chunks: &[&[u8]]) -> Result<u32> {
        self.push_item(item_type, chunks, true)
    }

    pub fn add_mime_item(&mut self, content_type: &str, data: &[u8]) -> Result<u32> {
        let item_id = self.push_item(item_type::MIME, &[data], false)?;
        if let Some(item) = self.items.last_mut() {
            item.content_type = Some(content_type.into());
        }
        Ok(item_id)
    }

    fn item_mut(&mut self, item_id: u32) -> Result<&mut PendingItem> {
        self.items
            .iter_mut()
            .find(|item| item.item_id == item_id)
            .ok_or(Error::InvalidData("no such item"))
    }

    pub fn set_item_name(&mut self, item_id: u32, name: &str) -> Result<()> {
        self.item_mut(item_id)?.name = name.into();
        Ok(())
    }

    pub fn set_hidden(&mut self, item_id: u32, hidden: bool) -> Result<()> {
        self.item_mut(item_id)?.hidden = hidden;
        Ok(())
    }

    /// Append to 'ipco'; returns the 1-based property index.
    pub fn add_property(&mut self, property: ItemProperty) -> Result<u32> {
        self.properties.push(property);
        Ok(u32::try_from(self.properties.len())?)
    }

    /// Associate a property index with an item. Indices are not checked, so
    /// dangling associations can be written on purpose.
    pub fn associate(&mut self, item_id: u32, property_index: u32, essential: bool) {
        let association = PropertyAssociation { property_index, essential };
        match self.associations.iter_mut().find(|(id, _)| *id == item_id) {
            Some((_, list)) => list.push(association),
            None => self.associations.push((item_id, std::vec::Vec::from([association]))),
        }
    }

    /// Add a property and associate it with `item_id` in one go.
    pub fn add_item_property(&mut self, item_id: u32, property: ItemProperty, essential: bool) -> Result<u32> {
        let index = self.add_property(property)?;
        self.associate(item_id, index, essential);
        Ok(index)
    }

    pub fn add_reference(&mut self, reference_type: FourCC, from_item_id: u32, to_item_ids: &[u32]) {
        self.references.push((reference_type, from_item_id, to_item_ids.to_vec()));
    }

    fn write_meta(&self, w: &mut BoxWriter, mdat_payload_start: u64) -> Result<()> {
        let mut locations = std::vec::Vec::with_capacity(self.items.len());
        let mut mdat_offset = mdat_payload_start;
        let mut idat_offset = 0u64;
        for item in &self.items {
            let mut extents = std::vec::Vec::with_capacity(item.chunks.len());
            for chunk in &item.chunks {
                let length = chunk.len().to_u64();
                let cursor = if item.in_idat { &mut idat_offset } else { &mut mdat_offset };
                extents.push(Extent { offset: *cursor, length });
                *cursor += length;
            }
            locations.push(extents);
        }

        w.write_full_box(BoxType::MetadataBox, 0, 0, |w| {
            if self.write_handler {
                write_hdlr(w, FourCC::new(b"pict"))?;
            }
            if let Some(primary) = self.primary_item_id {
                write_pitm(w, primary)?;
            }

            let infe: std::vec::Vec<_> = self
                .items
                .iter()
                .map(|item| InfeEntry {
                    item_id: item.item_id,
                    item_type: item.item_type,
                    name: &item.name,
                    content_type: item.content_type.as_deref(),
                    hidden: item.hidden,
                })
                .collect();
            write_iinf(w, &infe)?;

            let iloc: std::vec::Vec<_> = self
                .items
                .iter()
                .zip(&locations)
                .map(|(item, extents)| IlocEntry {
                    item_id: item.item_id,
                    construction_method: if item.in_idat { ConstructionMethod::Idat } else { ConstructionMethod::File },
                    base_offset: 0,
                    extents,
                })
                .collect();
            write_iloc(w, &iloc)?;

            if !self.references.is_empty() {
                let iref: std::vec::Vec<_> = self
                    .references
                    .iter()
                    .map(|(reference_type, from_item_id, to_item_ids)| IrefEntry {
                        reference_type: *reference_type,
                        from_item_id: *from_item_id,
                        to_item_ids,
                    })
                    .collect();
                write_iref(w, &iref)?;
            }

            let ipma: std::vec::Vec<_> = self
                .associations
                .iter()
                .map(|(item_id, associations)| IpmaEntry { item_id: *item_id, associations })
                .collect();
            write_iprp(w, &self.properties, &ipma)?;

            if self.items.iter().any(|item| item.in_idat) {
                w.write_box(BoxType::ItemDataBox, |w| {
                    for item in self.items.iter().filter(|item| item.in_idat) {
                        for chunk in &item.chunks {
                            w.write_all(chunk)?;
                        }
                    }
                    Ok(())
                })?;
            }
            Ok(())
        })
    }

    /// Produce the file.
    pub fn finish(&self) -> Result<std::vec::Vec<u8>> {
        let mut out = BoxWriter::new();
        write_ftyp(&mut out, self.major_brand, 0, &self.compatible_brands)?;

        let mdat_payload_len = self
            .items
            .iter()
            .filter(|item| !item.in_idat)
            .flat_map(|item| &item.chunks)
            .map(|chunk| chunk.len().to_u64())
            .sum::<u64>();
        let mdat_header = BoxHeader::for_payload(BoxType::MediaDataBox, mdat_payload_len)?;

        // 'iloc' offsets depend on the size of 'meta', which only grows when
        // an offset needs a wider field, so this settles within a few passes.
        let mut meta_len = 0;
        let mut passes = 0;
        let meta = loop {
            let mdat_payload_start = out.len() + meta_len + mdat_header.header_size();
            let mut meta = BoxWriter::new();
            self.write_meta(&mut meta, mdat_payload_start)?;
            if meta.len() == meta_len {
                break meta;
            }
            passes += 1;
            if passes > 4 {
                return Err(Error::InvalidData("meta layout did not settle"));
            }
            meta_len = meta.len();
        };

        out.write_all(meta.as_bytes())?;
        write_box_header(&mdat_header, &mut out)?;
        for item in self.items.iter().filter(|item| !item.in_idat) {
            for chunk in &item.chunks {
                out.write_all(chunk)?;
            }
        }
        debug!("wrote {} items in {} bytes", self.items.len(), out.len());
        Ok(out.into_inner())
    }
}

/// Writes a single still image with optional alpha plane and metadata.
#[derive(Debug)]
pub struct StillImageWriter<'a> {
    width: u32,
    height: u32,
    color: &'a [u8],
    color_config: AV1Config,
    alpha: Option<(&'a [u8], AV1Config)>,
    premultiplied_alpha: bool,
    exif: Option<&'a [u8]>,
    xmp: Option<&'a [u8]>,
    icc: Option<&'a [u8]>,
    nclx: Option<Nclx>,
    clean_aperture: Option<CleanAperture>,
    rotation: Option<Rotation>,
    mirror: Option<MirrorAxis>,
}

impl<'a> StillImageWriter<'a> {
    /// `color` is the complete AV1 bitstream of the image.
    pub fn new(width: u32, height: u32, color: &'a [u8], color_config: AV1Config) -> Self {
        Self {
            width,
            height,
            color,
            color_config,
            alpha: None,
            premultiplied_alpha: false,
            exif: None,
            xmp: None,
            icc: None,
            nclx: None,
            clean_aperture: None,
            rotation: None,
            mirror: None,
        }
    }

    pub fn with_alpha(mut self, alpha: &'a [u8], config: AV1Config) -> Self {
        self.alpha = Some((alpha, config));
        self
    }

    pub fn premultiplied_alpha(mut self, premultiplied: bool) -> Self {
        self.premultiplied_alpha = premultiplied;
        self
    }

    /// Exif data starting with the TIFF header.
    pub fn with_exif(mut self, exif: &'a [u8]) -> Self {
        self.exif = Some(exif);
        self
    }

    pub fn with_xmp(mut self, xmp: &'a [u8]) -> Self {
        self.xmp = Some(xmp);
        self
    }

    pub fn with_icc(mut self, icc: &'a [u8]) -> Self {
        self.icc = Some(icc);
        self
    }

    pub fn with_nclx(mut self, nclx: Nclx) -> Self {
        self.nclx = Some(nclx);
        self
    }

    pub fn with_clean_aperture(mut self, clap: CleanAperture) -> Self {
        self.clean_aperture = Some(clap);
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = Some(rotation);
        self
    }

    pub fn with_mirror(mut self, axis: MirrorAxis) -> Self {
        self.mirror = Some(axis);
        self
    }

    pub fn write(self) -> Result<std::vec::Vec<u8>> {
        let mut w = ContainerWriter::new();
        let ispe = ImageSpatialExtents { width: self.width, height: self.height };

        let color = w.add_item(item_type::AV1_IMAGE, &[self.color])?;
        w.set_item_name(color, "Color")?;
        w.set_primary_item(color);
        w.add_item_property(color, ItemProperty::ImageSpatialExtents(ispe), false)?;
        w.add_item_property(color, ItemProperty::AV1Config(self.color_config), true)?;
        if let Some(icc) = self.icc {
            let mut profile = crate::TryVec::with_capacity(icc.len())?;
            profile.extend_from_slice(icc)?;
            w.add_item_property(color, ItemProperty::ColorInformation(ColorInformation::Icc(profile)), false)?;
        }
        if let Some(nclx) = self.nclx {
            w.add_item_property(color, ItemProperty::ColorInformation(ColorInformation::Nclx(nclx)), false)?;
        }
        // Transformative properties are essential and follow the descriptive ones
        if let Some(clap) = self.clean_aperture {
            w.add_item_property(color, ItemProperty::CleanAperture(clap), true)?;
        }
        if let Some(rotation) = self.rotation {
            w.add_item_property(color, ItemProperty::Rotation(rotation), true)?;
        }
        if let Some(axis) = self.mirror {
            w.add_item_property(color, ItemProperty::Mirror(axis), true)?;
        }

        if let Some((alpha_data, alpha_config)) = self.alpha {
            let alpha = w.add_item(item_type::AV1_IMAGE, &[alpha_data])?;
            w.set_item_name(alpha, "Alpha")?;
            w.set_hidden(alpha, true)?;
            w.add_item_property(alpha, ItemProperty::ImageSpatialExtents(ispe), false)?;
            w.add_item_property(alpha, ItemProperty::AV1Config(alpha_config), true)?;
            let aux = AuxiliaryTypeProperty::new(AuxiliaryTypeProperty::ALPHA_URN)?;
            w.add_item_property(alpha, ItemProperty::AuxiliaryType(aux), true)?;
            w.add_reference(reference_type::AUXILIARY, alpha, &[color]);
            if self.premultiplied_alpha {
                w.add_reference(reference_type::PREMULTIPLIED, color, &[alpha]);
            }
        }

        if let Some(exif) = self.exif {
            // exif_tiff_header_offset = 0: the TIFF header follows right away
            let exif_item = w.add_item(item_type::EXIF, &[&0u32.to_be_bytes(), exif])?;
            w.add_reference(reference_type::CONTENT_DESCRIBES, exif_item, &[color]);
        }
        if let Some(xmp) = self.xmp {
            let xmp_item = w.add_mime_item("application/rdf+xml", xmp)?;
            w.add_reference(reference_type::CONTENT_DESCRIBES, xmp_item, &[color]);
        }

        w.finish()
    }
}
