// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use byteorder::{BigEndian, ReadBytesExt};
use log::{debug, warn};
use std::io::{Read, Seek};

use crate::bmff::{BoxIter, check_parser_state, skip_box_content};
use crate::boxes::{BoxType, item_type, reference_type};
use crate::codec::{Av1Decoder, DecodeError, DecodedImage};
use crate::grid::{ImageGridDescriptor, ImageGridInfo, resolve_grid};
use crate::item_data::{AvifItemData, BufferPool, read_item};
use crate::meta::{MetaContainer, read_meta};
use crate::offset::OffsetResolver;
use crate::source::{ByteSource, RangeReader, StreamSource};
use crate::tables::{AV1Config, ItemLocationEntry, ItemProperty, read_ftyp};
use crate::transform::ImageTransforms;
use crate::{DecodeConfig, Error, Result, ToUsize};

const XMP_CONTENT_TYPE: &str = "application/rdf+xml";

/// A parsed AVIF file.
///
/// Parsing reads the box structure and the `meta` tables only; item bytes are
/// read from the source on request, so the source stays borrowed (or owned)
/// for as long as the container is used.
pub struct AvifContainer<S> {
    source: S,
    meta: MetaContainer,
    file_length: u64,
    config: DecodeConfig,
    pool: BufferPool,
}

impl<'a> AvifContainer<&'a [u8]> {
    /// Parse an in-memory file with the default configuration.
    pub fn from_bytes(data: &'a [u8]) -> Result<Self> {
        Self::parse(data)
    }
}

impl<R: Read + Seek> AvifContainer<StreamSource<R>> {
    /// Parse from a seekable stream, e.g. a `File`.
    pub fn from_reader(reader: R) -> Result<Self> {
        Self::parse(StreamSource::new(reader)?)
    }
}

impl<S: ByteSource> AvifContainer<S> {
    pub fn parse(source: S) -> Result<Self> {
        Self::parse_with_config(source, DecodeConfig::default())
    }

    /// Scan the top-level boxes once: exactly one `ftyp` and one `meta` are
    /// required, everything else is skipped.
    pub fn parse_with_config(source: S, config: DecodeConfig) -> Result<Self> {
        let options = config.parse_options();
        let file_length = source.len();
        let mut ftyp_seen = false;
        let mut meta = None;

        let mut reader = RangeReader::new(&source);
        let mut iter = BoxIter::new(&mut reader);
        while let Some(mut b) = iter.next_box()? {
            match b.head.name {
                BoxType::FileTypeBox => {
                    if ftyp_seen {
                        return Err(Error::MalformedContainer("There should be exactly one ftyp box per ISO 14496-12:2015 § 4.3.1"));
                    }
                    ftyp_seen = true;
                    let ftyp = read_ftyp(&mut b)?;
                    if !ftyp.is_avif() {
                        warn!("major_brand: {}", ftyp.major_brand);
                        return Err(Error::UnsupportedFormat);
                    }
                },
                BoxType::MetadataBox => {
                    if meta.is_some() {
                        return Err(Error::MalformedContainer("There should be zero or one meta boxes per ISO 14496-12:2015 § 8.11.1.1"));
                    }
                    meta = Some(read_meta(&mut b, &options)?);
                },
                _ => skip_box_content(&mut b),
            }

            check_parser_state(&b, &options)?;
        }

        if !ftyp_seen {
            return Err(Error::MalformedContainer("missing ftyp"));
        }
        let meta = meta.ok_or(Error::MalformedContainer("missing meta"))?;
        let pool = BufferPool::new(config.pooled_buffer_threshold);

        Ok(Self { source, meta, file_length, config, pool })
    }

    pub fn meta(&self) -> &MetaContainer {
        &self.meta
    }

    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    pub fn config(&self) -> &DecodeConfig {
        &self.config
    }

    /// The pool small items are read into.
    pub fn buffer_pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn primary_item_id(&self) -> Option<u32> {
        self.meta.primary_item_id()
    }

    pub fn offset_resolver(&self) -> OffsetResolver {
        OffsetResolver::new(self.file_length, self.meta.idat())
    }

    /// Read the bytes of any item, whatever its type.
    pub fn read_item_data(&self, item_id: u32) -> Result<AvifItemData> {
        let entry = self
            .meta
            .item_location(item_id)
            .ok_or(Error::InvalidData("item has no iloc entry"))?;
        self.read_location(entry)
    }

    pub fn read_location(&self, entry: &ItemLocationEntry) -> Result<AvifItemData> {
        read_item(&self.source, &self.offset_resolver(), entry, &self.config, &self.pool)
    }

    /// Grid layout of `item_id`, or `None` if it is not a grid item.
    pub fn grid_info(&self, item_id: u32) -> Result<Option<ImageGridInfo>> {
        resolve_grid(&self.meta, item_id, &self.config, || {
            let data = self.read_item_data(item_id)?;
            ImageGridDescriptor::parse(&data)
        })
    }

    /// Coded bytes of tile `index` (row-major) of a grid.
    pub fn tile_data(&self, grid: &ImageGridInfo, index: usize) -> Result<AvifItemData> {
        let tile_id = *grid
            .child_image_ids
            .get(index)
            .ok_or(Error::InvalidData("tile index out of range"))?;
        self.image_item_data(tile_id)
    }

    /// Bytes of a coded AV1 image item that is safe to hand to a decoder.
    fn image_item_data(&self, item_id: u32) -> Result<AvifItemData> {
        let info = self
            .meta
            .item_info(item_id)
            .ok_or(Error::InvalidData("item not present in iinf box"))?;
        if info.item_type != item_type::AV1_IMAGE {
            warn!("item {item_id} type: {}", info.item_type);
            return Err(Error::UnsupportedItemType(info.item_type));
        }
        self.meta.check_essential_properties(item_id)?;
        if self.meta.av1_config(item_id).is_none() {
            if !self.config.lenient {
                return Err(Error::InvalidData("av01 item has no av1C property"));
            }
            warn!("item {item_id} has no av1C property");
        }
        self.read_item_data(item_id)
    }

    /// Coded bytes of the primary image.
    ///
    /// Grid primaries are reported as [`Error::UnsupportedItemType`]; use
    /// [`Self::grid_info`] and [`Self::tile_data`] to composite them.
    pub fn primary_image_data(&self) -> Result<AvifItemData> {
        let primary = self
            .primary_item_id()
            .ok_or(Error::InvalidData("Required pitm box not present in meta box"))?;
        self.image_item_data(primary)
    }

    /// The auxiliary item carrying the primary image's alpha plane.
    pub fn alpha_item_id(&self) -> Option<u32> {
        let primary = self.primary_item_id()?;
        self.meta
            .references(primary, reference_type::AUXILIARY)
            .map(|r| r.from_item_id())
            .filter(|&id| id != primary)
            .find(|&id| {
                matches!(
                    self.meta.property(id, BoxType::AuxiliaryTypeProperty),
                    Some(ItemProperty::AuxiliaryType(aux)) if aux.is_alpha()
                )
            })
    }

    pub fn alpha_image_data(&self) -> Result<Option<AvifItemData>> {
        self.alpha_item_id().map(|id| self.image_item_data(id)).transpose()
    }

    /// The primary image's color is premultiplied by its alpha.
    pub fn premultiplied_alpha(&self) -> bool {
        let (Some(primary), Some(alpha)) = (self.primary_item_id(), self.alpha_item_id()) else {
            return false;
        };
        self.meta
            .references(alpha, reference_type::PREMULTIPLIED)
            .any(|r| r.from_item_id() == primary)
    }

    /// Metadata items describing the primary image ('cdsc'), in reference order.
    fn metadata_items(&self) -> impl Iterator<Item = u32> + '_ {
        self.primary_item_id()
            .into_iter()
            .flat_map(|primary| self.meta.references(primary, reference_type::CONTENT_DESCRIBES))
            .map(|r| r.from_item_id())
    }

    /// Exif payload of the primary image, starting at the TIFF header.
    ///
    /// A malformed Exif item is logged and treated as absent.
    pub fn exif(&self) -> Option<AvifItemData> {
        let id = self.metadata_items().find(|&id| {
            self.meta
                .item_info(id)
                .is_some_and(|info| info.item_type == item_type::EXIF)
        })?;
        match self.read_exif(id) {
            Ok(data) => Some(data),
            Err(err) => {
                warn!("ignoring malformed Exif item {id}: {err}");
                None
            },
        }
    }

    fn read_exif(&self, item_id: u32) -> Result<AvifItemData> {
        let mut data = self.read_item_data(item_id)?;
        // exif_tiff_header_offset, counted from the end of this field
        let header_offset = (&data[..]).read_u32::<BigEndian>()?;
        let skip = header_offset
            .to_usize()
            .checked_add(4)
            .ok_or(Error::InvalidData("Exif header offset overflow"))?;
        data.skip_prefix(skip)?;
        Ok(data)
    }

    /// XMP packet of the primary image.
    ///
    /// A malformed XMP item is logged and treated as absent.
    pub fn xmp(&self) -> Option<AvifItemData> {
        let id = self.metadata_items().find(|&id| {
            self.meta
                .item_info(id)
                .and_then(|info| info.content_type())
                .is_some_and(|content_type| content_type == XMP_CONTENT_TYPE)
        })?;
        match self.read_item_data(id) {
            Ok(data) => Some(data),
            Err(err) => {
                warn!("ignoring malformed XMP item {id}: {err}");
                None
            },
        }
    }

    pub fn av1_config(&self, item_id: u32) -> Option<&AV1Config> {
        self.meta.av1_config(item_id)
    }

    /// Crop, rotation and mirror associated with `item_id`.
    ///
    /// A clean aperture that does not fit the image is logged and ignored.
    pub fn transforms(&self, item_id: u32) -> ImageTransforms {
        let crop = match self.meta.property(item_id, BoxType::CleanApertureProperty) {
            Some(ItemProperty::CleanAperture(clap)) => match self.meta.spatial_extents(item_id) {
                Some(ispe) => clap
                    .crop_rect(ispe.width, ispe.height)
                    .map_err(|err| warn!("ignoring clap of item {item_id}: {err}"))
                    .ok(),
                None => {
                    warn!("ignoring clap of item {item_id}: no ispe property");
                    None
                },
            },
            _ => None,
        };
        let rotation = match self.meta.property(item_id, BoxType::ImageRotationProperty) {
            Some(ItemProperty::Rotation(rotation)) => Some(*rotation),
            _ => None,
        };
        let mirror = match self.meta.property(item_id, BoxType::ImageMirrorProperty) {
            Some(ItemProperty::Mirror(axis)) => Some(*axis),
            _ => None,
        };
        ImageTransforms { crop, rotation, mirror }
    }

    /// Decode the primary image (and its alpha plane, if any) with `decoder`.
    pub fn decode<D: Av1Decoder>(&self, decoder: &mut D) -> Result<DecodedImage<D::Image>, DecodeError<D::Error>> {
        let primary = self.primary_image_data()?;
        let color = decoder.decode(&primary).map_err(DecodeError::Codec)?;
        primary.release();

        let alpha = match self.alpha_image_data()? {
            Some(data) => {
                let image = decoder.decode(&data).map_err(DecodeError::Codec)?;
                data.release();
                Some(image)
            },
            None => None,
        };
        debug!("decoded primary image, alpha: {}", alpha.is_some());

        let transforms = match self.primary_item_id() {
            Some(id) => self.transforms(id),
            None => ImageTransforms::default(),
        };
        Ok(DecodedImage {
            color,
            alpha,
            premultiplied_alpha: self.premultiplied_alpha(),
            transforms,
        })
    }

    /// Give back the source.
    pub fn into_source(self) -> S {
        self.source
    }
}
