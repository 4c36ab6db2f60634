// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use log::{debug, warn};

use crate::bmff::{BMFFBox, check_parser_state, read_fullbox_version_no_flags, skip_box_content};
use crate::boxes::{BoxType, FourCC, reference_type};
use crate::source::ByteSource;
use crate::tables::{
    AV1Config, ImageSpatialExtents, ItemDataBox, ItemInfoEntry, ItemLocationEntry, ItemPropertiesTable,
    ItemProperty, ItemReferenceEntry, PropertyAssociation, read_hdlr, read_iinf, read_iloc, read_iprp,
    read_iref, read_pitm,
};
use crate::{Error, ParseOptions, Result, TryVec};

/// The item tables of a `meta` box, checked for presence and ready for queries.
///
/// See ISO/IEC 23008-12:2017 § 9 and ISO 14496-12:2015 § 8.11
#[derive(Debug)]
pub struct MetaContainer {
    handler_type: Option<FourCC>,
    primary_item_id: Option<u32>,
    item_infos: TryVec<ItemInfoEntry>,
    item_locations: TryVec<ItemLocationEntry>,
    properties: ItemPropertiesTable,
    item_references: TryVec<ItemReferenceEntry>,
    idat: Option<ItemDataBox>,
}

/// Parse a metadata box and assemble its tables.
/// See ISO 14496-12:2015 § 8.11.1
pub(crate) fn read_meta<S: ByteSource + ?Sized>(src: &mut BMFFBox<'_, S>, options: &ParseOptions) -> Result<MetaContainer> {
    let version = read_fullbox_version_no_flags(src, options)?;

    if version != 0 {
        return Err(Error::Unsupported("unsupported meta version"));
    }

    let mut handler_type = None;
    let mut primary_item_id = None;
    let mut item_infos = None;
    let mut item_locations = None;
    let mut properties = None;
    let mut item_references = None;
    let mut idat = None;

    let mut iter = src.box_iter();
    while let Some(mut b) = iter.next_box()? {
        match b.head.name {
            BoxType::HandlerBox => {
                if handler_type.is_some() {
                    return Err(Error::MalformedContainer("There should be exactly one hdlr box per ISO 14496-12:2015 § 8.4.3.1"));
                }
                handler_type = Some(read_hdlr(&mut b, options)?);
            },
            BoxType::ItemInfoBox => {
                if item_infos.is_some() {
                    return Err(Error::MalformedContainer("There should be zero or one iinf boxes per ISO 14496-12:2015 § 8.11.6.1"));
                }
                item_infos = Some(read_iinf(&mut b, options)?);
            },
            BoxType::ItemLocationBox => {
                if item_locations.is_some() {
                    return Err(Error::MalformedContainer("There should be zero or one iloc boxes per ISO 14496-12:2015 § 8.11.3.1"));
                }
                item_locations = Some(read_iloc(&mut b, options)?);
            },
            BoxType::PrimaryItemBox => {
                if primary_item_id.is_some() {
                    return Err(Error::MalformedContainer("There should be zero or one pitm boxes per ISO 14496-12:2015 § 8.11.4.1"));
                }
                primary_item_id = Some(read_pitm(&mut b, options)?);
            },
            BoxType::ItemReferenceBox => {
                if item_references.is_some() {
                    return Err(Error::MalformedContainer("There should be zero or one iref boxes per ISO 14496-12:2015 § 8.11.12.1"));
                }
                item_references = Some(read_iref(&mut b, options)?);
            },
            BoxType::ItemPropertiesBox => {
                if properties.is_some() {
                    return Err(Error::MalformedContainer("There should be zero or one iprp boxes per ISO 23008-12:2017 § 9.3.1"));
                }
                properties = Some(read_iprp(&mut b, options)?);
            },
            BoxType::ItemDataBox => {
                if idat.is_some() {
                    return Err(Error::MalformedContainer("There should be zero or one idat boxes"));
                }
                // Only the location is recorded; items are read from it on demand
                idat = Some(ItemDataBox {
                    offset: b.head.payload_start(),
                    length: b.head.payload_len(),
                });
                skip_box_content(&mut b);
            },
            _ => skip_box_content(&mut b),
        }

        check_parser_state(&b, options)?;
    }

    let item_infos = item_infos.ok_or(Error::MissingRequiredBox("iinf"))?;
    let item_locations = item_locations.ok_or(Error::MissingRequiredBox("iloc"))?;
    let properties = properties.ok_or(Error::MissingRequiredBox("iprp"))?;

    match handler_type {
        Some(handler) if handler == b"pict" => (),
        Some(handler) if options.lenient => warn!("meta handler type is '{handler}', not 'pict'"),
        Some(_) => return Err(Error::InvalidData("meta handler type is not 'pict'")),
        None => warn!("meta has no hdlr box"),
    }

    debug!(
        "meta: {} items, {} locations, {} properties, primary {primary_item_id:?}",
        item_infos.len(),
        item_locations.len(),
        properties.properties.len()
    );

    Ok(MetaContainer {
        handler_type,
        primary_item_id,
        item_infos,
        item_locations,
        properties,
        item_references: item_references.unwrap_or_else(TryVec::new),
        idat,
    })
}

impl MetaContainer {
    pub fn handler_type(&self) -> Option<FourCC> {
        self.handler_type
    }

    /// Item id from 'pitm', if the box was present.
    pub fn primary_item_id(&self) -> Option<u32> {
        self.primary_item_id
    }

    pub fn item_infos(&self) -> &[ItemInfoEntry] {
        &self.item_infos
    }

    pub fn item_info(&self, item_id: u32) -> Option<&ItemInfoEntry> {
        self.item_infos.iter().find(|info| info.item_id == item_id)
    }

    pub fn item_locations(&self) -> &[ItemLocationEntry] {
        &self.item_locations
    }

    pub fn item_location(&self, item_id: u32) -> Option<&ItemLocationEntry> {
        self.item_locations.iter().find(|loc| loc.item_id == item_id)
    }

    /// All properties from 'ipco', in stored order (index 1 is the first).
    pub fn properties(&self) -> &[ItemProperty] {
        &self.properties.properties
    }

    pub fn item_references(&self) -> &[ItemReferenceEntry] {
        &self.item_references
    }

    pub fn idat(&self) -> Option<ItemDataBox> {
        self.idat
    }

    /// The item's property associations in stored order.
    pub fn associations(&self, item_id: u32) -> &[PropertyAssociation] {
        self.properties
            .associations
            .iter()
            .find(|a| a.item_id == item_id)
            .map_or(&[][..], |a| &a.associations[..])
    }

    /// The property an association points to. Index 0 and indices past the
    /// end of 'ipco' resolve to nothing.
    fn resolve(&self, association: &PropertyAssociation) -> Option<&ItemProperty> {
        let index = usize::try_from(association.property_index.checked_sub(1)?).ok()?;
        self.properties.properties.get(index)
    }

    /// First property of type `box_type` in the item's association order.
    pub fn property(&self, item_id: u32, box_type: BoxType) -> Option<&ItemProperty> {
        self.associations(item_id)
            .iter()
            .filter_map(|a| self.resolve(a))
            .find(|p| p.box_type() == box_type)
    }

    /// True if any essential association of the item does not resolve to a
    /// property this crate can interpret. Such items must not be decoded.
    pub fn has_unsupported_essential_property(&self, item_id: u32) -> bool {
        self.associations(item_id)
            .iter()
            .filter(|a| a.essential)
            .any(|a| !self.resolve(a).is_some_and(ItemProperty::is_known))
    }

    pub(crate) fn check_essential_properties(&self, item_id: u32) -> Result<()> {
        if self.has_unsupported_essential_property(item_id) {
            warn!("item {item_id} has an unsupported essential property");
            return Err(Error::UnsupportedEssentialProperty(item_id));
        }
        Ok(())
    }

    /// References of type `ref_type` that involve `item_id`.
    ///
    /// For 'dimg' the item must be the *from* item (the derived image lists
    /// its inputs); for every other type it must be one of the *to* items
    /// (e.g. an alpha plane's 'auxl' points at the image it belongs to).
    pub fn references(&self, item_id: u32, ref_type: FourCC) -> impl Iterator<Item = &ItemReferenceEntry> + '_ {
        let derived = ref_type == reference_type::DERIVED_IMAGE;
        self.item_references.iter().filter(move |r| {
            r.reference_type == ref_type
                && if derived {
                    r.from_item_id == item_id
                } else {
                    r.to_item_ids.contains(&item_id)
                }
        })
    }

    /// Input items of a derived image, in stored (tile) order.
    pub fn derived_image_children(&self, item_id: u32) -> Option<&[u32]> {
        self.references(item_id, reference_type::DERIVED_IMAGE)
            .next()
            .map(|r| &r.to_item_ids[..])
    }

    pub fn spatial_extents(&self, item_id: u32) -> Option<ImageSpatialExtents> {
        match self.property(item_id, BoxType::ImageSpatialExtentsProperty)? {
            ItemProperty::ImageSpatialExtents(ispe) => Some(*ispe),
            _ => None,
        }
    }

    pub fn av1_config(&self, item_id: u32) -> Option<&AV1Config> {
        match self.property(item_id, BoxType::AV1CodecConfigurationProperty)? {
            ItemProperty::AV1Config(config) => Some(config),
            _ => None,
        }
    }
}
