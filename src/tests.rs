// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;

use crate::bmff::{BMFFBox, BoxIter, read_box_header};
use crate::boxes::{BoxType, FourCC, item_type, reference_type};
use crate::grid::ImageGridDescriptor;
use crate::item_data::{BufferPool, BufferProvider, OwnedBuffers, fill_from_extents, select_provider};
use crate::meta::{MetaContainer, read_meta};
use crate::offset::OffsetResolver;
use crate::source::RangeReader;
use crate::transform::MirrorAxis;
use crate::tables::{ConstructionMethod, Extent, ImageSpatialExtents, ItemDataBox, ItemProperty, PropertyAssociation, read_iloc, read_iprp};
use crate::writer::{
    BoxWriter, IlocEntry, InfeEntry, IpmaEntry, IrefEntry, write_hdlr, write_iinf, write_iloc, write_iprp, write_iref,
};
use crate::{Error, ParseOptions, Result};

const STRICT: ParseOptions = ParseOptions { lenient: false };
const LENIENT: ParseOptions = ParseOptions { lenient: true };

fn with_first_box<T>(bytes: &[u8], f: impl FnOnce(&mut BMFFBox<'_, [u8]>) -> Result<T>) -> Result<T> {
    let mut reader = RangeReader::new(bytes);
    let mut iter = BoxIter::new(&mut reader);
    let mut b = iter.next_box()?.ok_or(Error::UnexpectedEOF)?;
    f(&mut b)
}

fn parse_meta(bytes: &[u8], options: ParseOptions) -> Result<MetaContainer> {
    with_first_box(bytes, |b| read_meta(b, &options))
}

fn meta_box(content: impl FnOnce(&mut BoxWriter) -> Result<()>) -> std::vec::Vec<u8> {
    let mut w = BoxWriter::new();
    w.write_full_box(BoxType::MetadataBox, 0, 0, content).unwrap();
    w.into_inner()
}

fn infe(item_id: u32, item_type: FourCC) -> InfeEntry<'static> {
    InfeEntry { item_id, item_type, name: "", content_type: None, hidden: false }
}

/// 'iinf' and 'iloc' for `items`, each a single empty extent.
fn write_items(w: &mut BoxWriter, items: &[(u32, FourCC)]) -> Result<()> {
    let entries: std::vec::Vec<_> = items.iter().map(|&(id, t)| infe(id, t)).collect();
    write_iinf(w, &entries)?;
    let extent = [Extent { offset: 0, length: 0 }];
    let locations: std::vec::Vec<_> = items
        .iter()
        .map(|&(item_id, _)| IlocEntry {
            item_id,
            construction_method: ConstructionMethod::File,
            base_offset: 0,
            extents: &extent,
        })
        .collect();
    write_iloc(w, &locations)
}

fn empty_iprp(w: &mut BoxWriter) -> Result<()> {
    write_iprp(w, &[], &[])
}

/// An 'iprp' whose 'ipco' holds one property box with a raw payload.
fn parse_property(name: BoxType, payload: &[u8], options: ParseOptions) -> Result<ItemProperty> {
    let mut w = BoxWriter::new();
    w.write_box(BoxType::ItemPropertiesBox, |w| {
        w.write_box(BoxType::ItemPropertyContainerBox, |w| {
            w.write_box(name, |w| Ok(w.write_all(payload)?))
        })
    })
    .unwrap();
    let table = with_first_box(w.as_bytes(), |b| read_iprp(b, &options))?;
    table.properties.into_iter().next().ok_or(Error::UnexpectedEOF)
}

#[test]
fn compact_extended_and_open_ended_headers() {
    let mut bytes = std::vec::Vec::new();
    bytes.extend_from_slice(&[0, 0, 0, 12, b'f', b'r', b'e', b'e', 1, 2, 3, 4]);
    bytes.extend_from_slice(&[0, 0, 0, 1, b'm', b'd', b'a', b't', 0, 0, 0, 0, 0, 0, 0, 18, 9, 9]);
    bytes.extend_from_slice(&[0, 0, 0, 0, b's', b'k', b'i', b'p', 7, 7, 7]);

    let mut reader = RangeReader::new(&bytes[..]);

    let free = read_box_header(&mut reader).unwrap().unwrap();
    assert_eq!(free.box_type(), BoxType::FreeSpaceBox);
    assert_eq!((free.size(), free.header_size(), free.payload_start()), (12, 8, 8));
    reader.skip(free.payload_len()).unwrap();

    let mdat = read_box_header(&mut reader).unwrap().unwrap();
    assert_eq!(mdat.box_type(), BoxType::MediaDataBox);
    assert!(mdat.is_large());
    assert_eq!((mdat.size(), mdat.header_size(), mdat.payload_len()), (18, 16, 2));
    reader.skip(mdat.payload_len()).unwrap();

    let skip = read_box_header(&mut reader).unwrap().unwrap();
    assert!(skip.extends_to_end());
    assert_eq!(skip.size(), 11);
    assert_eq!(skip.payload_end(), bytes.len() as u64);
    reader.skip(skip.payload_len()).unwrap();

    assert!(read_box_header(&mut reader).unwrap().is_none());
}

#[test]
fn truncated_or_overrunning_headers() {
    let short = [0u8, 0, 0, 12, b'f', b'r'];
    let mut reader = RangeReader::new(&short[..]);
    assert!(matches!(read_box_header(&mut reader), Err(Error::MalformedContainer(_))));

    let overrun = [0u8, 0, 0, 100, b'f', b'r', b'e', b'e', 0, 0];
    let mut reader = RangeReader::new(&overrun[..]);
    assert!(matches!(read_box_header(&mut reader), Err(Error::MalformedContainer(_))));

    let too_small = [0u8, 0, 0, 4, b'f', b'r', b'e', b'e'];
    let mut reader = RangeReader::new(&too_small[..]);
    assert!(matches!(read_box_header(&mut reader), Err(Error::MalformedContainer(_))));

    let short_large = [0u8, 0, 0, 1, b'm', b'd', b'a', b't', 0, 0];
    let mut reader = RangeReader::new(&short_large[..]);
    assert!(matches!(read_box_header(&mut reader), Err(Error::MalformedContainer(_))));
}

#[test]
fn uuid_box_header_includes_extended_type() {
    let mut w = BoxWriter::new();
    w.write_u32::<BigEndian>(8 + 16 + 1).unwrap();
    w.write_u32::<BigEndian>(u32::from(BoxType::UuidBox)).unwrap();
    w.write_all(&[0xab; 16]).unwrap();
    w.write_u8(0).unwrap();
    let bytes = w.into_inner();

    let mut reader = RangeReader::new(&bytes[..]);
    let header = read_box_header(&mut reader).unwrap().unwrap();
    assert_eq!(header.header_size(), 24);
    assert_eq!(header.payload_len(), 1);
    assert_eq!(header.uuid(), Some(&[0xab; 16]));
}

#[test]
fn file_offsets_are_bounded_by_file_length() {
    let resolver = OffsetResolver::new(100, None);
    let file = ConstructionMethod::File;

    assert_eq!(resolver.resolve(0, file, &Extent { offset: 90, length: 10 }).unwrap(), 90);
    assert!(matches!(
        resolver.resolve(0, file, &Extent { offset: 90, length: 11 }),
        Err(Error::InvalidOffset(_))
    ));
    assert_eq!(resolver.resolve(80, file, &Extent { offset: 10, length: 10 }).unwrap(), 90);
    assert!(resolver.resolve(81, file, &Extent { offset: 10, length: 10 }).is_err());

    // An empty extent at the very end is still inside the file
    assert_eq!(resolver.resolve(0, file, &Extent { offset: 100, length: 0 }).unwrap(), 100);
    assert!(resolver.resolve(0, file, &Extent { offset: 101, length: 0 }).is_err());

    assert!(matches!(
        resolver.resolve(u64::MAX, file, &Extent { offset: 1, length: 0 }),
        Err(Error::InvalidOffset(_))
    ));
    assert!(matches!(
        resolver.resolve(0, file, &Extent { offset: u64::MAX, length: 1 }),
        Err(Error::InvalidOffset(_))
    ));
}

#[test]
fn offsets_beyond_i64_are_rejected() {
    let resolver = OffsetResolver::new(u64::MAX, None);
    let extent = Extent { offset: i64::MAX as u64 + 1, length: 0 };
    assert!(matches!(
        resolver.resolve(0, ConstructionMethod::File, &extent),
        Err(Error::InvalidOffset(_))
    ));
    let extent = Extent { offset: i64::MAX as u64, length: 0 };
    assert!(resolver.resolve(0, ConstructionMethod::File, &extent).is_ok());
}

#[test]
fn idat_offsets_are_relative_to_idat_payload() {
    let idat = ItemDataBox { offset: 50, length: 20 };
    let resolver = OffsetResolver::new(100, Some(idat));
    let method = ConstructionMethod::Idat;

    assert_eq!(resolver.resolve(0, method, &Extent { offset: 5, length: 10 }).unwrap(), 55);
    assert_eq!(resolver.resolve(5, method, &Extent { offset: 5, length: 10 }).unwrap(), 60);
    assert!(matches!(
        resolver.resolve(0, method, &Extent { offset: 15, length: 10 }),
        Err(Error::InvalidOffset(_))
    ));

    let without_idat = OffsetResolver::new(100, None);
    assert!(matches!(
        without_idat.resolve(0, method, &Extent { offset: 0, length: 1 }),
        Err(Error::InvalidOffset(_))
    ));
}

#[test]
fn iloc_with_wide_fields() {
    let extents = [
        Extent { offset: 0x1_0000_0000, length: 3 },
        Extent { offset: 7, length: 0x1_0000_0001 },
    ];
    let entries = [IlocEntry {
        item_id: 0x1_0000,
        construction_method: ConstructionMethod::File,
        base_offset: 12,
        extents: &extents,
    }];
    let mut w = BoxWriter::new();
    write_iloc(&mut w, &entries).unwrap();
    let bytes = w.into_inner();
    // version 2 for the 32-bit item id
    assert_eq!(bytes[8], 2);
    // 8-byte offsets and lengths, 4-byte base offset
    assert_eq!(bytes[12], 0x88);
    assert_eq!(bytes[13], 0x40);

    let items = with_first_box(&bytes, |b| read_iloc(b, &STRICT)).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].item_id(), 0x1_0000);
    assert_eq!(items[0].base_offset(), 12);
    assert_eq!(items[0].extents(), &extents[..]);
    assert_eq!(items[0].total_size().unwrap(), 0x1_0000_0004);
}

#[test]
fn iloc_rejects_unsupported_locations() {
    let mut w = BoxWriter::new();
    w.write_full_box(BoxType::ItemLocationBox, 1, 0, |w| {
        w.write_u8(0x44)?;
        w.write_u8(0)?;
        w.write_u16::<BigEndian>(1)?; // item_count
        w.write_u16::<BigEndian>(1)?; // item_ID
        w.write_u16::<BigEndian>(2)?; // construction_method = item
        w.write_u16::<BigEndian>(0)?;
        w.write_u16::<BigEndian>(1)?;
        w.write_u32::<BigEndian>(0)?;
        w.write_u32::<BigEndian>(4)?;
        Ok(())
    })
    .unwrap();
    let result = with_first_box(w.as_bytes(), |b| read_iloc(b, &STRICT));
    assert!(matches!(result, Err(Error::Unsupported(_))));

    let mut w = BoxWriter::new();
    w.write_full_box(BoxType::ItemLocationBox, 0, 0, |w| {
        w.write_u8(0x44)?;
        w.write_u8(0)?;
        w.write_u16::<BigEndian>(1)?;
        w.write_u16::<BigEndian>(1)?;
        w.write_u16::<BigEndian>(0)?;
        w.write_u16::<BigEndian>(0)?; // extent_count
        Ok(())
    })
    .unwrap();
    let result = with_first_box(w.as_bytes(), |b| read_iloc(b, &STRICT));
    assert!(matches!(result, Err(Error::InvalidData(_))));
}

#[test]
fn ipma_essential_flag_and_wide_indices() {
    let properties = [ItemProperty::ImageSpatialExtents(ImageSpatialExtents { width: 1, height: 1 })];
    let associations = [
        PropertyAssociation { property_index: 1, essential: false },
        PropertyAssociation { property_index: 200, essential: true },
    ];
    let entries = [IpmaEntry { item_id: 3, associations: &associations }];
    let mut w = BoxWriter::new();
    write_iprp(&mut w, &properties, &entries).unwrap();

    let table = with_first_box(w.as_bytes(), |b| read_iprp(b, &STRICT)).unwrap();
    assert_eq!(table.properties.len(), 1);
    assert_eq!(table.associations.len(), 1);
    assert_eq!(table.associations[0].item_id, 3);
    assert_eq!(&table.associations[0].associations[..], &associations[..]);

    let narrow = [PropertyAssociation { property_index: 127, essential: true }];
    let entries = [IpmaEntry { item_id: 3, associations: &narrow }];
    let mut w = BoxWriter::new();
    write_iprp(&mut w, &properties, &entries).unwrap();
    let table = with_first_box(w.as_bytes(), |b| read_iprp(b, &STRICT)).unwrap();
    assert_eq!(&table.associations[0].associations[..], &narrow[..]);
}

#[test]
fn dimg_is_looked_up_from_the_derived_item() {
    let children = [10, 11, 12, 13];
    let bytes = meta_box(|w| {
        write_hdlr(w, FourCC::new(b"pict"))?;
        write_items(w, &[
            (5, item_type::IMAGE_GRID),
            (10, item_type::AV1_IMAGE),
            (11, item_type::AV1_IMAGE),
            (12, item_type::AV1_IMAGE),
            (13, item_type::AV1_IMAGE),
        ])?;
        write_iref(w, &[IrefEntry {
            reference_type: reference_type::DERIVED_IMAGE,
            from_item_id: 5,
            to_item_ids: &children,
        }])?;
        empty_iprp(w)
    });
    let meta = parse_meta(&bytes, STRICT).unwrap();

    let dimg: std::vec::Vec<_> = meta.references(5, reference_type::DERIVED_IMAGE).collect();
    assert_eq!(dimg.len(), 1);
    assert_eq!(dimg[0].to_item_ids(), &children[..]);
    assert_eq!(meta.derived_image_children(5), Some(&children[..]));

    assert_eq!(meta.references(10, reference_type::DERIVED_IMAGE).count(), 0);
    assert_eq!(meta.derived_image_children(10), None);
}

#[test]
fn auxiliary_references_are_looked_up_from_the_target() {
    let bytes = meta_box(|w| {
        write_hdlr(w, FourCC::new(b"pict"))?;
        write_items(w, &[(1, item_type::AV1_IMAGE), (2, item_type::AV1_IMAGE)])?;
        write_iref(w, &[IrefEntry { reference_type: reference_type::AUXILIARY, from_item_id: 2, to_item_ids: &[1] }])?;
        empty_iprp(w)
    });
    let meta = parse_meta(&bytes, STRICT).unwrap();
    let auxl: std::vec::Vec<_> = meta.references(1, reference_type::AUXILIARY).map(|r| r.from_item_id()).collect();
    assert_eq!(auxl, [2]);
    assert_eq!(meta.references(2, reference_type::AUXILIARY).count(), 0);
}

#[test]
fn essential_associations_must_resolve_to_known_properties() {
    let bytes = meta_box(|w| {
        write_hdlr(w, FourCC::new(b"pict"))?;
        write_items(w, &[(1, item_type::AV1_IMAGE), (2, item_type::AV1_IMAGE), (3, item_type::AV1_IMAGE)])?;
        w.write_box(BoxType::ItemPropertiesBox, |w| {
            w.write_box(BoxType::ItemPropertyContainerBox, |w| {
                // A colour type this crate does not interpret
                w.write_box(BoxType::ColorInformationProperty, |w| {
                    w.write_fourcc(FourCC::new(b"abcd"))?;
                    w.write_u32::<BigEndian>(0)?;
                    Ok(())
                })?;
                w.write_full_box(BoxType::ImageSpatialExtentsProperty, 0, 0, |w| {
                    w.write_u32::<BigEndian>(8)?;
                    w.write_u32::<BigEndian>(8)?;
                    Ok(())
                })
            })?;
            w.write_full_box(BoxType::ItemPropertyAssociationBox, 0, 0, |w| {
                w.write_u32::<BigEndian>(3)?;
                // item 1: unknown property, not essential; ispe essential
                w.write_u16::<BigEndian>(1)?;
                w.write_u8(2)?;
                w.write_u8(0x01)?;
                w.write_u8(0x82)?;
                // item 2: unknown property, essential
                w.write_u16::<BigEndian>(2)?;
                w.write_u8(1)?;
                w.write_u8(0x81)?;
                // item 3: index 0 and past the end, both essential
                w.write_u16::<BigEndian>(3)?;
                w.write_u8(2)?;
                w.write_u8(0x80)?;
                w.write_u8(0x85)?;
                Ok(())
            })
        })
    });
    let meta = parse_meta(&bytes, STRICT).unwrap();

    assert!(matches!(meta.properties()[0], ItemProperty::Unknown(_)));
    assert!(!meta.has_unsupported_essential_property(1));
    assert!(meta.check_essential_properties(1).is_ok());
    assert_eq!(meta.spatial_extents(1), Some(ImageSpatialExtents { width: 8, height: 8 }));

    assert!(meta.has_unsupported_essential_property(2));
    assert!(matches!(meta.check_essential_properties(2), Err(Error::UnsupportedEssentialProperty(2))));
    assert!(meta.has_unsupported_essential_property(3));
}

#[test]
fn meta_requires_item_tables() {
    let no_iloc = meta_box(|w| {
        write_hdlr(w, FourCC::new(b"pict"))?;
        write_iinf(w, &[infe(1, item_type::AV1_IMAGE)])?;
        empty_iprp(w)
    });
    assert!(matches!(parse_meta(&no_iloc, STRICT), Err(Error::MissingRequiredBox("iloc"))));

    let no_iprp = meta_box(|w| {
        write_hdlr(w, FourCC::new(b"pict"))?;
        write_items(w, &[(1, item_type::AV1_IMAGE)])
    });
    assert!(matches!(parse_meta(&no_iprp, STRICT), Err(Error::MissingRequiredBox("iprp"))));

    let twice = meta_box(|w| {
        write_hdlr(w, FourCC::new(b"pict"))?;
        write_items(w, &[(1, item_type::AV1_IMAGE)])?;
        write_iinf(w, &[infe(1, item_type::AV1_IMAGE)])?;
        empty_iprp(w)
    });
    assert!(matches!(parse_meta(&twice, STRICT), Err(Error::MalformedContainer(_))));
}

#[test]
fn handler_must_be_pict_unless_lenient() {
    let bytes = meta_box(|w| {
        write_hdlr(w, FourCC::new(b"vide"))?;
        write_items(w, &[(1, item_type::AV1_IMAGE)])?;
        empty_iprp(w)
    });
    assert!(matches!(parse_meta(&bytes, STRICT), Err(Error::InvalidData(_))));
    let meta = parse_meta(&bytes, LENIENT).unwrap();
    assert_eq!(meta.handler_type(), Some(FourCC::new(b"vide")));

    let missing = meta_box(|w| {
        write_items(w, &[(1, item_type::AV1_IMAGE)])?;
        empty_iprp(w)
    });
    assert_eq!(parse_meta(&missing, STRICT).unwrap().handler_type(), None);
    assert!(parse_meta(&missing, LENIENT).is_ok());
}

#[test]
fn item_info_details() {
    let bytes = meta_box(|w| {
        write_hdlr(w, FourCC::new(b"pict"))?;
        write_iinf(w, &[
            InfeEntry { item_id: 1, item_type: item_type::AV1_IMAGE, name: "Color", content_type: None, hidden: false },
            InfeEntry { item_id: 2, item_type: item_type::AV1_IMAGE, name: "", content_type: None, hidden: true },
            InfeEntry {
                item_id: 3,
                item_type: item_type::MIME,
                name: "XMP",
                content_type: Some("application/rdf+xml"),
                hidden: false,
            },
        ])?;
        let extent = [Extent { offset: 0, length: 0 }];
        let locations: std::vec::Vec<_> = (1..=3)
            .map(|item_id| IlocEntry {
                item_id,
                construction_method: ConstructionMethod::File,
                base_offset: 0,
                extents: &extent,
            })
            .collect();
        write_iloc(w, &locations)?;
        empty_iprp(w)
    });
    let meta = parse_meta(&bytes, STRICT).unwrap();

    let color = meta.item_info(1).unwrap();
    assert_eq!(color.name(), Some("Color"));
    assert!(!color.is_hidden());
    assert!(meta.item_info(2).unwrap().is_hidden());
    let xmp = meta.item_info(3).unwrap();
    assert_eq!(xmp.item_type(), item_type::MIME);
    assert_eq!(xmp.content_type(), Some("application/rdf+xml"));
    assert!(meta.item_info(4).is_none());
}

#[test]
fn iinf_entry_count_must_match() {
    let bytes = meta_box(|w| {
        write_hdlr(w, FourCC::new(b"pict"))?;
        let mut iinf = BoxWriter::new();
        write_iinf(&mut iinf, &[infe(1, item_type::AV1_IMAGE)])?;
        let mut iinf = iinf.into_inner();
        // entry_count follows the 8-byte header and the version/flags word
        iinf[13] = 2;
        w.write_all(&iinf)?;
        let extent = [Extent { offset: 0, length: 0 }];
        write_iloc(w, &[IlocEntry { item_id: 1, construction_method: ConstructionMethod::File, base_offset: 0, extents: &extent }])?;
        empty_iprp(w)
    });
    assert!(matches!(parse_meta(&bytes, STRICT), Err(Error::InvalidData(_))));
    let meta = parse_meta(&bytes, LENIENT).unwrap();
    assert_eq!(meta.item_infos().len(), 1);
}

#[test]
fn grid_descriptor_layouts() {
    let small = [0u8, 0, 1, 2, 0x01, 0x00, 0x00, 0xc8];
    let grid = ImageGridDescriptor::parse(&small).unwrap();
    assert_eq!((grid.tile_rows(), grid.tile_columns(), grid.tile_count()), (2, 3, 6));
    assert_eq!((grid.output_width, grid.output_height), (256, 200));

    let large = [0u8, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 16];
    let grid = ImageGridDescriptor::parse(&large).unwrap();
    assert_eq!(grid.tile_count(), 1);
    assert_eq!((grid.output_width, grid.output_height), (65536, 16));

    let mut written = std::vec::Vec::new();
    grid.write(&mut written).unwrap();
    assert_eq!(written, large);

    assert!(matches!(ImageGridDescriptor::parse(&[1, 0, 0, 0, 0, 1, 0, 1]), Err(Error::Unsupported(_))));
    assert!(matches!(ImageGridDescriptor::parse(&[0, 0, 0, 0, 0, 0, 0, 1]), Err(Error::InvalidData(_))));
    assert!(matches!(ImageGridDescriptor::parse(&small[..6]), Err(Error::UnexpectedEOF)));
}

#[test]
fn extents_must_fill_the_item_exactly() {
    let source = &b"abcdefgh"[..];
    let ranges = [(0, 2), (4, 2)];

    let mut dest = [0u8; 4];
    fill_from_extents(source, &ranges, &mut dest).unwrap();
    assert_eq!(&dest, b"abef");

    let mut longer = [0u8; 5];
    assert!(matches!(fill_from_extents(source, &ranges, &mut longer), Err(Error::ExtentSizeMismatch)));
    let mut shorter = [0u8; 3];
    assert!(matches!(fill_from_extents(source, &ranges, &mut shorter), Err(Error::ExtentSizeMismatch)));

    let mut empty = [0u8; 0];
    fill_from_extents(source, &[(8, 0)], &mut empty).unwrap();
}

#[test]
fn pooled_slabs_are_reused() {
    let pool = BufferPool::new(64);
    let first = pool.allocate(10).unwrap();
    assert!(first.is_pooled());
    assert_eq!(first.len(), 10);
    assert_eq!(pool.available(), 0);
    first.release();
    assert_eq!(pool.available(), 1);

    let mut second = pool.allocate(20).unwrap();
    assert_eq!(pool.available(), 0);
    assert!(second.iter().all(|&b| b == 0));
    second.as_mut_slice()[0] = 1;
    drop(second);
    assert_eq!(pool.available(), 1);

    let third = pool.allocate(20).unwrap();
    assert_eq!(third[0], 0, "recycled slabs are zeroed");
}

#[test]
fn pool_retains_a_bounded_number_of_slabs() {
    let pool = BufferPool::with_retained(16, 1);
    let a = pool.allocate(4).unwrap();
    let b = pool.allocate(4).unwrap();
    drop(a);
    drop(b);
    assert_eq!(pool.available(), 1);
}

#[test]
fn provider_follows_the_threshold() {
    let pool = BufferPool::new(16);
    let owned = OwnedBuffers;
    assert!(select_provider(15, 16, &pool, &owned).allocate(15).unwrap().is_pooled());
    assert!(!select_provider(16, 16, &pool, &owned).allocate(16).unwrap().is_pooled());
    assert!(!select_provider(0, 0, &pool, &owned).allocate(0).unwrap().is_pooled());
}

#[test]
fn exif_prefix_is_hidden_from_the_view() {
    let owned = OwnedBuffers;
    let mut data = owned.allocate(6).unwrap();
    data.as_mut_slice().copy_from_slice(b"\0\0\0\0MM");
    data.skip_prefix(4).unwrap();
    assert_eq!(&data[..], b"MM");
    assert!(data.skip_prefix(3).is_err());
    assert_eq!(data.to_try_vec().unwrap(), b"MM".as_ref());
}

#[test]
fn mirror_reserved_bits_are_always_fatal() {
    let axis = parse_property(BoxType::ImageMirrorProperty, &[0x01], STRICT).unwrap();
    assert!(matches!(axis, ItemProperty::Mirror(MirrorAxis::Horizontal)));
    let axis = parse_property(BoxType::ImageMirrorProperty, &[0x00], STRICT).unwrap();
    assert!(matches!(axis, ItemProperty::Mirror(MirrorAxis::Vertical)));

    for options in [STRICT, LENIENT] {
        assert!(matches!(
            parse_property(BoxType::ImageMirrorProperty, &[0x81], options),
            Err(Error::InvalidData(_))
        ));
    }
}

#[test]
fn av1c_marker_and_version() {
    let property = parse_property(BoxType::AV1CodecConfigurationProperty, &[0x81, 0x08, 0x0c, 0x00], STRICT).unwrap();
    let ItemProperty::AV1Config(config) = property else {
        panic!("expected an av1C property");
    };
    assert_eq!((config.seq_profile, config.seq_level_idx_0), (0, 8));
    assert_eq!((config.chroma_subsampling_x, config.chroma_subsampling_y), (1, 1));
    assert!(config.config_obus.is_empty());

    // marker bit clear, then version 2
    for first in [0x01, 0x82] {
        assert!(matches!(
            parse_property(BoxType::AV1CodecConfigurationProperty, &[first, 0x08, 0x0c, 0x00], LENIENT),
            Err(Error::InvalidData(_))
        ));
    }
}
