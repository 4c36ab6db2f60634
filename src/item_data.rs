// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Materializing item bytes.
//!
//! Small items are read into slabs borrowed from a [`BufferPool`]; items at or
//! above the configured threshold get a buffer of their own from
//! [`OwnedBuffers`]. Both come back as [`AvifItemData`].

use log::debug;
use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use crate::offset::OffsetResolver;
use crate::source::ByteSource;
use crate::tables::ItemLocationEntry;
use crate::{DecodeConfig, Error, Result, TryVec};

/// Hands out zero-filled storage for item data.
pub trait BufferProvider {
    /// Storage for exactly `len` bytes.
    fn allocate(&self, len: usize) -> Result<AvifItemData>;
}

/// Allocates a fresh buffer sized exactly to each item.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnedBuffers;

impl BufferProvider for OwnedBuffers {
    fn allocate(&self, len: usize) -> Result<AvifItemData> {
        let mut buf = std::vec::Vec::new();
        buf.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
        buf.resize(len, 0);
        Ok(AvifItemData::new(Storage::Owned(buf)))
    }
}

struct PoolInner {
    free: RefCell<std::vec::Vec<std::vec::Vec<u8>>>,
    slab_size: usize,
    max_retained: usize,
}

impl PoolInner {
    fn give_back(&self, mut slab: std::vec::Vec<u8>) {
        let mut free = self.free.borrow_mut();
        if free.len() < self.max_retained && slab.capacity() <= self.slab_size {
            slab.clear();
            free.push(slab);
        }
    }
}

/// Reusable slabs for small items.
///
/// Cloning shares the same free list. Slabs return to it when the
/// [`AvifItemData`] using them is released or dropped; a leaked item only
/// costs pool capacity.
#[derive(Clone)]
pub struct BufferPool {
    inner: Rc<PoolInner>,
}

impl BufferPool {
    /// Slabs retained by default when none are in use.
    pub const DEFAULT_RETAINED: usize = 8;

    pub fn new(slab_size: usize) -> Self {
        Self::with_retained(slab_size, Self::DEFAULT_RETAINED)
    }

    pub fn with_retained(slab_size: usize, max_retained: usize) -> Self {
        Self {
            inner: Rc::new(PoolInner {
                free: RefCell::new(std::vec::Vec::new()),
                slab_size,
                max_retained,
            }),
        }
    }

    /// Slabs currently waiting for reuse.
    pub fn available(&self) -> usize {
        self.inner.free.borrow().len()
    }

    pub fn slab_size(&self) -> usize {
        self.inner.slab_size
    }
}

impl BufferProvider for BufferPool {
    fn allocate(&self, len: usize) -> Result<AvifItemData> {
        let recycled = self.inner.free.borrow_mut().pop();
        let mut slab = match recycled {
            Some(slab) => slab,
            None => {
                let mut slab = std::vec::Vec::new();
                slab.try_reserve_exact(self.inner.slab_size.max(len))
                    .map_err(|_| Error::OutOfMemory)?;
                slab
            },
        };
        if slab.capacity() < len {
            slab.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
        }
        slab.resize(len, 0);
        Ok(AvifItemData::new(Storage::Pooled { slab, pool: Rc::clone(&self.inner) }))
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("slab_size", &self.inner.slab_size)
            .field("available", &self.available())
            .finish()
    }
}

/// The one place deciding between the two storage strategies.
pub(crate) fn select_provider<'p>(
    len: usize,
    threshold: usize,
    pool: &'p BufferPool,
    owned: &'p OwnedBuffers,
) -> &'p dyn BufferProvider {
    if len < threshold {
        pool
    } else {
        owned
    }
}

enum Storage {
    Owned(std::vec::Vec<u8>),
    Pooled {
        slab: std::vec::Vec<u8>,
        pool: Rc<PoolInner>,
    },
}

/// Bytes of one item, owned by the caller.
///
/// Dereferences to `[u8]`. Call [`AvifItemData::release`] (or drop it) when
/// done so pooled storage can be reused.
pub struct AvifItemData {
    storage: Storage,
    /// Leading bytes hidden from the view (the Exif header offset).
    start: usize,
}

impl AvifItemData {
    fn new(storage: Storage) -> Self {
        Self { storage, start: 0 }
    }

    fn buffer(&self) -> &[u8] {
        match &self.storage {
            Storage::Owned(buf) => buf,
            Storage::Pooled { slab, .. } => slab,
        }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.storage {
            Storage::Owned(buf) => buf,
            Storage::Pooled { slab, .. } => slab,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer()[self.start..]
    }

    /// Whether the bytes live in a pooled slab.
    pub fn is_pooled(&self) -> bool {
        matches!(self.storage, Storage::Pooled { .. })
    }

    /// Hide the first `len` bytes of the current view.
    pub(crate) fn skip_prefix(&mut self, len: usize) -> Result<()> {
        let start = self.start.checked_add(len).filter(|&s| s <= self.buffer().len());
        self.start = start.ok_or(Error::InvalidData("prefix longer than item data"))?;
        Ok(())
    }

    /// Copy the bytes out into a plain vector.
    pub fn to_try_vec(&self) -> Result<TryVec<u8>> {
        let mut vec = TryVec::with_capacity(self.len())?;
        vec.extend_from_slice(self.as_slice())?;
        Ok(vec)
    }

    /// Give the storage back. Pooled slabs become available for the next item.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AvifItemData {
    fn drop(&mut self) {
        if let Storage::Pooled { slab, pool } = &mut self.storage {
            pool.give_back(std::mem::take(slab));
        }
    }
}

impl Deref for AvifItemData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for AvifItemData {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for AvifItemData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvifItemData")
            .field("len", &self.len())
            .field("pooled", &self.is_pooled())
            .finish()
    }
}

/// Read the item described by `entry` from `source`.
///
/// All extents are resolved, and so bounds-checked, before the first read.
pub(crate) fn read_item<S: ByteSource + ?Sized>(
    source: &S,
    resolver: &OffsetResolver,
    entry: &ItemLocationEntry,
    config: &DecodeConfig,
    pool: &BufferPool,
) -> Result<AvifItemData> {
    let total = entry.total_size()?;
    config.validate_item_size(total)?;

    let mut ranges = TryVec::with_capacity(entry.extents.len())?;
    for extent in entry.extents.iter() {
        let offset = resolver.resolve(entry.base_offset, entry.construction_method, extent)?;
        ranges.push((offset, extent.length))?;
    }

    let len = usize::try_from(total)?;
    let owned = OwnedBuffers;
    let mut data = select_provider(len, config.pooled_buffer_threshold, pool, &owned).allocate(len)?;
    debug!(
        "item {}: {} bytes in {} extent(s), {}",
        entry.item_id,
        len,
        ranges.len(),
        if data.is_pooled() { "pooled" } else { "owned" }
    );
    fill_from_extents(source, &ranges, data.as_mut_slice())?;
    Ok(data)
}

/// Copy `(offset, length)` ranges one after another into `dest`, which must
/// be filled exactly.
pub(crate) fn fill_from_extents<S: ByteSource + ?Sized>(source: &S, ranges: &[(u64, u64)], dest: &mut [u8]) -> Result<()> {
    let mut remaining = dest;
    for &(offset, length) in ranges {
        let length = usize::try_from(length).map_err(|_| Error::ExtentSizeMismatch)?;
        if length > remaining.len() {
            return Err(Error::ExtentSizeMismatch);
        }
        let (chunk, rest) = std::mem::take(&mut remaining).split_at_mut(length);
        source.read_exact_at(offset, chunk)?;
        remaining = rest;
    }
    if remaining.is_empty() {
        Ok(())
    } else {
        Err(Error::ExtentSizeMismatch)
    }
}
