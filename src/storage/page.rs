//! # Slotted Page
//!
//! Every 8 KiB page begins with a 40-byte header; tuple data grows upward
//! from the header end and the slot directory grows downward from the end
//! of the page.
//!
//! ## Page Header Layout (40 bytes)
//!
//! ```text
//! Offset  Size  Field                Persisted  Description
//! ------  ----  -------------------  ---------  ---------------------------
//! 0       2     page_id              yes        Low 16 bits of the page id
//! 2       2     slot_id              yes        Reserved, kept for layout
//! 4       2     free_start           yes        First byte of free region
//! 6       2     free_end             yes        One past last free byte
//! 8       2     slot_count           yes        Directory entries allocated
//! 10      1     page_type            yes        Data / Index / Fsm
//! 11      1     flags                yes        Reserved
//! 12      4     checksum             yes        CRC32 over persisted bytes
//! 16      2     deleted_tuple_count  no         Runtime, re-derived on load
//! 24      8     fragmented_bytes     no         Runtime
//! 32      1     is_dirty             no         Runtime
//! 40..    -     data + directory     yes        Tuples up, slots down
//! ```
//!
//! ## Slot Directory
//!
//! Slot `N` occupies bytes `[PAGE_SIZE - (N+1)*8, PAGE_SIZE - N*8)`. Each
//! entry is 8 bytes: `offset:u16, length:u16, flags:u8, next_ptr:u8[3]`.
//! The 24-bit `next_ptr` encodes a forwarding target as a 16-bit page id
//! plus an 8-bit slot id, which limits forwarding targets to page ids below
//! 65536 and slot ids below 256.
//!
//! ## Checksum Coverage
//!
//! The CRC32 streams exactly three ranges: header bytes `[0, 12)`, four
//! zero bytes standing in for the checksum field, and bytes `[40, 8192)`.
//! The runtime metadata between 16 and 40 never reaches the digest, so the
//! checksum stays stable across the zero-before-write / recompute-on-read
//! cycle.
//!
//! ## Forwarding and Compaction
//!
//! An updated tuple that no longer fits in place is moved to another page
//! and its slot becomes a forwarding stub. Compaction rewrites live tuples
//! densely but never renumbers slots: external forwarding pointers must
//! stay valid.

use smallvec::SmallVec;
use thiserror::Error;
use tracing::{debug, warn};
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{
    CHECKSUM_OFFSET, MAX_FORWARD_HOPS, PAGE_HEADER_SIZE, PAGE_SIZE, SLOT_ENTRY_SIZE,
};
use crate::storage::checksum::CRC32;
use crate::storage::TupleId;

/// Slot flag: entry refers to live tuple bytes.
pub const SLOT_VALID: u8 = 0x01;
/// Slot flag: entry redirects to another (page, slot).
pub const SLOT_FORWARDED: u8 = 0x02;
/// Slot flag: tuple bytes are compressed. Reserved.
pub const SLOT_COMPRESSED: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PageError {
    #[error("tuple data is empty")]
    EmptyTuple,
    #[error("slot {0} is out of range")]
    SlotOutOfRange(u16),
    #[error("slot {0} is not valid")]
    SlotNotValid(u16),
    #[error("slot {0} is already deleted")]
    AlreadyDeleted(u16),
    #[error("slot {0} is forwarded")]
    Forwarded(u16),
    #[error("new size {new} exceeds current size {current}")]
    TooLarge { new: u16, current: u16 },
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct PageHeader {
    page_id: U16,
    slot_id: U16,
    free_start: U16,
    free_end: U16,
    slot_count: U16,
    page_type: u8,
    flags: u8,
    checksum: U32,
    deleted_tuple_count: U16,
    _pad0: [u8; 6],
    fragmented_bytes: U64,
    is_dirty: u8,
    _pad1: [u8; 7],
}

const _: () = assert!(std::mem::size_of::<PageHeader>() == PAGE_HEADER_SIZE);

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SlotEntry {
    offset: U16,
    length: U16,
    flags: u8,
    next_ptr: [u8; 3],
}

const _: () = assert!(std::mem::size_of::<SlotEntry>() == SLOT_ENTRY_SIZE);

impl SlotEntry {
    pub fn offset(&self) -> u16 {
        self.offset.get()
    }

    pub fn length(&self) -> u16 {
        self.length.get()
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn is_valid(&self) -> bool {
        self.flags & SLOT_VALID != 0
    }

    pub fn is_forwarded(&self) -> bool {
        self.flags & SLOT_FORWARDED != 0
    }

    fn set_forwarding(&mut self, target_page: u32, target_slot: u16) {
        debug_assert!(target_page < 1 << 16, "forwarding target page exceeds 16 bits");
        debug_assert!(target_slot < 1 << 8, "forwarding target slot exceeds 8 bits");
        self.next_ptr[0] = (target_page & 0xFF) as u8;
        self.next_ptr[1] = ((target_page >> 8) & 0xFF) as u8;
        self.next_ptr[2] = (target_slot & 0xFF) as u8;
        self.flags |= SLOT_FORWARDED;
    }

    fn forwarding_target(&self) -> TupleId {
        TupleId {
            page_id: self.next_ptr[0] as u32 | ((self.next_ptr[1] as u32) << 8),
            slot_id: self.next_ptr[2] as u16,
        }
    }
}

fn slot_byte_offset(slot_id: u16) -> usize {
    PAGE_SIZE - (slot_id as usize + 1) * SLOT_ENTRY_SIZE
}

/// An 8 KiB page owning its buffer. All slot operations leave the page with
/// a valid checksum; runtime metadata (dirty flag, fragmentation counters)
/// lives in header bytes the checksum never covers.
pub struct Page {
    buf: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    /// Creates a zeroed page with an empty data region and directory.
    pub fn new() -> Self {
        let mut page = Self {
            buf: Box::new([0u8; PAGE_SIZE]),
        };
        {
            let header = page.header_mut();
            header.free_start.set(PAGE_HEADER_SIZE as u16);
            header.free_end.set(PAGE_SIZE as u16);
            header.is_dirty = 1;
        }
        page.update_checksum();
        page
    }

    fn header(&self) -> &PageHeader {
        // INVARIANT: the header overlay is Unaligned and exactly
        // PAGE_HEADER_SIZE bytes, so the parse cannot fail.
        PageHeader::ref_from_bytes(&self.buf[..PAGE_HEADER_SIZE]).expect("const-sized header")
    }

    fn header_mut(&mut self) -> &mut PageHeader {
        // INVARIANT: see header().
        PageHeader::mut_from_bytes(&mut self.buf[..PAGE_HEADER_SIZE]).expect("const-sized header")
    }

    fn slot(&self, slot_id: u16) -> &SlotEntry {
        let at = slot_byte_offset(slot_id);
        // INVARIANT: the slot overlay is Unaligned and exactly
        // SLOT_ENTRY_SIZE bytes.
        SlotEntry::ref_from_bytes(&self.buf[at..at + SLOT_ENTRY_SIZE]).expect("const-sized slot")
    }

    fn slot_mut(&mut self, slot_id: u16) -> &mut SlotEntry {
        let at = slot_byte_offset(slot_id);
        // INVARIANT: see slot().
        SlotEntry::mut_from_bytes(&mut self.buf[at..at + SLOT_ENTRY_SIZE])
            .expect("const-sized slot")
    }

    pub fn buffer(&self) -> &[u8; PAGE_SIZE] {
        &self.buf
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.buf
    }

    pub fn page_id(&self) -> u16 {
        self.header().page_id.get()
    }

    pub fn set_page_id(&mut self, page_id: u16) {
        self.header_mut().page_id.set(page_id);
        self.update_checksum();
    }

    pub fn free_start(&self) -> u16 {
        self.header().free_start.get()
    }

    pub fn free_end(&self) -> u16 {
        self.header().free_end.get()
    }

    pub fn slot_count(&self) -> u16 {
        self.header().slot_count.get()
    }

    pub fn page_type(&self) -> u8 {
        self.header().page_type
    }

    pub fn set_page_type(&mut self, page_type: u8) {
        self.header_mut().page_type = page_type;
        self.update_checksum();
    }

    pub fn stored_checksum(&self) -> u32 {
        self.header().checksum.get()
    }

    pub fn is_dirty(&self) -> bool {
        self.header().is_dirty != 0
    }

    pub fn mark_dirty(&mut self) {
        self.header_mut().is_dirty = 1;
    }

    pub fn deleted_tuple_count(&self) -> u16 {
        self.header().deleted_tuple_count.get()
    }

    pub fn fragmented_bytes(&self) -> u64 {
        self.header().fragmented_bytes.get()
    }

    /// Free bytes between the data region and the slot directory.
    pub fn available_space(&self) -> usize {
        let header = self.header();
        let (start, end) = (header.free_start.get(), header.free_end.get());
        if end < start {
            warn!(free_start = start, free_end = end, "invalid free space pointers");
            return 0;
        }
        (end - start) as usize
    }

    /// CRC32 over the persisted ranges: header prefix, a zero stand-in for
    /// the checksum field, and the full data/directory region.
    pub fn compute_checksum(&self) -> u32 {
        let mut digest = CRC32.digest();
        digest.update(&self.buf[..CHECKSUM_OFFSET]);
        digest.update(&[0u8; 4]);
        digest.update(&self.buf[PAGE_HEADER_SIZE..]);
        digest.finalize()
    }

    pub fn verify_checksum(&self) -> bool {
        let computed = self.compute_checksum();
        let stored = self.stored_checksum();
        if stored != computed {
            warn!(
                page_id = self.page_id(),
                stored, computed, "page checksum mismatch"
            );
        }
        stored == computed
    }

    pub fn update_checksum(&mut self) {
        let checksum = self.compute_checksum();
        self.header_mut().checksum.set(checksum);
    }

    /// Zeroes the runtime header fields. Used around disk I/O so persisted
    /// bytes never carry in-memory state.
    pub(crate) fn reset_runtime_metadata(&mut self) {
        let header = self.header_mut();
        header.deleted_tuple_count.set(0);
        header.fragmented_bytes.set(0);
        header.is_dirty = 0;
    }

    /// Re-derives the runtime counters by scanning the slot directory.
    pub(crate) fn recompute_fragmentation_stats(&mut self) {
        let slot_count = self.slot_count();
        let mut deleted = 0u16;
        let mut fragmented = 0u64;
        for i in 0..slot_count {
            let entry = self.slot(i);
            if !entry.is_valid() {
                deleted += 1;
                fragmented += entry.length.get() as u64;
            }
        }
        let header = self.header_mut();
        header.deleted_tuple_count.set(deleted);
        header.fragmented_bytes.set(fragmented);
    }

    pub fn is_slot_valid(&self, slot_id: u16) -> bool {
        slot_id < self.slot_count() && self.slot(slot_id).is_valid()
    }

    pub fn is_slot_forwarded(&self, slot_id: u16) -> bool {
        slot_id < self.slot_count() && self.slot(slot_id).is_forwarded()
    }

    pub fn slot_entry(&self, slot_id: u16) -> Option<SlotEntry> {
        (slot_id < self.slot_count()).then(|| *self.slot(slot_id))
    }

    /// Live tuple bytes of a valid slot.
    pub fn tuple_bytes(&self, slot_id: u16) -> Option<&[u8]> {
        if !self.is_slot_valid(slot_id) {
            return None;
        }
        let entry = self.slot(slot_id);
        let (offset, length) = (entry.offset() as usize, entry.length() as usize);
        Some(&self.buf[offset..offset + length])
    }

    fn find_deleted_slot(&self) -> Option<u16> {
        (0..self.slot_count()).find(|&i| !self.slot(i).is_valid())
    }

    fn add_slot(&mut self, offset: u16, length: u16) -> Option<u16> {
        let new_slot_id = self.slot_count();
        let new_slot_offset = slot_byte_offset(new_slot_id);
        if new_slot_offset <= self.free_start() as usize {
            warn!(
                page_id = self.page_id(),
                free_start = self.free_start(),
                new_slot_offset,
                "no room for a new slot entry"
            );
            return None;
        }

        {
            let entry = self.slot_mut(new_slot_id);
            entry.offset.set(offset);
            entry.length.set(length);
            entry.flags = SLOT_VALID;
            entry.next_ptr = [0; 3];
        }
        let header = self.header_mut();
        header.slot_count.set(new_slot_id + 1);
        header.free_end.set(new_slot_offset as u16);
        Some(new_slot_id)
    }

    /// Places a tuple on the page, reusing a deleted slot when one exists.
    /// Returns `Ok(None)` when the page cannot fit the tuple.
    pub fn insert_tuple(&mut self, data: &[u8]) -> Result<Option<u16>, PageError> {
        if data.is_empty() {
            return Err(PageError::EmptyTuple);
        }

        let reuse = self.find_deleted_slot();
        let required = match reuse {
            Some(_) => data.len(),
            None => data.len() + SLOT_ENTRY_SIZE,
        };
        let available = self.available_space();
        if available < required {
            debug!(
                page_id = self.page_id(),
                required, available, "insufficient space for tuple"
            );
            return Ok(None);
        }

        let tuple_offset = self.free_start();
        let slot_id = match reuse {
            None => match self.add_slot(tuple_offset, data.len() as u16) {
                Some(id) => id,
                None => return Ok(None),
            },
            Some(id) => {
                let old_length = self.slot(id).length.get();
                {
                    let entry = self.slot_mut(id);
                    entry.offset.set(tuple_offset);
                    entry.length.set(data.len() as u16);
                    entry.flags = SLOT_VALID;
                    entry.next_ptr = [0; 3];
                }
                let header = self.header_mut();
                header
                    .deleted_tuple_count
                    .set(header.deleted_tuple_count.get() - 1);
                header
                    .fragmented_bytes
                    .set(header.fragmented_bytes.get() - old_length as u64);
                id
            }
        };

        let at = tuple_offset as usize;
        self.buf[at..at + data.len()].copy_from_slice(data);

        let new_free_start = tuple_offset + data.len() as u16;
        let header = self.header_mut();
        header.free_start.set(new_free_start);
        header.is_dirty = 1;
        self.update_checksum();

        Ok(Some(slot_id))
    }

    pub fn delete_tuple(&mut self, slot_id: u16) -> Result<(), PageError> {
        if slot_id >= self.slot_count() {
            return Err(PageError::SlotOutOfRange(slot_id));
        }
        if !self.slot(slot_id).is_valid() {
            return Err(PageError::AlreadyDeleted(slot_id));
        }

        let length = {
            let entry = self.slot_mut(slot_id);
            entry.flags &= !SLOT_VALID;
            entry.length.get()
        };
        let header = self.header_mut();
        header
            .deleted_tuple_count
            .set(header.deleted_tuple_count.get() + 1);
        header
            .fragmented_bytes
            .set(header.fragmented_bytes.get() + length as u64);
        header.is_dirty = 1;
        self.update_checksum();
        Ok(())
    }

    /// Overwrites a tuple's bytes without moving it. The new size must not
    /// exceed the current one.
    pub fn update_tuple_in_place(&mut self, slot_id: u16, data: &[u8]) -> Result<(), PageError> {
        if data.is_empty() {
            return Err(PageError::EmptyTuple);
        }
        if slot_id >= self.slot_count() {
            return Err(PageError::SlotOutOfRange(slot_id));
        }

        let entry = self.slot(slot_id);
        if !entry.is_valid() {
            return Err(PageError::SlotNotValid(slot_id));
        }
        if entry.is_forwarded() {
            return Err(PageError::Forwarded(slot_id));
        }
        if data.len() > entry.length() as usize {
            return Err(PageError::TooLarge {
                new: data.len() as u16,
                current: entry.length(),
            });
        }

        let offset = entry.offset() as usize;
        self.buf[offset..offset + data.len()].copy_from_slice(data);
        self.slot_mut(slot_id).length.set(data.len() as u16);
        self.header_mut().is_dirty = 1;
        self.update_checksum();
        Ok(())
    }

    /// Turns a valid slot into a forwarding stub. The old tuple bytes are
    /// released to fragmentation accounting so compaction can reclaim them.
    pub fn mark_slot_forwarded(
        &mut self,
        slot_id: u16,
        target_page: u32,
        target_slot: u16,
    ) -> Result<(), PageError> {
        if slot_id >= self.slot_count() {
            return Err(PageError::SlotOutOfRange(slot_id));
        }
        if !self.slot(slot_id).is_valid() {
            return Err(PageError::SlotNotValid(slot_id));
        }

        let old_length = {
            let entry = self.slot_mut(slot_id);
            let old = entry.length.get();
            entry.length.set(0);
            entry.set_forwarding(target_page, target_slot);
            old
        };
        let header = self.header_mut();
        header
            .fragmented_bytes
            .set(header.fragmented_bytes.get() + old_length as u64);
        header.is_dirty = 1;
        self.update_checksum();

        debug!(
            page_id = self.page_id(),
            slot_id, target_page, target_slot, "slot marked forwarded"
        );
        Ok(())
    }

    /// Decodes the 24-bit forwarding pointer of a slot.
    pub fn forwarding_pointer(&self, slot_id: u16) -> TupleId {
        if slot_id >= self.slot_count() {
            return TupleId::SENTINEL;
        }
        self.slot(slot_id).forwarding_target()
    }

    /// Walks forwarding hops starting at `slot_id`. Returns the final
    /// destination, or the destination on another page for the caller to
    /// resolve further. `None` means the tuple is unreachable: a circular
    /// chain, more than `max_hops` hops, or an invalid slot on the way.
    pub fn follow_forwarding_chain(&self, slot_id: u16, max_hops: usize) -> Option<TupleId> {
        let slot_count = self.slot_count();
        if slot_count == 0 || slot_id >= slot_count {
            warn!(page_id = self.page_id(), slot_id, "chain start out of range");
            return None;
        }

        let own_page = self.page_id() as u32;
        let mut visited: SmallVec<[(u32, u16); MAX_FORWARD_HOPS + 2]> = SmallVec::new();
        let mut current_page = own_page;
        let mut current_slot = slot_id;

        for hop in 0..=max_hops {
            if visited.contains(&(current_page, current_slot)) {
                warn!(
                    page_id = current_page,
                    slot_id = current_slot,
                    "circular forwarding chain"
                );
                return None;
            }
            visited.push((current_page, current_slot));

            if current_page != own_page {
                // The rest of the chain lives elsewhere.
                return Some(TupleId::new(current_page, current_slot));
            }
            if current_slot >= slot_count {
                warn!(slot_id = current_slot, "forwarding chain left the directory");
                return None;
            }

            let entry = self.slot(current_slot);
            if !entry.is_valid() {
                warn!(slot_id = current_slot, "forwarding chain hit an invalid slot");
                return None;
            }
            if !entry.is_forwarded() {
                return Some(TupleId::new(current_page, current_slot));
            }
            if hop >= max_hops {
                warn!(max_hops, "forwarding chain exceeded hop limit");
                return None;
            }

            let next = entry.forwarding_target();
            current_page = next.page_id;
            current_slot = next.slot_id;
        }

        None
    }

    /// Compaction pays off when fragmentation dominates the used space,
    /// half the slots are dead, or a small insert would fit only after
    /// reclaiming fragmented bytes.
    pub fn should_compact(&self) -> bool {
        let deleted = self.deleted_tuple_count();
        if deleted == 0 {
            return false;
        }

        let used = self.free_start() as usize - PAGE_HEADER_SIZE;
        if used > 0 && self.fragmented_bytes() * 100 / used as u64 >= 50 {
            return true;
        }

        if deleted * 2 >= self.slot_count() {
            return true;
        }

        let available = self.available_space();
        available < 100 && available + self.fragmented_bytes() as usize >= 100
    }

    /// Rewrites live tuples densely from the header end. Slot ids are
    /// preserved; deleted entries are zeroed in place.
    pub fn compact(&mut self) {
        let deleted = self.deleted_tuple_count();
        if deleted == 0 {
            return;
        }

        let slot_count = self.slot_count();
        if slot_count == deleted {
            // Every slot is dead: the page returns to its empty state.
            let header = self.header_mut();
            header.free_start.set(PAGE_HEADER_SIZE as u16);
            header.free_end.set(PAGE_SIZE as u16);
            header.slot_count.set(0);
            header.deleted_tuple_count.set(0);
            header.fragmented_bytes.set(0);
            header.is_dirty = 1;
            self.update_checksum();
            return;
        }

        let data_len = self.free_start() as usize - PAGE_HEADER_SIZE;
        let mut scratch = vec![0u8; data_len];
        let mut placements: Vec<(u16, u16, u16)> = Vec::with_capacity((slot_count - deleted) as usize);
        let mut cursor = 0usize;

        for i in 0..slot_count {
            let entry = self.slot(i);
            if !entry.is_valid() {
                continue;
            }
            let (offset, length) = (entry.offset() as usize, entry.length() as usize);
            scratch[cursor..cursor + length].copy_from_slice(&self.buf[offset..offset + length]);
            placements.push((i, (PAGE_HEADER_SIZE + cursor) as u16, length as u16));
            cursor += length;
        }

        self.buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + cursor].copy_from_slice(&scratch[..cursor]);

        for (slot_id, offset, length) in placements {
            let entry = self.slot_mut(slot_id);
            entry.offset.set(offset);
            entry.length.set(length);
        }
        for i in 0..slot_count {
            if !self.slot(i).is_valid() {
                *self.slot_mut(i) = SlotEntry::new_zeroed();
            }
        }

        let reclaimed = data_len - cursor;
        let header = self.header_mut();
        header.free_start.set((PAGE_HEADER_SIZE + cursor) as u16);
        header.deleted_tuple_count.set(0);
        header.fragmented_bytes.set(0);
        header.is_dirty = 1;
        self.update_checksum();

        debug!(page_id = self.page_id(), reclaimed, "page compacted");
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}
