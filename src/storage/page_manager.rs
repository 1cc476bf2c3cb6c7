//! # Page Manager
//!
//! Tuple-level CRUD over a bounded page cache. Each operation:
//!
//! 1. consults the free space map for a candidate page,
//! 2. obtains the page from the cache (loading through the disk manager on
//!    a miss),
//! 3. runs the slot operation on the page,
//! 4. feeds the page's new free space back to the FSM,
//! 5. writes dirty pages back on flush or eviction.
//!
//! One mutex guards the cache and is held for the whole duration of every
//! public operation, disk I/O included. That serializes all CRUD; the
//! simplification is deliberate.
//!
//! ## Updates and Forwarding
//!
//! An update first tries in place. When the page refuses (tuple grew, or
//! the slot is already a stub), the new version is inserted elsewhere and
//! the slot of the **original** TupleId becomes a forwarding stub. Anchoring
//! stubs at the original id keeps every previously handed-out TupleId
//! resolvable in one hop.
//!
//! ## FSM Retry Discipline
//!
//! The free space category is an approximation, so an insert candidate may
//! turn out too full. Inserts try up to three rounds: compact the page if
//! that would help, otherwise mark it full in the FSM and ask again.

use eyre::{bail, ensure, eyre, Result};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::{INVALID_SLOT_ID, MAX_CACHE_SIZE, MAX_FORWARD_HOPS, MAX_TUPLE_SIZE, SLOT_ENTRY_SIZE};
use crate::storage::cache::PageCache;
use crate::storage::disk_manager::DiskManager;
use crate::storage::free_space_map::FreeSpaceMap;
use crate::storage::page::Page;
use crate::storage::TupleId;

const INSERT_ATTEMPTS: usize = 3;

pub struct PageManager {
    disk: DiskManager,
    fsm: FreeSpaceMap,
    cache: Mutex<PageCache>,
}

impl PageManager {
    pub fn new(disk: DiskManager, fsm: FreeSpaceMap) -> Self {
        Self {
            disk,
            fsm,
            cache: Mutex::new(PageCache::new(MAX_CACHE_SIZE)),
        }
    }

    /// Inserts a tuple, choosing a page through the FSM. Returns the
    /// TupleId under which the tuple is addressable from now on.
    pub fn insert_tuple(&self, data: &[u8]) -> Result<TupleId> {
        ensure!(!data.is_empty(), "tuple data is empty");
        ensure!(
            data.len() <= MAX_TUPLE_SIZE,
            "tuple of {} bytes exceeds maximum of {MAX_TUPLE_SIZE}",
            data.len()
        );

        let mut cache = self.cache.lock();
        let required = data.len() + SLOT_ENTRY_SIZE;

        let mut placed: Option<(u32, u16, usize)> = None;
        for attempt in 0..INSERT_ATTEMPTS {
            let page_id = match self.fsm.find_page_with_space(required) {
                Some(id) => id,
                None => self.allocate_new_page(&mut cache)?,
            };
            let page = self.load_page(&mut cache, page_id)?;

            let mut slot_id = page.insert_tuple(data)?;
            if slot_id.is_none() && page.should_compact() {
                debug!(page_id, "compacting page to reclaim fragmented space");
                page.compact();
                slot_id = page.insert_tuple(data)?;
            }

            match slot_id {
                Some(slot_id) => {
                    placed = Some((page_id, slot_id, page.available_space()));
                    break;
                }
                None => {
                    debug!(page_id, attempt, "candidate page full, marking in FSM");
                    self.fsm.update_page_free_space(page_id, 0);
                }
            }
        }

        let Some((page_id, slot_id, free)) = placed else {
            bail!("out of space: no page could fit the tuple after {INSERT_ATTEMPTS} attempts");
        };
        self.fsm.update_page_free_space(page_id, free);
        debug!(page_id, slot_id, size = data.len(), "tuple inserted");
        Ok(TupleId::new(page_id, slot_id))
    }

    /// Copies a tuple's bytes into `buf`, resolving forwarding first.
    /// Returns the tuple length. When `buf` has room, a terminating zero is
    /// written one past the end.
    pub fn get_tuple(&self, tuple_id: TupleId, buf: &mut [u8]) -> Result<usize> {
        ensure!(!buf.is_empty(), "output buffer is empty");

        let mut cache = self.cache.lock();
        let destination = self.resolve_tuple(&mut cache, tuple_id)?;

        let page = self.load_page(&mut cache, destination.page_id)?;
        let Some(bytes) = page.tuple_bytes(destination.slot_id) else {
            bail!(
                "tuple not found: slot {} on page {} is not valid",
                destination.slot_id,
                destination.page_id
            );
        };
        ensure!(
            buf.len() >= bytes.len(),
            "buffer too small: {} < {}",
            buf.len(),
            bytes.len()
        );

        let len = bytes.len();
        buf[..len].copy_from_slice(bytes);
        if buf.len() > len {
            buf[len] = 0;
        }
        Ok(len)
    }

    /// Updates a tuple. In place when the new version fits; otherwise the
    /// new version lands on another page and the original slot becomes a
    /// forwarding stub, keeping the caller's TupleId valid.
    pub fn update_tuple(&self, tuple_id: TupleId, data: &[u8]) -> Result<()> {
        ensure!(!data.is_empty(), "tuple data is empty");
        ensure!(
            data.len() <= MAX_TUPLE_SIZE,
            "tuple of {} bytes exceeds maximum of {MAX_TUPLE_SIZE}",
            data.len()
        );

        let mut cache = self.cache.lock();
        let current = self.resolve_tuple(&mut cache, tuple_id)?;

        let in_place = {
            let page = self.load_page(&mut cache, current.page_id)?;
            match page.update_tuple_in_place(current.slot_id, data) {
                Ok(()) => Some(page.available_space()),
                Err(reason) => {
                    debug!(
                        page_id = current.page_id,
                        slot_id = current.slot_id,
                        %reason,
                        "in-place update refused, building forwarding stub"
                    );
                    None
                }
            }
        };
        if let Some(free) = in_place {
            self.fsm.update_page_free_space(current.page_id, free);
            return Ok(());
        }

        // New version goes wherever it fits; the stub stays on the page of
        // the tuple id the caller holds.
        let required = data.len() + SLOT_ENTRY_SIZE;
        let new_page_id = match self.fsm.find_page_with_space(required) {
            Some(id) => id,
            None => self.allocate_new_page(&mut cache)?,
        };

        let (new_slot_id, new_free) = {
            let page = self.load_page(&mut cache, new_page_id)?;
            let slot = page
                .insert_tuple(data)?
                .ok_or_else(|| eyre!("failed to insert new tuple version on page {new_page_id}"))?;
            (slot, page.available_space())
        };

        let original_free = {
            let page = self.load_page(&mut cache, tuple_id.page_id)?;
            page.mark_slot_forwarded(tuple_id.slot_id, new_page_id, new_slot_id)?;
            page.available_space()
        };

        self.fsm.update_page_free_space(tuple_id.page_id, original_free);
        self.fsm.update_page_free_space(new_page_id, new_free);
        debug!(
            from_page = tuple_id.page_id,
            from_slot = tuple_id.slot_id,
            to_page = new_page_id,
            to_slot = new_slot_id,
            "forwarding stub created"
        );
        Ok(())
    }

    /// Deletes the tuple a TupleId resolves to. Forwarding stubs along the
    /// way are left in place; deleting through a stub whose target is
    /// already gone fails.
    pub fn delete_tuple(&self, tuple_id: TupleId) -> Result<()> {
        let mut cache = self.cache.lock();
        let destination = self.resolve_tuple(&mut cache, tuple_id)?;

        let free = {
            let page = self.load_page(&mut cache, destination.page_id)?;
            page.delete_tuple(destination.slot_id)?;
            page.available_space()
        };
        self.fsm.update_page_free_space(destination.page_id, free);
        debug!(
            page_id = destination.page_id,
            slot_id = destination.slot_id,
            "tuple deleted"
        );
        Ok(())
    }

    /// Compacts a page when its fragmentation warrants it.
    pub fn compact_page(&self, page_id: u32) -> Result<()> {
        let mut cache = self.cache.lock();

        let free = {
            let page = self.load_page(&mut cache, page_id)?;
            if !page.should_compact() {
                return Ok(());
            }
            page.compact();
            page.available_space()
        };
        self.fsm.update_page_free_space(page_id, free);
        Ok(())
    }

    /// Writes every dirty cached page back to disk, then flushes the FSM.
    pub fn flush_all_pages(&self) -> Result<()> {
        let mut cache = self.cache.lock();
        self.flush_all_internal(&mut cache)
    }

    /// FSM passthrough: a page id believed to have the requested space.
    pub fn find_page_with_space(&self, required_bytes: usize) -> Option<u32> {
        self.fsm.find_page_with_space(required_bytes)
    }

    pub fn cache_size(&self) -> usize {
        self.cache.lock().len()
    }

    /// Flushes and drops every cached page.
    pub fn clear_cache(&self) -> Result<()> {
        let mut cache = self.cache.lock();
        self.flush_all_internal(&mut cache)?;
        cache.clear();
        Ok(())
    }

    /// Resolves a TupleId through its forwarding chain to the final
    /// destination.
    pub fn resolve_forwarding_chain(&self, tuple_id: TupleId) -> Result<TupleId> {
        let mut cache = self.cache.lock();
        self.resolve_tuple(&mut cache, tuple_id)
    }

    fn resolve_tuple(&self, cache: &mut PageCache, tuple_id: TupleId) -> Result<TupleId> {
        if !tuple_id.is_valid() {
            bail!(
                "invalid tuple id ({}, {})",
                tuple_id.page_id,
                tuple_id.slot_id
            );
        }

        let page = self.load_page(cache, tuple_id.page_id)?;
        if tuple_id.slot_id >= page.slot_count() {
            bail!(
                "slot {} out of range on page {} (slot count {})",
                tuple_id.slot_id,
                tuple_id.page_id,
                page.slot_count()
            );
        }

        match page.follow_forwarding_chain(tuple_id.slot_id, MAX_FORWARD_HOPS) {
            Some(destination) => Ok(destination),
            None => bail!(
                "invalid tuple or circular forwarding chain at page {}, slot {}",
                tuple_id.page_id,
                tuple_id.slot_id
            ),
        }
    }

    fn load_page<'c>(&self, cache: &'c mut PageCache, page_id: u32) -> Result<&'c mut Page> {
        if !cache.contains(page_id) {
            let mut page = Page::new();
            self.disk.read_page(page_id, &mut page)?;
            self.evict_page_if_needed(cache)?;
            cache.insert(page_id, page);
            debug!(page_id, "page loaded from disk");
        }
        cache
            .get_mut(page_id)
            .ok_or_else(|| eyre!("page {page_id} missing from cache"))
    }

    fn allocate_new_page(&self, cache: &mut PageCache) -> Result<u32> {
        let page_id = self.disk.allocate_page();
        let mut page = Page::new();
        page.set_page_id(page_id as u16);

        self.evict_page_if_needed(cache)?;
        let free = page.available_space();
        cache.insert(page_id, page);
        self.fsm.update_page_free_space(page_id, free);
        debug!(page_id, "new page allocated");
        Ok(page_id)
    }

    fn evict_page_if_needed(&self, cache: &mut PageCache) -> Result<()> {
        if !cache.is_full() {
            return Ok(());
        }

        let Some((victim, needs_flush)) = cache.evict_candidate() else {
            warn!("cache full with no eviction candidate");
            return Ok(());
        };
        if needs_flush {
            self.flush_page(cache, victim)?;
        }
        cache.remove(victim);
        debug!(page_id = victim, flushed = needs_flush, "page evicted");
        Ok(())
    }

    fn flush_page(&self, cache: &mut PageCache, page_id: u32) -> Result<()> {
        let Some(page) = cache.get_mut(page_id) else {
            return Ok(());
        };
        if !page.is_dirty() {
            return Ok(());
        }
        self.disk.write_page(page_id, page)?;
        // the write zeroes runtime counters in the cached buffer; restore
        // them so fragmentation tracking stays truthful
        page.recompute_fragmentation_stats();
        Ok(())
    }

    fn flush_all_internal(&self, cache: &mut PageCache) -> Result<()> {
        for page_id in cache.dirty_page_ids() {
            self.flush_page(cache, page_id)?;
        }
        self.fsm.flush()?;
        Ok(())
    }
}

impl Drop for PageManager {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all_pages() {
            warn!(error = %e, "failed to flush pages on shutdown");
        }
    }
}

// a freshly created slot id can never collide with the invalid sentinel
const _: () = assert!(INVALID_SLOT_ID as usize * SLOT_ENTRY_SIZE > crate::config::PAGE_SIZE);
