//! # Free Space Map
//!
//! Tracks an approximation of every data page's free space so tuple
//! inserts can pick a target page without touching disk. Each page gets a
//! one-byte category, `(free_bytes * 255) / 8192`, held in a dense array
//! indexed by page id. A sparse set of allocated page ids bounds the scan,
//! so non-sequential allocation (pages 0, 5, 17, 100) stays cheap.
//!
//! The category loses ~32 bytes of precision per step; callers must be
//! prepared for a chosen page to reject the insert and retry.
//!
//! ## On-Disk Format
//!
//! ```text
//! magic:u32 = 0x46534D00
//! page_count:u32
//! allocated_count:u32
//! allocated_ids:u32[allocated_count]
//! categories:u8[page_count]
//! ```
//!
//! Little-endian throughout. Flush builds the whole image in one buffer,
//! writes it at offset 0, truncates the file to the exact length, and
//! syncs.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use hashbrown::HashSet;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::{FSM_MAGIC, MAX_CATEGORY, PAGE_SIZE};

struct FsmState {
    file: File,
    categories: Vec<u8>,
    allocated: HashSet<u32>,
    page_count: u32,
    dirty: bool,
}

pub struct FreeSpaceMap {
    path: PathBuf,
    state: Mutex<FsmState>,
}

impl FreeSpaceMap {
    /// Opens or creates the FSM file. A missing, empty, or unreadable file
    /// starts the map empty.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .wrap_err_with(|| format!("failed to open FSM file '{}'", path.display()))?;

        let mut state = FsmState {
            file,
            categories: Vec::new(),
            allocated: HashSet::new(),
            page_count: 0,
            dirty: false,
        };

        if let Err(e) = Self::load_from_disk(&mut state) {
            debug!(path = %path.display(), error = %e, "starting with empty free space map");
            state.categories.clear();
            state.allocated.clear();
            state.page_count = 0;
            state.dirty = true;
        }

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Converts free bytes to a category, clamping at a full page.
    pub fn bytes_to_category(available_bytes: usize) -> u8 {
        let clamped = available_bytes.min(PAGE_SIZE);
        (clamped * MAX_CATEGORY as usize / PAGE_SIZE) as u8
    }

    /// Approximate free bytes a category stands for.
    pub fn category_to_bytes(category: u8) -> usize {
        category as usize * PAGE_SIZE / MAX_CATEGORY as usize
    }

    /// Records a page's free space, growing the dense cache as needed.
    pub fn update_page_free_space(&self, page_id: u32, available_bytes: usize) {
        let mut state = self.state.lock();
        Self::ensure_capacity(&mut state, page_id);

        let category = Self::bytes_to_category(available_bytes);
        state.categories[page_id as usize] = category;
        state.allocated.insert(page_id);
        state.dirty = true;
        if page_id >= state.page_count {
            state.page_count = page_id + 1;
        }
        trace!(page_id, available_bytes, category, "updated page free space");
    }

    /// First allocated page whose category clears the requirement, or
    /// `None` when the caller should allocate a fresh page. Iteration order
    /// over the allocated set is unspecified, so no ordering is guaranteed
    /// across calls.
    pub fn find_page_with_space(&self, required_bytes: usize) -> Option<u32> {
        let state = self.state.lock();
        let min_category = Self::bytes_to_category(required_bytes);

        for &page_id in &state.allocated {
            let Some(&category) = state.categories.get(page_id as usize) else {
                continue;
            };
            if category > min_category || (category == min_category && category > 0) {
                trace!(page_id, required_bytes, category, "found candidate page");
                return Some(page_id);
            }
        }
        None
    }

    /// Category of a page; unallocated pages report 0.
    pub fn category(&self, page_id: u32) -> u8 {
        let state = self.state.lock();
        if !state.allocated.contains(&page_id) {
            return 0;
        }
        state
            .categories
            .get(page_id as usize)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_category(&self, page_id: u32, category: u8) {
        let mut state = self.state.lock();
        Self::ensure_capacity(&mut state, page_id);
        state.categories[page_id as usize] = category;
        state.allocated.insert(page_id);
        state.dirty = true;
        if page_id >= state.page_count {
            state.page_count = page_id + 1;
        }
    }

    /// Highest tracked page id plus one, not the count of allocated pages.
    pub fn page_count(&self) -> u32 {
        self.state.lock().page_count
    }

    /// Persists the map when dirty.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.dirty {
            return Ok(());
        }
        Self::write_to_disk(&state)?;
        state.dirty = false;
        debug!(path = %self.path.display(), pages = state.page_count, "flushed free space map");
        Ok(())
    }

    fn ensure_capacity(state: &mut FsmState, page_id: u32) {
        let needed = page_id as usize + 1;
        if needed > state.categories.len() {
            // grow with headroom to limit reallocation churn
            let new_len = needed.max(state.categories.len() * 2);
            state.categories.resize(new_len, 0);
        }
    }

    fn load_from_disk(state: &mut FsmState) -> Result<()> {
        let len = state.file.metadata().wrap_err("failed to stat FSM file")?.len();
        eyre::ensure!(len >= 12, "FSM file too small ({len} bytes)");

        let mut word = [0u8; 4];
        state.file.read_exact_at(&mut word, 0)?;
        let magic = u32::from_le_bytes(word);
        eyre::ensure!(magic == FSM_MAGIC, "invalid FSM magic: {magic:#010x}");

        state.file.read_exact_at(&mut word, 4)?;
        let page_count = u32::from_le_bytes(word);
        state.file.read_exact_at(&mut word, 8)?;
        let allocated_count = u32::from_le_bytes(word);

        let mut offset = 12u64;
        let mut allocated = HashSet::with_capacity(allocated_count as usize);
        if allocated_count > 0 {
            let mut ids = vec![0u8; allocated_count as usize * 4];
            state
                .file
                .read_exact_at(&mut ids, offset)
                .wrap_err("failed to read allocated page ids")?;
            for chunk in ids.chunks_exact(4) {
                allocated.insert(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
            }
            offset += ids.len() as u64;
        }

        let mut categories = vec![0u8; page_count as usize];
        if page_count > 0 {
            state
                .file
                .read_exact_at(&mut categories, offset)
                .wrap_err("failed to read FSM categories")?;
        }

        state.page_count = page_count;
        state.allocated = allocated;
        state.categories = categories;
        state.dirty = false;
        Ok(())
    }

    fn write_to_disk(state: &FsmState) -> Result<()> {
        let page_count = state.page_count as usize;
        let mut image =
            Vec::with_capacity(12 + state.allocated.len() * 4 + page_count);
        image.extend_from_slice(&FSM_MAGIC.to_le_bytes());
        image.extend_from_slice(&state.page_count.to_le_bytes());
        image.extend_from_slice(&(state.allocated.len() as u32).to_le_bytes());
        for &page_id in &state.allocated {
            image.extend_from_slice(&page_id.to_le_bytes());
        }
        let tracked = page_count.min(state.categories.len());
        image.extend_from_slice(&state.categories[..tracked]);
        // pages past the dense cache persist as category 0
        image.resize(12 + state.allocated.len() * 4 + page_count, 0);

        state
            .file
            .write_all_at(&image, 0)
            .wrap_err("failed to write FSM image")?;
        state
            .file
            .set_len(image.len() as u64)
            .wrap_err("failed to truncate FSM file")?;
        state.file.sync_all().wrap_err("failed to sync FSM file")?;
        Ok(())
    }
}

impl Drop for FreeSpaceMap {
    fn drop(&mut self) {
        let dirty = self.state.lock().dirty;
        if dirty {
            if let Err(e) = self.flush() {
                warn!(path = %self.path.display(), error = %e, "failed to flush FSM on close");
            }
        }
    }
}
