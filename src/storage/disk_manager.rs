//! # Disk Manager
//!
//! Owns the database file: the 512-byte file header and page-granular I/O.
//!
//! Data I/O takes no lock. `read_exact_at` / `write_all_at` are positional
//! (the `pread`/`pwrite` family), each call is atomic at the OS level, and
//! `&File` is safe to share across threads. Only metadata operations (page
//! allocation and header persistence) serialize on a mutex.
//!
//! Reading a page re-derives its runtime metadata from the slot directory
//! and verifies the checksum. Writing a page zeroes runtime metadata in the
//! caller's buffer and recomputes the checksum, so the persisted bytes are
//! stable across read/write cycles.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use zerocopy::IntoBytes;

use crate::config::{FILE_HEADER_SIZE, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::headers::DbFileHeader;
use crate::storage::page::Page;

#[derive(Debug)]
pub struct DiskManager {
    path: PathBuf,
    file: File,
    meta: Mutex<DbFileHeader>,
}

impl DiskManager {
    /// Opens the database file, creating and initializing it when missing
    /// or empty.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .wrap_err_with(|| format!("failed to open database file '{}'", path.display()))?;

        let len = file
            .metadata()
            .wrap_err("failed to stat database file")?
            .len();

        let header = if len < FILE_HEADER_SIZE as u64 {
            debug!(path = %path.display(), "creating new database file");
            let header = DbFileHeader::new();
            file.write_all_at(header.as_bytes(), 0)
                .wrap_err("failed to write database file header")?;
            file.sync_all().wrap_err("failed to sync new database file")?;
            header
        } else {
            debug!(path = %path.display(), "opening existing database file");
            let mut buf = [0u8; FILE_HEADER_SIZE];
            file.read_exact_at(&mut buf, 0)
                .wrap_err("failed to read database file header")?;
            let header = *DbFileHeader::from_bytes(&buf)?;
            header.validate()?;
            header
        };

        Ok(Self {
            path,
            file,
            meta: Mutex::new(header),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn page_offset(page_id: u32) -> u64 {
        FILE_HEADER_SIZE as u64 + page_id as u64 * PAGE_SIZE as u64
    }

    /// Reads a page from disk into `page`. Runtime metadata is re-derived
    /// from the slot directory and the checksum is verified.
    pub fn read_page(&self, page_id: u32, page: &mut Page) -> Result<()> {
        self.file
            .read_exact_at(page.buffer_mut().as_mut_slice(), Self::page_offset(page_id))
            .wrap_err_with(|| format!("failed to read page {page_id}"))?;

        page.reset_runtime_metadata();
        page.recompute_fragmentation_stats();

        ensure!(
            page.verify_checksum(),
            "checksum mismatch for page {page_id}"
        );
        trace!(page_id, "page read");
        Ok(())
    }

    /// Writes a page to disk and syncs. Runtime metadata is zeroed in the
    /// caller's buffer and the checksum recomputed before the write, so
    /// `page` comes back clean.
    pub fn write_page(&self, page_id: u32, page: &mut Page) -> Result<()> {
        page.reset_runtime_metadata();
        page.update_checksum();

        self.file
            .write_all_at(page.buffer().as_slice(), Self::page_offset(page_id))
            .wrap_err_with(|| format!("failed to write page {page_id}"))?;
        self.file
            .sync_all()
            .wrap_err_with(|| format!("failed to sync page {page_id}"))?;
        trace!(page_id, "page written");
        Ok(())
    }

    /// Hands out the next page id and grows the page count. Page ids are
    /// never reused.
    pub fn allocate_page(&self) -> u32 {
        let mut meta = self.meta.lock();
        let page_id = meta.next_page_id();
        meta.set_next_page_id(page_id + 1);
        let page_count = meta.page_count();
        meta.set_page_count(page_count + 1);
        debug!(page_id, "allocated page");
        page_id
    }

    /// Recorded intent only: page ids are never reclaimed, so this does
    /// nothing beyond logging.
    pub fn deallocate_page(&self, page_id: u32) {
        let _meta = self.meta.lock();
        trace!(page_id, "deallocate requested (no-op)");
    }

    pub fn page_count(&self) -> u32 {
        self.meta.lock().page_count()
    }

    pub fn next_page_id(&self) -> u32 {
        self.meta.lock().next_page_id()
    }

    fn persist_header(&self) -> Result<()> {
        let meta = self.meta.lock();
        self.file
            .write_all_at(meta.as_bytes(), 0)
            .wrap_err("failed to write database file header")?;
        self.file.sync_all().wrap_err("failed to sync database file")?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        if let Err(e) = self.persist_header() {
            warn!(path = %self.path.display(), error = %e, "failed to persist file header on close");
        }
    }
}

// INVALID_PAGE_ID is page 0: the allocator starts at 1 and never returns it.
const _: () = assert!(INVALID_PAGE_ID == 0);

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_file_with_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.db");

        let dm = DiskManager::open(&path).unwrap();
        assert_eq!(dm.next_page_id(), 1);
        assert_eq!(dm.page_count(), 0);
        assert!(path.exists());
        assert!(path.metadata().unwrap().len() >= FILE_HEADER_SIZE as u64);
    }

    #[test]
    fn allocate_hands_out_sequential_ids() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("table.db")).unwrap();

        assert_eq!(dm.allocate_page(), 1);
        assert_eq!(dm.allocate_page(), 2);
        assert_eq!(dm.allocate_page(), 3);
        assert_eq!(dm.page_count(), 3);
    }

    #[test]
    fn next_page_id_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.db");

        {
            let dm = DiskManager::open(&path).unwrap();
            dm.allocate_page();
            dm.allocate_page();
        }

        let dm = DiskManager::open(&path).unwrap();
        assert_eq!(dm.next_page_id(), 3);
    }

    #[test]
    fn page_round_trip_is_bit_identical() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("table.db")).unwrap();

        let page_id = dm.allocate_page();
        let mut page = Page::new();
        page.set_page_id(page_id as u16);
        page.insert_tuple(b"persisted payload").unwrap().unwrap();
        dm.write_page(page_id, &mut page).unwrap();
        assert!(!page.is_dirty());

        let mut loaded = Page::new();
        dm.read_page(page_id, &mut loaded).unwrap();
        assert_eq!(loaded.buffer().as_slice(), page.buffer().as_slice());
        assert!(loaded.verify_checksum());
        assert_eq!(loaded.tuple_bytes(0).unwrap(), b"persisted payload");
    }

    #[test]
    fn read_recomputes_fragmentation_stats() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("table.db")).unwrap();

        let page_id = dm.allocate_page();
        let mut page = Page::new();
        page.set_page_id(page_id as u16);
        page.insert_tuple(&[1u8; 20]).unwrap().unwrap();
        page.insert_tuple(&[2u8; 30]).unwrap().unwrap();
        page.delete_tuple(0).unwrap();
        dm.write_page(page_id, &mut page).unwrap();

        let mut loaded = Page::new();
        dm.read_page(page_id, &mut loaded).unwrap();
        assert_eq!(loaded.deleted_tuple_count(), 1);
        assert_eq!(loaded.fragmented_bytes(), 20);
        assert!(!loaded.is_dirty());
    }

    #[test]
    fn corrupted_page_fails_checksum() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.db");
        let dm = DiskManager::open(&path).unwrap();

        let page_id = dm.allocate_page();
        let mut page = Page::new();
        page.set_page_id(page_id as u16);
        page.insert_tuple(b"soon corrupt").unwrap().unwrap();
        dm.write_page(page_id, &mut page).unwrap();

        // flip a byte in the data region
        let offset = FILE_HEADER_SIZE as u64 + page_id as u64 * PAGE_SIZE as u64 + 100;
        dm.file.write_all_at(&[0xFF], offset).unwrap();

        let mut loaded = Page::new();
        let err = dm.read_page(page_id, &mut loaded).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn bad_magic_rejected_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.db");
        std::fs::write(&path, vec![0xAAu8; FILE_HEADER_SIZE]).unwrap();

        let err = DiskManager::open(&path).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn reading_unwritten_page_fails() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("table.db")).unwrap();

        let page_id = dm.allocate_page();
        let mut page = Page::new();
        assert!(dm.read_page(page_id, &mut page).is_err());
    }
}
