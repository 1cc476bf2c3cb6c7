//! # Database File Header
//!
//! Every `.db` file starts with a fixed 512-byte header; page N follows at
//! byte `512 + N * 8192`.
//!
//! ## Header Layout
//!
//! ```text
//! Offset  Size  Description
//! 0       4     Magic: "STOR"
//! 4       4     Format version
//! 8       4     Next page id to allocate (page 0 is never handed out)
//! 12      4     Table id
//! 16      4     Page size (always 8192)
//! 20      4     Page count
//! 24      64    Table name, NUL padded
//! 88      4     Schema length
//! 92      4     Schema offset
//! 96      416   Reserved
//! ```
//!
//! All fields are little-endian. The struct derives `Unaligned` so it can
//! overlay any byte buffer, and a compile-time assertion pins the size.

use eyre::{ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{DB_MAGIC, DB_VERSION, FILE_HEADER_SIZE, PAGE_SIZE};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DbFileHeader {
    magic: [u8; 4],
    version: U32,
    next_page_id: U32,
    table_id: U32,
    page_size: U32,
    page_count: U32,
    table_name: [u8; 64],
    schema_length: U32,
    schema_offset: U32,
    reserved: [u8; 416],
}

const _: () = assert!(std::mem::size_of::<DbFileHeader>() == FILE_HEADER_SIZE);

impl DbFileHeader {
    pub fn new() -> Self {
        Self {
            magic: DB_MAGIC,
            version: U32::new(DB_VERSION),
            next_page_id: U32::new(1),
            table_id: U32::new(0),
            page_size: U32::new(PAGE_SIZE as u32),
            page_count: U32::new(0),
            table_name: [0; 64],
            schema_length: U32::new(0),
            schema_offset: U32::new(0),
            reserved: [0; 416],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for DbFileHeader: {} < {FILE_HEADER_SIZE}",
            bytes.len()
        );
        Self::ref_from_bytes(&bytes[..FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read DbFileHeader: {e:?}"))
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.magic == DB_MAGIC,
            "invalid database file magic: {:02x?}",
            self.magic
        );
        ensure!(
            self.version.get() == DB_VERSION,
            "unsupported database file version: {}",
            self.version.get()
        );
        Ok(())
    }

    pub fn next_page_id(&self) -> u32 {
        self.next_page_id.get()
    }

    pub fn set_next_page_id(&mut self, page_id: u32) {
        self.next_page_id.set(page_id);
    }

    pub fn page_count(&self) -> u32 {
        self.page_count.get()
    }

    pub fn set_page_count(&mut self, count: u32) {
        self.page_count.set(count);
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.get()
    }

    pub fn table_id(&self) -> u32 {
        self.table_id.get()
    }
}

impl Default for DbFileHeader {
    fn default() -> Self {
        Self::new()
    }
}
