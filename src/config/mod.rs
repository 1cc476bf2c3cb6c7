//! # Engine Configuration Constants
//!
//! Centralizes the constants the storage layer is built around. Values that
//! derive from each other are co-located so a change to one is checked
//! against its dependents.
//!
//! ```text
//! PAGE_SIZE (8192 bytes)
//!       │
//!       ├─> PAGE_HEADER_SIZE (40 bytes: 12 persisted + checksum + runtime)
//!       │
//!       ├─> MAX_TUPLE_SIZE (derived: PAGE_SIZE - header - one slot entry)
//!       │
//!       └─> MAX_CATEGORY (255): category = bytes * 255 / PAGE_SIZE
//!
//! SLOT_ENTRY_SIZE (8 bytes)
//!       │
//!       └─> slot N lives at PAGE_SIZE - (N + 1) * SLOT_ENTRY_SIZE
//! ```
//!
//! The file header is a fixed 512 bytes; page N starts at byte
//! `FILE_HEADER_SIZE + N * PAGE_SIZE`.

/// Size of every page, on disk and in memory.
pub const PAGE_SIZE: usize = 8192;

/// Size of the page header, including the runtime-only fields that are
/// zeroed before a page reaches disk.
pub const PAGE_HEADER_SIZE: usize = 40;

/// Byte offset of the checksum field inside the page header. The checksum
/// computation covers `[0, CHECKSUM_OFFSET)` plus the data region.
pub const CHECKSUM_OFFSET: usize = 12;

/// Size of one slot directory entry.
pub const SLOT_ENTRY_SIZE: usize = 8;

/// Largest tuple a page can hold: the data region minus one slot entry.
pub const MAX_TUPLE_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE - SLOT_ENTRY_SIZE;

/// Size of the database file header preceding page 0.
pub const FILE_HEADER_SIZE: usize = 512;

/// Page id 0 never refers to a real page.
pub const INVALID_PAGE_ID: u32 = 0;

/// Slot id sentinel for "no slot".
pub const INVALID_SLOT_ID: u16 = u16::MAX;

/// Database file magic, the first four bytes of every `.db` file.
pub const DB_MAGIC: [u8; 4] = *b"STOR";

/// Database file format version.
pub const DB_VERSION: u32 = 1;

/// Free-space-map file magic.
pub const FSM_MAGIC: u32 = 0x4653_4D00;

/// Highest free-space category; a completely empty page maps to this.
pub const MAX_CATEGORY: u8 = 255;

/// Page cache capacity in pages.
pub const MAX_CACHE_SIZE: usize = 100;

/// Forwarding chains longer than this resolve to the unreachable sentinel.
pub const MAX_FORWARD_HOPS: usize = 10;

const _: () = assert!(MAX_TUPLE_SIZE == 8144);
const _: () = assert!(CHECKSUM_OFFSET + 4 <= PAGE_HEADER_SIZE);
