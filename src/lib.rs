//! # stordb - Slotted-Page Tuple Storage Engine
//!
//! A single-table, disk-backed storage engine: tuple-level CRUD over a
//! fixed 8 KiB page format with checksummed persistence. Rows are encoded
//! with a null bitmap and alignment-aware field layout; pages track free
//! space through a persisted free space map.
//!
//! ## Quick Start
//!
//! ```ignore
//! use stordb::{DataType, DiskManager, FreeSpaceMap, PageManager, Schema};
//! use stordb::{serializer, TupleBuilder};
//!
//! let mut schema = Schema::new();
//! schema.add_column("id", DataType::Integer, false, 0)?;
//! schema.add_column("name", DataType::VarChar, false, 100)?;
//! schema.finalize()?;
//!
//! let disk = DiskManager::open("users.db")?;
//! let fsm = FreeSpaceMap::open("users.fsm")?;
//! let manager = PageManager::new(disk, fsm);
//!
//! let mut builder = TupleBuilder::new(&schema)?;
//! builder.set_integer("id", 1)?;
//! builder.set_varchar("name", "Alice")?;
//! let values = builder.build()?;
//!
//! let mut buf = vec![0u8; serializer::serialized_size(&schema, &values)?];
//! let size = serializer::serialize(&schema, &values, &mut buf)?;
//! let tid = manager.insert_tuple(&buf[..size])?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   Record Layer (Schema / Tuples)    │
//! ├─────────────────────────────────────┤
//! │   PageManager (cache, CRUD, FSM)    │
//! ├──────────────────┬──────────────────┤
//! │   DiskManager    │   FreeSpaceMap   │
//! ├──────────────────┴──────────────────┤
//! │      Page (slotted 8 KiB unit)      │
//! └─────────────────────────────────────┘
//! ```
//!
//! The record layer is orthogonal to storage: callers serialize rows into
//! byte buffers and hand those to the [`storage::PageManager`], which
//! addresses them by [`storage::TupleId`]. Updates that outgrow their slot
//! transparently move the tuple and leave a forwarding stub, so TupleIds
//! stay valid.
//!
//! ## Module Overview
//!
//! - [`config`]: page geometry and engine constants
//! - [`records`]: schema, field values, tuple encode/decode
//! - [`storage`]: pages, disk I/O, free space map, page manager

pub mod config;
pub mod records;
pub mod storage;

pub use records::serializer;
pub use records::{DataType, FieldValue, Schema, TupleAccessor, TupleBuilder};
pub use storage::{DiskManager, FreeSpaceMap, Page, PageError, PageManager, TupleId};
