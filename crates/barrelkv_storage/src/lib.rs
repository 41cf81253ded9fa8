//! # BarrelKV Storage
//!
//! I/O backend trait and implementations for BarrelKV.
//!
//! This crate provides the lowest-level file abstraction for BarrelKV.
//! Backends are **opaque append-only byte stores** - they do not interpret
//! the data they hold. The record format, segment rotation, and index are
//! all owned by `barrelkv_core`.
//!
//! ## Design Principles
//!
//! - One backend wraps exactly one file
//! - Writes are pure appends; reads are positional
//! - Must be `Send + Sync` so segments can be shared across threads
//! - BarrelKV owns all file format interpretation
//!
//! ## Available Backends
//!
//! - [`StandardBackend`] - positional reads, append-mode writes, `fsync`
//! - [`BufferedBackend`] - standard I/O behind a write buffer
//! - [`MmapBackend`] - a fixed-capacity read-write memory mapping
//!
//! ## Example
//!
//! ```no_run
//! use barrelkv_storage::{open_backend, BackendKind};
//! use std::path::Path;
//!
//! let mut backend = open_backend(Path::new("000000000.data"), BackendKind::Standard, 0).unwrap();
//! backend.append(b"hello world").unwrap();
//! backend.sync().unwrap();
//! ```

#![warn(missing_docs)]

mod backend;
mod buffered;
mod error;
mod mmap;
mod standard;

pub use backend::{open_backend, BackendKind, IoBackend};
pub use buffered::BufferedBackend;
pub use error::{StorageError, StorageResult};
pub use mmap::MmapBackend;
pub use standard::StandardBackend;
