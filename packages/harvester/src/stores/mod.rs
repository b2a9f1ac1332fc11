//! Storage implementations.
//!
//! Catalogs:
//! - `MemoryCatalog` - In-memory catalog (always available)
//! - `SqliteCatalog` - SQLite catalog (requires `sqlite` feature)
//!
//! Content:
//! - `FsContentStore` - Files under a root directory
//! - `MemoryContentStore` - In-memory blobs

pub mod content;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use content::{FsContentStore, MemoryContentStore};
pub use memory::MemoryCatalog;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCatalog;
