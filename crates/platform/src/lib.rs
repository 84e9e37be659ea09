//! Platform boundary for the radium space store.
//!
//! This crate defines the narrow [`Adapter`] contract the store engine
//! consumes for every platform interaction (file I/O, symlinks, search,
//! SHA-256), plus the two reference implementations:
//! - [`MemoryAdapter`]: a flat path map for tests and embedded use
//! - [`NativeAdapter`]: the real filesystem via tokio

mod adapter;
mod error;
mod memory;
mod native;
pub mod pattern;

pub use adapter::{Adapter, FileStat, GlobOptions, GrepOptions};
pub use error::AdapterError;
pub use memory::MemoryAdapter;
pub use native::NativeAdapter;
