//! The adapter contract consumed by the store engine.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AdapterError;

/// Metadata for a single path, after following symlinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub is_file: bool,
    pub is_directory: bool,
    /// Size in bytes (0 for directories).
    pub size: u64,
    pub mtime: DateTime<Utc>,
}

/// Options for [`Adapter::glob`].
#[derive(Debug, Clone, Default)]
pub struct GlobOptions {
    /// Glob patterns whose matches are excluded from the result.
    pub ignore: Vec<String>,
    pub max_results: Option<usize>,
}

/// Options for [`Adapter::grep`].
#[derive(Debug, Clone, Default)]
pub struct GrepOptions {
    /// Glob pattern restricting which files are searched.
    pub include: Option<String>,
    pub max_results: Option<usize>,
}

/// Platform I/O + SHA-256 boundary.
///
/// All paths are absolute. Implementations must create missing parent
/// directories for `write_file`, `rename`, and `symlink`, and `rename` must
/// be atomic at the destination: when the destination already exists the
/// rename fails instead of merging, which is how concurrent builders detect
/// each other.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// SHA-256 of `bytes` as 64 lowercase hex characters.
    fn hash(&self, bytes: &[u8]) -> String;

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, AdapterError>;

    async fn write_file(&self, path: &Path, bytes: &[u8]) -> Result<(), AdapterError>;

    /// Recursive, idempotent directory creation.
    async fn mkdir(&self, path: &Path) -> Result<(), AdapterError>;

    /// Entry names (not paths) of a directory. Follows a symlink at `path`
    /// itself.
    async fn read_dir(&self, path: &Path) -> Result<Vec<String>, AdapterError>;

    async fn stat(&self, path: &Path) -> Result<FileStat, AdapterError>;

    /// Never errors: unresolvable paths (including symlink loops) are `false`.
    async fn exists(&self, path: &Path) -> bool;

    async fn remove(&self, path: &Path, recursive: bool) -> Result<(), AdapterError>;

    async fn rename(&self, src: &Path, dest: &Path) -> Result<(), AdapterError>;

    /// Create a symlink at `link` pointing at `target`; `target` may be
    /// relative to the directory containing `link`.
    async fn symlink(&self, target: &Path, link: &Path) -> Result<(), AdapterError>;

    /// Paths under `root` (relative, `/`-separated) matching `pattern`.
    async fn glob(
        &self,
        root: &Path,
        pattern: &str,
        options: GlobOptions,
    ) -> Result<Vec<String>, AdapterError>;

    /// Lines under `root` matching `pattern` (a regex), formatted
    /// `relpath:line:content` with 1-based line numbers.
    async fn grep(
        &self,
        root: &Path,
        pattern: &str,
        options: GrepOptions,
    ) -> Result<Vec<String>, AdapterError>;
}
