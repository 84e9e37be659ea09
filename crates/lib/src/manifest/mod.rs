//! Space manifests.
//!
//! The manifest is the authoritative description of one materialized space:
//! its origin, exports, dependency mounts, command history, and metadata.
//! A space exists if and only if its manifest file does.

mod types;

use std::path::Path;

use radium_platform::Adapter;

use crate::error::StoreError;

pub use types::*;

/// Read a manifest; `Ok(None)` when the file does not exist.
pub async fn read(adapter: &dyn Adapter, path: &Path) -> Result<Option<Manifest>, StoreError> {
  let bytes = match adapter.read_file(path).await {
    Ok(bytes) => bytes,
    Err(e) if e.is_not_found() => return Ok(None),
    Err(e) => return Err(e.into()),
  };
  let manifest = serde_json::from_slice(&bytes).map_err(|source| StoreError::Manifest {
    path: path.to_path_buf(),
    source,
  })?;
  Ok(Some(manifest))
}

pub async fn write(
  adapter: &dyn Adapter,
  path: &Path,
  manifest: &Manifest,
) -> Result<(), StoreError> {
  let content = serde_json::to_string_pretty(manifest).map_err(|source| StoreError::Manifest {
    path: path.to_path_buf(),
    source,
  })?;
  adapter.write_file(path, content.as_bytes()).await?;
  Ok(())
}
