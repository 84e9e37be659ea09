//! Error types for the store engine.

use std::path::PathBuf;

use thiserror::Error;

use radium_platform::AdapterError;

use crate::identity::DataId;

/// Errors surfaced by store operations.
///
/// User-handler failures ([`StoreError::Init`], [`StoreError::Command`]) wrap
/// the original error unchanged; the engine never recovers them. Adapter
/// errors pass through without reinterpretation.
#[derive(Debug, Error)]
pub enum StoreError {
  /// A kind was declared without a usable name or initializer.
  #[error("invalid kind: {0}")]
  InvalidKind(String),

  /// Operation cancelled via its signal.
  #[error("operation aborted")]
  Aborted,

  /// A `dep` call asked for an export the dependency does not expose.
  #[error("export {requested:?} not found on kind {kind:?} (available: {available:?})")]
  ExportNotFound {
    kind: String,
    requested: String,
    available: Vec<String>,
  },

  /// Temp-to-final rename failed and no concurrent winner exists.
  #[error("failed to finalize space {data_id}: {message}")]
  FinalizeFailed { data_id: DataId, message: String },

  /// The user's initializer failed; the temp directory was cleaned up.
  #[error("initializer failed: {source}")]
  Init {
    #[source]
    source: anyhow::Error,
  },

  /// The user's command handler failed; the manifest is untouched.
  #[error("command handler failed: {source}")]
  Command {
    #[source]
    source: anyhow::Error,
  },

  #[error(transparent)]
  Adapter(#[from] AdapterError),

  /// A manifest could not be parsed or serialized.
  #[error("invalid manifest at {path}: {source}")]
  Manifest {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("lock error: {0}")]
  Lock(String),
}
