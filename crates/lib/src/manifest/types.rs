use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed schema tag; present for forward-compatible parsing.
pub const MANIFEST_VERSION: u32 = 1;

/// Opaque key-value map attached to a space by its handlers.
pub type Metadata = serde_json::Map<String, Value>;

/// What produced a space: the kind name, the raw input, and (when the kind
/// defines a cache-key function) the derived cache-key value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
  pub kind: String,
  #[serde(default)]
  pub input: Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cache_key: Option<Value>,
}

/// Whether a dependency is shared across the store or owned by its parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
  #[default]
  Shared,
  Local,
}

/// One `dep()` mount, recorded in call order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyRecord {
  /// Path of the symlink, relative to the parent's content directory.
  pub mount_path: String,
  pub origin: Origin,
  pub scope: Scope,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub export: Option<String>,
}

/// One successfully applied command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
  pub command: Value,
  pub executed_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<CommandResultRecord>,
}

/// The exports/metadata state after a command was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResultRecord {
  pub exports: BTreeMap<String, String>,
  pub metadata: Metadata,
}

/// The serialized authoritative description of one materialized space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
  pub version: u32,
  pub origin: Origin,
  /// Export name -> path relative to the content directory. Always contains
  /// the `"."` key.
  pub exports: BTreeMap<String, String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub dependencies: Vec<DependencyRecord>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub commands: Vec<CommandRecord>,
  #[serde(default)]
  pub metadata: Metadata,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}
