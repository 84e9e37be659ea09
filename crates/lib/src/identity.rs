//! Identity derivation and on-disk layout.
//!
//! Every path decision the engine makes goes through here, so the module is
//! kept free of I/O: the store hands in its root and an adapter-provided
//! hash, and gets paths back.
//!
//! # Layout
//!
//! ```text
//! <storeRoot>/
//!   .radium-fs-data/
//!     <kindName>/
//!       <xx>/                        # shard: first two hex chars
//!         <dataId>/
//!           .radium-fs-manifest.json
//!           space/                   # public content directory
//!           local/                   # private directory
//!           .radium-fs-local-deps/   # mirrors the outer layout, recursively
//!         .tmp-<dataId>-<rand>/      # transient build directory
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use radium_platform::Adapter;

use crate::canonical::canonical;

pub const DATA_DIR_NAME: &str = ".radium-fs-data";
pub const MANIFEST_FILENAME: &str = ".radium-fs-manifest.json";
pub const LOCAL_DEPS_DIR_NAME: &str = ".radium-fs-local-deps";
pub const CONTENT_DIR_NAME: &str = "space";
pub const PRIVATE_DIR_NAME: &str = "local";
pub const TEMP_PREFIX: &str = ".tmp-";

const TEMP_SUFFIX_LEN: usize = 8;

/// The deterministic 64-hex identity of a space.
///
/// Pure function of the kind name and effective cache key; never persisted,
/// always recomputable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataId(String);

impl DataId {
  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// First two hex characters, used as an intermediate directory.
  pub fn shard(&self) -> &str {
    &self.0[..2]
  }
}

impl fmt::Display for DataId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// The byte stream hashed into a [`DataId`]:
/// `kindName || 0x00 || canonical(effectiveInput)`.
pub fn hash_payload(kind: &str, effective_input: &Value) -> Vec<u8> {
  let canonical = canonical(effective_input);
  let mut bytes = Vec::with_capacity(kind.len() + 1 + canonical.len());
  bytes.extend_from_slice(kind.as_bytes());
  bytes.push(0);
  bytes.extend_from_slice(canonical.as_bytes());
  bytes
}

pub fn data_id(adapter: &dyn Adapter, kind: &str, effective_input: &Value) -> DataId {
  DataId(adapter.hash(&hash_payload(kind, effective_input)))
}

/// Apply the `cacheKey(input) ?? input ?? {}` rule: a present, non-null cache
/// key wins; a null/absent input means the empty object.
pub fn effective_input(cache_key: Option<&Value>, input: &Value) -> Value {
  let picked = match cache_key {
    Some(key) if !key.is_null() => key,
    _ => input,
  };
  if picked.is_null() {
    Value::Object(serde_json::Map::new())
  } else {
    picked.clone()
  }
}

/// Path resolution for one store root.
#[derive(Debug, Clone)]
pub struct StoreLayout {
  root: PathBuf,
}

impl StoreLayout {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Root of the shared data tree.
  pub fn data_root(&self) -> PathBuf {
    self.root.join(DATA_DIR_NAME)
  }

  pub fn kind_dir(&self, kind: &str) -> PathBuf {
    self.data_root().join(kind)
  }

  /// Data directory for a space. A `local_anchor` (the owning parent's data
  /// directory) switches to the private local-deps subtree.
  pub fn data_dir(&self, local_anchor: Option<&Path>, kind: &str, id: &DataId) -> PathBuf {
    let base = match local_anchor {
      Some(parent) => parent.join(LOCAL_DEPS_DIR_NAME),
      None => self.data_root(),
    };
    base.join(kind).join(id.shard()).join(id.as_str())
  }

  /// Transient build directory: a sibling of `data_dir` whose name `list`
  /// filters out.
  pub fn temp_dir(&self, data_dir: &Path, id: &DataId) -> PathBuf {
    let name = format!("{}{}-{}", TEMP_PREFIX, id, temp_suffix());
    match data_dir.parent() {
      Some(parent) => parent.join(name),
      None => PathBuf::from(name),
    }
  }

  pub fn content_dir(&self, data_dir: &Path) -> PathBuf {
    data_dir.join(CONTENT_DIR_NAME)
  }

  pub fn private_dir(&self, data_dir: &Path) -> PathBuf {
    data_dir.join(PRIVATE_DIR_NAME)
  }

  pub fn manifest_path(&self, data_dir: &Path) -> PathBuf {
    data_dir.join(MANIFEST_FILENAME)
  }
}

fn temp_suffix() -> String {
  const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
  let mut rng = rand::thread_rng();
  (0..TEMP_SUFFIX_LEN)
    .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
    .collect()
}

/// Resolve an export value relative to a content directory (`"."` and
/// `"./x"` forms are normalized).
pub fn join_export(content_dir: &Path, rel: &str) -> PathBuf {
  let trimmed = rel.trim_start_matches("./");
  if trimmed.is_empty() || trimmed == "." {
    content_dir.to_path_buf()
  } else {
    content_dir.join(trimmed)
  }
}

/// Relative path from the directory containing a symlink to its target,
/// by common-prefix elimination over `/`-separated components.
///
/// Storing relative targets is what lets a whole store tree be moved or
/// copied without rewriting links.
pub fn relative_from(from_dir: &Path, target: &Path) -> PathBuf {
  let from: Vec<String> = components_of(from_dir);
  let to: Vec<String> = components_of(target);

  let common = from
    .iter()
    .zip(to.iter())
    .take_while(|(a, b)| a == b)
    .count();

  let mut parts: Vec<&str> = Vec::new();
  for _ in common..from.len() {
    parts.push("..");
  }
  for component in &to[common..] {
    parts.push(component);
  }

  if parts.is_empty() {
    PathBuf::from(".")
  } else {
    PathBuf::from(parts.join("/"))
  }
}

fn components_of(path: &Path) -> Vec<String> {
  path
    .to_string_lossy()
    .split(['/', '\\'])
    .filter(|s| !s.is_empty() && *s != ".")
    .map(str::to_string)
    .collect()
}
