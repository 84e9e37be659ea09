//! The space APIs handed to user handlers.
//!
//! [`SpaceBuilder`] is bound to a build's temp directory and disappears when
//! the build finishes; its `dep()` reenters the engine recursively and
//! appends to the dependency list owned by this build (bound state, never a
//! global). [`CommandSpace`] is the same surface minus `dep`, bound to the
//! final content directory of an already-materialized space.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use radium_platform::{FileStat, GlobOptions, GrepOptions};

use crate::error::StoreError;
use crate::events::StoreEvent;
use crate::identity::{self, DataId};
use crate::kind::Kind;
use crate::manifest::{DependencyRecord, Metadata, Scope};
use crate::space::fs::{LineRange, LocalApi, ReadDirOptions, SpaceFs};
use crate::store::{EnsureOptions, StoreInner};

/// Options for a `dep()` mount.
#[derive(Default, Clone)]
pub struct DepOptions {
  pub scope: Scope,
  /// Which export of the dependency to point at: `None`/`"."` for the
  /// default export, `"./name"` for a named one, `"*"` for the content root.
  pub export: Option<String>,
  /// Extra runtime entries shallow-merged over the parent's runtime for the
  /// nested build. The child cannot affect the parent.
  pub runtime: Option<Metadata>,
}

pub(crate) struct BuilderInner {
  pub(crate) store: Arc<StoreInner>,
  pub(crate) kind_name: String,
  pub(crate) data_id: DataId,
  /// The temp data directory this build is assembling.
  pub(crate) temp_data_dir: PathBuf,
  pub(crate) content: SpaceFs,
  pub(crate) local: LocalApi,
  pub(crate) runtime: Metadata,
  pub(crate) deps: Mutex<Vec<DependencyRecord>>,
  pub(crate) signal: CancellationToken,
}

/// The space-build API consumed by `on_init`.
#[derive(Clone)]
pub struct SpaceBuilder {
  inner: Arc<BuilderInner>,
}

impl SpaceBuilder {
  pub(crate) fn new(inner: BuilderInner) -> Self {
    Self {
      inner: Arc::new(inner),
    }
  }

  /// Absolute path of the content directory being assembled.
  pub fn path(&self) -> &Path {
    self.inner.content.root()
  }

  /// The runtime value passed through from the store (merged with any
  /// `dep()` extras on the way down).
  pub fn runtime(&self) -> &Metadata {
    &self.inner.runtime
  }

  /// The private-directory sub-API.
  pub fn local(&self) -> &LocalApi {
    &self.inner.local
  }

  pub fn signal(&self) -> &CancellationToken {
    &self.inner.signal
  }

  /// Send a custom payload to store-level subscribers.
  pub fn emit(&self, payload: Value) {
    let event = StoreEvent::Custom {
      kind: self.inner.kind_name.clone(),
      data_id: self.inner.data_id.clone(),
      payload,
    };
    self.inner.store.bus().emit(&event);
  }

  /// Materialize a dependency and mount it at `mount_path` via a relative
  /// symlink. Returns the absolute path of the mount target.
  pub async fn dep(
    &self,
    mount_path: &str,
    kind: &Arc<Kind>,
    input: Value,
    options: DepOptions,
  ) -> Result<PathBuf, StoreError> {
    let local_anchor = match options.scope {
      Scope::Local => Some(self.inner.temp_data_dir.clone()),
      Scope::Shared => None,
    };

    let mut runtime = self.inner.runtime.clone();
    if let Some(extra) = &options.runtime {
      for (key, value) in extra {
        runtime.insert(key.clone(), value.clone());
      }
    }

    let ensure_options = EnsureOptions {
      signal: Some(self.inner.signal.clone()),
      ..EnsureOptions::default()
    };
    let child = self
      .inner
      .store
      .clone()
      .ensure_at(kind.clone(), input, ensure_options, local_anchor, runtime)
      .await?;

    let target = match options.export.as_deref() {
      Some("*") => child.path.clone(),
      selector => {
        let name = selector.unwrap_or(".");
        let rel = child.manifest.exports.get(name).ok_or_else(|| {
          StoreError::ExportNotFound {
            kind: kind.name().to_string(),
            requested: name.to_string(),
            available: child.manifest.exports.keys().cloned().collect(),
          }
        })?;
        identity::join_export(&child.path, rel)
      }
    };

    let link = self.inner.content.resolve(mount_path);
    let link_dir = match link.parent() {
      Some(parent) => parent.to_path_buf(),
      None => self.inner.content.root().to_path_buf(),
    };
    let rel_target = identity::relative_from(&link_dir, &target);
    self
      .inner
      .store
      .adapter()
      .symlink(&rel_target, &link)
      .await?;

    self.inner.deps.lock().unwrap().push(DependencyRecord {
      mount_path: mount_path.to_string(),
      origin: child.origin.clone(),
      scope: options.scope,
      export: options.export,
    });

    debug!(
      parent = %self.inner.kind_name,
      dep = kind.name(),
      mount = mount_path,
      "dependency mounted"
    );
    Ok(target)
  }

  /// Drain the dependency records collected so far, in `dep()` call order.
  pub(crate) fn take_dependencies(&self) -> Vec<DependencyRecord> {
    std::mem::take(&mut *self.inner.deps.lock().unwrap())
  }

  // content-directory file operations

  pub async fn write_file(
    &self,
    path: &str,
    contents: impl AsRef<[u8]>,
  ) -> Result<(), StoreError> {
    self.inner.content.write_file(path, contents).await
  }

  pub async fn read_file(&self, path: &str) -> Result<Vec<u8>, StoreError> {
    self.inner.content.read_file(path).await
  }

  pub async fn read_file_lines(&self, path: &str, range: LineRange) -> Result<String, StoreError> {
    self.inner.content.read_file_lines(path, range).await
  }

  pub async fn mkdir(&self, path: &str) -> Result<(), StoreError> {
    self.inner.content.mkdir(path).await
  }

  pub async fn read_dir(
    &self,
    path: &str,
    options: ReadDirOptions,
  ) -> Result<Vec<String>, StoreError> {
    self.inner.content.read_dir(path, options).await
  }

  pub async fn stat(&self, path: &str) -> Result<FileStat, StoreError> {
    self.inner.content.stat(path).await
  }

  pub async fn copy(&self, from: &str, to: &str) -> Result<(), StoreError> {
    self.inner.content.copy(from, to).await
  }

  pub async fn rename(&self, from: &str, to: &str) -> Result<(), StoreError> {
    self.inner.content.rename(from, to).await
  }

  pub async fn remove(&self, path: &str, recursive: bool) -> Result<(), StoreError> {
    self.inner.content.remove(path, recursive).await
  }

  pub async fn glob(
    &self,
    pattern: &str,
    options: GlobOptions,
  ) -> Result<Vec<String>, StoreError> {
    self.inner.content.glob(pattern, options).await
  }

  pub async fn grep(
    &self,
    pattern: &str,
    options: GrepOptions,
  ) -> Result<Vec<String>, StoreError> {
    self.inner.content.grep(pattern, options).await
  }
}

pub(crate) struct CommandInner {
  pub(crate) store: Arc<StoreInner>,
  pub(crate) kind_name: String,
  pub(crate) data_id: DataId,
  pub(crate) content: SpaceFs,
  pub(crate) local: LocalApi,
  pub(crate) runtime: Metadata,
}

/// The command-space API consumed by `on_command`: the build surface minus
/// `dep`, bound to the final (already materialized) content directory.
#[derive(Clone)]
pub struct CommandSpace {
  inner: Arc<CommandInner>,
}

impl CommandSpace {
  pub(crate) fn new(inner: CommandInner) -> Self {
    Self {
      inner: Arc::new(inner),
    }
  }

  pub fn path(&self) -> &Path {
    self.inner.content.root()
  }

  pub fn runtime(&self) -> &Metadata {
    &self.inner.runtime
  }

  pub fn local(&self) -> &LocalApi {
    &self.inner.local
  }

  /// Send a custom payload to store-level and per-space subscribers.
  pub fn emit(&self, payload: Value) {
    let event = StoreEvent::Custom {
      kind: self.inner.kind_name.clone(),
      data_id: self.inner.data_id.clone(),
      payload: payload.clone(),
    };
    self.inner.store.bus().emit(&event);
    self.inner.store.bus().emit_custom(&self.inner.data_id, &payload);
  }

  pub async fn write_file(
    &self,
    path: &str,
    contents: impl AsRef<[u8]>,
  ) -> Result<(), StoreError> {
    self.inner.content.write_file(path, contents).await
  }

  pub async fn read_file(&self, path: &str) -> Result<Vec<u8>, StoreError> {
    self.inner.content.read_file(path).await
  }

  pub async fn read_file_lines(&self, path: &str, range: LineRange) -> Result<String, StoreError> {
    self.inner.content.read_file_lines(path, range).await
  }

  pub async fn mkdir(&self, path: &str) -> Result<(), StoreError> {
    self.inner.content.mkdir(path).await
  }

  pub async fn read_dir(
    &self,
    path: &str,
    options: ReadDirOptions,
  ) -> Result<Vec<String>, StoreError> {
    self.inner.content.read_dir(path, options).await
  }

  pub async fn stat(&self, path: &str) -> Result<FileStat, StoreError> {
    self.inner.content.stat(path).await
  }

  pub async fn copy(&self, from: &str, to: &str) -> Result<(), StoreError> {
    self.inner.content.copy(from, to).await
  }

  pub async fn rename(&self, from: &str, to: &str) -> Result<(), StoreError> {
    self.inner.content.rename(from, to).await
  }

  pub async fn remove(&self, path: &str, recursive: bool) -> Result<(), StoreError> {
    self.inner.content.remove(path, recursive).await
  }

  pub async fn glob(
    &self,
    pattern: &str,
    options: GlobOptions,
  ) -> Result<Vec<String>, StoreError> {
    self.inner.content.glob(pattern, options).await
  }

  pub async fn grep(
    &self,
    pattern: &str,
    options: GrepOptions,
  ) -> Result<Vec<String>, StoreError> {
    self.inner.content.grep(pattern, options).await
  }
}
