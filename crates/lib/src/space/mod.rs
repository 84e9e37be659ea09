//! Space handles.
//!
//! A [`Space`] is the read-only view of a materialized directory returned by
//! `ensure`/`find`/`list`. When the originating kind declares a command
//! handler the handle carries a [`CommandPort`]; otherwise no command surface
//! exists on the handle at all.

mod builder;
mod fs;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::error::StoreError;
use crate::events::{CommandTag, StoreEvent, Subscription};
use crate::identity::DataId;
use crate::kind::Kind;
use crate::manifest::{Manifest, Metadata, Origin};
use crate::store::StoreInner;

pub use builder::{CommandSpace, DepOptions, SpaceBuilder};
pub use fs::{LineRange, LocalApi, ReadDirOptions};

pub(crate) use builder::{BuilderInner, CommandInner};
pub(crate) use fs::SpaceFs;

/// Read-only handle to a materialized space.
#[derive(Clone)]
pub struct Space {
  pub data_id: DataId,
  pub kind: String,
  pub origin: Origin,
  /// Absolute path of the content directory.
  pub path: PathBuf,
  /// Exports resolved to absolute paths.
  pub exports: BTreeMap<String, PathBuf>,
  pub manifest: Manifest,
  pub(crate) port: Option<CommandPort>,
}

impl Space {
  /// The command surface, present iff the kind declares `on_command`.
  pub fn commands(&self) -> Option<&CommandPort> {
    self.port.as_ref()
  }
}

impl fmt::Debug for Space {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Space")
      .field("data_id", &self.data_id)
      .field("kind", &self.kind)
      .field("path", &self.path)
      .field("exports", &self.exports)
      .field("commands", &self.port.is_some())
      .finish()
  }
}

/// Result of a successful `send`.
#[derive(Debug, Clone)]
pub struct CommandResult {
  /// Exports resolved to absolute paths, after any updates.
  pub exports: BTreeMap<String, PathBuf>,
  pub metadata: Metadata,
}

/// Command capability of a space whose kind has `on_command`.
#[derive(Clone)]
pub struct CommandPort {
  pub(crate) store: Arc<StoreInner>,
  pub(crate) kind: Arc<Kind>,
  pub(crate) data_id: DataId,
  pub(crate) data_dir: PathBuf,
}

impl CommandPort {
  /// Run the kind's command handler against this space, appending to the
  /// manifest's command log on success.
  pub async fn send(&self, command: Value) -> Result<CommandResult, StoreError> {
    StoreInner::send(&self.store, &self.kind, &self.data_id, &self.data_dir, command).await
  }

  /// Subscribe to this space's command events for one tag.
  pub fn on(
    &self,
    tag: CommandTag,
    handler: impl Fn(&StoreEvent) + Send + Sync + 'static,
  ) -> Subscription {
    self
      .store
      .bus()
      .subscribe_command(self.data_id.clone(), tag, Arc::new(handler))
  }

  /// Subscribe to raw payloads emitted by this space's command handler.
  pub fn on_custom(&self, handler: impl Fn(&Value) + Send + Sync + 'static) -> Subscription {
    self
      .store
      .bus()
      .subscribe_custom(self.data_id.clone(), Arc::new(handler))
  }
}

impl fmt::Debug for CommandPort {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CommandPort")
      .field("kind", &self.kind.name())
      .field("data_id", &self.data_id)
      .finish()
  }
}
