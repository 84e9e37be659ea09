//! radium-lib: a content-addressed filesystem-space cache with a
//! dependency-linked DAG.
//!
//! Users declare [`Kind`]s (recipes producing a directory of files from a
//! typed input); the [`Store`] materializes each recipe at a deterministic
//! path derived from `hash(kind, input)`, persists a manifest, and composes
//! recipes by mounting one space inside another via relative symlinks.
//! Repeat requests for the same `(kind, input)` are served from cache.
//!
//! ```no_run
//! use std::sync::Arc;
//! use radium_lib::{InitOutcome, Kind, Store};
//! use radium_platform::NativeAdapter;
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), radium_lib::StoreError> {
//! let greeting = Kind::builder("greeting")
//!   .init(|ctx| async move {
//!     let name = ctx.input["name"].as_str().unwrap_or("there").to_string();
//!     ctx.space.write_file("hello.txt", format!("Hello, {name}!")).await?;
//!     Ok(InitOutcome::new().export("greeting", "hello.txt"))
//!   })
//!   .build()?;
//!
//! let store = Store::new(Arc::new(NativeAdapter::new()), "/var/lib/radium");
//! let space = store.ensure(&greeting, json!({ "name": "World" })).await?;
//! assert!(space.exports["greeting"].ends_with("space/hello.txt"));
//! # Ok(())
//! # }
//! ```

pub mod canonical;
pub mod error;
pub mod events;
pub mod identity;
pub mod kind;
pub mod locker;
pub mod manifest;
pub mod space;
pub mod store;

pub use error::StoreError;
pub use events::{CommandTag, CustomHandler, EventHandler, StoreEvent, Subscription};
pub use identity::DataId;
pub use kind::{
  CommandContext, CommandOutcome, CurrentState, ExportsSpec, InitContext, InitOutcome, Kind,
  KindBuilder,
};
pub use locker::{FsLocker, KeyedLocker, LockGuard, Locker};
pub use manifest::{
  CommandRecord, CommandResultRecord, DependencyRecord, Manifest, Metadata, Origin, Scope,
};
pub use space::{
  CommandPort, CommandResult, CommandSpace, DepOptions, LineRange, LocalApi, ReadDirOptions,
  Space, SpaceBuilder,
};
pub use store::{EnsureOptions, Store, StoreBuilder};

pub use radium_platform::{
  Adapter, AdapterError, FileStat, GlobOptions, GrepOptions, MemoryAdapter, NativeAdapter,
};
