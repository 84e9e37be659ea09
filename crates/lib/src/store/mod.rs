//! The store engine.
//!
//! `ensure` is the critical path: derive the identity, take the optional
//! lock, serve from cache when the manifest exists, otherwise build into a
//! temp directory and atomically rename it into place. Concurrent builders
//! of the same space are correct without coordination because the loser of
//! the rename detects the winner's manifest and adopts it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use radium_platform::Adapter;

use crate::error::StoreError;
use crate::events::{EventBus, EventHandler, StoreEvent, Subscription};
use crate::identity::{self, DataId, StoreLayout, TEMP_PREFIX};
use crate::kind::{
  normalize_exports, BoxFuture, CommandContext, CurrentState, InitContext, Kind,
};
use crate::manifest::{self, CommandRecord, CommandResultRecord, Manifest, Metadata, Origin,
  MANIFEST_VERSION};
use crate::space::{
  BuilderInner, CommandInner, CommandPort, CommandResult, CommandSpace, LocalApi, Space,
  SpaceBuilder, SpaceFs,
};
use crate::locker::Locker;

/// Options for a single `ensure` call.
#[derive(Clone)]
pub struct EnsureOptions {
  /// When false, an existing space is removed and rebuilt.
  pub cache: bool,
  pub signal: Option<CancellationToken>,
  /// Callbacks firing at the same points as the global events, in addition
  /// to global subscribers.
  pub on_start: Option<EventHandler>,
  pub on_cached: Option<EventHandler>,
  pub on_done: Option<EventHandler>,
  pub on_error: Option<EventHandler>,
}

impl Default for EnsureOptions {
  fn default() -> Self {
    Self {
      cache: true,
      signal: None,
      on_start: None,
      on_cached: None,
      on_done: None,
      on_error: None,
    }
  }
}

/// Configures and creates a [`Store`].
pub struct StoreBuilder {
  adapter: Arc<dyn Adapter>,
  root: PathBuf,
  runtime: Metadata,
  locker: Option<Arc<dyn Locker>>,
}

impl StoreBuilder {
  /// Store-level runtime value handed to every initializer.
  pub fn runtime(mut self, runtime: Metadata) -> Self {
    self.runtime = runtime;
    self
  }

  /// Advisory per-data-id lock provider deduplicating concurrent builds.
  pub fn locker(mut self, locker: Arc<dyn Locker>) -> Self {
    self.locker = Some(locker);
    self
  }

  pub fn build(self) -> Store {
    Store {
      inner: Arc::new(StoreInner {
        adapter: self.adapter,
        layout: StoreLayout::new(self.root),
        runtime: self.runtime,
        locker: self.locker,
        bus: EventBus::new(),
        kinds: Mutex::new(HashMap::new()),
      }),
    }
  }
}

/// Content-addressed space store over an [`Adapter`].
#[derive(Clone)]
pub struct Store {
  inner: Arc<StoreInner>,
}

impl Store {
  pub fn builder(adapter: Arc<dyn Adapter>, root: impl Into<PathBuf>) -> StoreBuilder {
    StoreBuilder {
      adapter,
      root: root.into(),
      runtime: Metadata::new(),
      locker: None,
    }
  }

  pub fn new(adapter: Arc<dyn Adapter>, root: impl Into<PathBuf>) -> Self {
    Self::builder(adapter, root).build()
  }

  pub fn root(&self) -> &Path {
    self.inner.layout.root()
  }

  /// Subscribe to every event the store emits.
  pub fn on(&self, handler: impl Fn(&StoreEvent) + Send + Sync + 'static) -> Subscription {
    self.inner.bus.subscribe(Arc::new(handler))
  }

  /// Record a kind so `find`/`list` can re-attach command capability to the
  /// handles they build. `ensure` registers implicitly.
  pub fn register(&self, kind: &Arc<Kind>) {
    self.inner.register_kind(kind);
  }

  /// Materialize (or serve from cache) the space for `(kind, input)`.
  pub async fn ensure(&self, kind: &Arc<Kind>, input: Value) -> Result<Space, StoreError> {
    self.ensure_with(kind, input, EnsureOptions::default()).await
  }

  pub async fn ensure_with(
    &self,
    kind: &Arc<Kind>,
    input: Value,
    options: EnsureOptions,
  ) -> Result<Space, StoreError> {
    self
      .inner
      .clone()
      .ensure_at(kind.clone(), input, options, None, self.inner.runtime.clone())
      .await
  }

  /// Look up a shared space by origin without building anything.
  pub async fn find(&self, origin: &Origin) -> Result<Option<Space>, StoreError> {
    let id = self.inner.origin_id(origin);
    let data_dir = self.inner.layout.data_dir(None, &origin.kind, &id);
    match manifest::read(&*self.inner.adapter, &self.inner.layout.manifest_path(&data_dir)).await? {
      Some(manifest) => Ok(Some(StoreInner::build_space(&self.inner, id, &data_dir, manifest))),
      None => Ok(None),
    }
  }

  pub async fn has(&self, origin: &Origin) -> bool {
    let id = self.inner.origin_id(origin);
    let data_dir = self.inner.layout.data_dir(None, &origin.kind, &id);
    self
      .inner
      .adapter
      .exists(&self.inner.layout.manifest_path(&data_dir))
      .await
  }

  /// Delete a space (including its local-deps subtree) and purge its
  /// per-space listeners.
  pub async fn remove(&self, origin: &Origin) -> Result<(), StoreError> {
    let id = self.inner.origin_id(origin);
    let data_dir = self.inner.layout.data_dir(None, &origin.kind, &id);
    match self.inner.adapter.remove(&data_dir, true).await {
      Ok(()) => info!(kind = %origin.kind, data_id = %id, "space removed"),
      Err(e) if e.is_not_found() => {}
      Err(e) => return Err(e.into()),
    }
    self.inner.bus.purge(&id);
    Ok(())
  }

  /// Enumerate shared spaces, optionally restricted to one kind. Temp
  /// entries and entries without a readable manifest are skipped.
  pub async fn list(&self, kind: Option<&str>) -> Result<Vec<Space>, StoreError> {
    let data_root = self.inner.layout.data_root();
    let kind_names: Vec<String> = match kind {
      Some(name) => vec![name.to_string()],
      None => match self.inner.adapter.read_dir(&data_root).await {
        Ok(names) => names,
        Err(e) if e.is_not_found() => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
      },
    };

    let mut spaces = Vec::new();
    for kind_name in kind_names {
      let kind_dir = data_root.join(&kind_name);
      let shards = match self.inner.adapter.read_dir(&kind_dir).await {
        Ok(names) => names,
        Err(_) => continue,
      };
      for shard in shards {
        let shard_dir = kind_dir.join(&shard);
        let entries = match self.inner.adapter.read_dir(&shard_dir).await {
          Ok(names) => names,
          Err(_) => continue,
        };
        for entry in entries {
          if entry.starts_with(TEMP_PREFIX) {
            continue;
          }
          let data_dir = shard_dir.join(&entry);
          match manifest::read(
            &*self.inner.adapter,
            &self.inner.layout.manifest_path(&data_dir),
          )
          .await
          {
            Ok(Some(manifest)) => {
              let id = self.inner.origin_id(&manifest.origin);
              spaces.push(StoreInner::build_space(&self.inner, id, &data_dir, manifest));
            }
            Ok(None) => {}
            Err(e) => {
              debug!(path = %data_dir.display(), error = %e, "skipping unreadable manifest");
            }
          }
        }
      }
    }
    Ok(spaces)
  }
}

impl std::fmt::Debug for Store {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Store")
      .field("root", &self.inner.layout.root())
      .finish()
  }
}

pub(crate) struct StoreInner {
  adapter: Arc<dyn Adapter>,
  layout: StoreLayout,
  runtime: Metadata,
  locker: Option<Arc<dyn Locker>>,
  bus: EventBus,
  kinds: Mutex<HashMap<String, Arc<Kind>>>,
}

impl StoreInner {
  pub(crate) fn adapter(&self) -> &Arc<dyn Adapter> {
    &self.adapter
  }

  pub(crate) fn bus(&self) -> &EventBus {
    &self.bus
  }

  fn register_kind(&self, kind: &Arc<Kind>) {
    self
      .kinds
      .lock()
      .unwrap()
      .insert(kind.name().to_string(), kind.clone());
  }

  /// Recompute the data id from an origin, applying the recorded cache-key
  /// value as a constant function.
  fn origin_id(&self, origin: &Origin) -> DataId {
    let effective = identity::effective_input(origin.cache_key.as_ref(), &origin.input);
    identity::data_id(&*self.adapter, &origin.kind, &effective)
  }

  /// Build a handle from a persisted manifest. Command capability is
  /// attached when the originating kind is registered and has a handler.
  fn build_space(this: &Arc<Self>, data_id: DataId, data_dir: &Path, manifest: Manifest) -> Space {
    let content = this.layout.content_dir(data_dir);
    let exports = manifest
      .exports
      .iter()
      .map(|(name, rel)| (name.clone(), identity::join_export(&content, rel)))
      .collect();
    let port = this
      .kinds
      .lock()
      .unwrap()
      .get(&manifest.origin.kind)
      .filter(|kind| kind.has_command_handler())
      .map(|kind| CommandPort {
        store: this.clone(),
        kind: kind.clone(),
        data_id: data_id.clone(),
        data_dir: data_dir.to_path_buf(),
      });
    Space {
      data_id,
      kind: manifest.origin.kind.clone(),
      origin: manifest.origin.clone(),
      path: content,
      exports,
      manifest,
      port,
    }
  }

  /// Reentrant `ensure`: `dep()` calls land here with the parent's temp data
  /// dir as `local_anchor` (for local scope) and the merged runtime.
  pub(crate) fn ensure_at(
    self: Arc<Self>,
    kind: Arc<Kind>,
    input: Value,
    options: EnsureOptions,
    local_anchor: Option<PathBuf>,
    runtime: Metadata,
  ) -> BoxFuture<'static, Result<Space, StoreError>> {
    Box::pin(async move {
      self
        .ensure_impl(kind, input, options, local_anchor, runtime)
        .await
    })
  }

  async fn ensure_impl(
    self: Arc<Self>,
    kind: Arc<Kind>,
    input: Value,
    options: EnsureOptions,
    local_anchor: Option<PathBuf>,
    runtime: Metadata,
  ) -> Result<Space, StoreError> {
    self.register_kind(&kind);

    let effective = kind.effective_input(&input);
    let id = identity::data_id(&*self.adapter, kind.name(), &effective);
    let data_dir = self
      .layout
      .data_dir(local_anchor.as_deref(), kind.name(), &id);
    let manifest_path = self.layout.manifest_path(&data_dir);

    // held to the end of the call; released on every exit path
    let _lock = match &self.locker {
      Some(locker) => Some(locker.acquire(&id, options.signal.as_ref()).await?),
      None => None,
    };

    if options.signal.as_ref().is_some_and(|s| s.is_cancelled()) {
      return Err(StoreError::Aborted);
    }

    if let Some(existing) = manifest::read(&*self.adapter, &manifest_path).await? {
      if options.cache {
        let space = StoreInner::build_space(&self, id.clone(), &data_dir, existing);
        let event = StoreEvent::InitCached {
          kind: kind.name().to_string(),
          data_id: id,
          input,
          path: space.path.clone(),
        };
        self.bus.emit(&event);
        if let Some(cb) = &options.on_cached {
          cb(&event);
        }
        debug!(kind = kind.name(), data_id = %space.data_id, "space served from cache");
        return Ok(space);
      }
      info!(kind = kind.name(), data_id = %id, "cache bypassed, rebuilding");
      self.adapter.remove(&data_dir, true).await?;
    }

    let start = StoreEvent::InitStart {
      kind: kind.name().to_string(),
      data_id: id.clone(),
      input: input.clone(),
    };
    self.bus.emit(&start);
    if let Some(cb) = &options.on_start {
      cb(&start);
    }

    let temp_dir = self.layout.temp_dir(&data_dir, &id);
    let temp_content = self.layout.content_dir(&temp_dir);
    let temp_private = self.layout.private_dir(&temp_dir);
    self.adapter.mkdir(&temp_content).await?;
    self.adapter.mkdir(&temp_private).await?;

    let signal = options.signal.clone().unwrap_or_default();
    let builder = SpaceBuilder::new(BuilderInner {
      store: self.clone(),
      kind_name: kind.name().to_string(),
      data_id: id.clone(),
      temp_data_dir: temp_dir.clone(),
      content: SpaceFs::new(self.adapter.clone(), temp_content),
      local: LocalApi::new(SpaceFs::new(self.adapter.clone(), temp_private)),
      runtime,
      deps: Mutex::new(Vec::new()),
      signal: signal.clone(),
    });

    let outcome = kind
      .run_init(InitContext {
        input: input.clone(),
        space: builder.clone(),
        signal,
      })
      .await;

    let outcome = match outcome {
      Ok(outcome) => outcome,
      Err(source) => {
        self.clean_temp(&temp_dir).await;
        let err = StoreError::Init { source };
        self.emit_init_error(&kind, &id, &input, &err, options.on_error.as_ref());
        return Err(err);
      }
    };

    let exports = normalize_exports(outcome.exports);
    let metadata = outcome.metadata.unwrap_or_default();
    let dependencies = builder.take_dependencies();
    let now = Utc::now();
    let built = Manifest {
      version: MANIFEST_VERSION,
      origin: Origin {
        kind: kind.name().to_string(),
        input: input.clone(),
        cache_key: kind.derived_cache_key(&input),
      },
      exports,
      dependencies,
      commands: Vec::new(),
      metadata,
      created_at: now,
      updated_at: now,
    };

    if let Err(e) = manifest::write(
      &*self.adapter,
      &self.layout.manifest_path(&temp_dir),
      &built,
    )
    .await
    {
      self.clean_temp(&temp_dir).await;
      self.emit_init_error(&kind, &id, &input, &e, options.on_error.as_ref());
      return Err(e);
    }

    if let Err(rename_err) = self.adapter.rename(&temp_dir, &data_dir).await {
      self.clean_temp(&temp_dir).await;
      if self.adapter.exists(&manifest_path).await {
        // a concurrent builder won the rename; adopt its result
        debug!(kind = kind.name(), data_id = %id, "adopting concurrent winner");
      } else {
        let err = StoreError::FinalizeFailed {
          data_id: id.clone(),
          message: rename_err.to_string(),
        };
        self.emit_init_error(&kind, &id, &input, &err, options.on_error.as_ref());
        return Err(err);
      }
    }

    let final_manifest = match manifest::read(&*self.adapter, &manifest_path).await? {
      Some(manifest) => manifest,
      None => {
        let err = StoreError::FinalizeFailed {
          data_id: id.clone(),
          message: "manifest missing after finalize".to_string(),
        };
        self.emit_init_error(&kind, &id, &input, &err, options.on_error.as_ref());
        return Err(err);
      }
    };

    let space = StoreInner::build_space(&self, id, &data_dir, final_manifest);
    let done = StoreEvent::InitDone {
      kind: kind.name().to_string(),
      data_id: space.data_id.clone(),
      input,
      path: space.path.clone(),
      exports: space.exports.clone(),
      metadata: space.manifest.metadata.clone(),
    };
    self.bus.emit(&done);
    if let Some(cb) = &options.on_done {
      cb(&done);
    }
    info!(kind = kind.name(), data_id = %space.data_id, "space materialized");
    Ok(space)
  }

  async fn clean_temp(&self, temp_dir: &Path) {
    if let Err(e) = self.adapter.remove(temp_dir, true).await {
      if !e.is_not_found() {
        warn!(path = %temp_dir.display(), error = %e, "failed to clean temp directory");
      }
    }
  }

  fn emit_init_error(
    &self,
    kind: &Kind,
    data_id: &DataId,
    input: &Value,
    error: &StoreError,
    callback: Option<&EventHandler>,
  ) {
    let event = StoreEvent::InitError {
      kind: kind.name().to_string(),
      data_id: data_id.clone(),
      input: input.clone(),
      error: error.to_string(),
    };
    self.bus.emit(&event);
    if let Some(cb) = callback {
      cb(&event);
    }
  }

  /// Execute a command against a materialized space (via [`CommandPort`]).
  pub(crate) async fn send(
    this: &Arc<Self>,
    kind: &Arc<Kind>,
    data_id: &DataId,
    data_dir: &Path,
    command: Value,
  ) -> Result<CommandResult, StoreError> {
    let start = StoreEvent::CommandStart {
      kind: kind.name().to_string(),
      data_id: data_id.clone(),
      command: command.clone(),
    };
    this.bus.emit(&start);

    let result = Self::send_inner(this, kind, data_id, data_dir, command.clone()).await;

    match result {
      Ok(result) => {
        this.bus.emit(&StoreEvent::CommandDone {
          kind: kind.name().to_string(),
          data_id: data_id.clone(),
          command,
          exports: result.exports.clone(),
          metadata: result.metadata.clone(),
        });
        Ok(result)
      }
      Err(error) => {
        this.bus.emit(&StoreEvent::CommandError {
          kind: kind.name().to_string(),
          data_id: data_id.clone(),
          command,
          error: error.to_string(),
        });
        Err(error)
      }
    }
  }

  async fn send_inner(
    this: &Arc<Self>,
    kind: &Arc<Kind>,
    data_id: &DataId,
    data_dir: &Path,
    command: Value,
  ) -> Result<CommandResult, StoreError> {
    let manifest_path = this.layout.manifest_path(data_dir);
    let mut manifest = manifest::read(&*this.adapter, &manifest_path)
      .await?
      .ok_or_else(|| {
        StoreError::Adapter(radium_platform::AdapterError::NotFound {
          path: manifest_path.clone(),
        })
      })?;

    let content = this.layout.content_dir(data_dir);
    let space = CommandSpace::new(CommandInner {
      store: this.clone(),
      kind_name: kind.name().to_string(),
      data_id: data_id.clone(),
      content: SpaceFs::new(this.adapter.clone(), content.clone()),
      local: LocalApi::new(SpaceFs::new(
        this.adapter.clone(),
        this.layout.private_dir(data_dir),
      )),
      runtime: this.runtime.clone(),
    });

    let ctx = CommandContext {
      command: command.clone(),
      current: CurrentState {
        exports: manifest.exports.clone(),
        metadata: manifest.metadata.clone(),
      },
      space,
      signal: CancellationToken::new(),
    };
    let future = kind.run_command(ctx).ok_or_else(|| {
      StoreError::InvalidKind(format!("kind {:?} has no command handler", kind.name()))
    })?;
    let outcome = future.await.map_err(|source| StoreError::Command { source })?;

    let now = Utc::now();
    if let Some(outcome) = outcome {
      if let Some(spec) = outcome.exports {
        manifest.exports = normalize_exports(Some(spec));
      }
      if let Some(metadata) = outcome.metadata {
        manifest.metadata = metadata;
      }
      manifest.commands.push(CommandRecord {
        command,
        executed_at: now,
        result: Some(CommandResultRecord {
          exports: manifest.exports.clone(),
          metadata: manifest.metadata.clone(),
        }),
      });
    }
    manifest.updated_at = now;
    manifest::write(&*this.adapter, &manifest_path, &manifest).await?;

    let exports = manifest
      .exports
      .iter()
      .map(|(name, rel)| (name.clone(), identity::join_export(&content, rel)))
      .collect();
    Ok(CommandResult {
      exports,
      metadata: manifest.metadata,
    })
  }
}
