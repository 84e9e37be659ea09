//! Kind definitions: the recipes that produce spaces.
//!
//! A kind pairs a name with an async initializer, an optional cache-key
//! reducer, and an optional command handler. Kinds are immutable, hold no
//! per-space state, and are shared as `Arc<Kind>` for the life of the
//! program.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::identity;
use crate::manifest::Metadata;
use crate::space::{CommandSpace, SpaceBuilder};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type CacheKeyFn = dyn Fn(&Value) -> Value + Send + Sync;
type InitFn =
  dyn Fn(InitContext) -> BoxFuture<'static, anyhow::Result<InitOutcome>> + Send + Sync;
type CommandFn = dyn Fn(CommandContext) -> BoxFuture<'static, anyhow::Result<Option<CommandOutcome>>>
  + Send
  + Sync;

/// An immutable recipe: input -> directory of files, with an optional
/// in-place command handler.
pub struct Kind {
  name: String,
  cache_key: Option<Box<CacheKeyFn>>,
  on_init: Box<InitFn>,
  on_command: Option<Box<CommandFn>>,
}

impl fmt::Debug for Kind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Kind")
      .field("name", &self.name)
      .field("cache_key", &self.cache_key.is_some())
      .field("on_command", &self.on_command.is_some())
      .finish()
  }
}

impl Kind {
  pub fn builder(name: impl Into<String>) -> KindBuilder {
    KindBuilder {
      name: name.into(),
      cache_key: None,
      on_init: None,
      on_command: None,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn has_command_handler(&self) -> bool {
    self.on_command.is_some()
  }

  /// The derived cache-key value, when a cache-key function is defined.
  /// This is what the manifest records under `origin.cacheKey`.
  pub(crate) fn derived_cache_key(&self, input: &Value) -> Option<Value> {
    self.cache_key.as_ref().map(|f| f(input))
  }

  /// The value actually hashed into the data id.
  pub(crate) fn effective_input(&self, input: &Value) -> Value {
    identity::effective_input(self.derived_cache_key(input).as_ref(), input)
  }

  pub(crate) fn run_init(&self, ctx: InitContext) -> BoxFuture<'static, anyhow::Result<InitOutcome>> {
    (self.on_init)(ctx)
  }

  pub(crate) fn run_command(
    &self,
    ctx: CommandContext,
  ) -> Option<BoxFuture<'static, anyhow::Result<Option<CommandOutcome>>>> {
    self.on_command.as_ref().map(|f| f(ctx))
  }
}

/// Builder for [`Kind`]; `build` validates the declaration.
pub struct KindBuilder {
  name: String,
  cache_key: Option<Box<CacheKeyFn>>,
  on_init: Option<Box<InitFn>>,
  on_command: Option<Box<CommandFn>>,
}

impl KindBuilder {
  /// Pure reducer selecting the identity-relevant subset of the input.
  pub fn cache_key<F>(mut self, f: F) -> Self
  where
    F: Fn(&Value) -> Value + Send + Sync + 'static,
  {
    self.cache_key = Some(Box::new(f));
    self
  }

  pub fn init<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(InitContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<InitOutcome>> + Send + 'static,
  {
    self.on_init = Some(Box::new(move |ctx| Box::pin(f(ctx))));
    self
  }

  pub fn command<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<CommandOutcome>>> + Send + 'static,
  {
    self.on_command = Some(Box::new(move |ctx| Box::pin(f(ctx))));
    self
  }

  pub fn build(self) -> Result<Arc<Kind>, StoreError> {
    if self.name.trim().is_empty() {
      return Err(StoreError::InvalidKind(
        "kind name must be non-empty".to_string(),
      ));
    }
    let on_init = self.on_init.ok_or_else(|| {
      StoreError::InvalidKind(format!("kind {:?} declares no initializer", self.name))
    })?;
    Ok(Arc::new(Kind {
      name: self.name,
      cache_key: self.cache_key,
      on_init,
      on_command: self.on_command,
    }))
  }
}

/// What the initializer receives: the input, the space-build API bound to
/// the build's temp directory, and the caller's cancellation signal.
pub struct InitContext {
  pub input: Value,
  pub space: SpaceBuilder,
  pub signal: CancellationToken,
}

/// What a command handler receives.
pub struct CommandContext {
  pub command: Value,
  /// Exports (relative form) and metadata as currently persisted.
  pub current: CurrentState,
  pub space: CommandSpace,
  pub signal: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct CurrentState {
  pub exports: BTreeMap<String, String>,
  pub metadata: Metadata,
}

/// Exports as a handler may declare them: a single root path or a named map.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportsSpec {
  Single(String),
  Map(BTreeMap<String, String>),
}

/// Result of a successful `on_init`. Everything is optional; the engine
/// fills in `{ ".": "." }` exports and empty metadata.
#[derive(Debug, Clone, Default)]
pub struct InitOutcome {
  pub exports: Option<ExportsSpec>,
  pub metadata: Option<Metadata>,
}

impl InitOutcome {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a named export (path relative to the content directory).
  pub fn export(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
    let mut map = match self.exports.take() {
      Some(ExportsSpec::Map(map)) => map,
      Some(ExportsSpec::Single(root)) => {
        let mut map = BTreeMap::new();
        map.insert(".".to_string(), root);
        map
      }
      None => BTreeMap::new(),
    };
    map.insert(name.into(), path.into());
    self.exports = Some(ExportsSpec::Map(map));
    self
  }

  pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
    self
      .metadata
      .get_or_insert_with(Metadata::new)
      .insert(key.into(), value);
    self
  }
}

/// Result of a command handler that chose to update the space. Absent
/// fields keep their persisted values.
#[derive(Debug, Clone, Default)]
pub struct CommandOutcome {
  pub exports: Option<ExportsSpec>,
  pub metadata: Option<Metadata>,
}

impl CommandOutcome {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn export(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
    let mut map = match self.exports.take() {
      Some(ExportsSpec::Map(map)) => map,
      Some(ExportsSpec::Single(root)) => {
        let mut map = BTreeMap::new();
        map.insert(".".to_string(), root);
        map
      }
      None => BTreeMap::new(),
    };
    map.insert(name.into(), path.into());
    self.exports = Some(ExportsSpec::Map(map));
    self
  }

  pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
    self
      .metadata
      .get_or_insert_with(Metadata::new)
      .insert(key.into(), value);
    self
  }
}

/// Normalize declared exports into the persisted map form. The `"."` key is
/// always present afterwards.
pub(crate) fn normalize_exports(spec: Option<ExportsSpec>) -> BTreeMap<String, String> {
  match spec {
    None => [(".".to_string(), ".".to_string())].into_iter().collect(),
    Some(ExportsSpec::Single(root)) => [(".".to_string(), root)].into_iter().collect(),
    Some(ExportsSpec::Map(mut map)) => {
      map.entry(".".to_string()).or_insert_with(|| ".".to_string());
      map
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn empty_name_is_rejected() {
    let result = Kind::builder("  ")
      .init(|_| async { Ok(InitOutcome::default()) })
      .build();
    assert!(matches!(result, Err(StoreError::InvalidKind(_))));
  }

  #[test]
  fn missing_initializer_is_rejected() {
    let result = Kind::builder("demo").build();
    assert!(matches!(result, Err(StoreError::InvalidKind(_))));
  }

  #[test]
  fn cache_key_reduces_effective_input() {
    let kind = Kind::builder("demo")
      .cache_key(|input| json!({ "name": input["name"] }))
      .init(|_| async { Ok(InitOutcome::default()) })
      .build()
      .unwrap();

    let a = kind.effective_input(&json!({ "name": "x", "debug": true }));
    let b = kind.effective_input(&json!({ "name": "x", "debug": false }));
    assert_eq!(a, b);
    assert_eq!(a, json!({ "name": "x" }));
  }

  #[test]
  fn normalize_exports_defaults_to_root() {
    let map = normalize_exports(None);
    assert_eq!(map.get("."), Some(&".".to_string()));
    assert_eq!(map.len(), 1);
  }

  #[test]
  fn normalize_exports_string_form() {
    let map = normalize_exports(Some(ExportsSpec::Single("dist".to_string())));
    assert_eq!(map.get("."), Some(&"dist".to_string()));
  }

  #[test]
  fn normalize_exports_map_gains_root_key() {
    let spec = InitOutcome::new().export("greeting", "hello.txt").exports;
    let map = normalize_exports(spec);
    assert_eq!(map.get("greeting"), Some(&"hello.txt".to_string()));
    assert_eq!(map.get("."), Some(&".".to_string()));
  }

  #[test]
  fn outcome_builder_accumulates() {
    let outcome = InitOutcome::new()
      .export(".", "dist")
      .export("./src", "src")
      .with_metadata("count", json!(0));
    let map = normalize_exports(outcome.exports);
    assert_eq!(map.get("."), Some(&"dist".to_string()));
    assert_eq!(map.get("./src"), Some(&"src".to_string()));
    assert_eq!(outcome.metadata.unwrap()["count"], json!(0));
  }
}
