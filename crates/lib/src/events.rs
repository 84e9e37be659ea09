//! Three-tier event routing.
//!
//! Every engine operation narrates itself through one [`StoreEvent`] union:
//! a global channel sees everything, per-space command channels see command
//! events for their space, and per-space custom channels see raw payloads
//! emitted by handlers. Listener failures are isolated: a panicking handler
//! never interrupts delivery to the others or the engine.
//!
//! Per-space entries are created lazily on first subscription and must be
//! purged by `remove` so long-running processes do not accumulate maps for
//! dead spaces.

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tracing::warn;

use crate::identity::DataId;
use crate::manifest::Metadata;

/// Everything the engine announces.
#[derive(Debug, Clone)]
pub enum StoreEvent {
  /// An actual build is starting (after cache check, after lock).
  InitStart {
    kind: String,
    data_id: DataId,
    input: Value,
  },
  /// A cache hit served an `ensure`.
  InitCached {
    kind: String,
    data_id: DataId,
    input: Value,
    path: PathBuf,
  },
  /// The temp-to-final rename succeeded.
  InitDone {
    kind: String,
    data_id: DataId,
    input: Value,
    path: PathBuf,
    exports: BTreeMap<String, PathBuf>,
    metadata: Metadata,
  },
  /// Emitted after temp cleanup, before the error reaches the caller.
  InitError {
    kind: String,
    data_id: DataId,
    input: Value,
    error: String,
  },
  CommandStart {
    kind: String,
    data_id: DataId,
    command: Value,
  },
  CommandDone {
    kind: String,
    data_id: DataId,
    command: Value,
    exports: BTreeMap<String, PathBuf>,
    metadata: Metadata,
  },
  CommandError {
    kind: String,
    data_id: DataId,
    command: Value,
    error: String,
  },
  /// A handler called `emit`.
  Custom {
    kind: String,
    data_id: DataId,
    payload: Value,
  },
}

impl StoreEvent {
  pub fn data_id(&self) -> &DataId {
    match self {
      StoreEvent::InitStart { data_id, .. }
      | StoreEvent::InitCached { data_id, .. }
      | StoreEvent::InitDone { data_id, .. }
      | StoreEvent::InitError { data_id, .. }
      | StoreEvent::CommandStart { data_id, .. }
      | StoreEvent::CommandDone { data_id, .. }
      | StoreEvent::CommandError { data_id, .. }
      | StoreEvent::Custom { data_id, .. } => data_id,
    }
  }

  fn command_tag(&self) -> Option<CommandTag> {
    match self {
      StoreEvent::CommandStart { .. } => Some(CommandTag::Start),
      StoreEvent::CommandDone { .. } => Some(CommandTag::Done),
      StoreEvent::CommandError { .. } => Some(CommandTag::Error),
      _ => None,
    }
  }
}

/// Command-event tags a per-space subscriber can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandTag {
  Start,
  Done,
  Error,
}

pub type EventHandler = Arc<dyn Fn(&StoreEvent) + Send + Sync>;
pub type CustomHandler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct BusInner {
  next_id: u64,
  global: Vec<(u64, EventHandler)>,
  command: HashMap<DataId, HashMap<CommandTag, Vec<(u64, EventHandler)>>>,
  custom: HashMap<DataId, Vec<(u64, CustomHandler)>>,
}

/// In-process event dispatch shared by a store and all its handles.
#[derive(Clone, Default)]
pub struct EventBus {
  inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn subscribe(&self, handler: EventHandler) -> Subscription {
    let mut inner = self.inner.lock().unwrap();
    let id = inner.next_id;
    inner.next_id += 1;
    inner.global.push((id, handler));
    Subscription {
      bus: Arc::downgrade(&self.inner),
      id,
      slot: Slot::Global,
    }
  }

  pub fn subscribe_command(
    &self,
    data_id: DataId,
    tag: CommandTag,
    handler: EventHandler,
  ) -> Subscription {
    let mut inner = self.inner.lock().unwrap();
    let id = inner.next_id;
    inner.next_id += 1;
    inner
      .command
      .entry(data_id.clone())
      .or_default()
      .entry(tag)
      .or_default()
      .push((id, handler));
    Subscription {
      bus: Arc::downgrade(&self.inner),
      id,
      slot: Slot::Command(data_id, tag),
    }
  }

  pub fn subscribe_custom(&self, data_id: DataId, handler: CustomHandler) -> Subscription {
    let mut inner = self.inner.lock().unwrap();
    let id = inner.next_id;
    inner.next_id += 1;
    inner.custom.entry(data_id.clone()).or_default().push((id, handler));
    Subscription {
      bus: Arc::downgrade(&self.inner),
      id,
      slot: Slot::Custom(data_id),
    }
  }

  /// Deliver to the global channel, and for command events also to the
  /// per-space channel for that tag.
  pub fn emit(&self, event: &StoreEvent) {
    let (global, scoped) = {
      let inner = self.inner.lock().unwrap();
      let global: Vec<EventHandler> = inner.global.iter().map(|(_, h)| h.clone()).collect();
      let scoped: Vec<EventHandler> = match event.command_tag() {
        Some(tag) => inner
          .command
          .get(event.data_id())
          .and_then(|by_tag| by_tag.get(&tag))
          .map(|hs| hs.iter().map(|(_, h)| h.clone()).collect())
          .unwrap_or_default(),
        None => Vec::new(),
      };
      (global, scoped)
    };

    for handler in global.iter().chain(scoped.iter()) {
      deliver(handler, event);
    }
  }

  /// Deliver a raw payload to a space's custom channel. The corresponding
  /// [`StoreEvent::Custom`] goes through [`EventBus::emit`] separately.
  pub fn emit_custom(&self, data_id: &DataId, payload: &Value) {
    let handlers: Vec<CustomHandler> = {
      let inner = self.inner.lock().unwrap();
      inner
        .custom
        .get(data_id)
        .map(|hs| hs.iter().map(|(_, h)| h.clone()).collect())
        .unwrap_or_default()
    };
    for handler in &handlers {
      if catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
        warn!(data_id = %data_id, "custom event listener panicked");
      }
    }
  }

  /// Drop every per-space listener for a removed space.
  pub fn purge(&self, data_id: &DataId) {
    let mut inner = self.inner.lock().unwrap();
    inner.command.remove(data_id);
    inner.custom.remove(data_id);
  }
}

fn deliver(handler: &EventHandler, event: &StoreEvent) {
  if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
    warn!(data_id = %event.data_id(), "event listener panicked");
  }
}

enum Slot {
  Global,
  Command(DataId, CommandTag),
  Custom(DataId),
}

/// Handle returned from a subscription; dropping it does NOT unsubscribe,
/// [`Subscription::unsubscribe`] is the sole cleanup path besides `remove`.
pub struct Subscription {
  bus: Weak<Mutex<BusInner>>,
  id: u64,
  slot: Slot,
}

impl Subscription {
  pub fn unsubscribe(self) {
    let Some(bus) = self.bus.upgrade() else {
      return;
    };
    let mut inner = bus.lock().unwrap();
    match &self.slot {
      Slot::Global => inner.global.retain(|(id, _)| *id != self.id),
      Slot::Command(data_id, tag) => {
        if let Some(by_tag) = inner.command.get_mut(data_id) {
          if let Some(handlers) = by_tag.get_mut(tag) {
            handlers.retain(|(id, _)| *id != self.id);
          }
        }
      }
      Slot::Custom(data_id) => {
        if let Some(handlers) = inner.custom.get_mut(data_id) {
          handlers.retain(|(id, _)| *id != self.id);
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn test_id() -> DataId {
    crate::identity::data_id(&radium_platform::MemoryAdapter::new(), "k", &json!({}))
  }

  fn start_event(id: &DataId) -> StoreEvent {
    StoreEvent::CommandStart {
      kind: "k".to_string(),
      data_id: id.clone(),
      command: json!({ "type": "noop" }),
    }
  }

  #[test]
  fn global_subscribers_see_everything_in_order() {
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let s1 = seen.clone();
    bus.subscribe(Arc::new(move |_| s1.lock().unwrap().push("first")));
    let s2 = seen.clone();
    bus.subscribe(Arc::new(move |_| s2.lock().unwrap().push("second")));

    bus.emit(&start_event(&test_id()));
    assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
  }

  #[test]
  fn unsubscribe_stops_delivery() {
    let bus = EventBus::new();
    let count = Arc::new(AtomicUsize::new(0));

    let c = count.clone();
    let sub = bus.subscribe(Arc::new(move |_| {
      c.fetch_add(1, Ordering::SeqCst);
    }));

    bus.emit(&start_event(&test_id()));
    sub.unsubscribe();
    bus.emit(&start_event(&test_id()));
    assert_eq!(count.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn panicking_listener_does_not_block_others() {
    let bus = EventBus::new();
    let count = Arc::new(AtomicUsize::new(0));

    bus.subscribe(Arc::new(|_| panic!("listener bug")));
    let c = count.clone();
    bus.subscribe(Arc::new(move |_| {
      c.fetch_add(1, Ordering::SeqCst);
    }));

    bus.emit(&start_event(&test_id()));
    assert_eq!(count.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn command_channel_is_per_space_and_per_tag() {
    let bus = EventBus::new();
    let id = test_id();
    let count = Arc::new(AtomicUsize::new(0));

    let c = count.clone();
    bus.subscribe_command(
      id.clone(),
      CommandTag::Start,
      Arc::new(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
      }),
    );

    // matching space and tag
    bus.emit(&start_event(&id));
    // wrong tag
    bus.emit(&StoreEvent::CommandDone {
      kind: "k".to_string(),
      data_id: id.clone(),
      command: json!({}),
      exports: BTreeMap::new(),
      metadata: Metadata::new(),
    });
    assert_eq!(count.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn purge_drops_space_listeners() {
    let bus = EventBus::new();
    let id = test_id();
    let count = Arc::new(AtomicUsize::new(0));

    let c = count.clone();
    bus.subscribe_custom(
      id.clone(),
      Arc::new(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
      }),
    );

    bus.emit_custom(&id, &json!("one"));
    bus.purge(&id);
    bus.emit_custom(&id, &json!("two"));
    assert_eq!(count.load(Ordering::SeqCst), 1);
  }
}
