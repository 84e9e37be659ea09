//! Command execution and per-space event scenarios.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use radium_lib::{
  CommandOutcome, CommandTag, InitOutcome, Kind, MemoryAdapter, Origin, Store, StoreError,
};

fn memory_store() -> Store {
  Store::new(Arc::new(MemoryAdapter::new()), "/store")
}

fn origin(kind: &str, input: Value) -> Origin {
  Origin {
    kind: kind.to_string(),
    input,
    cache_key: None,
  }
}

fn counter_kind() -> Arc<Kind> {
  Kind::builder("counter")
    .init(|ctx| async move {
      ctx
        .space
        .write_file("state.json", serde_json::to_string(&json!({ "count": 0 }))?)
        .await?;
      Ok(InitOutcome::new().with_metadata("count", json!(0)))
    })
    .command(|ctx| async move {
      let current = ctx
        .current
        .metadata
        .get("count")
        .and_then(Value::as_i64)
        .unwrap_or(0);
      let next = match ctx.command["type"].as_str() {
        Some("increment") => current + ctx.command["amount"].as_i64().unwrap_or(1),
        Some("reset") => 0,
        other => anyhow::bail!("unknown command: {other:?}"),
      };
      ctx
        .space
        .write_file("state.json", serde_json::to_string(&json!({ "count": next }))?)
        .await?;
      ctx.space.emit(json!({ "count": next }));
      Ok(Some(CommandOutcome::new().with_metadata("count", json!(next))))
    })
    .build()
    .unwrap()
}

#[tokio::test]
async fn commands_append_history_and_update_metadata() {
  let store = memory_store();
  let kind = counter_kind();

  let space = store.ensure(&kind, json!({})).await.unwrap();
  let port = space.commands().expect("counter kind has a command handler");

  let result = port
    .send(json!({ "type": "increment", "amount": 5 }))
    .await
    .unwrap();
  assert_eq!(result.metadata["count"], json!(5));

  let space = store.find(&origin("counter", json!({}))).await.unwrap().unwrap();
  assert_eq!(space.manifest.commands.len(), 1);
  assert_eq!(space.manifest.metadata["count"], json!(5));
  assert_eq!(
    space.manifest.commands[0].command,
    json!({ "type": "increment", "amount": 5 })
  );

  let port = space.commands().unwrap();
  let result = port.send(json!({ "type": "reset" })).await.unwrap();
  assert_eq!(result.metadata["count"], json!(0));

  let space = store.find(&origin("counter", json!({}))).await.unwrap().unwrap();
  assert_eq!(space.manifest.commands.len(), 2);
  assert_eq!(space.manifest.metadata["count"], json!(0));
}

#[tokio::test]
async fn failed_command_leaves_manifest_untouched() {
  let store = memory_store();
  let kind = counter_kind();

  let space = store.ensure(&kind, json!({})).await.unwrap();
  let port = space.commands().unwrap();

  let err = port.send(json!({ "type": "bogus" })).await.unwrap_err();
  assert!(matches!(err, StoreError::Command { .. }));

  let space = store.find(&origin("counter", json!({}))).await.unwrap().unwrap();
  assert!(space.manifest.commands.is_empty());
  assert_eq!(space.manifest.metadata["count"], json!(0));
}

#[tokio::test]
async fn command_events_reach_global_and_per_space_channels() {
  let store = memory_store();
  let kind = counter_kind();

  let global: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
  {
    let sink = global.clone();
    store.on(move |event| {
      let label = match event {
        radium_lib::StoreEvent::CommandStart { .. } => "start",
        radium_lib::StoreEvent::CommandDone { .. } => "done",
        radium_lib::StoreEvent::CommandError { .. } => "error",
        radium_lib::StoreEvent::Custom { .. } => "custom",
        _ => return,
      };
      sink.lock().unwrap().push(label.to_string());
    });
  }

  let space = store.ensure(&kind, json!({})).await.unwrap();
  let port = space.commands().unwrap();

  let scoped_done = Arc::new(AtomicUsize::new(0));
  let scoped_custom = Arc::new(AtomicUsize::new(0));
  {
    let counter = scoped_done.clone();
    port.on(CommandTag::Done, move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
    });
    let counter = scoped_custom.clone();
    port.on_custom(move |payload| {
      assert_eq!(payload["count"], json!(1));
      counter.fetch_add(1, Ordering::SeqCst);
    });
  }

  port.send(json!({ "type": "increment" })).await.unwrap();

  assert_eq!(*global.lock().unwrap(), vec!["start", "custom", "done"]);
  assert_eq!(scoped_done.load(Ordering::SeqCst), 1);
  assert_eq!(scoped_custom.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn remove_purges_per_space_listeners() {
  let store = memory_store();
  let kind = counter_kind();

  let space = store.ensure(&kind, json!({})).await.unwrap();
  let stale = Arc::new(AtomicUsize::new(0));
  {
    let counter = stale.clone();
    space.commands().unwrap().on_custom(move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
    });
  }

  store.remove(&origin("counter", json!({}))).await.unwrap();

  // rebuild the same space; the stale listener must stay dead
  let space = store.ensure(&kind, json!({})).await.unwrap();
  let fresh = Arc::new(AtomicUsize::new(0));
  {
    let counter = fresh.clone();
    space.commands().unwrap().on_custom(move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
    });
  }

  space
    .commands()
    .unwrap()
    .send(json!({ "type": "increment" }))
    .await
    .unwrap();

  assert_eq!(stale.load(Ordering::SeqCst), 0);
  assert_eq!(fresh.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn plain_kinds_expose_no_command_surface() {
  let store = memory_store();
  let kind = Kind::builder("plain")
    .init(|_| async { Ok(InitOutcome::default()) })
    .build()
    .unwrap();

  let space = store.ensure(&kind, json!({})).await.unwrap();
  assert!(space.commands().is_none());

  let found = store.find(&origin("plain", json!({}))).await.unwrap().unwrap();
  assert!(found.commands().is_none());
}

#[tokio::test]
async fn command_without_result_keeps_state_but_logs_nothing() {
  let store = memory_store();
  let kind = Kind::builder("observer")
    .init(|ctx| async move {
      ctx.space.write_file("log.txt", "").await?;
      Ok(InitOutcome::new().with_metadata("generation", json!(1)))
    })
    .command(|ctx| async move {
      // side effect only, no declared outcome
      ctx.space.write_file("log.txt", "touched").await?;
      Ok(None)
    })
    .build()
    .unwrap();

  let space = store.ensure(&kind, json!({})).await.unwrap();
  space
    .commands()
    .unwrap()
    .send(json!({ "type": "touch" }))
    .await
    .unwrap();

  let space = store.find(&origin("observer", json!({}))).await.unwrap().unwrap();
  assert!(space.manifest.commands.is_empty());
  assert_eq!(space.manifest.metadata["generation"], json!(1));
}

#[tokio::test]
async fn command_handler_sees_current_state_and_content_dir() {
  let store = memory_store();
  let kind = Kind::builder("stateful")
    .init(|ctx| async move {
      ctx.space.write_file("value.txt", "init").await?;
      Ok(InitOutcome::new().export("value", "value.txt"))
    })
    .command(|ctx| async move {
      // bound to the final content directory, so the init-time file is there
      let existing = ctx.space.read_file("value.txt").await?;
      assert_eq!(existing, b"init");
      assert_eq!(ctx.current.exports.get("value"), Some(&"value.txt".to_string()));
      Ok(None)
    })
    .build()
    .unwrap();

  let space = store.ensure(&kind, json!({})).await.unwrap();
  space
    .commands()
    .unwrap()
    .send(json!({ "type": "check" }))
    .await
    .unwrap();
}
