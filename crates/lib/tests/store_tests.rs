//! End-to-end store scenarios over the in-memory adapter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use radium_lib::{
  DepOptions, EnsureOptions, InitOutcome, Kind, MemoryAdapter, Origin, Scope, Store, StoreError,
  StoreEvent,
};

fn memory_store() -> (Arc<MemoryAdapter>, Store) {
  let adapter = Arc::new(MemoryAdapter::new());
  let store = Store::new(adapter.clone(), "/store");
  (adapter, store)
}

fn origin(kind: &str, input: Value) -> Origin {
  Origin {
    kind: kind.to_string(),
    input,
    cache_key: None,
  }
}

fn greeting_kind() -> Arc<Kind> {
  Kind::builder("greeting")
    .init(|ctx| async move {
      let name = ctx.input["name"].as_str().unwrap_or("there").to_string();
      ctx
        .space
        .write_file("hello.txt", format!("Hello, {name}!"))
        .await?;
      Ok(InitOutcome::new().export("greeting", "hello.txt"))
    })
    .build()
    .unwrap()
}

fn event_label(event: &StoreEvent) -> String {
  match event {
    StoreEvent::InitStart { kind, .. } => format!("start:{kind}"),
    StoreEvent::InitCached { kind, .. } => format!("cached:{kind}"),
    StoreEvent::InitDone { kind, .. } => format!("done:{kind}"),
    StoreEvent::InitError { kind, .. } => format!("error:{kind}"),
    StoreEvent::CommandStart { kind, .. } => format!("cmd-start:{kind}"),
    StoreEvent::CommandDone { kind, .. } => format!("cmd-done:{kind}"),
    StoreEvent::CommandError { kind, .. } => format!("cmd-error:{kind}"),
    StoreEvent::Custom { kind, .. } => format!("custom:{kind}"),
  }
}

fn record_events(store: &Store) -> Arc<Mutex<Vec<String>>> {
  let log = Arc::new(Mutex::new(Vec::new()));
  let sink = log.clone();
  store.on(move |event| sink.lock().unwrap().push(event_label(event)));
  log
}

#[tokio::test]
async fn simple_build_then_cache_hit() {
  let (adapter, store) = memory_store();
  let log = record_events(&store);
  let kind = greeting_kind();
  let input = json!({ "name": "World", "lang": "en" });

  let space = store.ensure(&kind, input.clone()).await.unwrap();
  assert_eq!(space.data_id.as_str().len(), 64);
  assert!(space.path.to_string_lossy().ends_with("/space"));
  assert!(
    space.exports["greeting"]
      .to_string_lossy()
      .ends_with("/space/hello.txt")
  );

  use radium_lib::Adapter as _;
  let content = adapter.read_file(&space.exports["greeting"]).await.unwrap();
  assert_eq!(content, b"Hello, World!");

  let again = store.ensure(&kind, input).await.unwrap();
  assert_eq!(again.data_id, space.data_id);
  assert_eq!(again.path, space.path);

  assert_eq!(
    *log.lock().unwrap(),
    vec!["start:greeting", "done:greeting", "cached:greeting"]
  );
}

#[tokio::test]
async fn key_order_does_not_change_identity() {
  let (_, store) = memory_store();
  let kind = Kind::builder("k")
    .init(|_| async { Ok(InitOutcome::default()) })
    .build()
    .unwrap();

  let a = store.ensure(&kind, json!({ "a": 1, "b": 2 })).await.unwrap();
  let b = store.ensure(&kind, json!({ "b": 2, "a": 1 })).await.unwrap();
  assert_eq!(a.data_id, b.data_id);
  assert_eq!(a.path, b.path);
}

#[tokio::test]
async fn initializer_runs_exactly_once_for_same_input() {
  let (_, store) = memory_store();
  let runs = Arc::new(AtomicUsize::new(0));
  let counter = runs.clone();
  let kind = Kind::builder("once")
    .init(move |_| {
      let counter = counter.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(InitOutcome::default())
      }
    })
    .build()
    .unwrap();

  store.ensure(&kind, json!({ "v": 1 })).await.unwrap();
  store.ensure(&kind, json!({ "v": 1 })).await.unwrap();
  assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cache_false_rebuilds() {
  let (_, store) = memory_store();
  let runs = Arc::new(AtomicUsize::new(0));
  let counter = runs.clone();
  let kind = Kind::builder("rebuild")
    .init(move |ctx| {
      let counter = counter.clone();
      async move {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        ctx.space.write_file("gen.txt", format!("{n}")).await?;
        Ok(InitOutcome::default())
      }
    })
    .build()
    .unwrap();

  let first = store.ensure(&kind, json!({})).await.unwrap();
  let second = store
    .ensure_with(
      &kind,
      json!({}),
      EnsureOptions {
        cache: false,
        ..EnsureOptions::default()
      },
    )
    .await
    .unwrap();

  assert_eq!(runs.load(Ordering::SeqCst), 2);
  assert_eq!(first.data_id, second.data_id);
  assert!(second.manifest.updated_at >= first.manifest.updated_at);
}

fn config_kind() -> Arc<Kind> {
  Kind::builder("config")
    .init(|ctx| async move {
      let settings = json!({ "env": ctx.input["env"] });
      ctx
        .space
        .write_file("settings.json", serde_json::to_string(&settings)?)
        .await?;
      Ok(InitOutcome::default())
    })
    .build()
    .unwrap()
}

fn lib_kind() -> Arc<Kind> {
  Kind::builder("lib")
    .init(|ctx| async move {
      let name = ctx.input["name"].as_str().unwrap_or("lib").to_string();
      ctx
        .space
        .write_file("index.js", format!("module.exports = '{name}';"))
        .await?;
      Ok(InitOutcome::default())
    })
    .build()
    .unwrap()
}

fn app_kind(config: Arc<Kind>, lib: Arc<Kind>) -> Arc<Kind> {
  Kind::builder("app")
    .init(move |ctx| {
      let config = config.clone();
      let lib = lib.clone();
      async move {
        let env = ctx.input["env"].clone();
        ctx
          .space
          .dep("config", &config, json!({ "env": env }), DepOptions::default())
          .await?;
        ctx
          .space
          .dep(
            "lib",
            &lib,
            json!({ "name": "utils", "version": "1.0.0" }),
            DepOptions::default(),
          )
          .await?;
        ctx.space.write_file("main.js", "require('./lib');").await?;
        Ok(InitOutcome::default())
      }
    })
    .build()
    .unwrap()
}

#[tokio::test]
async fn dependency_chain_with_partial_rebuild() {
  let (adapter, store) = memory_store();
  let log = record_events(&store);
  let app = app_kind(config_kind(), lib_kind());

  let space = store.ensure(&app, json!({ "env": "prod" })).await.unwrap();
  assert_eq!(
    *log.lock().unwrap(),
    vec![
      "start:app",
      "start:config",
      "done:config",
      "start:lib",
      "done:lib",
      "done:app"
    ]
  );

  // mounts resolve through the symlinks
  use radium_lib::Adapter as _;
  let settings = adapter
    .read_file(&space.path.join("config/settings.json"))
    .await
    .unwrap();
  assert_eq!(settings, br#"{"env":"prod"}"#);
  assert_eq!(space.manifest.dependencies.len(), 2);
  assert_eq!(space.manifest.dependencies[0].mount_path, "config");
  assert_eq!(space.manifest.dependencies[1].mount_path, "lib");

  log.lock().unwrap().clear();
  store.ensure(&app, json!({ "env": "prod" })).await.unwrap();
  assert_eq!(*log.lock().unwrap(), vec!["cached:app"]);

  log.lock().unwrap().clear();
  store.ensure(&app, json!({ "env": "dev" })).await.unwrap();
  assert_eq!(
    *log.lock().unwrap(),
    vec![
      "start:app",
      "start:config",
      "done:config",
      "cached:lib",
      "done:app"
    ]
  );
}

#[tokio::test]
async fn cache_key_reduces_identity() {
  let (_, store) = memory_store();
  let runs = Arc::new(AtomicUsize::new(0));
  let counter = runs.clone();
  let kind = Kind::builder("ck")
    .cache_key(|input| json!({ "name": input["name"] }))
    .init(move |_| {
      let counter = counter.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(InitOutcome::default())
      }
    })
    .build()
    .unwrap();

  let a = store
    .ensure(&kind, json!({ "name": "a", "debug": true }))
    .await
    .unwrap();
  let b = store
    .ensure(&kind, json!({ "name": "a", "debug": false }))
    .await
    .unwrap();

  assert_eq!(a.data_id, b.data_id);
  assert_eq!(runs.load(Ordering::SeqCst), 1);
  assert_eq!(a.manifest.origin.cache_key, Some(json!({ "name": "a" })));
}

#[tokio::test]
async fn failed_init_cleans_up() {
  let (_, store) = memory_store();
  let log = record_events(&store);
  let kind = Kind::builder("boom")
    .init(|_| async { anyhow::bail!("exploded") })
    .build()
    .unwrap();

  let err = store.ensure(&kind, json!({})).await.unwrap_err();
  assert!(matches!(err, StoreError::Init { .. }));
  assert!(err.to_string().contains("exploded"));

  assert!(!store.has(&origin("boom", json!({}))).await);
  assert!(store.list(None).await.unwrap().is_empty());
  assert_eq!(*log.lock().unwrap(), vec!["start:boom", "error:boom"]);
}

#[tokio::test]
async fn find_round_trips_and_remove_forgets() {
  let (_, store) = memory_store();
  let kind = greeting_kind();
  let input = json!({ "name": "Ada" });

  let space = store.ensure(&kind, input.clone()).await.unwrap();

  let found = store
    .find(&origin("greeting", input.clone()))
    .await
    .unwrap()
    .expect("space should be findable");
  assert_eq!(found.data_id, space.data_id);
  assert_eq!(found.path, space.path);

  assert!(store.has(&origin("greeting", input.clone())).await);
  store.remove(&origin("greeting", input.clone())).await.unwrap();
  assert!(!store.has(&origin("greeting", input.clone())).await);
  assert!(store.find(&origin("greeting", input)).await.unwrap().is_none());
}

#[tokio::test]
async fn list_filters_by_kind_and_skips_temp_entries() {
  let (adapter, store) = memory_store();
  let kind = greeting_kind();
  store.ensure(&kind, json!({ "name": "one" })).await.unwrap();
  store.ensure(&kind, json!({ "name": "two" })).await.unwrap();

  let other = Kind::builder("other")
    .init(|_| async { Ok(InitOutcome::default()) })
    .build()
    .unwrap();
  store.ensure(&other, json!({})).await.unwrap();

  // a stray temp entry with a plausible manifest inside must be ignored
  use radium_lib::Adapter as _;
  adapter
    .write_file(
      std::path::Path::new(
        "/store/.radium-fs-data/greeting/zz/.tmp-leftover/.radium-fs-manifest.json",
      ),
      b"{}",
    )
    .await
    .unwrap();

  let greetings = store.list(Some("greeting")).await.unwrap();
  assert_eq!(greetings.len(), 2);
  assert!(greetings.iter().all(|s| s.kind == "greeting"));

  let all = store.list(None).await.unwrap();
  assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn local_scope_dependency_lives_inside_parent() {
  let (adapter, store) = memory_store();
  let child = Kind::builder("child")
    .init(|ctx| async move {
      ctx.space.write_file("data.txt", "child").await?;
      Ok(InitOutcome::default())
    })
    .build()
    .unwrap();

  let parent = {
    let child = child.clone();
    Kind::builder("parent")
      .init(move |ctx| {
        let child = child.clone();
        async move {
          ctx
            .space
            .dep(
              "mine",
              &child,
              json!({}),
              DepOptions {
                scope: Scope::Local,
                ..DepOptions::default()
              },
            )
            .await?;
          Ok(InitOutcome::default())
        }
      })
      .build()
      .unwrap()
  };

  let space = store.ensure(&parent, json!({})).await.unwrap();
  assert_eq!(space.manifest.dependencies[0].scope, Scope::Local);

  // the child was materialized under the parent, not in the shared tree
  assert!(store.list(Some("child")).await.unwrap().is_empty());
  let data_dir = space.path.parent().unwrap();
  use radium_lib::Adapter as _;
  assert!(adapter.exists(&data_dir.join(".radium-fs-local-deps")).await);

  // and the mount still resolves
  let content = adapter.read_file(&space.path.join("mine/data.txt")).await.unwrap();
  assert_eq!(content, b"child");

  // removing the parent takes the local child with it
  store.remove(&origin("parent", json!({}))).await.unwrap();
  assert!(!adapter.exists(data_dir).await);
}

#[tokio::test]
async fn named_export_selects_target_and_star_bypasses() {
  let (adapter, store) = memory_store();
  let dep = Kind::builder("assets")
    .init(|ctx| async move {
      ctx.space.write_file("img/logo.svg", "<svg/>").await?;
      ctx.space.write_file("readme.md", "assets").await?;
      Ok(InitOutcome::new().export("./img", "img"))
    })
    .build()
    .unwrap();

  let parent = {
    let dep = dep.clone();
    Kind::builder("site")
      .init(move |ctx| {
        let dep = dep.clone();
        async move {
          let images = ctx
            .space
            .dep(
              "images",
              &dep,
              json!({}),
              DepOptions {
                export: Some("./img".to_string()),
                ..DepOptions::default()
              },
            )
            .await?;
          assert!(images.to_string_lossy().ends_with("/space/img"));

          let whole = ctx
            .space
            .dep(
              "raw",
              &dep,
              json!({}),
              DepOptions {
                export: Some("*".to_string()),
                ..DepOptions::default()
              },
            )
            .await?;
          assert!(whole.to_string_lossy().ends_with("/space"));
          Ok(InitOutcome::default())
        }
      })
      .build()
      .unwrap()
  };

  let space = store.ensure(&parent, json!({})).await.unwrap();
  use radium_lib::Adapter as _;
  let logo = adapter.read_file(&space.path.join("images/logo.svg")).await.unwrap();
  assert_eq!(logo, b"<svg/>");
  let readme = adapter.read_file(&space.path.join("raw/readme.md")).await.unwrap();
  assert_eq!(readme, b"assets");
}

#[tokio::test]
async fn missing_export_fails_parent_build() {
  let (_, store) = memory_store();
  let dep = Kind::builder("plain")
    .init(|_| async { Ok(InitOutcome::default()) })
    .build()
    .unwrap();

  let parent = {
    let dep = dep.clone();
    Kind::builder("wants-docs")
      .init(move |ctx| {
        let dep = dep.clone();
        async move {
          ctx
            .space
            .dep(
              "docs",
              &dep,
              json!({}),
              DepOptions {
                export: Some("./docs".to_string()),
                ..DepOptions::default()
              },
            )
            .await?;
          Ok(InitOutcome::default())
        }
      })
      .build()
      .unwrap()
  };

  let err = store.ensure(&parent, json!({})).await.unwrap_err();
  let message = err.to_string();
  assert!(message.contains("./docs"), "unexpected error: {message}");
  assert!(!store.has(&origin("wants-docs", json!({}))).await);
}

#[tokio::test]
async fn aborted_signal_fails_before_build() {
  let (_, store) = memory_store();
  let runs = Arc::new(AtomicUsize::new(0));
  let counter = runs.clone();
  let kind = Kind::builder("slow")
    .init(move |_| {
      let counter = counter.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(InitOutcome::default())
      }
    })
    .build()
    .unwrap();

  let signal = tokio_util::sync::CancellationToken::new();
  signal.cancel();
  let err = store
    .ensure_with(
      &kind,
      json!({}),
      EnsureOptions {
        signal: Some(signal),
        ..EnsureOptions::default()
      },
    )
    .await
    .unwrap_err();

  assert!(matches!(err, StoreError::Aborted));
  assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn ensure_callbacks_fire_with_events() {
  let (_, store) = memory_store();
  let kind = greeting_kind();

  let starts = Arc::new(AtomicUsize::new(0));
  let dones = Arc::new(AtomicUsize::new(0));
  let cached = Arc::new(AtomicUsize::new(0));

  let (s, d) = (starts.clone(), dones.clone());
  store
    .ensure_with(
      &kind,
      json!({ "name": "cb" }),
      EnsureOptions {
        on_start: Some(Arc::new(move |_| {
          s.fetch_add(1, Ordering::SeqCst);
        })),
        on_done: Some(Arc::new(move |_| {
          d.fetch_add(1, Ordering::SeqCst);
        })),
        ..EnsureOptions::default()
      },
    )
    .await
    .unwrap();

  let c = cached.clone();
  store
    .ensure_with(
      &kind,
      json!({ "name": "cb" }),
      EnsureOptions {
        on_cached: Some(Arc::new(move |_| {
          c.fetch_add(1, Ordering::SeqCst);
        })),
        ..EnsureOptions::default()
      },
    )
    .await
    .unwrap();

  assert_eq!(starts.load(Ordering::SeqCst), 1);
  assert_eq!(dones.load(Ordering::SeqCst), 1);
  assert_eq!(cached.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn custom_events_from_init_reach_global_channel() {
  let (_, store) = memory_store();
  let log = record_events(&store);
  let kind = Kind::builder("talkative")
    .init(|ctx| async move {
      ctx.space.emit(json!({ "progress": 50 }));
      Ok(InitOutcome::default())
    })
    .build()
    .unwrap();

  store.ensure(&kind, json!({})).await.unwrap();
  assert_eq!(
    *log.lock().unwrap(),
    vec!["start:talkative", "custom:talkative", "done:talkative"]
  );
}

#[tokio::test]
async fn concurrent_ensures_with_locker_build_once() {
  let adapter = Arc::new(MemoryAdapter::new());
  let store = Store::builder(adapter, "/store")
    .locker(Arc::new(radium_lib::KeyedLocker::new()))
    .build();

  let runs = Arc::new(AtomicUsize::new(0));
  let counter = runs.clone();
  let kind = Kind::builder("contended")
    .init(move |ctx| {
      let counter = counter.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        ctx.space.write_file("out.txt", "built").await?;
        Ok(InitOutcome::default())
      }
    })
    .build()
    .unwrap();

  let (a, b) = tokio::join!(
    store.ensure(&kind, json!({})),
    store.ensure(&kind, json!({}))
  );
  let (a, b) = (a.unwrap(), b.unwrap());

  assert_eq!(runs.load(Ordering::SeqCst), 1);
  assert_eq!(a.data_id, b.data_id);
}

#[tokio::test]
async fn store_tree_survives_relocation() {
  let (adapter, store) = memory_store();
  let app = app_kind(config_kind(), lib_kind());
  let space = store.ensure(&app, json!({ "env": "prod" })).await.unwrap();

  // dependency links are relative, so moving the whole root keeps them valid
  use radium_lib::Adapter as _;
  adapter
    .rename(std::path::Path::new("/store"), std::path::Path::new("/moved"))
    .await
    .unwrap();

  let relocated = std::path::PathBuf::from(
    space
      .path
      .to_string_lossy()
      .replace("/store/", "/moved/"),
  );
  let settings = adapter
    .read_file(&relocated.join("config/settings.json"))
    .await
    .unwrap();
  assert_eq!(settings, br#"{"env":"prod"}"#);

  // a store opened on the new root sees the space as a cache hit
  let moved_store = Store::new(adapter.clone(), "/moved");
  let log = record_events(&moved_store);
  moved_store.ensure(&app, json!({ "env": "prod" })).await.unwrap();
  assert_eq!(*log.lock().unwrap(), vec!["cached:app"]);
}

#[tokio::test]
async fn native_adapter_end_to_end() {
  let temp = tempfile::TempDir::new().unwrap();
  let adapter = Arc::new(radium_lib::NativeAdapter::new());
  let store = Store::new(adapter, temp.path());

  let app = app_kind(config_kind(), lib_kind());
  let space = store.ensure(&app, json!({ "env": "prod" })).await.unwrap();

  // symlinked mounts resolve through the real filesystem
  let settings = std::fs::read_to_string(space.path.join("config/settings.json")).unwrap();
  assert_eq!(settings, r#"{"env":"prod"}"#);

  // the dependency symlink target is relative, so the tree is relocatable
  let link = std::fs::read_link(space.path.join("config")).unwrap();
  assert!(link.is_relative());

  // cache hit on a second ensure
  let again = store.ensure(&app, json!({ "env": "prod" })).await.unwrap();
  assert_eq!(again.data_id, space.data_id);
}
