//! Build-lock coordination keyed by data id.
//!
//! A locker is optional: without one, concurrent builders of the same space
//! race to the atomic rename and the loser adopts the winner. A locker
//! eliminates the duplicate work, not a correctness problem.
//!
//! Two implementations ship: [`KeyedLocker`] (in-process) and [`FsLocker`]
//! (cross-process advisory file locks).

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::identity::DataId;

const LOCKS_DIR_NAME: &str = ".radium-fs-locks";
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Opaque held-lock handle; released on drop.
pub trait LockGuard: Send {}

/// Exclusive-lock provider. The engine treats keys as opaque and never
/// inspects lock holders.
#[async_trait]
pub trait Locker: Send + Sync {
  /// Acquire the lock for `key`, waiting as long as needed. A cancelled
  /// `signal` aborts the wait with [`StoreError::Aborted`].
  async fn acquire(
    &self,
    key: &DataId,
    signal: Option<&CancellationToken>,
  ) -> Result<Box<dyn LockGuard>, StoreError>;
}

/// In-process locker: one async mutex per data id.
#[derive(Default)]
pub struct KeyedLocker {
  locks: Mutex<HashMap<DataId, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocker {
  pub fn new() -> Self {
    Self::default()
  }
}

struct KeyedGuard {
  _guard: tokio::sync::OwnedMutexGuard<()>,
}

impl LockGuard for KeyedGuard {}

#[async_trait]
impl Locker for KeyedLocker {
  async fn acquire(
    &self,
    key: &DataId,
    signal: Option<&CancellationToken>,
  ) -> Result<Box<dyn LockGuard>, StoreError> {
    let mutex = {
      let mut locks = self.locks.lock().unwrap();
      locks.entry(key.clone()).or_default().clone()
    };

    let guard = match signal {
      Some(signal) => tokio::select! {
        guard = mutex.clone().lock_owned() => guard,
        _ = signal.cancelled() => return Err(StoreError::Aborted),
      },
      None => mutex.clone().lock_owned().await,
    };

    Ok(Box::new(KeyedGuard { _guard: guard }))
  }
}

/// Metadata written into a held lock file, for diagnostics when another
/// process finds the lock contended.
#[derive(Debug, Serialize, Deserialize)]
struct LockMetadata {
  version: u32,
  pid: u32,
  acquired_at_unix: u64,
}

/// Cross-process locker: one advisory file lock per data id under
/// `<storeRoot>/.radium-fs-locks/`.
pub struct FsLocker {
  dir: PathBuf,
}

impl FsLocker {
  pub fn new(store_root: impl Into<PathBuf>) -> Self {
    Self {
      dir: store_root.into().join(LOCKS_DIR_NAME),
    }
  }
}

struct FsLockGuard {
  // closing the file releases the OS lock
  _file: File,
}

impl LockGuard for FsLockGuard {}

#[async_trait]
impl Locker for FsLocker {
  async fn acquire(
    &self,
    key: &DataId,
    signal: Option<&CancellationToken>,
  ) -> Result<Box<dyn LockGuard>, StoreError> {
    let lock_path = self.dir.join(format!("{key}.lock"));

    loop {
      if signal.is_some_and(|s| s.is_cancelled()) {
        return Err(StoreError::Aborted);
      }

      // open/flock/metadata are synchronous syscalls; keep them off the
      // runtime workers
      let dir = self.dir.clone();
      let path = lock_path.clone();
      let attempt = tokio::task::spawn_blocking(move || try_acquire(&dir, &path))
        .await
        .map_err(|e| StoreError::Lock(format!("lock task failed: {e}")))??;

      match attempt {
        Some(file) => return Ok(Box::new(FsLockGuard { _file: file })),
        None => tokio::time::sleep(RETRY_INTERVAL).await,
      }
    }
  }
}

/// One non-blocking acquisition attempt; `Ok(None)` means the lock is held
/// by someone else.
fn try_acquire(dir: &Path, lock_path: &Path) -> Result<Option<File>, StoreError> {
  std::fs::create_dir_all(dir)
    .map_err(|e| StoreError::Lock(format!("failed to create lock directory: {e}")))?;

  let file = OpenOptions::new()
    .read(true)
    .write(true)
    .create(true)
    .truncate(false)
    .open(lock_path)
    .map_err(|e| StoreError::Lock(format!("failed to open {}: {e}", lock_path.display())))?;

  match try_lock(&file) {
    Ok(()) => {
      write_metadata(&file)?;
      Ok(Some(file))
    }
    Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
    Err(e) => Err(StoreError::Lock(format!(
      "failed to lock {}: {e}",
      lock_path.display()
    ))),
  }
}

fn write_metadata(file: &File) -> Result<(), StoreError> {
  let metadata = LockMetadata {
    version: 1,
    pid: std::process::id(),
    acquired_at_unix: SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs(),
  };

  file
    .set_len(0)
    .map_err(|e| StoreError::Lock(format!("failed to write lock metadata: {e}")))?;
  let mut writer = io::BufWriter::new(file);
  serde_json::to_writer(&mut writer, &metadata)
    .map_err(|e| StoreError::Lock(format!("failed to write lock metadata: {e}")))?;
  writer
    .flush()
    .map_err(|e| StoreError::Lock(format!("failed to write lock metadata: {e}")))?;

  Ok(())
}

#[cfg(unix)]
fn try_lock(file: &File) -> io::Result<()> {
  use rustix::fs::{flock, FlockOperation};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive)
    .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock(file: &File) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{
    LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
  };

  let handle = file.as_raw_handle() as HANDLE;
  let flags = LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK;

  // SAFETY: OVERLAPPED is a plain data struct that is valid when
  // zero-initialized, and the handle is valid for the life of `file`.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
