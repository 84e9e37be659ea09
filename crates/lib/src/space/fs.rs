//! Path-rooted file operations shared by the build and command APIs.
//!
//! A `SpaceFs` binds the adapter to one root directory (a content or private
//! dir) and resolves relative paths by textual join, which is also the rule
//! for dependency mount paths.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use radium_platform::{Adapter, FileStat, GlobOptions, GrepOptions};

use crate::error::StoreError;

/// Options for line-windowed reads. `start_line` is 1-based; values below 1
/// clamp to the start of the file.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineRange {
  pub start_line: Option<usize>,
  pub max_lines: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadDirOptions {
  pub recursive: bool,
  pub max_results: Option<usize>,
}

#[derive(Clone)]
pub(crate) struct SpaceFs {
  adapter: Arc<dyn Adapter>,
  root: PathBuf,
}

impl SpaceFs {
  pub(crate) fn new(adapter: Arc<dyn Adapter>, root: PathBuf) -> Self {
    Self { adapter, root }
  }

  pub(crate) fn root(&self) -> &Path {
    &self.root
  }

  pub(crate) fn resolve(&self, rel: &str) -> PathBuf {
    let trimmed = rel.trim_start_matches("./");
    if trimmed.is_empty() || trimmed == "." {
      self.root.clone()
    } else {
      self.root.join(trimmed)
    }
  }

  pub(crate) async fn write_file(
    &self,
    path: &str,
    contents: impl AsRef<[u8]>,
  ) -> Result<(), StoreError> {
    self
      .adapter
      .write_file(&self.resolve(path), contents.as_ref())
      .await
      .map_err(Into::into)
  }

  pub(crate) async fn read_file(&self, path: &str) -> Result<Vec<u8>, StoreError> {
    self
      .adapter
      .read_file(&self.resolve(path))
      .await
      .map_err(Into::into)
  }

  /// Read a window of lines, sliced on `\n`.
  pub(crate) async fn read_file_lines(
    &self,
    path: &str,
    range: LineRange,
  ) -> Result<String, StoreError> {
    let bytes = self.read_file(path).await?;
    let text = String::from_utf8_lossy(&bytes);
    let start = range.start_line.unwrap_or(1).saturating_sub(1);
    let lines: Vec<&str> = match range.max_lines {
      Some(max) => text.split('\n').skip(start).take(max).collect(),
      None => text.split('\n').skip(start).collect(),
    };
    Ok(lines.join("\n"))
  }

  pub(crate) async fn mkdir(&self, path: &str) -> Result<(), StoreError> {
    self
      .adapter
      .mkdir(&self.resolve(path))
      .await
      .map_err(Into::into)
  }

  pub(crate) async fn read_dir(
    &self,
    path: &str,
    options: ReadDirOptions,
  ) -> Result<Vec<String>, StoreError> {
    let max = options.max_results.unwrap_or(usize::MAX);
    let base = self.resolve(path);

    if !options.recursive {
      let mut names = self.adapter.read_dir(&base).await?;
      names.truncate(max);
      return Ok(names);
    }

    let mut results = Vec::new();
    let mut queue: VecDeque<String> = VecDeque::from([String::new()]);
    while let Some(prefix) = queue.pop_front() {
      let dir = if prefix.is_empty() {
        base.clone()
      } else {
        base.join(&prefix)
      };
      for name in self.adapter.read_dir(&dir).await? {
        let rel = if prefix.is_empty() {
          name
        } else {
          format!("{prefix}/{name}")
        };
        let is_dir = self
          .adapter
          .stat(&base.join(&rel))
          .await
          .map(|s| s.is_directory)
          .unwrap_or(false);
        results.push(rel.clone());
        if results.len() >= max {
          return Ok(results);
        }
        if is_dir {
          queue.push_back(rel);
        }
      }
    }
    Ok(results)
  }

  pub(crate) async fn stat(&self, path: &str) -> Result<FileStat, StoreError> {
    self
      .adapter
      .stat(&self.resolve(path))
      .await
      .map_err(Into::into)
  }

  /// Copy one file within the space.
  pub(crate) async fn copy(&self, from: &str, to: &str) -> Result<(), StoreError> {
    let bytes = self.read_file(from).await?;
    self.write_file(to, bytes).await
  }

  /// Move a file or directory within the space.
  pub(crate) async fn rename(&self, from: &str, to: &str) -> Result<(), StoreError> {
    self
      .adapter
      .rename(&self.resolve(from), &self.resolve(to))
      .await
      .map_err(Into::into)
  }

  pub(crate) async fn remove(&self, path: &str, recursive: bool) -> Result<(), StoreError> {
    self
      .adapter
      .remove(&self.resolve(path), recursive)
      .await
      .map_err(Into::into)
  }

  pub(crate) async fn glob(
    &self,
    pattern: &str,
    options: GlobOptions,
  ) -> Result<Vec<String>, StoreError> {
    self
      .adapter
      .glob(&self.root, pattern, options)
      .await
      .map_err(Into::into)
  }

  pub(crate) async fn grep(
    &self,
    pattern: &str,
    options: GrepOptions,
  ) -> Result<Vec<String>, StoreError> {
    self
      .adapter
      .grep(&self.root, pattern, options)
      .await
      .map_err(Into::into)
  }
}

/// The private-directory API: a deliberately narrow subset of the content
/// surface, with no copy/move/glob/grep.
#[derive(Clone)]
pub struct LocalApi {
  fs: SpaceFs,
}

impl LocalApi {
  pub(crate) fn new(fs: SpaceFs) -> Self {
    Self { fs }
  }

  pub fn path(&self) -> &Path {
    self.fs.root()
  }

  pub async fn write_file(
    &self,
    path: &str,
    contents: impl AsRef<[u8]>,
  ) -> Result<(), StoreError> {
    self.fs.write_file(path, contents).await
  }

  pub async fn read_file(&self, path: &str) -> Result<Vec<u8>, StoreError> {
    self.fs.read_file(path).await
  }

  pub async fn mkdir(&self, path: &str) -> Result<(), StoreError> {
    self.fs.mkdir(path).await
  }

  pub async fn read_dir(&self, path: &str) -> Result<Vec<String>, StoreError> {
    self.fs.read_dir(path, ReadDirOptions::default()).await
  }

  pub async fn stat(&self, path: &str) -> Result<FileStat, StoreError> {
    self.fs.stat(path).await
  }

  pub async fn remove(&self, path: &str, recursive: bool) -> Result<(), StoreError> {
    self.fs.remove(path, recursive).await
  }
}
