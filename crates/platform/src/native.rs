//! Native filesystem adapter.
//!
//! Wraps tokio's fs primitives; directory sweeps for glob/grep run on the
//! blocking pool via walkdir. Symlinks are created as real OS symlinks with
//! whatever target string the engine computed (usually relative), so a store
//! tree survives relocation.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::adapter::{Adapter, FileStat, GlobOptions, GrepOptions};
use crate::error::AdapterError;
use crate::pattern::glob_to_regex;

/// Adapter over the host filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeAdapter;

impl NativeAdapter {
    pub fn new() -> Self {
        Self
    }
}

async fn ensure_parent(path: &Path) -> Result<(), AdapterError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AdapterError::io(parent, e))?;
    }
    Ok(())
}

fn to_slash(path: &Path) -> String {
    let s = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        s.into_owned()
    } else {
        s.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

/// Walk `root` and return matching relative paths, in sorted order.
fn walk_matches(
    root: &Path,
    matcher: &regex::Regex,
    ignores: &[regex::Regex],
    max: usize,
) -> Vec<String> {
    let mut results = Vec::new();
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
    {
        if entry.file_type().is_dir() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = to_slash(rel);
        if matcher.is_match(&rel) && !ignores.iter().any(|i| i.is_match(&rel)) {
            results.push(rel);
            if results.len() >= max {
                break;
            }
        }
    }
    results
}

#[async_trait]
impl Adapter for NativeAdapter {
    fn hash(&self, bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, AdapterError> {
        tokio::fs::read(path)
            .await
            .map_err(|e| AdapterError::io(path, e))
    }

    async fn write_file(&self, path: &Path, bytes: &[u8]) -> Result<(), AdapterError> {
        ensure_parent(path).await?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| AdapterError::io(path, e))
    }

    async fn mkdir(&self, path: &Path) -> Result<(), AdapterError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| AdapterError::io(path, e))
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<String>, AdapterError> {
        let mut reader = tokio::fs::read_dir(path)
            .await
            .map_err(|e| AdapterError::io(path, e))?;
        let mut names = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| AdapterError::io(path, e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn stat(&self, path: &Path) -> Result<FileStat, AdapterError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| AdapterError::io(path, e))?;
        let mtime = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(FileStat {
            is_file: meta.is_file(),
            is_directory: meta.is_dir(),
            size: if meta.is_file() { meta.len() } else { 0 },
            mtime,
        })
    }

    async fn exists(&self, path: &Path) -> bool {
        // metadata follows symlinks; loops and dangling links come back as
        // errors, which is exactly the contract (false, never a throw)
        tokio::fs::metadata(path).await.is_ok()
    }

    async fn remove(&self, path: &Path, recursive: bool) -> Result<(), AdapterError> {
        let meta = tokio::fs::symlink_metadata(path)
            .await
            .map_err(|e| AdapterError::io(path, e))?;
        let result = if meta.is_dir() {
            if recursive {
                tokio::fs::remove_dir_all(path).await
            } else {
                tokio::fs::remove_dir(path).await
            }
        } else {
            tokio::fs::remove_file(path).await
        };
        result.map_err(|e| AdapterError::io(path, e))
    }

    async fn rename(&self, src: &Path, dest: &Path) -> Result<(), AdapterError> {
        ensure_parent(dest).await?;
        tokio::fs::rename(src, dest)
            .await
            .map_err(|e| AdapterError::io(dest, e))
    }

    #[cfg(unix)]
    async fn symlink(&self, target: &Path, link: &Path) -> Result<(), AdapterError> {
        ensure_parent(link).await?;
        tokio::fs::symlink(target, link)
            .await
            .map_err(|e| AdapterError::io(link, e))
    }

    #[cfg(windows)]
    async fn symlink(&self, target: &Path, link: &Path) -> Result<(), AdapterError> {
        ensure_parent(link).await?;
        // Windows distinguishes file and directory links; resolve the target
        // relative to the link's directory to pick the right flavor.
        let resolved = if target.is_absolute() {
            target.to_path_buf()
        } else {
            link.parent().unwrap_or(Path::new("")).join(target)
        };
        let is_dir = tokio::fs::metadata(&resolved)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(true);
        let result = if is_dir {
            tokio::fs::symlink_dir(target, link).await
        } else {
            tokio::fs::symlink_file(target, link).await
        };
        result.map_err(|e| AdapterError::io(link, e))
    }

    async fn glob(
        &self,
        root: &Path,
        pattern: &str,
        options: GlobOptions,
    ) -> Result<Vec<String>, AdapterError> {
        let matcher = glob_to_regex(pattern)?;
        let ignores = options
            .ignore
            .iter()
            .map(|p| glob_to_regex(p))
            .collect::<Result<Vec<_>, _>>()?;
        let root = root.to_path_buf();
        let max = options.max_results.unwrap_or(usize::MAX);

        tokio::task::spawn_blocking(move || walk_matches(&root, &matcher, &ignores, max))
            .await
            .map_err(|e| AdapterError::Io {
                path: PathBuf::new(),
                source: io::Error::other(e),
            })
    }

    async fn grep(
        &self,
        root: &Path,
        pattern: &str,
        options: GrepOptions,
    ) -> Result<Vec<String>, AdapterError> {
        let regex = regex::Regex::new(pattern).map_err(|e| AdapterError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        let include = options
            .include
            .as_deref()
            .map(glob_to_regex)
            .transpose()?;
        let root = root.to_path_buf();
        let max = options.max_results.unwrap_or(usize::MAX);

        tokio::task::spawn_blocking(move || {
            let mut results = Vec::new();
            'files: for entry in WalkDir::new(&root)
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok)
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let rel = to_slash(rel);
                if include.as_ref().is_some_and(|i| !i.is_match(&rel)) {
                    continue;
                }
                let Ok(bytes) = std::fs::read(entry.path()) else {
                    continue;
                };
                let text = String::from_utf8_lossy(&bytes);
                for (idx, line) in text.lines().enumerate() {
                    if regex.is_match(line) {
                        results.push(format!("{}:{}:{}", rel, idx + 1, line));
                        if results.len() >= max {
                            break 'files;
                        }
                    }
                }
            }
            results
        })
        .await
        .map_err(|e| AdapterError::Io {
            path: PathBuf::new(),
            source: io::Error::other(e),
        })
    }
}
