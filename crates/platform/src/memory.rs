//! In-memory adapter.
//!
//! Backs the whole filesystem with a single flat map from absolute path to
//! entry. Used by tests and by embedders that have no real filesystem.
//! Symlinks are stored as an entry type and resolved on access with a fixed
//! maximum depth, so loops surface as errors instead of hangs.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::adapter::{Adapter, FileStat, GlobOptions, GrepOptions};
use crate::error::AdapterError;
use crate::pattern::glob_to_regex;

/// Maximum symlink traversals before declaring a loop.
const MAX_LINK_DEPTH: usize = 32;

#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, mtime: DateTime<Utc> },
    Dir { mtime: DateTime<Utc> },
    Symlink { target: String },
}

/// Adapter over a flat `path -> entry` map.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

fn raw_components(path: &Path) -> VecDeque<String> {
    path.to_string_lossy()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn key_of(components: &[String]) -> String {
    if components.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", components.join("/"))
    }
}

/// Normalize `path` to its final map key, following symlinks per component.
///
/// With `follow_last` false the terminal component is left unresolved, which
/// is what `remove`, `rename`, and `symlink` need to operate on a link
/// itself rather than its target.
fn resolve(
    map: &BTreeMap<String, Entry>,
    path: &Path,
    follow_last: bool,
) -> Result<String, AdapterError> {
    let mut depth = 0usize;
    let mut out: Vec<String> = Vec::new();
    let mut pending = raw_components(path);

    while let Some(component) = pending.pop_front() {
        if component == "." {
            continue;
        }
        if component == ".." {
            out.pop();
            continue;
        }
        out.push(component);

        if let Some(Entry::Symlink { target }) = map.get(&key_of(&out)) {
            if pending.is_empty() && !follow_last {
                break;
            }
            depth += 1;
            if depth > MAX_LINK_DEPTH {
                return Err(AdapterError::SymlinkLoop {
                    path: path.to_path_buf(),
                });
            }
            out.pop();
            if target.starts_with('/') {
                out.clear();
            }
            for part in target.split('/').rev().filter(|s| !s.is_empty()) {
                pending.push_front(part.to_string());
            }
        }
    }

    Ok(key_of(&out))
}

/// Insert `Dir` entries for every ancestor of `key` (excluding the root).
fn ensure_parents(map: &mut BTreeMap<String, Entry>, key: &str) {
    let components: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
    let mut prefix = String::new();
    for component in &components[..components.len().saturating_sub(1)] {
        prefix.push('/');
        prefix.push_str(component);
        map.entry(prefix.clone())
            .or_insert_with(|| Entry::Dir { mtime: Utc::now() });
    }
}

fn child_prefix(key: &str) -> String {
    if key == "/" {
        "/".to_string()
    } else {
        format!("{key}/")
    }
}

/// Keys equal to `key` or inside its subtree.
fn subtree_keys(map: &BTreeMap<String, Entry>, key: &str) -> Vec<String> {
    let prefix = child_prefix(key);
    let mut keys: Vec<String> = map
        .range(prefix.clone()..)
        .take_while(|(k, _)| k.starts_with(&prefix))
        .map(|(k, _)| k.clone())
        .collect();
    if map.contains_key(key) {
        keys.push(key.to_string());
    }
    keys
}

fn has_children(map: &BTreeMap<String, Entry>, key: &str) -> bool {
    let prefix = child_prefix(key);
    map.range(prefix.clone()..)
        .next()
        .is_some_and(|(k, _)| k.starts_with(&prefix))
}

#[async_trait]
impl Adapter for MemoryAdapter {
    fn hash(&self, bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, AdapterError> {
        let map = self.entries.lock().unwrap();
        let key = resolve(&map, path, true)?;
        match map.get(&key) {
            Some(Entry::File { data, .. }) => Ok(data.clone()),
            Some(_) => Err(AdapterError::Io {
                path: path.to_path_buf(),
                source: io::Error::other("is a directory"),
            }),
            None => Err(AdapterError::NotFound {
                path: path.to_path_buf(),
            }),
        }
    }

    async fn write_file(&self, path: &Path, bytes: &[u8]) -> Result<(), AdapterError> {
        let mut map = self.entries.lock().unwrap();
        let key = resolve(&map, path, true)?;
        if matches!(map.get(&key), Some(Entry::Dir { .. })) {
            return Err(AdapterError::Io {
                path: path.to_path_buf(),
                source: io::Error::other("is a directory"),
            });
        }
        ensure_parents(&mut map, &key);
        map.insert(
            key,
            Entry::File {
                data: bytes.to_vec(),
                mtime: Utc::now(),
            },
        );
        Ok(())
    }

    async fn mkdir(&self, path: &Path) -> Result<(), AdapterError> {
        let mut map = self.entries.lock().unwrap();
        let key = resolve(&map, path, true)?;
        if key == "/" {
            return Ok(());
        }
        if matches!(map.get(&key), Some(Entry::File { .. })) {
            return Err(AdapterError::NotADirectory {
                path: path.to_path_buf(),
            });
        }
        ensure_parents(&mut map, &key);
        map.entry(key)
            .or_insert_with(|| Entry::Dir { mtime: Utc::now() });
        Ok(())
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<String>, AdapterError> {
        let map = self.entries.lock().unwrap();
        let key = resolve(&map, path, true)?;
        match map.get(&key) {
            Some(Entry::Dir { .. }) => {}
            None if key == "/" => {}
            Some(_) => {
                return Err(AdapterError::NotADirectory {
                    path: path.to_path_buf(),
                });
            }
            None => {
                return Err(AdapterError::NotFound {
                    path: path.to_path_buf(),
                });
            }
        }
        let prefix = child_prefix(&key);
        let names = map
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| {
                let rest = &k[prefix.len()..];
                if rest.contains('/') {
                    None
                } else {
                    Some(rest.to_string())
                }
            })
            .collect();
        Ok(names)
    }

    async fn stat(&self, path: &Path) -> Result<FileStat, AdapterError> {
        let map = self.entries.lock().unwrap();
        let key = resolve(&map, path, true)?;
        match map.get(&key) {
            Some(Entry::File { data, mtime }) => Ok(FileStat {
                is_file: true,
                is_directory: false,
                size: data.len() as u64,
                mtime: *mtime,
            }),
            Some(Entry::Dir { mtime }) => Ok(FileStat {
                is_file: false,
                is_directory: true,
                size: 0,
                mtime: *mtime,
            }),
            // resolve() with follow_last resolves terminal symlinks
            Some(Entry::Symlink { .. }) => unreachable!("terminal symlink not resolved"),
            None if key == "/" => Ok(FileStat {
                is_file: false,
                is_directory: true,
                size: 0,
                mtime: Utc::now(),
            }),
            None => Err(AdapterError::NotFound {
                path: path.to_path_buf(),
            }),
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        let map = self.entries.lock().unwrap();
        match resolve(&map, path, true) {
            Ok(key) => key == "/" || map.contains_key(&key),
            Err(_) => false,
        }
    }

    async fn remove(&self, path: &Path, recursive: bool) -> Result<(), AdapterError> {
        let mut map = self.entries.lock().unwrap();
        let key = resolve(&map, path, false)?;
        match map.get(&key) {
            Some(Entry::Dir { .. }) => {
                if has_children(&map, &key) && !recursive {
                    return Err(AdapterError::Io {
                        path: path.to_path_buf(),
                        source: io::Error::other("directory not empty"),
                    });
                }
                for k in subtree_keys(&map, &key) {
                    map.remove(&k);
                }
                Ok(())
            }
            Some(_) => {
                map.remove(&key);
                Ok(())
            }
            None => Err(AdapterError::NotFound {
                path: path.to_path_buf(),
            }),
        }
    }

    async fn rename(&self, src: &Path, dest: &Path) -> Result<(), AdapterError> {
        let mut map = self.entries.lock().unwrap();
        let src_key = resolve(&map, src, false)?;
        let dest_key = resolve(&map, dest, false)?;

        if !map.contains_key(&src_key) {
            return Err(AdapterError::NotFound {
                path: src.to_path_buf(),
            });
        }
        if map.contains_key(&dest_key) || has_children(&map, &dest_key) {
            return Err(AdapterError::AlreadyExists {
                path: dest.to_path_buf(),
            });
        }

        ensure_parents(&mut map, &dest_key);
        let src_prefix = child_prefix(&src_key);
        for k in subtree_keys(&map, &src_key) {
            let entry = map.remove(&k).expect("subtree key present");
            let new_key = if k == src_key {
                dest_key.clone()
            } else {
                format!("{}{}", child_prefix(&dest_key), &k[src_prefix.len()..])
            };
            map.insert(new_key, entry);
        }
        Ok(())
    }

    async fn symlink(&self, target: &Path, link: &Path) -> Result<(), AdapterError> {
        let mut map = self.entries.lock().unwrap();
        let key = resolve(&map, link, false)?;
        if map.contains_key(&key) {
            return Err(AdapterError::AlreadyExists {
                path: link.to_path_buf(),
            });
        }
        ensure_parents(&mut map, &key);
        map.insert(
            key,
            Entry::Symlink {
                target: target.to_string_lossy().into_owned(),
            },
        );
        Ok(())
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

        let map = self.entries.lock().unwrap();
        let root_key = resolve(&map, root, true)?;
        let prefix = child_prefix(&root_key);
        let max = options.max_results.unwrap_or(usize::MAX);

        let mut results = Vec::new();
        for (k, entry) in map.range(prefix.clone()..) {
            if !k.starts_with(&prefix) {
                break;
            }
            if matches!(entry, Entry::Dir { .. }) {
                continue;
            }
            let rel = &k[prefix.len()..];
            if matcher.is_match(rel) && !ignores.iter().any(|i| i.is_match(rel)) {
                results.push(rel.to_string());
                if results.len() >= max {
                    break;
                }
            }
        }
        Ok(results)
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

        let map = self.entries.lock().unwrap();
        let root_key = resolve(&map, root, true)?;
        let prefix = child_prefix(&root_key);
        let max = options.max_results.unwrap_or(usize::MAX);

        let mut results = Vec::new();
        'files: for (k, entry) in map.range(prefix.clone()..) {
            if !k.starts_with(&prefix) {
                break;
            }
            let Entry::File { data, .. } = entry else {
                continue;
            };
            let rel = &k[prefix.len()..];
            if include.as_ref().is_some_and(|i| !i.is_match(rel)) {
                continue;
            }
            let text = String::from_utf8_lossy(data);
            for (idx, line) in text.lines().enumerate() {
                if regex.is_match(line) {
                    results.push(format!("{}:{}:{}", rel, idx + 1, line));
                    if results.len() >= max {
                        break 'files;
                    }
                }
            }
        }
        Ok(results)
    }
}
