//! File-backed cache for downloaded content
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/[<sub_dir>/]<sha256(key)>/
//!     content.<etag-hex|_>.<last-modified-epoch|_>           complete body
//!     content.<etag-hex|_>.<last-modified-epoch|_>.partial   body still being written
//!     meta.txt                                               resume record (see `metadata`)
//! ```
//!
//! The typed metadata of a cache file (etag, last-modified) lives in its
//! file name, so a lookup never has to open the body. A file becomes
//! complete only through [`CacheFileStore::mark_complete`], which renames
//! the `.partial` file in place; readers asking for complete files never
//! observe a half-written body.

pub mod metadata;

pub use metadata::{MetadataProvider, MetadataRecord};

use crate::error::CacheError;
use crate::utils::hash_key;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const CONTENT_PREFIX: &str = "content";
const PARTIAL_SUFFIX: &str = ".partial";
const ABSENT_FIELD: &str = "_";
/// Longest entity tag kept in a file name; hex doubles it and names stop at 255 bytes
const MAX_ETAG_LEN: usize = 100;

/// Typed metadata attached to a cache file
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetadataKey {
    /// Last-modified time of the remote resource in epoch millis
    LastModifiedEpoch,
    /// Entity tag reported by the server
    ETag,
}

impl MetadataKey {
    /// Stable string name of the key
    pub fn as_str(self) -> &'static str {
        match self {
            MetadataKey::LastModifiedEpoch => "last-modified-epoch",
            MetadataKey::ETag => "etag",
        }
    }
}

/// Handle to a file in the cache
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheFile {
    path: PathBuf,
    metadata: HashMap<MetadataKey, String>,
    complete: bool,
}

impl CacheFile {
    /// Location of the body on disk
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory of the cache entry this file belongs to
    pub fn entry_dir(&self) -> Option<&Path> {
        self.path.parent()
    }

    /// Whether the body has been fully materialized
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Raw value of a metadata key
    pub fn metadata(&self, key: MetadataKey) -> Option<&str> {
        self.metadata.get(&key).map(String::as_str)
    }

    /// Last-modified time in epoch millis, if known
    pub fn last_modified_epoch(&self) -> Option<i64> {
        self.metadata(MetadataKey::LastModifiedEpoch)
            .and_then(|v| v.parse().ok())
    }

    /// Entity tag, if known
    pub fn etag(&self) -> Option<&str> {
        self.metadata(MetadataKey::ETag)
    }

    /// Current size of the body on disk
    pub fn len(&self) -> std::io::Result<u64> {
        fs::metadata(&self.path).map(|m| m.len())
    }

    /// Whether the body is empty (or missing)
    pub fn is_empty(&self) -> bool {
        self.len().map(|len| len == 0).unwrap_or(true)
    }

    fn file_name(metadata: &HashMap<MetadataKey, String>, complete: bool) -> String {
        let etag = metadata
            .get(&MetadataKey::ETag)
            .map(hex::encode)
            .unwrap_or_else(|| ABSENT_FIELD.to_string());
        let last_modified = metadata
            .get(&MetadataKey::LastModifiedEpoch)
            .and_then(|v| v.parse::<i64>().ok())
            .map(|v| v.to_string())
            .unwrap_or_else(|| ABSENT_FIELD.to_string());
        let suffix = if complete { "" } else { PARTIAL_SUFFIX };
        format!("{CONTENT_PREFIX}.{etag}.{last_modified}{suffix}")
    }

    /// Rebuild a handle from a file name produced by [`file_name`](Self::file_name)
    fn from_path(path: PathBuf) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let (stem, complete) = match name.strip_suffix(PARTIAL_SUFFIX) {
            Some(stem) => (stem, false),
            None => (name, true),
        };

        let mut parts = stem.split('.');
        let (Some(CONTENT_PREFIX), Some(etag), Some(last_modified), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return None;
        };

        let mut metadata = HashMap::new();
        if etag != ABSENT_FIELD {
            let etag = String::from_utf8(hex::decode(etag).ok()?).ok()?;
            metadata.insert(MetadataKey::ETag, etag);
        }
        if last_modified != ABSENT_FIELD {
            let epoch: i64 = last_modified.parse().ok()?;
            metadata.insert(MetadataKey::LastModifiedEpoch, epoch.to_string());
        }

        Some(Self {
            path,
            metadata,
            complete,
        })
    }
}

/// Creates, looks up, completes and deletes cache files under a root directory
///
/// Entries are keyed by an opaque string (typically the source URL) and
/// optionally scoped under a named sub-directory. The store takes no locks:
/// concurrent writers to the same key race at the filesystem layer, and
/// completion by rename keeps readers from seeing partial bodies as complete.
#[derive(Clone, Debug)]
pub struct CacheFileStore {
    root: PathBuf,
}

impl CacheFileStore {
    /// Create a store rooted at `root` (created lazily)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sub_dir_path(&self, sub_dir: Option<&str>) -> PathBuf {
        match named_sub_dir(sub_dir) {
            Some(sub) => self.root.join(sub),
            None => self.root.clone(),
        }
    }

    /// Directory holding the entry for `key`
    pub fn entry_dir(&self, key: &str, sub_dir: Option<&str>) -> PathBuf {
        self.sub_dir_path(sub_dir).join(hash_key(key))
    }

    /// Create the entry directory for `key` if needed
    ///
    /// Sub-directory names must be a single path component. An empty name
    /// means the root, as for `None`.
    pub fn ensure_entry_dir(&self, key: &str, sub_dir: Option<&str>) -> Result<PathBuf, CacheError> {
        let dir = self.entry_dir(key, sub_dir);
        if let Some(sub) = named_sub_dir(sub_dir)
            && !is_single_component(sub)
        {
            return Err(CacheError::DirectoryNotWritable {
                path: dir,
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("sub-directory '{sub}' must be a single path component"),
                ),
            });
        }

        fs::create_dir_all(&dir).map_err(|source| CacheError::DirectoryNotWritable {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    /// Content files of an entry; unreadable directories count as empty
    fn content_files(dir: &Path) -> Vec<CacheFile> {
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| CacheFile::from_path(entry.path()))
            .collect()
    }

    /// Start a new (partial, empty) cache file for `key`
    ///
    /// Leftover partial files for the key are discarded. A complete copy
    /// stays readable until [`mark_complete`](Self::mark_complete) replaces
    /// it; the metadata record is left for the caller to rewrite.
    ///
    /// Entity tags too long to fit in a file name are not kept.
    pub fn create_file(
        &self,
        key: &str,
        sub_dir: Option<&str>,
        mut metadata: HashMap<MetadataKey, String>,
    ) -> Result<CacheFile, CacheError> {
        let dir = self.ensure_entry_dir(key, sub_dir)?;
        if let Some(etag) = metadata.get(&MetadataKey::ETag)
            && etag.len() > MAX_ETAG_LEN
        {
            tracing::debug!(key, len = etag.len(), "Entity tag too long to cache, dropping it");
            metadata.remove(&MetadataKey::ETag);
        }
        for stale in Self::content_files(&dir).into_iter().filter(|f| !f.is_complete()) {
            if let Err(e) = fs::remove_file(stale.path()) {
                tracing::warn!(path = %stale.path().display(), error = %e, "Failed to remove stale cache file");
            }
        }

        let path = dir.join(CacheFile::file_name(&metadata, false));
        fs::File::create(&path).map_err(|source| CacheError::FileCreateFailed {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(path = %path.display(), "Created partial cache file");
        Ok(CacheFile {
            path,
            metadata,
            complete: false,
        })
    }

    /// Look up the cache file for `key`
    ///
    /// A complete file is preferred. When `ignore_partial` is true and no
    /// complete file exists, an incomplete one is returned instead.
    pub fn get_file(&self, key: &str, sub_dir: Option<&str>, ignore_partial: bool) -> Option<CacheFile> {
        let files = Self::content_files(&self.entry_dir(key, sub_dir));
        let (complete, partial): (Vec<_>, Vec<_>) =
            files.into_iter().partition(CacheFile::is_complete);

        complete
            .into_iter()
            .next()
            .or_else(|| ignore_partial.then(|| partial.into_iter().next()).flatten())
    }

    /// Promote a partial file to complete by renaming it
    ///
    /// Other complete files of the same entry are removed first so that a
    /// lookup never finds two versions.
    pub fn mark_complete(&self, file: &CacheFile) -> Result<CacheFile, CacheError> {
        if file.complete {
            return Err(CacheError::NotPartial {
                path: file.path.clone(),
            });
        }
        let dir = file.entry_dir().ok_or_else(|| CacheError::NotPartial {
            path: file.path.clone(),
        })?;

        for old in Self::content_files(dir).into_iter().filter(CacheFile::is_complete) {
            let _ = fs::remove_file(old.path());
        }

        let target = dir.join(CacheFile::file_name(&file.metadata, true));
        fs::rename(&file.path, &target).map_err(|source| CacheError::MarkCompleteFailed {
            path: file.path.clone(),
            source,
        })?;

        tracing::debug!(path = %target.display(), "Marked cache file complete");
        Ok(CacheFile {
            path: target,
            metadata: file.metadata.clone(),
            complete: true,
        })
    }

    /// Delete the entry for `key`, including its metadata record
    ///
    /// Returns true if anything was removed.
    pub fn delete(&self, key: &str, sub_dir: Option<&str>) -> bool {
        let dir = self.entry_dir(key, sub_dir);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::debug!(key, dir = %dir.display(), "Deleted cache entry");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to delete cache entry");
                false
            }
        }
    }

    /// Remove every entry under `sub_dir`
    pub fn clear_sub_dir(&self, sub_dir: &str) -> bool {
        if !is_single_component(sub_dir) {
            return false;
        }
        fs::remove_dir_all(self.sub_dir_path(Some(sub_dir))).is_ok()
    }
}

fn named_sub_dir(sub_dir: Option<&str>) -> Option<&str> {
    sub_dir.filter(|sub| !sub.is_empty())
}

fn is_single_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
