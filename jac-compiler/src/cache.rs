//! Disk cache for compiled module images.
//!
//! Layout: a single `.jaccache/` directory at the workspace root. Filenames
//! embed a short hash of the absolute source path so same-named sources in
//! different directories never collide:
//!
//! ```text
//! source:  /project/src/main.jac
//! cache:   .jaccache/main.a1b2c3d4.jacrt-1.bc
//!          .jaccache/main.a1b2c3d4.jacrt-1.minimal.bc
//! ```
//!
//! Reads never raise: stale, missing, or unreadable entries behave as
//! misses. Writes are best-effort via write-temp-and-rename, so concurrent
//! compiles of one key race harmlessly and readers always see a whole file.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::ir::IR_VERSION;

pub const CACHE_DIR: &str = ".jaccache";
const EXTENSION: &str = "bc";
const MINIMAL_SUFFIX: &str = "minimal";

/// Identity of one cache entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheKey {
    pub source_path: PathBuf,
    pub minimal: bool,
    pub host_tag: String,
}

impl CacheKey {
    /// Key for a source under the current image format version.
    pub fn for_source(source_path: impl Into<PathBuf>, minimal: bool) -> Self {
        Self {
            source_path: source_path.into(),
            minimal,
            host_tag: format!("jacrt-{IR_VERSION}"),
        }
    }
}

/// Pluggable cache backend. The disk implementation is the default; plugin
/// providers may substitute their own.
pub trait BytecodeStore: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<Vec<u8>>;
    fn put(&self, key: &CacheKey, bytecode: &[u8]);
}

#[derive(Clone, Debug)]
pub struct DiskBytecodeCache {
    root: PathBuf,
}

impl DiskBytecodeCache {
    /// Cache rooted at the given workspace directory.
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            root: workspace_root.into(),
        }
    }

    fn cache_path(&self, key: &CacheKey) -> PathBuf {
        let absolute = key
            .source_path
            .canonicalize()
            .unwrap_or_else(|_| key.source_path.clone());
        let mut hasher = Sha256::new();
        hasher.update(absolute.to_string_lossy().as_bytes());
        let digest = hasher.finalize();
        let path_hash: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();

        let stem = absolute
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "module".to_string());
        let name = if key.minimal {
            format!("{stem}.{path_hash}.{}.{MINIMAL_SUFFIX}.{EXTENSION}", key.host_tag)
        } else {
            format!("{stem}.{path_hash}.{}.{EXTENSION}", key.host_tag)
        };
        self.root.join(CACHE_DIR).join(name)
    }

    fn is_fresh(&self, key: &CacheKey, cache_path: &Path) -> bool {
        let Ok(cache_meta) = std::fs::metadata(cache_path) else {
            return false;
        };
        let Ok(source_meta) = std::fs::metadata(&key.source_path) else {
            return false;
        };
        match (cache_meta.modified(), source_meta.modified()) {
            (Ok(cache_mtime), Ok(source_mtime)) => cache_mtime > source_mtime,
            _ => false,
        }
    }

    /// Remove the cached entries (both modes) for a source. Used on reload.
    pub fn evict(&self, source_path: &Path) {
        for minimal in [false, true] {
            let key = CacheKey::for_source(source_path, minimal);
            let _ = std::fs::remove_file(self.cache_path(&key));
        }
    }
}

impl BytecodeStore for DiskBytecodeCache {
    fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = self.cache_path(key);
        if !self.is_fresh(key, &path) {
            return None;
        }
        std::fs::read(&path).ok()
    }

    fn put(&self, key: &CacheKey, bytecode: &[u8]) {
        let path = self.cache_path(key);
        let Some(dir) = path.parent() else {
            return;
        };
        if std::fs::create_dir_all(dir).is_err() {
            return;
        }
        let tmp = path.with_extension("tmp");
        if std::fs::write(&tmp, bytecode).is_ok() {
            let _ = std::fs::rename(&tmp, &path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn write_source(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "with entry { report 1; }").unwrap();
        path
    }

    /// Push a file's mtime into the past so a subsequent write is newer.
    fn age_file(path: &Path, secs: u64) {
        let past = SystemTime::now() - Duration::from_secs(secs);
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(past).unwrap();
    }

    #[test]
    fn put_then_get_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let source = write_source(tmp.path(), "app.jac");
        age_file(&source, 60);
        let cache = DiskBytecodeCache::new(tmp.path());
        let key = CacheKey::for_source(&source, false);

        cache.put(&key, b"image-bytes");
        assert_eq!(cache.get(&key).as_deref(), Some(b"image-bytes".as_ref()));
    }

    #[test]
    fn stale_entry_is_a_miss() {
        let tmp = tempfile::tempdir().unwrap();
        let source = write_source(tmp.path(), "app.jac");
        let cache = DiskBytecodeCache::new(tmp.path());
        let key = CacheKey::for_source(&source, false);

        cache.put(&key, b"old");
        // Make the cached file older than the source.
        let entry = cache.cache_path(&key);
        age_file(&entry, 120);
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn minimal_and_full_keys_are_distinct() {
        let tmp = tempfile::tempdir().unwrap();
        let source = write_source(tmp.path(), "app.jac");
        age_file(&source, 60);
        let cache = DiskBytecodeCache::new(tmp.path());

        let full = CacheKey::for_source(&source, false);
        let minimal = CacheKey::for_source(&source, true);
        cache.put(&full, b"full");
        cache.put(&minimal, b"minimal");
        assert_eq!(cache.get(&full).as_deref(), Some(b"full".as_ref()));
        assert_eq!(cache.get(&minimal).as_deref(), Some(b"minimal".as_ref()));
    }

    #[test]
    fn same_basename_different_dirs_do_not_collide() {
        let tmp = tempfile::tempdir().unwrap();
        let dir_a = tmp.path().join("a");
        let dir_b = tmp.path().join("b");
        std::fs::create_dir_all(&dir_a).unwrap();
        std::fs::create_dir_all(&dir_b).unwrap();
        let source_a = write_source(&dir_a, "app.jac");
        let source_b = write_source(&dir_b, "app.jac");
        age_file(&source_a, 60);
        age_file(&source_b, 60);

        let cache = DiskBytecodeCache::new(tmp.path());
        let key_a = CacheKey::for_source(&source_a, false);
        let key_b = CacheKey::for_source(&source_b, false);
        cache.put(&key_a, b"A");
        cache.put(&key_b, b"B");
        assert_eq!(cache.get(&key_a).as_deref(), Some(b"A".as_ref()));
        assert_eq!(cache.get(&key_b).as_deref(), Some(b"B".as_ref()));
    }

    #[test]
    fn missing_source_is_a_miss() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = DiskBytecodeCache::new(tmp.path());
        let key = CacheKey::for_source(tmp.path().join("ghost.jac"), false);
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn evict_removes_both_modes() {
        let tmp = tempfile::tempdir().unwrap();
        let source = write_source(tmp.path(), "app.jac");
        age_file(&source, 60);
        let cache = DiskBytecodeCache::new(tmp.path());
        let full = CacheKey::for_source(&source, false);
        let minimal = CacheKey::for_source(&source, true);
        cache.put(&full, b"f");
        cache.put(&minimal, b"m");

        cache.evict(&source);
        assert!(cache.get(&full).is_none());
        assert!(cache.get(&minimal).is_none());
    }
}
