//! Persistent fingerprint cache of completed translations.
//! Key: blake3 of every field of a translation request.
//! Eviction: least recently used first, by approximate byte size.

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{AlgebrasError, Result};
use crate::formats::write_atomically;
use crate::translate::TranslationRequest;

const CACHE_FORMAT_VERSION: u32 = 1;
/// Bookkeeping bytes charged per entry on top of key and text
const ENTRY_OVERHEAD: usize = 64;

/// Hex-encoded blake3 digest identifying a translation request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(request: &TranslationRequest) -> Self {
        let mut hasher = blake3::Hasher::new();
        let fields = [
            request.source_lang.as_str(),
            request.target_lang.as_str(),
            if request.ui_safe { "ui-safe" } else { "plain" },
            request.prompt.as_deref().unwrap_or(""),
            request.glossary_id.as_deref().unwrap_or(""),
            request.text.as_str(),
        ];
        for field in fields {
            // Length prefix keeps ("ab","c") and ("a","bc") apart
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub translated_text: String,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    fn size(&self) -> usize {
        self.fingerprint.0.len() + self.translated_text.len() + ENTRY_OVERHEAD
    }
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    /// Least recently used first
    entries: Vec<CacheEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: usize,
    pub max_bytes: usize,
}

struct CacheInner {
    entries: LruCache<Fingerprint, CacheEntry>,
    total_bytes: usize,
    dirty: bool,
}

pub struct FingerprintCache {
    inner: Mutex<CacheInner>,
    path: Option<PathBuf>,
    max_bytes: usize,
}

impl FingerprintCache {
    /// Cache that lives only for this process.
    pub fn in_memory(max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                total_bytes: 0,
                dirty: false,
            }),
            path: None,
            max_bytes,
        }
    }

    /// Load the cache persisted at `path`. A missing file is an empty cache;
    /// an unreadable one is discarded with a warning.
    pub fn open(path: impl Into<PathBuf>, max_bytes: usize) -> Self {
        let path = path.into();
        let mut cache = Self::in_memory(max_bytes);

        match Self::load(&path) {
            Ok(Some(entries)) => {
                let mut inner = cache.inner.lock();
                for entry in entries {
                    inner.total_bytes += entry.size();
                    if let Some(previous) = inner.entries.put(entry.fingerprint.clone(), entry) {
                        inner.total_bytes -= previous.size();
                    }
                }
                Self::evict(&mut inner, max_bytes);
                debug!("Loaded {} cached translations from {}", inner.entries.len(), path.display());
            }
            Ok(None) => debug!("No translation cache at {}, starting empty", path.display()),
            Err(e) => warn!("{}; starting with an empty cache", e),
        }

        cache.path = Some(path);
        cache
    }

    fn load(path: &Path) -> Result<Option<Vec<CacheEntry>>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let file: CacheFile = serde_json::from_str(&content)
            .map_err(|e| AlgebrasError::CacheCorrupt(format!("{}: {}", path.display(), e)))?;
        if file.version != CACHE_FORMAT_VERSION {
            return Err(AlgebrasError::CacheCorrupt(format!(
                "{}: unsupported cache version {}",
                path.display(),
                file.version
            )));
        }
        Ok(Some(file.entries))
    }

    fn evict(inner: &mut CacheInner, max_bytes: usize) -> usize {
        let mut evicted = 0;
        while inner.total_bytes > max_bytes {
            let Some((_, entry)) = inner.entries.pop_lru() else {
                break;
            };
            inner.total_bytes -= entry.size();
            inner.dirty = true;
            evicted += 1;
        }
        evicted
    }

    /// Look up a translation and mark it most recently used.
    ///
    /// A hit changes the recency order, so it also marks the cache for persisting.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<String> {
        let mut inner = self.inner.lock();
        let hit = inner.entries.get(fingerprint).map(|entry| entry.translated_text.clone());
        if hit.is_some() {
            inner.dirty = true;
        }
        hit
    }

    /// Insert or overwrite, then evict least recently used entries while over budget.
    pub fn put(&self, fingerprint: Fingerprint, translated_text: impl Into<String>) {
        let entry = CacheEntry {
            fingerprint: fingerprint.clone(),
            translated_text: translated_text.into(),
            created_at: Utc::now(),
        };

        let mut inner = self.inner.lock();
        inner.total_bytes += entry.size();
        if let Some(previous) = inner.entries.put(fingerprint, entry) {
            inner.total_bytes -= previous.size();
        }
        inner.dirty = true;

        let evicted = Self::evict(&mut inner, self.max_bytes);
        if evicted > 0 {
            debug!(evicted, total_bytes = inner.total_bytes, "Evicted cached translations");
        }
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.lock().entries.contains(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            total_bytes: inner.total_bytes,
            max_bytes: self.max_bytes,
        }
    }

    /// Snapshot of all entries, most recently used first.
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.inner.lock().entries.iter().map(|(_, entry)| entry.clone()).collect()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.total_bytes = 0;
        inner.dirty = true;
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the cache back to disk if anything changed since it was loaded.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        // Serialize under the lock, write outside it
        let content = {
            let mut inner = self.inner.lock();
            if !inner.dirty {
                return Ok(());
            }
            let entries: Vec<CacheEntry> = inner.entries.iter().rev().map(|(_, e)| e.clone()).collect();
            let file = CacheFile {
                version: CACHE_FORMAT_VERSION,
                entries,
            };
            let content = serde_json::to_string(&file)?;
            inner.dirty = false;
            content
        };

        write_atomically(path, &content)?;
        info!("Translation cache saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: &str, target: &str) -> TranslationRequest {
        TranslationRequest {
            text: text.to_string(),
            source_lang: "en".to_string(),
            target_lang: target.to_string(),
            ui_safe: false,
            prompt: None,
            glossary_id: None,
        }
    }

    #[test]
    fn test_fingerprint_covers_every_field() {
        let base = request("Hello", "fr");
        let mut ui_safe = base.clone();
        ui_safe.ui_safe = true;
        let mut glossary = base.clone();
        glossary.glossary_id = Some("g1".to_string());

        assert_eq!(Fingerprint::of(&base), Fingerprint::of(&request("Hello", "fr")));
        assert_ne!(Fingerprint::of(&base), Fingerprint::of(&request("Hello", "de")));
        assert_ne!(Fingerprint::of(&base), Fingerprint::of(&ui_safe));
        assert_ne!(Fingerprint::of(&base), Fingerprint::of(&glossary));
        assert_eq!(Fingerprint::of(&base).as_str().len(), 64);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let a = Fingerprint::of(&request("a", "fr"));
        let b = Fingerprint::of(&request("b", "fr"));
        let c = Fingerprint::of(&request("c", "fr"));
        let entry_size = 64 + 1 + ENTRY_OVERHEAD;
        let cache = FingerprintCache::in_memory(entry_size * 2);

        cache.put(a.clone(), "A");
        cache.put(b.clone(), "B");
        // Touch `a` so `b` becomes the eviction candidate
        assert_eq!(cache.get(&a).as_deref(), Some("A"));
        cache.put(c.clone(), "C");

        assert!(cache.contains(&a));
        assert!(!cache.contains(&b));
        assert!(cache.contains(&c));
        assert!(cache.stats().total_bytes <= entry_size * 2);
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("translation_cache.json");
        let fp = Fingerprint::of(&request("Hello", "fr"));

        let cache = FingerprintCache::open(&path, 1024 * 1024);
        assert!(cache.is_empty());
        cache.put(fp.clone(), "Bonjour");
        cache.persist().unwrap();

        let reloaded = FingerprintCache::open(&path, 1024 * 1024);
        assert_eq!(reloaded.get(&fp).as_deref(), Some("Bonjour"));
    }

    #[test]
    fn test_read_only_run_persists_recency() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("translation_cache.json");
        let a = Fingerprint::of(&request("a", "fr"));
        let b = Fingerprint::of(&request("b", "fr"));

        let cache = FingerprintCache::open(&path, 1024 * 1024);
        cache.put(a.clone(), "A");
        cache.put(b.clone(), "B");
        cache.persist().unwrap();

        let reading = FingerprintCache::open(&path, 1024 * 1024);
        assert_eq!(reading.get(&a).as_deref(), Some("A"));
        reading.persist().unwrap();

        let reloaded = FingerprintCache::open(&path, 1024 * 1024);
        let order: Vec<Fingerprint> = reloaded.entries().into_iter().map(|e| e.fingerprint).collect();
        assert_eq!(order, vec![a, b]);
    }

    #[test]
    fn test_corrupt_file_starts_cold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("translation_cache.json");
        std::fs::write(&path, "{ not json").unwrap();

        let cache = FingerprintCache::open(&path, 1024);
        assert!(cache.is_empty());
        cache.put(Fingerprint::of(&request("x", "fr")), "y");
        cache.persist().unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("\"version\":1"));
    }
}
