use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tracing::debug;
use walkdir::WalkDir;

use crate::title::{Namespace, Title};

/// Relative location of one cache entry under the cache root, always `/`-separated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn report(id: u32) -> Self {
        Self(format!("report{id}.txt"))
    }

    /// `<domain>/<namespace>/<local name>[_<sorted filter names>].txt`
    ///
    /// Titles are normalized, so they never contain `_`; that keeps the filter suffix and the
    /// `/` escape unambiguous.
    pub fn query(domain: &str, title: &Title, filter: &[Namespace]) -> Self {
        let mut names = filter.iter().map(|ns| ns.as_str()).collect::<Vec<_>>();
        names.sort_unstable();
        names.dedup();

        let mut file_name = title.local_name().replace('/', "___");
        if !names.is_empty() {
            file_name.push('_');
            file_name.push_str(&names.join("_"));
        }
        Self(format!(
            "{}/{}/{file_name}.txt",
            domain.trim(),
            title.namespace().as_str()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub trait Cache {
    /// Stored payload for `key`, or `None` when missing, older than `max_age`, or unreadable.
    fn load(&self, key: &CacheKey, max_age: Duration) -> Option<String>;
    fn store(&self, key: &CacheKey, payload: &str) -> Result<()>;
    fn purge(&self) -> Result<()>;
}

pub fn is_fresh(age: Duration, max_age: Duration) -> bool {
    age <= max_age
}

/// Return the cached lines for `key`, or run `producer` and persist its output wholesale.
pub fn get_or_fetch<F>(
    cache: &dyn Cache,
    key: &CacheKey,
    max_age: Duration,
    producer: F,
) -> Result<Vec<Title>>
where
    F: FnOnce() -> Result<Vec<Title>>,
{
    if let Some(payload) = cache.load(key, max_age) {
        return Ok(split_lines(&payload));
    }

    debug!("cache miss for '{}', fetching a new copy", key.as_str());
    let titles = producer()?;
    let payload = titles
        .iter()
        .map(Title::as_str)
        .collect::<Vec<_>>()
        .join("\n");
    cache.store(key, &payload)?;
    Ok(titles)
}

pub fn split_lines(payload: &str) -> Vec<Title> {
    payload
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(Title::new)
        .collect()
}

#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub report_entries: usize,
    pub query_entries: usize,
    pub total_bytes: u64,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        key.as_str()
            .split('/')
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();
        if !self.root.exists() {
            return Ok(stats);
        }

        for entry in WalkDir::new(&self.root) {
            let entry = entry
                .with_context(|| format!("failed to walk {}", self.root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            stats.entries += 1;
            if entry.depth() == 1 {
                stats.report_entries += 1;
            } else {
                stats.query_entries += 1;
            }
            if let Ok(metadata) = entry.metadata() {
                stats.total_bytes += metadata.len();
            }
        }
        Ok(stats)
    }
}

impl Cache for DiskCache {
    fn load(&self, key: &CacheKey, max_age: Duration) -> Option<String> {
        let path = self.path_for(key);
        let modified = fs::metadata(&path).and_then(|meta| meta.modified()).ok()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        if !is_fresh(age, max_age) {
            debug!(
                "cached copy of '{}' is {}s old (max {}s)",
                key.as_str(),
                age.as_secs(),
                max_age.as_secs()
            );
            return None;
        }

        match fs::read_to_string(&path) {
            Ok(payload) => Some(payload),
            Err(error) => {
                debug!("treating unreadable cache entry {} as a miss: {error}", path.display());
                None
            }
        }
    }

    fn store(&self, key: &CacheKey, payload: &str) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&path, payload).with_context(|| format!("failed to write {}", path.display()))
    }

    fn purge(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => {
                Err(error).with_context(|| format!("failed to purge {}", self.root.display()))
            }
        }
    }
}

/// Process-local cache, for tests and dry runs that must not touch the filesystem.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<CacheKey, (String, SystemTime)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pretend the entry for `key` was written `age` ago.
    pub fn set_age(&self, key: &CacheKey, age: Duration) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(key) {
            entry.1 = SystemTime::now()
                .checked_sub(age)
                .unwrap_or(SystemTime::UNIX_EPOCH);
        }
    }
}

impl Cache for MemoryCache {
    fn load(&self, key: &CacheKey, max_age: Duration) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let (payload, written_at) = entries.get(key)?;
        let age = SystemTime::now()
            .duration_since(*written_at)
            .unwrap_or_default();
        is_fresh(age, max_age).then(|| payload.clone())
    }

    fn store(&self, key: &CacheKey, payload: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), (payload.to_string(), SystemTime::now()));
        Ok(())
    }

    fn purge(&self) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}
