//! Diagnostic Cache - bounded LRU fast path for file queries
//!
//! Keyed by (project, file). Entries expire after a fixed TTL on top of the
//! capacity-based LRU eviction. The cache never originates data: it is only
//! written after the store has been updated.

use crate::diagnostic::Diagnostic;
use lru::LruCache;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// Assumed size of one entry when turning a byte budget into a capacity
pub const AVERAGE_ENTRY_BYTES: u64 = 2 * 1024;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub project: String,
    pub file: PathBuf,
}

impl CacheKey {
    pub fn new(project: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            project: project.into(),
            file: file.into(),
        }
    }

    /// `project:file`, the form matched by [`DiagnosticCache::invalidate_by_pattern`]
    pub fn render(&self) -> String {
        format!("{}:{}", self.project, self.file.display())
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub diagnostics: Vec<Diagnostic>,
    pub inserted_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

pub struct DiagnosticCache {
    entries: LruCache<CacheKey, CacheEntry>,
    ttl: Duration,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl DiagnosticCache {
    /// Cache sized from a memory budget in megabytes
    pub fn new(cache_size_mb: u64) -> Self {
        Self::with_capacity(Self::capacity_for(cache_size_mb), DEFAULT_TTL)
    }

    pub fn with_capacity(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Approximate entry count for a byte budget (at least one)
    pub fn capacity_for(cache_size_mb: u64) -> usize {
        let entries = cache_size_mb.saturating_mul(1024 * 1024) / AVERAGE_ENTRY_BYTES;
        usize::try_from(entries).unwrap_or(usize::MAX).max(1)
    }

    /// Look up one key, counting a hit or a miss
    pub fn get(&mut self, project: &str, file: &Path) -> Option<Vec<Diagnostic>> {
        let found = self.fresh(&CacheKey::new(project, file));
        self.record(found.is_some());
        found
    }

    /// Look `file` up in every project namespace.
    ///
    /// Counts as a single request: one hit if any namespace holds the file.
    pub fn lookup_file<'a, I>(&mut self, projects: I, file: &Path) -> Option<Vec<Diagnostic>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut found: Option<Vec<Diagnostic>> = None;
        for project in projects {
            if let Some(diagnostics) = self.fresh(&CacheKey::new(project, file)) {
                found.get_or_insert_with(Vec::new).extend(diagnostics);
            }
        }
        self.record(found.is_some());
        found
    }

    pub fn set(&mut self, project: &str, file: &Path, diagnostics: Vec<Diagnostic>) {
        let key = CacheKey::new(project, file);
        let entry = CacheEntry {
            diagnostics,
            inserted_at: Instant::now(),
        };

        if self.entries.contains(&key) {
            self.entries.put(key, entry);
            return;
        }

        if let Some((evicted, _)) = self.entries.push(key, entry) {
            self.evictions += 1;
            debug!("Cache evicted {}", evicted.render());
        }
    }

    pub fn delete(&mut self, project: &str, file: &Path) -> bool {
        self.entries.pop(&CacheKey::new(project, file)).is_some()
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove every entry whose `project:file` key matches; returns the count
    pub fn invalidate_by_pattern(&mut self, pattern: &Regex) -> usize {
        let doomed: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(key, _)| pattern.is_match(&key.render()))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            self.entries.pop(key);
        }
        doomed.len()
    }

    pub fn stats(&self) -> CacheStats {
        let requests = self.hits + self.misses;
        CacheStats {
            size: self.entries.len(),
            capacity: self.entries.cap().get(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            hit_rate: if requests == 0 {
                0.0
            } else {
                self.hits as f64 / requests as f64
            },
        }
    }

    /// Entries from most to least recently used, without touching recency
    /// or counters. Expired entries are included.
    pub fn entries(&self) -> impl Iterator<Item = (&CacheKey, &[Diagnostic])> {
        self.entries
            .iter()
            .map(|(key, entry)| (key, entry.diagnostics.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unexpired entry for `key`, refreshing its recency. Expired entries
    /// are dropped here.
    fn fresh(&mut self, key: &CacheKey) -> Option<Vec<Diagnostic>> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() >= self.ttl,
            None => return None,
        };

        if expired {
            self.entries.pop(key);
            return None;
        }

        self.entries.peek(key).map(|entry| entry.diagnostics.clone())
    }

    fn record(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }
}
