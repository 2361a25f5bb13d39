//! Basic moderation tier - keyword filtering
//!
//! Keyword files hold one literal per line (`#` starts a comment, blank
//! lines are skipped). Matching is case-insensitive substring search. Each
//! file's compiled filter is cached by path; the file's mtime is checked on
//! every use so edits take effect without a restart. The cache evicts FIFO
//! at a fixed cap and registers with the memory guard.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use crate::config::request::BasicModeration;
use crate::memory_guard::TrackedCache;

/// Maximum cached filters before FIFO eviction
const MAX_FILTERS: usize = 100;

/// Compiled keyword filter for one file
#[derive(Debug)]
pub struct KeywordFilter {
    path: PathBuf,
    mtime: Option<SystemTime>,
    /// Lowercased literals; matching lowercases the input once
    patterns: Vec<String>,
}

impl KeywordFilter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let mut filter = Self {
            path: path.into(),
            mtime: None,
            patterns: Vec::new(),
        };
        filter.reload_if_needed();
        filter
    }

    /// Reload patterns when the file's mtime changed; a missing file clears
    /// the pattern set.
    pub fn reload_if_needed(&mut self) {
        let mtime = fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        if mtime.is_none() {
            self.mtime = None;
            self.patterns.clear();
            return;
        }
        if mtime != self.mtime {
            self.mtime = mtime;
            self.patterns = load_patterns(&self.path);
            tracing::debug!(
                "Loaded {} keyword pattern(s) from {}",
                self.patterns.len(),
                self.path.display()
            );
        }
    }

    /// Return the first matching keyword, if any
    pub fn match_text(&mut self, text: &str) -> Option<String> {
        self.reload_if_needed();
        if self.patterns.is_empty() {
            return None;
        }
        let haystack = text.to_lowercase();
        self.patterns
            .iter()
            .find(|p| haystack.contains(p.as_str()))
            .cloned()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// The compiled (lowercased) literals; used by the keyword check CLI
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

fn load_patterns(path: &Path) -> Vec<String> {
    match fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_lowercase)
            .collect(),
        Err(e) => {
            tracing::error!("Failed to load keywords from {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Process-wide filter cache, keyed by keyword file path
pub struct FilterCache {
    inner: Mutex<FilterCacheInner>,
}

#[derive(Default)]
struct FilterCacheInner {
    filters: HashMap<PathBuf, KeywordFilter>,
    /// Insertion order for FIFO eviction
    order: Vec<PathBuf>,
}

impl FilterCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FilterCacheInner::default()),
        }
    }

    /// Run a match against the filter for `path`, creating or reloading the
    /// filter as needed.
    pub fn match_text(&self, path: &Path, text: &str) -> Option<String> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if !inner.filters.contains_key(path) {
            if inner.filters.len() >= MAX_FILTERS {
                // FIFO: drop the oldest filter
                if !inner.order.is_empty() {
                    let oldest = inner.order.remove(0);
                    inner.filters.remove(&oldest);
                    tracing::debug!("Filter cache full, evicted {}", oldest.display());
                }
            }
            inner
                .filters
                .insert(path.to_path_buf(), KeywordFilter::new(path));
            inner.order.push(path.to_path_buf());
        }

        inner
            .filters
            .get_mut(path)
            .and_then(|f| f.match_text(text))
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .filters
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FilterCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackedCache for FilterCache {
    fn name(&self) -> &'static str {
        "keyword_filters"
    }

    fn estimated_size(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .filters
            .values()
            .map(|f| f.patterns.iter().map(|p| p.len() + 24).sum::<usize>() + 128)
            .sum()
    }

    fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.filters.clear();
        inner.order.clear();
    }
}

/// Run the basic moderation tier.
///
/// Returns the block reason `"[<error_code>] Matched keyword: <kw>"` on a
/// hit, None on pass or when the tier is disabled.
pub fn basic_moderation(text: &str, cfg: &BasicModeration, cache: &FilterCache) -> Option<String> {
    if !cfg.enabled {
        return None;
    }

    let path = Path::new(&cfg.keywords_file);
    let matched = cache.match_text(path, text)?;

    tracing::info!(
        "Basic moderation blocked request (keyword: {}, file: {})",
        matched,
        cfg.keywords_file
    );
    Some(format!("[{}] Matched keyword: {}", cfg.error_code, matched))
}
