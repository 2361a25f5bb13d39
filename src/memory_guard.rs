//! Memory governance - tracked-cache eviction and a process RSS watchdog
//!
//! Adapters and classifiers can pin large payloads in the process caches
//! (tool schemas, vocabularies). A background task measures the tracked
//! caches every 30 seconds and clears any whose estimated size crosses
//! 1 GiB; as a backstop it reads the process resident size and terminates
//! the process past 2 GiB. Caches register through weak references, so
//! tracking never keeps a dropped cache alive.

use std::sync::{Mutex, Weak};
use std::time::Duration;

use sysinfo::{ProcessesToUpdate, System};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Per-cache size threshold: 1 GiB
const CACHE_SIZE_LIMIT: usize = 1024 * 1024 * 1024;
/// Process RSS termination threshold: 2 GiB
const PROCESS_MEMORY_LIMIT: u64 = 2 * 1024 * 1024 * 1024;
/// Check cadence
const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// A cache that can report its approximate size and be evicted wholesale
pub trait TrackedCache: Send + Sync {
    fn name(&self) -> &'static str;
    /// Rough in-memory footprint in bytes; precision is not the point
    fn estimated_size(&self) -> usize;
    fn clear(&self);
}

/// Registry of weakly-held tracked caches
pub struct MemoryGuard {
    tracked: Mutex<Vec<Weak<dyn TrackedCache>>>,
}

impl MemoryGuard {
    pub fn new() -> Self {
        Self {
            tracked: Mutex::new(Vec::new()),
        }
    }

    /// Register a cache for periodic checks
    pub fn track(&self, cache: Weak<dyn TrackedCache>) {
        self.tracked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(cache);
    }

    /// Check every live tracked cache, clearing oversized ones. Returns the
    /// number cleared; dead weak references are pruned along the way.
    pub fn check_all_tracked(&self) -> usize {
        let mut tracked = self.tracked.lock().unwrap_or_else(|e| e.into_inner());
        let mut cleared = 0;

        tracked.retain(|weak| {
            let Some(cache) = weak.upgrade() else {
                return false;
            };
            let size = cache.estimated_size();
            if size >= CACHE_SIZE_LIMIT {
                tracing::warn!(
                    "Cache '{}' at {} MiB, clearing",
                    cache.name(),
                    size / (1024 * 1024)
                );
                cache.clear();
                cleared += 1;
            }
            true
        });

        cleared
    }

    /// Current process resident size in bytes
    pub fn process_rss() -> u64 {
        let Ok(pid) = sysinfo::get_current_pid() else {
            return 0;
        };
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).map(|p| p.memory()).unwrap_or(0)
    }

    /// Terminate the process if RSS crossed the hard limit. Trading a
    /// restart for an OOM-killed neighbor is the better failure mode here.
    pub fn check_process_memory(&self) {
        let rss = Self::process_rss();
        if rss >= PROCESS_MEMORY_LIMIT {
            tracing::error!(
                "Process RSS {} MiB exceeds the {} MiB limit, terminating",
                rss / (1024 * 1024),
                PROCESS_MEMORY_LIMIT / (1024 * 1024)
            );
            std::process::exit(1);
        } else if rss >= PROCESS_MEMORY_LIMIT * 3 / 4 {
            tracing::warn!(
                "Process RSS {} MiB approaching the {} MiB limit",
                rss / (1024 * 1024),
                PROCESS_MEMORY_LIMIT / (1024 * 1024)
            );
        }
    }
}

impl Default for MemoryGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the guard loop; stops when `shutdown` flips to true.
pub fn spawn_guard(
    guard: std::sync::Arc<MemoryGuard>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!("Memory guard started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(CHECK_INTERVAL) => {
                    let cleared = guard.check_all_tracked();
                    if cleared > 0 {
                        tracing::info!("Memory guard cleared {} cache(s)", cleared);
                    }
                    guard.check_process_memory();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Memory guard stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeCache {
        size: AtomicUsize,
        cleared: AtomicBool,
    }

    impl FakeCache {
        fn new(size: usize) -> Arc<Self> {
            Arc::new(Self {
                size: AtomicUsize::new(size),
                cleared: AtomicBool::new(false),
            })
        }
    }

    impl TrackedCache for FakeCache {
        fn name(&self) -> &'static str {
            "fake"
        }
        fn estimated_size(&self) -> usize {
            self.size.load(Ordering::Relaxed)
        }
        fn clear(&self) {
            self.size.store(0, Ordering::Relaxed);
            self.cleared.store(true, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_oversized_cache_is_cleared() {
        let guard = MemoryGuard::new();
        let big = FakeCache::new(CACHE_SIZE_LIMIT + 1);
        let small = FakeCache::new(1024);
        let big_dyn: Arc<dyn TrackedCache> = big.clone();
        let small_dyn: Arc<dyn TrackedCache> = small.clone();
        let weak_big: Weak<dyn TrackedCache> = Arc::downgrade(&big_dyn);
        let weak_small: Weak<dyn TrackedCache> = Arc::downgrade(&small_dyn);
        drop(big_dyn);
        drop(small_dyn);
        guard.track(weak_big);
        guard.track(weak_small);

        assert_eq!(guard.check_all_tracked(), 1);
        assert!(big.cleared.load(Ordering::Relaxed));
        assert!(!small.cleared.load(Ordering::Relaxed));
    }

    #[test]
    fn test_dropped_caches_are_pruned() {
        let guard = MemoryGuard::new();
        let cache = FakeCache::new(10);
        let cache_dyn: Arc<dyn TrackedCache> = cache.clone();
        let weak: Weak<dyn TrackedCache> = Arc::downgrade(&cache_dyn);
        drop(cache_dyn);
        guard.track(weak);
        drop(cache);

        assert_eq!(guard.check_all_tracked(), 0);
        assert!(guard.tracked.lock().unwrap().is_empty());
    }

    #[test]
    fn test_process_rss_is_nonzero() {
        assert!(MemoryGuard::process_rss() > 0);
    }
}
