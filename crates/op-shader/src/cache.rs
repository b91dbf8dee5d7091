//! Compiled shader cache keyed by program and swizzle hashes

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use op_core::ShaderError;

/// Identity of a compiled shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderKey {
    pub program_hash: u64,
    pub swizzle_hash: u64,
}

impl ShaderKey {
    pub fn new(program_hash: u64, swizzle_hash: u64) -> Self {
        Self {
            program_hash,
            swizzle_hash,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub failures: u64,
}

type Slot<V> = Arc<OnceCell<Result<Arc<V>, ShaderError>>>;

/// Map from [`ShaderKey`] to compiled shaders.
///
/// Each key is compiled at most once, even when several threads ask for it
/// concurrently; the other callers block until the first compile finishes and
/// then share its result. Failed compiles are cached too so a broken program
/// is not retried on every draw.
pub struct ShaderCache<V> {
    entries: Mutex<HashMap<ShaderKey, Slot<V>>>,
    stats: Mutex<CacheStats>,
}

impl<V> Default for ShaderCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ShaderCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Get the shader for `key`, compiling it with `compile` on first use
    pub fn get_or_compile<F>(&self, key: ShaderKey, compile: F) -> Result<Arc<V>, ShaderError>
    where
        F: FnOnce() -> Result<V, ShaderError>,
    {
        let slot = {
            let mut entries = self.entries.lock();
            Arc::clone(entries.entry(key).or_default())
        };

        let mut compiled_here = false;
        let result = slot.get_or_init(|| {
            compiled_here = true;
            compile().map(Arc::new)
        });

        let mut stats = self.stats.lock();
        if compiled_here {
            stats.misses += 1;
            if result.is_err() {
                stats.failures += 1;
            }
        } else {
            stats.hits += 1;
        }
        result.clone()
    }

    /// Look up an already compiled shader without compiling
    pub fn get(&self, key: &ShaderKey) -> Option<Arc<V>> {
        let slot = self.entries.lock().get(key).cloned()?;
        slot.get().and_then(|result| result.as_ref().ok().cloned())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock()
    }

    /// Drop every cached shader
    pub fn clear(&self) {
        let removed = {
            let mut entries = self.entries.lock();
            let count = entries.len();
            entries.clear();
            count
        };
        tracing::debug!("Cleared {} cached shaders", removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_compile_once() {
        let cache: ShaderCache<u32> = ShaderCache::new();
        let key = ShaderKey::new(1, 2);
        let a = cache.get_or_compile(key, || Ok(7)).unwrap();
        let b = cache.get_or_compile(key, || panic!("compiled twice")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1, failures: 0 });
    }

    #[test]
    fn test_distinct_keys() {
        let cache: ShaderCache<u32> = ShaderCache::new();
        cache.get_or_compile(ShaderKey::new(1, 2), || Ok(1)).unwrap();
        cache.get_or_compile(ShaderKey::new(1, 3), || Ok(2)).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&ShaderKey::new(1, 3)).as_deref(), Some(&2));
        assert!(cache.get(&ShaderKey::new(9, 9)).is_none());
    }

    #[test]
    fn test_failure_is_cached() {
        let cache: ShaderCache<u32> = ShaderCache::new();
        let key = ShaderKey::new(5, 5);
        let err = cache
            .get_or_compile(key, || Err(ShaderError::CallStackOverflow))
            .unwrap_err();
        assert_eq!(err, ShaderError::CallStackOverflow);
        let again = cache.get_or_compile(key, || Ok(1));
        assert!(again.is_err());
        assert_eq!(cache.stats().failures, 1);
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_clear() {
        let cache: ShaderCache<u32> = ShaderCache::new();
        cache.get_or_compile(ShaderKey::new(1, 1), || Ok(1)).unwrap();
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_compile_once() {
        let cache: Arc<ShaderCache<usize>> = Arc::new(ShaderCache::new());
        let compiles = Arc::new(AtomicUsize::new(0));
        let key = ShaderKey::new(42, 0);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let compiles = Arc::clone(&compiles);
                std::thread::spawn(move || {
                    let value = cache
                        .get_or_compile(key, || {
                            compiles.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(10));
                            Ok(99)
                        })
                        .unwrap();
                    *value
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 99);
        }
        assert_eq!(compiles.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 7);
    }
}
