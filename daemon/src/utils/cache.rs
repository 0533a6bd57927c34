use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Small time-indexed map. Entries older than `ttl` are treated as absent and evicted
/// lazily on access.
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (Instant, V), ahash::RandomState>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::default()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((stored, value)) if stored.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.lock().insert(key, (Instant::now(), value));
    }

    /// Fetches on miss. The lock is not held while `fetch` runs, so two concurrent
    /// misses may both fetch; the later insert wins.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = fetch().await?;
        self.insert(key, value.clone());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn entries_expire() {
        let cache = TtlCache::new(Duration::from_millis(30));
        cache.insert("paper", vec!["1.20.4".to_string()]);
        assert_eq!(cache.get(&"paper"), Some(vec!["1.20.4".to_string()]));

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get(&"paper"), None);
    }

    #[tokio::test]
    async fn fetch_runs_once_while_fresh() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let value = cache
                .get_or_try_insert_with("vanilla", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(42)
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let failed = cache
            .get_or_try_insert_with("paper", || async { Err::<i32, _>(anyhow::anyhow!("offline")) })
            .await;
        assert!(failed.is_err());
        assert_eq!(cache.get(&"paper"), None);
    }
}
