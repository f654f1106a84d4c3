use super::{CacheError, Model};
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;

/// Time-boxed store for the last fetched model listing.
///
/// The list and its refresh instant live under one lock, so a reader sees
/// either the old pair or the new pair, never a mix.
#[derive(Debug)]
pub struct ModelCache {
    ttl: Duration,
    inner: RwLock<Snapshot>,
}

#[derive(Debug, Default)]
struct Snapshot {
    models: Vec<Model>,
    refreshed_at: Option<Instant>,
}

impl ModelCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(Snapshot::default()),
        }
    }

    /// True when the cache was never filled or its contents outlived the TTL.
    pub fn is_stale(&self) -> bool {
        let Ok(snapshot) = self.inner.read() else {
            return true;
        };
        match snapshot.refreshed_at {
            Some(at) => at.elapsed() > self.ttl,
            None => true,
        }
    }

    /// Replace the whole listing and restart the TTL window.
    pub fn stash(&self, models: Vec<Model>) -> Result<(), CacheError> {
        let mut snapshot = self.inner.write().map_err(|_| CacheError::Poisoned)?;
        *snapshot = Snapshot {
            models,
            refreshed_at: Some(Instant::now()),
        };
        Ok(())
    }

    /// Copy of the current listing. Empty if the lock is poisoned.
    pub fn retrieve(&self) -> Vec<Model> {
        self.inner
            .read()
            .map(|snapshot| snapshot.models.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn models(names: &[&str]) -> Vec<Model> {
        names.iter().map(|n| Model::named(*n)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_after_stash_then_stale_past_ttl() {
        let cache = ModelCache::new(Duration::from_secs(60));
        assert!(cache.is_stale(), "never populated");

        cache.stash(models(&["a"])).unwrap();
        assert!(!cache.is_stale());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!cache.is_stale());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.is_stale());

        cache.stash(models(&["b"])).unwrap();
        assert!(!cache.is_stale());
    }

    #[test]
    fn retrieve_returns_a_copy() {
        let cache = ModelCache::new(Duration::from_secs(60));
        cache.stash(models(&["llama3.2", "mistral"])).unwrap();

        let mut copy = cache.retrieve();
        copy[0].name = "mutated".into();
        copy.clear();

        assert_eq!(cache.retrieve(), models(&["llama3.2", "mistral"]));
    }

    #[test]
    fn concurrent_readers_never_see_partial_lists() {
        let cache = Arc::new(ModelCache::new(Duration::from_secs(60)));
        let small = models(&["a", "b"]);
        let large = models(&["c", "d", "e", "f", "g"]);
        cache.stash(small.clone()).unwrap();

        let writer = {
            let cache = Arc::clone(&cache);
            let (small, large) = (small.clone(), large.clone());
            std::thread::spawn(move || {
                for i in 0..500 {
                    let next = if i % 2 == 0 { large.clone() } else { small.clone() };
                    cache.stash(next).unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let (small, large) = (small.clone(), large.clone());
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let seen = cache.retrieve();
                        assert!(seen == small || seen == large, "torn read: {seen:?}");
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
