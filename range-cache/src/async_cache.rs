//! Single-flight async memoization keyed by collection id.
//!
//! At most one producer runs per key at any time. Callers that arrive
//! while a computation is in flight await the same shared future instead
//! of issuing duplicate work, and a failed producer clears its entry so
//! the next call retries rather than replaying a poisoned result.
//!
//! Cached values carry a [`Generation`] token. A caller that has observed
//! its value to be stale passes that token back; the refresh it triggers
//! is only deduplicated against other refreshes of the *same* generation.
//! A caller holding an older token than the current entry simply joins
//! the newer value without starting another fetch.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Version token identifying one cached computation for a key.
pub type Generation = u64;

/// A cached value together with the generation it was produced under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cached<V> {
    pub value: V,
    pub generation: Generation,
}

#[derive(Clone)]
struct Entry<V, E> {
    generation: Generation,
    task: Shared<BoxFuture<'static, Result<V, E>>>,
}

pub struct AsyncCache<K, V, E> {
    entries: Mutex<HashMap<K, Entry<V, E>>>,
    generations: AtomicU64,
}

impl<K, V, E> Default for AsyncCache<K, V, E> {
    fn default() -> Self {
        AsyncCache {
            entries: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }
}

impl<K, V, E> AsyncCache<K, V, E>
where
    K: Clone + Eq + Hash,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `key`, producing it if necessary.
    ///
    /// `known_stale` is the generation of the value the caller already
    /// holds and has found stale. When it names the current entry, a new
    /// producer is started and the entry replaced; concurrent callers
    /// marking the same generation stale share that single refresh. When
    /// it is `None` or names an older generation, the current entry is
    /// returned as-is.
    ///
    /// The producer runs at most once per inserted entry. Its failure is
    /// handed to every waiter and the entry is removed so a later call
    /// retries.
    pub async fn get<F, Fut>(
        &self,
        key: K,
        known_stale: Option<Generation>,
        produce: F,
    ) -> Result<Cached<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let entry = {
            let mut entries = self.lock();
            let reusable = entries
                .get(&key)
                .filter(|entry| known_stale != Some(entry.generation))
                .cloned();
            match reusable {
                Some(entry) => entry,
                None => {
                    let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                    let entry = Entry {
                        generation,
                        task: produce().boxed().shared(),
                    };
                    entries.insert(key.clone(), entry.clone());
                    entry
                }
            }
        };

        match entry.task.clone().await {
            Ok(value) => Ok(Cached {
                value,
                generation: entry.generation,
            }),
            Err(error) => {
                // Clear the failed entry so the next call retries, unless
                // a newer computation has already replaced it.
                let mut entries = self.lock();
                if entries
                    .get(&key)
                    .is_some_and(|current| current.generation == entry.generation)
                {
                    entries.remove(&key);
                }
                Err(error)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Entry<V, E>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
