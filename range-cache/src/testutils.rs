//! In-memory control plane fakes shared by the provider tests.

use crate::feed::{
    CollectionInfo, CollectionResolver, FeedError, FeedPage, FeedProperties, PartitionKeyRangeFeed,
};
use async_trait::async_trait;
use routing::PartitionKeyRange;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Fake resolver + range feed backed by programmable snapshots.
///
/// Each logical fetch (a `read_page` call with no continuation) first
/// applies the next queued snapshot, if any, so tests can script what
/// each refresh observes. Responses are paged `page_size` ranges at a
/// time with numeric continuation tokens.
pub struct TestControlPlane {
    inner: Mutex<Inner>,
    page_size: usize,
    page_delay: Duration,
    fetches: AtomicU32,
    pages: AtomicU32,
}

struct Inner {
    current: HashMap<String, Vec<PartitionKeyRange>>,
    pending: HashMap<String, VecDeque<Result<Vec<PartitionKeyRange>, FeedError>>>,
    seen_properties: Vec<FeedProperties>,
}

impl TestControlPlane {
    pub fn new(page_size: usize) -> Arc<Self> {
        Self::with_page_delay(page_size, Duration::ZERO)
    }

    pub fn with_page_delay(page_size: usize, page_delay: Duration) -> Arc<Self> {
        Arc::new(TestControlPlane {
            inner: Mutex::new(Inner {
                current: HashMap::new(),
                pending: HashMap::new(),
                seen_properties: Vec::new(),
            }),
            page_size,
            page_delay,
            fetches: AtomicU32::new(0),
            pages: AtomicU32::new(0),
        })
    }

    /// Sets the topology served immediately for a collection.
    pub fn set_ranges(&self, collection_rid: &str, ranges: Vec<PartitionKeyRange>) {
        self.lock()
            .current
            .insert(collection_rid.to_string(), ranges);
    }

    /// Queues the outcome of the next logical fetch for a collection.
    pub fn push_snapshot(
        &self,
        collection_rid: &str,
        snapshot: Result<Vec<PartitionKeyRange>, FeedError>,
    ) {
        self.lock()
            .pending
            .entry(collection_rid.to_string())
            .or_default()
            .push_back(snapshot);
    }

    /// Number of logical fetches started (first page requests).
    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Total pages served across all fetches.
    pub fn page_count(&self) -> u32 {
        self.pages.load(Ordering::SeqCst)
    }

    pub fn seen_properties(&self) -> Vec<FeedProperties> {
        self.lock().seen_properties.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    fn is_known(&self, collection_rid: &str) -> bool {
        let inner = self.lock();
        inner.current.contains_key(collection_rid)
            || inner
                .pending
                .get(collection_rid)
                .is_some_and(|queue| !queue.is_empty())
    }
}

#[async_trait]
impl CollectionResolver for TestControlPlane {
    async fn resolve_collection(
        &self,
        collection_rid: &str,
        properties: &FeedProperties,
    ) -> Result<CollectionInfo, FeedError> {
        self.lock().seen_properties.push(properties.clone());
        if !self.is_known(collection_rid) {
            return Err(FeedError::CollectionNotFound(collection_rid.to_string()));
        }
        Ok(CollectionInfo {
            rid: collection_rid.to_string(),
            ranges_link: format!("/colls/{collection_rid}/pkranges"),
        })
    }
}

#[async_trait]
impl PartitionKeyRangeFeed for TestControlPlane {
    async fn read_page(
        &self,
        collection: &CollectionInfo,
        continuation: Option<&str>,
        properties: &FeedProperties,
    ) -> Result<FeedPage, FeedError> {
        if !self.page_delay.is_zero() {
            tokio::time::sleep(self.page_delay).await;
        }

        let mut inner = self.lock();

        let offset = match continuation {
            Some(token) => token.parse::<usize>().unwrap(),
            None => {
                // A fresh fetch: apply the next scripted snapshot, if any.
                self.fetches.fetch_add(1, Ordering::SeqCst);
                inner.seen_properties.push(properties.clone());
                let next = inner
                    .pending
                    .get_mut(&collection.rid)
                    .and_then(VecDeque::pop_front);
                match next {
                    Some(Ok(ranges)) => {
                        inner.current.insert(collection.rid.clone(), ranges);
                    }
                    Some(Err(error)) => return Err(error),
                    None => {}
                }
                0
            }
        };

        let ranges = inner
            .current
            .get(&collection.rid)
            .cloned()
            .ok_or_else(|| FeedError::CollectionNotFound(collection.rid.clone()))?;

        self.pages.fetch_add(1, Ordering::SeqCst);
        let end = (offset + self.page_size).min(ranges.len());
        Ok(FeedPage {
            ranges: ranges[offset..end].to_vec(),
            continuation: (end < ranges.len()).then(|| end.to_string()),
        })
    }
}
