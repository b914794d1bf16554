//! Routing map provider.
//!
//! Owns the cache-fetch-validate cycle for collection routing maps:
//!
//! 1. A lookup consults the [`AsyncCache`]; concurrent callers for the
//!    same collection share one in-flight fetch.
//! 2. On a miss (or a refresh against a stale snapshot) the complete
//!    partition key range feed is drained page by page, superseded
//!    ranges are discarded, and a routing map is built from scratch or
//!    combined onto the previous one.
//! 3. Lookups are then served from the immutable map.
//!
//! A collection that has been deleted surfaces as `Ok(None)` from the
//! public operations, never as an error. A fetch whose ranges do not
//! cover the key space raises [`RoutingError::IncompleteRoutingMap`] and
//! clears the cache entry so the next call retries with fresh data.

use crate::async_cache::{AsyncCache, Cached};
use crate::feed::{CollectionResolver, FeedError, FeedProperties, PartitionKeyRangeFeed};
use routing::{CollectionRoutingMap, KeyRange, PartitionKeyRange, discard_gone_ranges};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("routing information for collection {0} is incomplete")]
    IncompleteRoutingMap(String),

    #[error(transparent)]
    Feed(#[from] FeedError),
}

impl RoutingError {
    fn is_collection_not_found(&self) -> bool {
        matches!(self, RoutingError::Feed(FeedError::CollectionNotFound(_)))
    }
}

/// A resolved routing map plus the cache generation it was produced
/// under. Callers hand the snapshot back when they have found it stale.
pub type RoutingSnapshot = Cached<Arc<CollectionRoutingMap>>;

pub struct PartitionKeyRangeCache {
    cache: AsyncCache<String, Arc<CollectionRoutingMap>, RoutingError>,
    resolver: Arc<dyn CollectionResolver>,
    feed: Arc<dyn PartitionKeyRangeFeed>,
}

impl PartitionKeyRangeCache {
    pub fn new(
        cache: AsyncCache<String, Arc<CollectionRoutingMap>, RoutingError>,
        resolver: Arc<dyn CollectionResolver>,
        feed: Arc<dyn PartitionKeyRangeFeed>,
    ) -> Self {
        PartitionKeyRangeCache {
            cache,
            resolver,
            feed,
        }
    }

    /// Resolves the current routing map for a collection.
    ///
    /// `previous` is the snapshot the caller already holds and has found
    /// stale; passing it starts (or joins) one deduplicated refresh whose
    /// result is combined onto the previous map. Returns `Ok(None)` when
    /// the collection no longer exists.
    pub async fn try_lookup(
        &self,
        collection_rid: &str,
        previous: Option<&RoutingSnapshot>,
        properties: &FeedProperties,
    ) -> Result<Option<RoutingSnapshot>, RoutingError> {
        let known_stale = previous.map(|snapshot| snapshot.generation);
        let previous_map = previous.map(|snapshot| snapshot.value.clone());
        let resolver = Arc::clone(&self.resolver);
        let feed = Arc::clone(&self.feed);
        let rid = collection_rid.to_string();
        let props = properties.clone();

        let result = self
            .cache
            .get(rid.clone(), known_stale, move || {
                fetch_routing_map(resolver, feed, rid, previous_map, props)
            })
            .await;

        match result {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(error) if error.is_collection_not_found() => {
                debug!(collection_rid, "collection gone while resolving routing map");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// Every range whose interval intersects `range`, ascending by min
    /// boundary. `force_refresh` performs one refresh pass over an
    /// already-cached map first, picking up newly split ranges. Returns
    /// `Ok(None)` when no map could be resolved.
    pub async fn try_get_overlapping_ranges(
        &self,
        collection_rid: &str,
        range: &KeyRange,
        force_refresh: bool,
        properties: &FeedProperties,
    ) -> Result<Option<Vec<Arc<PartitionKeyRange>>>, RoutingError> {
        let snapshot = self.resolve(collection_rid, force_refresh, properties).await?;
        Ok(snapshot.map(|snapshot| snapshot.value.overlapping_ranges(range)))
    }

    /// Point lookup of one partition key range by id, with the same
    /// resolve-then-refresh behavior as
    /// [`PartitionKeyRangeCache::try_get_overlapping_ranges`].
    pub async fn try_get_range_by_id(
        &self,
        collection_rid: &str,
        range_id: &str,
        force_refresh: bool,
        properties: &FeedProperties,
    ) -> Result<Option<Arc<PartitionKeyRange>>, RoutingError> {
        let snapshot = self.resolve(collection_rid, force_refresh, properties).await?;
        Ok(snapshot.and_then(|snapshot| snapshot.value.range_by_id(range_id)))
    }

    async fn resolve(
        &self,
        collection_rid: &str,
        force_refresh: bool,
        properties: &FeedProperties,
    ) -> Result<Option<RoutingSnapshot>, RoutingError> {
        let snapshot = self.try_lookup(collection_rid, None, properties).await?;
        match snapshot {
            Some(current) if force_refresh => {
                self.try_lookup(collection_rid, Some(&current), properties)
                    .await
            }
            other => Ok(other),
        }
    }
}

/// Fetches the complete range feed for one collection and assembles a
/// routing map, either from scratch or combined onto `previous`.
async fn fetch_routing_map(
    resolver: Arc<dyn CollectionResolver>,
    feed: Arc<dyn PartitionKeyRangeFeed>,
    collection_rid: String,
    previous: Option<Arc<CollectionRoutingMap>>,
    properties: FeedProperties,
) -> Result<Arc<CollectionRoutingMap>, RoutingError> {
    let collection = resolver
        .resolve_collection(&collection_rid, &properties)
        .await?;

    // Pages are drained one at a time so the assembled list keeps the
    // server's order; the completeness validation depends on it.
    let mut ranges: Vec<PartitionKeyRange> = Vec::new();
    let mut continuation: Option<String> = None;
    let mut pages = 0u32;
    loop {
        let page = feed
            .read_page(&collection, continuation.as_deref(), &properties)
            .await?;
        ranges.extend(page.ranges);
        pages += 1;
        match page.continuation {
            Some(token) => continuation = Some(token),
            None => break,
        }
    }
    debug!(
        %collection_rid,
        pages,
        ranges = ranges.len(),
        "drained partition key range feed"
    );

    let effective = discard_gone_ranges(ranges);
    let map = match previous {
        Some(previous) => previous.try_combine(effective),
        None => CollectionRoutingMap::try_create(effective, collection.rid.clone()),
    };

    match map {
        Some(map) => Ok(Arc::new(map)),
        None => {
            warn!(%collection_rid, "fetched ranges do not cover the key space");
            Err(RoutingError::IncompleteRoutingMap(collection_rid))
        }
    }
}
