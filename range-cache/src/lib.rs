//! Partition key range routing cache.
//!
//! Maps a collection resource id to the authoritative, range-partitioned
//! topology of its physical partitions, serving overlap and point lookups
//! against an immutable [`routing::CollectionRoutingMap`] while
//! coordinating deduplicated refreshes from an injected range feed.

pub mod async_cache;
pub mod feed;
pub mod provider;

#[cfg(test)]
mod testutils;

pub use async_cache::{AsyncCache, Cached, Generation};
pub use feed::{
    CollectionInfo, CollectionResolver, FeedError, FeedPage, FeedProperties, PartitionKeyRangeFeed,
};
pub use provider::{PartitionKeyRangeCache, RoutingError, RoutingSnapshot};
