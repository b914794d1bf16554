//! Collaborator contracts for resolving collections and reading the
//! partition key range feed. Both are injected trait objects; this crate
//! carries no transport of its own.

use async_trait::async_trait;
use routing::PartitionKeyRange;
use std::collections::HashMap;

/// Caller-supplied key/value options, passed through to the fetch layer
/// unmodified.
pub type FeedProperties = HashMap<String, String>;

/// Resolved metadata for a physical collection, enough to address its
/// range feed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionInfo {
    pub rid: String,
    /// Feed address for the collection's partition key ranges, opaque to
    /// this crate.
    pub ranges_link: String,
}

/// One page of the server-ordered partition key range feed.
#[derive(Clone, Debug, Default)]
pub struct FeedPage {
    pub ranges: Vec<PartitionKeyRange>,
    /// Token for the next page; `None` means the feed is drained.
    pub continuation: Option<String>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("collection {0} not found")]
    CollectionNotFound(String),

    #[error("partition key range feed transport error: {0}")]
    Transport(String),
}

/// Resolves collection metadata for a collection resource id.
#[async_trait]
pub trait CollectionResolver: Send + Sync {
    async fn resolve_collection(
        &self,
        collection_rid: &str,
        properties: &FeedProperties,
    ) -> Result<CollectionInfo, FeedError>;
}

/// Reads the partition key range feed for a resolved collection, one
/// page at a time. Pages are server-ordered; the provider drains them
/// serially and concatenates in order.
#[async_trait]
pub trait PartitionKeyRangeFeed: Send + Sync {
    async fn read_page(
        &self,
        collection: &CollectionInfo,
        continuation: Option<&str>,
        properties: &FeedProperties,
    ) -> Result<FeedPage, FeedError>;
}
