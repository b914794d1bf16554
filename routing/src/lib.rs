//! Partition Topology Data Structures
//!
//! Provides the immutable routing map abstraction for one collection's
//! range-partitioned topology.
//!
//! # Topology Model
//!
//! A collection's key space is the interval of hex-encoded effective
//! partition keys from the global minimum (`""`) to the global maximum
//! (`"FF"`). Each physical partition owns one half-open slice of it:
//!
//! ```text
//! Collection "coll-1"
//!   ├─ range "0" → ["",   "7F")
//!   └─ range "1" → ["7F", "FF")
//! ```
//!
//! A valid snapshot tiles the whole key space contiguously, with no gaps
//! and no overlaps. Splits and merges replace ranges with successors that
//! carry the superseded ids in their `parents` list; a new map is derived
//! from the old one rather than mutated in place.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Lower bound of the effective partition key space, inclusive.
pub const MINIMUM_INCLUSIVE_EFFECTIVE_PARTITION_KEY: &str = "";

/// Upper bound of the effective partition key space, exclusive.
pub const MAXIMUM_EXCLUSIVE_EFFECTIVE_PARTITION_KEY: &str = "FF";

/// A half-open interval `[min_inclusive, max_exclusive)` of the effective
/// partition key space.
///
/// Boundaries are hex-encoded strings whose lexicographic order matches
/// key-space order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRange {
    pub min_inclusive: String,
    pub max_exclusive: String,
}

impl KeyRange {
    pub fn new<Min, Max>(min_inclusive: Min, max_exclusive: Max) -> Self
    where
        Min: Into<String>,
        Max: Into<String>,
    {
        KeyRange {
            min_inclusive: min_inclusive.into(),
            max_exclusive: max_exclusive.into(),
        }
    }

    /// The full key space.
    pub fn full() -> Self {
        KeyRange::new(
            MINIMUM_INCLUSIVE_EFFECTIVE_PARTITION_KEY,
            MAXIMUM_EXCLUSIVE_EFFECTIVE_PARTITION_KEY,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.min_inclusive >= self.max_exclusive
    }

    /// Half-open interval intersection test: two ranges overlap iff
    /// `a.min < b.max && a.max > b.min`. Empty ranges overlap nothing.
    pub fn overlaps(&self, other: &KeyRange) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.min_inclusive < other.max_exclusive && self.max_exclusive > other.min_inclusive
    }

    /// True if `point` falls inside this range (`min <= point < max`).
    pub fn contains(&self, point: &str) -> bool {
        self.min_inclusive.as_str() <= point && point < self.max_exclusive.as_str()
    }
}

/// One physical partition's responsibility range within a collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionKeyRange {
    /// Unique id within the collection's current topology.
    pub id: String,
    #[serde(rename = "minInclusive")]
    pub min_inclusive: String,
    #[serde(rename = "maxExclusive")]
    pub max_exclusive: String,
    /// Ids of the ranges this range superseded after a split or merge,
    /// in server order. Used to detect gone ranges when reconciling
    /// snapshots.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
}

impl PartitionKeyRange {
    pub fn new<I, Min, Max>(id: I, min_inclusive: Min, max_exclusive: Max) -> Self
    where
        I: Into<String>,
        Min: Into<String>,
        Max: Into<String>,
    {
        PartitionKeyRange {
            id: id.into(),
            min_inclusive: min_inclusive.into(),
            max_exclusive: max_exclusive.into(),
            parents: Vec::new(),
        }
    }

    pub fn with_parents<I, Min, Max>(
        id: I,
        min_inclusive: Min,
        max_exclusive: Max,
        parents: Vec<String>,
    ) -> Self
    where
        I: Into<String>,
        Min: Into<String>,
        Max: Into<String>,
    {
        PartitionKeyRange {
            parents,
            ..PartitionKeyRange::new(id, min_inclusive, max_exclusive)
        }
    }

    pub fn to_key_range(&self) -> KeyRange {
        KeyRange::new(self.min_inclusive.clone(), self.max_exclusive.clone())
    }
}

/// Removes ranges that have been superseded by a split or merge.
///
/// A range is gone when its id appears in the `parents` list of another
/// range in the same batch: the server may transiently list a parent next
/// to its successors, and building a map from both would double-cover the
/// parent's interval.
pub fn discard_gone_ranges(ranges: Vec<PartitionKeyRange>) -> Vec<PartitionKeyRange> {
    let gone: HashSet<String> = ranges
        .iter()
        .flat_map(|range| range.parents.iter().cloned())
        .collect();

    ranges
        .into_iter()
        .filter(|range| !gone.contains(&range.id))
        .collect()
}

/// An immutable, queryable snapshot of one collection's partition
/// topology.
///
/// Ranges are held in ascending `min_inclusive` order for O(log n)
/// overlap queries, with a side index by range id for O(1) point lookups.
/// Topology changes produce a new map via [`CollectionRoutingMap::try_combine`];
/// existing instances are never mutated and can be shared freely.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionRoutingMap {
    collection_rid: String,
    ordered_ranges: Vec<Arc<PartitionKeyRange>>,
    ranges_by_id: HashMap<String, Arc<PartitionKeyRange>>,
}

impl CollectionRoutingMap {
    /// Builds a map from a complete snapshot of a collection's ranges.
    ///
    /// Returns `None` when the ranges do not exactly tile the key space:
    /// a gap, an overlap, an empty range, or a missing endpoint all mean
    /// the snapshot is not yet consistent (e.g. observed mid-split) and
    /// the caller should retry with fresh data. Ranges sharing an id
    /// collapse to the last occurrence.
    pub fn try_create<R>(ranges: Vec<PartitionKeyRange>, collection_rid: R) -> Option<Self>
    where
        R: Into<String>,
    {
        let mut ranges_by_id = HashMap::with_capacity(ranges.len());
        for range in ranges {
            ranges_by_id.insert(range.id.clone(), Arc::new(range));
        }
        Self::try_build(ranges_by_id, collection_rid.into())
    }

    /// Derives a new map from this one plus freshly observed ranges.
    ///
    /// Ranges named as parents by the new ranges are dropped (split: one
    /// parent replaced by several children; merge: several parents
    /// replaced by one successor), and new ranges win id collisions.
    /// Returns `None` if the combined set no longer tiles the key space.
    /// Combining with an empty delta yields an equivalent map.
    pub fn try_combine(&self, new_ranges: Vec<PartitionKeyRange>) -> Option<Self> {
        let gone: HashSet<String> = new_ranges
            .iter()
            .flat_map(|range| range.parents.iter().cloned())
            .collect();

        let mut ranges_by_id: HashMap<String, Arc<PartitionKeyRange>> = self
            .ranges_by_id
            .iter()
            .filter(|(id, _)| !gone.contains(*id))
            .map(|(id, range)| (id.clone(), range.clone()))
            .collect();

        for range in new_ranges {
            if gone.contains(&range.id) {
                continue;
            }
            ranges_by_id.insert(range.id.clone(), Arc::new(range));
        }

        Self::try_build(ranges_by_id, self.collection_rid.clone())
    }

    fn try_build(
        ranges_by_id: HashMap<String, Arc<PartitionKeyRange>>,
        collection_rid: String,
    ) -> Option<Self> {
        let mut ordered_ranges: Vec<Arc<PartitionKeyRange>> =
            ranges_by_id.values().cloned().collect();
        ordered_ranges.sort_by(|a, b| a.min_inclusive.cmp(&b.min_inclusive));

        if !Self::is_complete(&ordered_ranges) {
            return None;
        }

        Some(CollectionRoutingMap {
            collection_rid,
            ordered_ranges,
            ranges_by_id,
        })
    }

    /// A sorted range list is complete when it starts at the global
    /// minimum, ends at the global maximum, and each range begins exactly
    /// where the previous one ends.
    fn is_complete(ordered_ranges: &[Arc<PartitionKeyRange>]) -> bool {
        let (first, last) = match (ordered_ranges.first(), ordered_ranges.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return false,
        };

        if first.min_inclusive != MINIMUM_INCLUSIVE_EFFECTIVE_PARTITION_KEY
            || last.max_exclusive != MAXIMUM_EXCLUSIVE_EFFECTIVE_PARTITION_KEY
        {
            return false;
        }

        for range in ordered_ranges {
            if range.min_inclusive >= range.max_exclusive {
                return false;
            }
        }

        ordered_ranges
            .windows(2)
            .all(|pair| pair[0].max_exclusive == pair[1].min_inclusive)
    }

    pub fn collection_rid(&self) -> &str {
        &self.collection_rid
    }

    /// All ranges in ascending `min_inclusive` order.
    pub fn ordered_ranges(&self) -> &[Arc<PartitionKeyRange>] {
        &self.ordered_ranges
    }

    /// Every stored range whose interval intersects `range`, ascending by
    /// `min_inclusive`. Exact at half-open boundaries: a stored range `R`
    /// overlaps iff `R.min < range.max && R.max > range.min`.
    pub fn overlapping_ranges(&self, range: &KeyRange) -> Vec<Arc<PartitionKeyRange>> {
        if range.is_empty() {
            return Vec::new();
        }

        // Maxes ascend along with mins in a gapless non-overlapping map,
        // so the first candidate can be found by binary search.
        let start = self
            .ordered_ranges
            .partition_point(|r| r.max_exclusive.as_str() <= range.min_inclusive.as_str());

        self.ordered_ranges[start..]
            .iter()
            .take_while(|r| r.min_inclusive.as_str() < range.max_exclusive.as_str())
            .cloned()
            .collect()
    }

    /// Point lookup by range id.
    pub fn range_by_id(&self, id: &str) -> Option<Arc<PartitionKeyRange>> {
        self.ranges_by_id.get(id).cloned()
    }

    /// The single range owning `effective_partition_key`, if the key lies
    /// inside the key space.
    pub fn range_by_effective_partition_key(
        &self,
        effective_partition_key: &str,
    ) -> Option<Arc<PartitionKeyRange>> {
        let index = self
            .ordered_ranges
            .partition_point(|r| r.max_exclusive.as_str() <= effective_partition_key);
        self.ordered_ranges
            .get(index)
            .filter(|r| r.min_inclusive.as_str() <= effective_partition_key)
            .cloned()
    }
}
