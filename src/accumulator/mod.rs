//! Running aggregates updated one record at a time.
//!
//! Three accumulators cover every series the pipeline produces:
//!
//! - [`ReviewCounts`]: reviews per bucket.
//! - [`EntityAccumulator`]: "first seen" bucket per entity plus the set of
//!   entities active in each bucket (new/active users or products).
//! - [`LaunchAccumulator`]: launch date per known product, seeded from
//!   metadata and lowered by reviews.
//!
//! Accumulator state is owned by exactly one scan and is never shared.

mod entity_intern;

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::record::{ProductRecord, ReviewRecord};
use crate::types::Bucket;

pub use entity_intern::{EntityId, EntityInterner};

/// Which identity field an entity accumulator is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Reviewer,
    Product,
}

impl EntityKind {
    pub fn id<'a>(&self, record: &'a ReviewRecord) -> Option<&'a str> {
        match self {
            EntityKind::Reviewer => record.user(),
            EntityKind::Product => record.product(),
        }
    }
}

/// How review records are folded into state, selected once per series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationPolicy {
    ReviewCount,
    NewActiveEntity(EntityKind),
}

impl AggregationPolicy {
    pub fn accumulator(&self) -> ReviewAccumulator {
        match self {
            AggregationPolicy::ReviewCount => ReviewAccumulator::ReviewCount(ReviewCounts::new()),
            AggregationPolicy::NewActiveEntity(kind) => {
                ReviewAccumulator::Entity(EntityAccumulator::new(*kind))
            }
        }
    }
}

/// State for one [`AggregationPolicy`].
#[derive(Debug)]
pub enum ReviewAccumulator {
    ReviewCount(ReviewCounts),
    Entity(EntityAccumulator),
}

impl ReviewAccumulator {
    pub fn record(&mut self, record: &ReviewRecord) {
        match self {
            ReviewAccumulator::ReviewCount(counts) => counts.record(record),
            ReviewAccumulator::Entity(entities) => entities.record(record),
        }
    }
}

/// Number of reviews per bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewCounts {
    counts: BTreeMap<Bucket, u64>,
}

impl ReviewCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// An unseen bucket starts at 0 and receives the same +1 as every other.
    pub fn record(&mut self, record: &ReviewRecord) {
        *self.counts.entry(record.bucket()).or_insert(0) += 1;
    }

    pub fn counts(&self) -> &BTreeMap<Bucket, u64> {
        &self.counts
    }
}

/// First-seen bucket per entity and active entities per bucket.
#[derive(Debug)]
pub struct EntityAccumulator {
    kind: EntityKind,
    interner: EntityInterner,
    first_seen: HashMap<EntityId, Bucket>,
    active: BTreeMap<Bucket, HashSet<EntityId>>,
}

impl EntityAccumulator {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            interner: EntityInterner::new(),
            first_seen: HashMap::new(),
            active: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Records without the identity field are ignored.
    pub fn record(&mut self, record: &ReviewRecord) {
        let Some(id) = self.kind.id(record) else {
            return;
        };
        self.record_entity(id, record.bucket());
    }

    /// Earliest bucket wins, whatever order the files are scanned in.
    pub fn record_entity(&mut self, id: &str, bucket: Bucket) {
        let key = self.interner.intern(id);
        self.first_seen
            .entry(key)
            .and_modify(|seen| {
                if bucket < *seen {
                    *seen = bucket;
                }
            })
            .or_insert(bucket);
        self.active.entry(bucket).or_default().insert(key);
    }

    #[cfg(test)]
    pub fn first_seen(&self, id: &str) -> Option<Bucket> {
        let key = self.interner.get(id)?;
        self.first_seen.get(&key).copied()
    }

    #[cfg(test)]
    pub fn is_active(&self, id: &str, bucket: &Bucket) -> bool {
        self.interner
            .get(id)
            .zip(self.active.get(bucket))
            .is_some_and(|(key, ids)| ids.contains(&key))
    }

    pub fn entity_count(&self) -> usize {
        self.first_seen.len()
    }

    /// One bucket per distinct entity: the bucket it was first seen in.
    pub fn first_seen_buckets(&self) -> impl Iterator<Item = Bucket> + '_ {
        self.first_seen.values().copied()
    }

    /// Size of each bucket's active set.
    pub fn active_counts(&self) -> impl Iterator<Item = (Bucket, u64)> + '_ {
        self.active
            .iter()
            .map(|(bucket, ids)| (*bucket, ids.len() as u64))
    }
}

/// Launch date of a product: its earliest review, or the sentinel when no
/// review has been seen yet.
///
/// Variant order matters: the derived `Ord` places every real timestamp
/// before `NotYetLaunched`, so "earliest wins" is a plain `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LaunchDate {
    Launched(DateTime<Utc>),
    NotYetLaunched,
}

impl LaunchDate {
    pub fn bucket(&self) -> Option<Bucket> {
        match self {
            LaunchDate::Launched(date) => Some(Bucket::from_datetime(date)),
            LaunchDate::NotYetLaunched => None,
        }
    }
}

/// Launch dates for the universe of products enumerated by metadata.
#[derive(Debug, Default)]
pub struct LaunchAccumulator {
    interner: EntityInterner,
    dates: HashMap<EntityId, LaunchDate>,
    active: BTreeMap<Bucket, HashSet<EntityId>>,
}

impl LaunchAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// First pass: register a product as known. Returns false when the
    /// record has no product id.
    pub fn seed(&mut self, product: &ProductRecord) -> bool {
        let Some(id) = product.product() else {
            return false;
        };
        let key = self.interner.intern(id);
        self.dates.entry(key).or_insert(LaunchDate::NotYetLaunched);
        true
    }

    /// Second pass: lower the launch date of a known product. Reviews of
    /// products absent from metadata are ignored.
    pub fn observe(&mut self, review: &ReviewRecord) {
        let Some(key) = review.product().and_then(|id| self.interner.get(id)) else {
            return;
        };
        let Some(current) = self.dates.get_mut(&key) else {
            return;
        };
        let observed = LaunchDate::Launched(review.timestamp);
        if observed < *current {
            *current = observed;
        }
        self.active.entry(review.bucket()).or_default().insert(key);
    }

    #[cfg(test)]
    pub fn launch_date(&self, id: &str) -> Option<LaunchDate> {
        let key = self.interner.get(id)?;
        self.dates.get(&key).copied()
    }

    pub fn known_products(&self) -> usize {
        self.dates.len()
    }

    pub fn unlaunched_products(&self) -> usize {
        self.dates
            .values()
            .filter(|date| matches!(date, LaunchDate::NotYetLaunched))
            .count()
    }

    /// Launch bucket of every product that has one.
    pub fn launch_buckets(&self) -> impl Iterator<Item = Bucket> + '_ {
        self.dates.values().filter_map(LaunchDate::bucket)
    }

    /// Number of known products reviewed in each bucket.
    pub fn active_counts(&self) -> impl Iterator<Item = (Bucket, u64)> + '_ {
        self.active
            .iter()
            .map(|(bucket, ids)| (*bucket, ids.len() as u64))
    }
}
