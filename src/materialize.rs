//! Conversion of finished accumulators into calendar-indexed series.

use std::collections::BTreeMap;

use crate::accumulator::{EntityAccumulator, LaunchAccumulator, ReviewAccumulator, ReviewCounts};
use crate::types::{Bucket, MaterializedSeries, SeriesRow};

/// Count how many times each bucket occurs.
pub fn group_by_bucket(buckets: impl IntoIterator<Item = Bucket>) -> BTreeMap<Bucket, u64> {
    let mut counts = BTreeMap::new();
    for bucket in buckets {
        *counts.entry(bucket).or_insert(0) += 1;
    }
    counts
}

/// Outer-join `new` and `active` by bucket, fill every month between the
/// first and last bucket with zeros, and accumulate `total` from `new`.
pub fn build_series(
    new: &BTreeMap<Bucket, u64>,
    active: &BTreeMap<Bucket, u64>,
) -> MaterializedSeries {
    let first = new.keys().next().into_iter().chain(active.keys().next()).min();
    let last = new
        .keys()
        .next_back()
        .into_iter()
        .chain(active.keys().next_back())
        .max();

    let (Some(&first), Some(&last)) = (first, last) else {
        return MaterializedSeries::default();
    };

    let mut rows = Vec::with_capacity(last.months_since(&first) as usize + 1);
    let mut total = 0u64;
    let mut bucket = first;
    while bucket <= last {
        let new_count = new.get(&bucket).copied().unwrap_or(0);
        total += new_count;
        rows.push(SeriesRow {
            bucket,
            new: new_count,
            active: active.get(&bucket).copied().unwrap_or(0),
            total,
        });
        bucket = bucket.succ();
    }

    MaterializedSeries { rows }
}

/// Every review is both new and active in the month it was written.
pub fn materialize_review_counts(counts: &ReviewCounts) -> MaterializedSeries {
    build_series(counts.counts(), counts.counts())
}

pub fn materialize_entities(entities: &EntityAccumulator) -> MaterializedSeries {
    let new = group_by_bucket(entities.first_seen_buckets());
    let active: BTreeMap<_, _> = entities.active_counts().collect();
    build_series(&new, &active)
}

/// Products still carrying the "not yet launched" sentinel are left out.
pub fn materialize_launches(launches: &LaunchAccumulator) -> MaterializedSeries {
    let new = group_by_bucket(launches.launch_buckets());
    let active: BTreeMap<_, _> = launches.active_counts().collect();
    build_series(&new, &active)
}

pub fn materialize(accumulator: &ReviewAccumulator) -> MaterializedSeries {
    match accumulator {
        ReviewAccumulator::ReviewCount(counts) => materialize_review_counts(counts),
        ReviewAccumulator::Entity(entities) => materialize_entities(entities),
    }
}
