//! Merging fetched rows into the canonical series.
//!
//! Existing rows come first, then fetched rows; the first occurrence of each
//! timestamp wins under the default policy. That means a provider correction
//! to a bar already on disk is discarded. `PreferFetched` is the opt-in for
//! callers who want corrections applied.

use crate::domain::TimeSeriesRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

/// Which row survives when existing and fetched data share a timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// First occurrence wins: the stored row is kept.
    #[default]
    KeepExisting,
    /// The fetched row replaces the stored one.
    PreferFetched,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Rows read from the store.
    pub existing: usize,
    /// Rows returned by the fetcher.
    pub fetched: usize,
    /// Rows in the merged series.
    pub total: usize,
    /// Timestamps that were not in the store before.
    pub added: usize,
    /// Input rows dropped as duplicates.
    pub duplicates_discarded: usize,
}

/// Combine `existing` and `fetched` into a strictly ascending, timestamp-unique
/// series.
///
/// Duplicates inside either input also resolve first-wins.
pub fn merge(
    existing: Vec<TimeSeriesRecord>,
    fetched: Vec<TimeSeriesRecord>,
    policy: MergePolicy,
) -> (Vec<TimeSeriesRecord>, MergeStats) {
    let existing_len = existing.len();
    let fetched_len = fetched.len();

    let mut by_ts: BTreeMap<DateTime<Utc>, TimeSeriesRecord> = BTreeMap::new();
    for rec in existing {
        by_ts.entry(rec.timestamp).or_insert(rec);
    }
    let existing_unique = by_ts.len();

    let mut seen_fetched: BTreeSet<DateTime<Utc>> = BTreeSet::new();
    for rec in fetched {
        if !seen_fetched.insert(rec.timestamp) {
            continue;
        }
        match (by_ts.entry(rec.timestamp), policy) {
            (Entry::Vacant(slot), _) => {
                slot.insert(rec);
            }
            (Entry::Occupied(mut slot), MergePolicy::PreferFetched) => {
                slot.insert(rec);
            }
            (Entry::Occupied(_), MergePolicy::KeepExisting) => {}
        }
    }

    let total = by_ts.len();
    let stats = MergeStats {
        existing: existing_len,
        fetched: fetched_len,
        total,
        added: total - existing_unique,
        duplicates_discarded: existing_len + fetched_len - total,
    };

    (by_ts.into_values().collect(), stats)
}
