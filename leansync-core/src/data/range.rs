//! Range tracking: does the local store already cover a requested range?

use super::store::CanonicalStore;
use crate::domain::DateRange;
use crate::error::PersistenceError;
use chrono::NaiveDateTime;

/// Days added to each end of a range before fetching.
pub const DEFAULT_BUFFER_DAYS: i64 = 3;

/// First and last timestamps held in a store, timezone stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoveredSpan {
    pub first: NaiveDateTime,
    pub last: NaiveDateTime,
}

impl CoveredSpan {
    /// Covered iff `first <= start@00:00` and `end@00:00 <= last`.
    pub fn contains(&self, range: &DateRange) -> bool {
        self.first <= range.start_midnight() && range.end_midnight() <= self.last
    }
}

/// What the store holds relative to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// No store file, or a store with no rows.
    NoLocalData,
    /// The requested range lies within the stored span.
    Covered(CoveredSpan),
    /// The store exists but does not cover the requested range.
    Gap(CoveredSpan),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    Skip,
    FetchRange(DateRange),
}

/// Coverage found plus the decision taken on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPlan {
    pub coverage: Coverage,
    pub decision: SyncDecision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeTracker {
    buffer_days: i64,
}

impl Default for RangeTracker {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_DAYS)
    }
}

impl RangeTracker {
    /// Negative buffers are treated as zero.
    pub fn new(buffer_days: i64) -> Self {
        Self {
            buffer_days: buffer_days.max(0),
        }
    }

    pub fn buffer_days(&self) -> i64 {
        self.buffer_days
    }

    /// Inspect the ticker's store and decide whether to fetch.
    pub fn plan(
        &self,
        store: &CanonicalStore,
        ticker: &str,
        requested: DateRange,
    ) -> Result<SyncPlan, PersistenceError> {
        let index = store.read_index(ticker)?;
        Ok(self.plan_from_index(index.as_deref(), requested))
    }

    /// Decide from an already-read timestamp index. `None` means no store.
    pub fn plan_from_index(&self, index: Option<&[NaiveDateTime]>, requested: DateRange) -> SyncPlan {
        let span = index.and_then(|ts| {
            let first = ts.iter().min()?;
            let last = ts.iter().max()?;
            Some(CoveredSpan {
                first: *first,
                last: *last,
            })
        });

        let coverage = match span {
            None => Coverage::NoLocalData,
            Some(span) if span.contains(&requested) => Coverage::Covered(span),
            Some(span) => Coverage::Gap(span),
        };

        let decision = match coverage {
            Coverage::Covered(_) => SyncDecision::Skip,
            Coverage::NoLocalData | Coverage::Gap(_) => {
                SyncDecision::FetchRange(requested.buffered(self.buffer_days))
            }
        };

        SyncPlan { coverage, decision }
    }
}
