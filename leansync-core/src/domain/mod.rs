//! Domain types for leansync

pub mod date_range;
pub mod frequency;
pub mod record;

pub use date_range::DateRange;
pub use frequency::{DateStyle, Frequency};
pub use record::TimeSeriesRecord;
