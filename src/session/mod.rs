//! Session bookkeeping: which triggers were seen, and how regular they were.

pub mod record;

pub use record::{IntervalStats, SessionRecord, Trigger};
