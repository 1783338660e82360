//! Time/schedule index over persisted auction records.
//!
//! Provides `ScheduleRecord`, the read-only `ScheduleIndex` views the planner
//! consults, an in-memory `MemoryIndex`, and the redb-backed `ScheduleDb`.

pub mod db;
pub mod index;
pub mod record;

pub use db::ScheduleDb;
pub use index::{MemoryIndex, ScheduleIndex};
pub use record::{time_key, ScheduleRecord};
