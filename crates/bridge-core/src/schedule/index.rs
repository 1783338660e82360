use chrono::{DateTime, Utc};

use crate::error::Result;

use super::record::{time_key, ScheduleRecord};

/// Read views over scheduled auctions consulted by the planner.
///
/// All methods take `&self`; implementations must allow concurrent readers
/// without caller-side locking.
pub trait ScheduleIndex {
    /// Records whose scheduled start equals `start` (millisecond precision).
    fn planned_at(&self, start: DateTime<Utc>) -> Result<Vec<ScheduleRecord>>;

    /// Records whose end time is at or after `bound`.
    fn ending_from(&self, bound: DateTime<Utc>) -> Result<Vec<ScheduleRecord>>;

    /// Records on their second-to-last stage.
    fn pre_announce(&self) -> Result<Vec<ScheduleRecord>>;
}

impl<T: ScheduleIndex + ?Sized> ScheduleIndex for &T {
    fn planned_at(&self, start: DateTime<Utc>) -> Result<Vec<ScheduleRecord>> {
        (**self).planned_at(start)
    }

    fn ending_from(&self, bound: DateTime<Utc>) -> Result<Vec<ScheduleRecord>> {
        (**self).ending_from(bound)
    }

    fn pre_announce(&self) -> Result<Vec<ScheduleRecord>> {
        (**self).pre_announce()
    }
}

// ---------------------------------------------------------------------------
// MemoryIndex
// ---------------------------------------------------------------------------

/// A `ScheduleIndex` over a fixed set of records held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    records: Vec<ScheduleRecord>,
}

impl MemoryIndex {
    pub fn new(records: Vec<ScheduleRecord>) -> Self {
        Self { records }
    }

    pub fn insert(&mut self, record: ScheduleRecord) {
        self.records.retain(|r| r.id != record.id);
        self.records.push(record);
    }

    pub fn records(&self) -> &[ScheduleRecord] {
        &self.records
    }
}

impl ScheduleIndex for MemoryIndex {
    fn planned_at(&self, start: DateTime<Utc>) -> Result<Vec<ScheduleRecord>> {
        let key = time_key(&start);
        Ok(self
            .records
            .iter()
            .filter(|r| r.start_time.as_ref().map(time_key) == Some(key))
            .cloned()
            .collect())
    }

    fn ending_from(&self, bound: DateTime<Utc>) -> Result<Vec<ScheduleRecord>> {
        let key = time_key(&bound);
        Ok(self
            .records
            .iter()
            .filter(|r| r.end_time().is_some_and(|end| time_key(&end) >= key))
            .cloned()
            .collect())
    }

    fn pre_announce(&self) -> Result<Vec<ScheduleRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.is_pre_announce())
            .cloned()
            .collect())
    }
}
