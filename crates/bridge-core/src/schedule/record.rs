use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A scheduled auction as stored by the persistence layer.
///
/// `id` is a tender id or a composite `{tender_id}_{lot_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub id: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// Start of the first auction stage; stands in for `end_date` until the
    /// auction has finished.
    #[serde(default)]
    pub first_stage_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stage_count: u32,
    #[serde(default)]
    pub current_stage: i64,
}

impl ScheduleRecord {
    pub fn new(id: impl Into<String>, start_time: Option<DateTime<Utc>>) -> Self {
        Self {
            id: id.into(),
            start_time,
            end_date: None,
            first_stage_start: None,
            stage_count: 0,
            current_stage: -1,
        }
    }

    /// The time the end-time index is keyed on: `end_date`, falling back to
    /// the first stage start.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_date.or(self.first_stage_start)
    }

    /// True when the auction sits on its second-to-last stage.
    pub fn is_pre_announce(&self) -> bool {
        i64::from(self.stage_count) - 2 == self.current_stage
    }
}

/// Index key for a timestamp: milliseconds since the Unix epoch.
///
/// Independent of the timezone the instant is expressed in. Pre-epoch
/// instants clamp to zero.
pub fn time_key<Tz: TimeZone>(ts: &DateTime<Tz>) -> u64 {
    ts.timestamp_millis().max(0) as u64
}
