//! Purge states, records and thresholds.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SyncError, SyncResult};

/// State of an identifier in the grace-period purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurgeState {
    /// Not tracked.
    Active,
    Warned1,
    Warned2,
    WarnedFinal,
    /// Access revoked; record deleted.
    Purged,
    /// Eligible again; record deleted.
    Reinstated,
}

impl PurgeState {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PurgeState::Active => "ACTIVE",
            PurgeState::Warned1 => "WARNED_1",
            PurgeState::Warned2 => "WARNED_2",
            PurgeState::WarnedFinal => "WARNED_FINAL",
            PurgeState::Purged => "PURGED",
            PurgeState::Reinstated => "REINSTATED",
        }
    }
}

impl fmt::Display for PurgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Warnings sent to one tracked identifier.
///
/// Stored on disk as a three-element array of optional timestamps; the
/// first element is always set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "[Option<DateTime<Utc>>; 3]",
    into = "[Option<DateTime<Utc>>; 3]"
)]
pub struct PurgeeRecord {
    pub first_warning: DateTime<Utc>,
    pub second_warning: Option<DateTime<Utc>>,
    pub final_warning: Option<DateTime<Utc>>,
}

impl PurgeeRecord {
    /// A record for an identifier first warned at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            first_warning: now,
            second_warning: None,
            final_warning: None,
        }
    }

    /// Warning tier this record is in.
    pub fn state(&self) -> PurgeState {
        if self.final_warning.is_some() {
            PurgeState::WarnedFinal
        } else if self.second_warning.is_some() {
            PurgeState::Warned2
        } else {
            PurgeState::Warned1
        }
    }

    /// Time since the first warning.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        now - self.first_warning
    }
}

impl TryFrom<[Option<DateTime<Utc>>; 3]> for PurgeeRecord {
    type Error = String;

    fn try_from(value: [Option<DateTime<Utc>>; 3]) -> Result<Self, Self::Error> {
        let [first, second, last] = value;
        let first_warning = first.ok_or_else(|| "purgee record without a first warning".to_string())?;
        Ok(Self {
            first_warning,
            second_warning: second,
            final_warning: last,
        })
    }
}

impl From<PurgeeRecord> for [Option<DateTime<Utc>>; 3] {
    fn from(record: PurgeeRecord) -> Self {
        [
            Some(record.first_warning),
            record.second_warning,
            record.final_warning,
        ]
    }
}

/// Offsets from the first warning, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeThresholds {
    /// Second notice once this much time has passed.
    pub second_notice_after_secs: i64,
    /// Final notice once this much time has passed.
    pub final_notice_after_secs: i64,
    /// Purge once this much time has passed.
    pub deadline_secs: i64,
}

impl PurgeThresholds {
    /// Create thresholds; they must be positive and strictly increasing.
    pub fn new(second: i64, last: i64, deadline: i64) -> SyncResult<Self> {
        let thresholds = Self {
            second_notice_after_secs: second,
            final_notice_after_secs: last,
            deadline_secs: deadline,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    /// Check ordering.
    pub fn validate(&self) -> SyncResult<()> {
        if self.second_notice_after_secs <= 0
            || self.second_notice_after_secs >= self.final_notice_after_secs
            || self.final_notice_after_secs >= self.deadline_secs
        {
            return Err(SyncError::configuration(format!(
                "purge thresholds must be positive and strictly increasing, got {}/{}/{}",
                self.second_notice_after_secs, self.final_notice_after_secs, self.deadline_secs
            )));
        }
        Ok(())
    }

    pub fn second_notice_after(&self) -> Duration {
        Duration::seconds(self.second_notice_after_secs)
    }

    pub fn final_notice_after(&self) -> Duration {
        Duration::seconds(self.final_notice_after_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::seconds(self.deadline_secs)
    }

    /// Instant at which a record first warned at `first_warning` expires.
    pub fn deadline_for(&self, first_warning: DateTime<Utc>) -> DateTime<Utc> {
        first_warning + self.deadline()
    }
}

impl Default for PurgeThresholds {
    /// Two weeks, three weeks and four weeks.
    fn default() -> Self {
        Self {
            second_notice_after_secs: 14 * 86_400,
            final_notice_after_secs: 21 * 86_400,
            deadline_secs: 28 * 86_400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_serializes_as_triple() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mut record = PurgeeRecord::new(t0);
        record.second_warning = Some(t0 + Duration::days(14));

        let json = serde_json::to_value(record).unwrap();
        let array = json.as_array().unwrap();
        assert_eq!(array.len(), 3);
        assert!(array[2].is_null());

        let back: PurgeeRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.state(), PurgeState::Warned2);
    }

    #[test]
    fn test_record_requires_first_warning() {
        let result: Result<PurgeeRecord, _> = serde_json::from_str("[null, null, null]");
        assert!(result.is_err());
    }

    #[test]
    fn test_thresholds_must_increase() {
        assert!(PurgeThresholds::new(10, 20, 30).is_ok());
        assert!(PurgeThresholds::new(10, 10, 30).is_err());
        assert!(PurgeThresholds::new(10, 40, 30).is_err());
        assert!(PurgeThresholds::new(0, 20, 30).is_err());
        assert!(PurgeThresholds::default().validate().is_ok());
    }
}
