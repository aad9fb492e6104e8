//! Change windows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SyncError, SyncResult};

/// The half-open interval `[last, now)` of modification instants a run
/// reconciles.
///
/// An entity modified exactly at `now` belongs to the next window, whose
/// `last` is this window's `now`, so no entity is processed twice by two
/// consecutive successful runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeWindow {
    last: DateTime<Utc>,
    now: DateTime<Utc>,
}

impl ChangeWindow {
    /// Create a window; `last` must not be after `now`.
    pub fn new(last: DateTime<Utc>, now: DateTime<Utc>) -> SyncResult<Self> {
        if last > now {
            return Err(SyncError::InvalidWindow { last, now });
        }
        Ok(Self { last, now })
    }

    /// Inclusive start.
    pub fn last(&self) -> DateTime<Utc> {
        self.last
    }

    /// Exclusive end.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Whether an instant falls inside the window.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.last <= instant && instant < self.now
    }

    /// The window following this one, ending at `now`.
    pub fn next(&self, now: DateTime<Utc>) -> SyncResult<Self> {
        Self::new(self.now, now)
    }
}

impl fmt::Display for ChangeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.last.to_rfc3339(), self.now.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn test_rejects_inverted_window() {
        assert!(ChangeWindow::new(t(2), t(1)).is_err());
        assert!(ChangeWindow::new(t(1), t(1)).is_ok());
    }

    #[test]
    fn test_half_open() {
        let window = ChangeWindow::new(t(1), t(2)).unwrap();
        assert!(window.contains(t(1)));
        assert!(window.contains(t(2) - Duration::seconds(1)));
        assert!(!window.contains(t(2)));
        assert!(!window.contains(t(1) - Duration::seconds(1)));
    }

    #[test]
    fn test_boundary_entity_lands_in_next_window() {
        let first = ChangeWindow::new(t(1), t(2)).unwrap();
        let second = first.next(t(3)).unwrap();
        assert!(!first.contains(t(2)));
        assert!(second.contains(t(2)));
    }

    #[test]
    fn test_empty_window_contains_nothing() {
        let window = ChangeWindow::new(t(1), t(1)).unwrap();
        assert!(!window.contains(t(1)));
    }
}
