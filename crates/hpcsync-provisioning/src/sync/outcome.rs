//! Per-entity reconciliation outcomes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use hpcsync_connector::entity::EntityKind;

/// Result of one reconciliation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncOutcome {
    /// Did not exist downstream; created (or would be, in dry-run).
    New,
    /// Existed downstream; replaced.
    Updated,
    /// Already handled by an earlier step of the same run.
    Done,
    /// The downstream write failed.
    Error,
}

impl SyncOutcome {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::New => "NEW",
            SyncOutcome::Updated => "UPDATED",
            SyncOutcome::Done => "DONE",
            SyncOutcome::Error => "ERROR",
        }
    }

    /// Whether this outcome is a failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, SyncOutcome::Error)
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome counts for one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub new: usize,
    pub updated: usize,
    pub done: usize,
    pub error: usize,
}

impl OutcomeCounts {
    /// Count one outcome.
    pub fn add(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::New => self.new += 1,
            SyncOutcome::Updated => self.updated += 1,
            SyncOutcome::Done => self.done += 1,
            SyncOutcome::Error => self.error += 1,
        }
    }

    /// Total number of entities counted.
    #[must_use]
    pub fn total(&self) -> usize {
        self.new + self.updated + self.done + self.error
    }
}

/// Outcomes of a run, per kind and key.
///
/// Each key holds exactly one outcome, so the outcome buckets partition the
/// reconciled entities. An `ERROR` is never overwritten by a later success
/// for the same key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeReport {
    outcomes: BTreeMap<EntityKind, BTreeMap<String, SyncOutcome>>,
}

impl OutcomeReport {
    /// Create an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome for `(kind, key)`.
    pub fn record(&mut self, kind: EntityKind, key: impl Into<String>, outcome: SyncOutcome) {
        let slot = self
            .outcomes
            .entry(kind)
            .or_default()
            .entry(key.into())
            .or_insert(outcome);
        if !slot.is_error() {
            *slot = outcome;
        }
    }

    /// Outcome recorded for `(kind, key)`.
    pub fn get(&self, kind: EntityKind, key: &str) -> Option<SyncOutcome> {
        self.outcomes.get(&kind).and_then(|m| m.get(key)).copied()
    }

    /// Whether `(kind, key)` was already reconciled in this run.
    pub fn contains(&self, kind: EntityKind, key: &str) -> bool {
        self.get(kind, key).is_some()
    }

    /// Keys of `kind` with the given outcome, in key order.
    pub fn keys_with(&self, kind: EntityKind, outcome: SyncOutcome) -> Vec<&str> {
        self.outcomes
            .get(&kind)
            .map(|m| {
                m.iter()
                    .filter(|(_, o)| **o == outcome)
                    .map(|(k, _)| k.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Counts for one kind.
    pub fn counts(&self, kind: EntityKind) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        if let Some(m) = self.outcomes.get(&kind) {
            for outcome in m.values() {
                counts.add(*outcome);
            }
        }
        counts
    }

    /// Counts for every kind that has at least one outcome.
    pub fn all_counts(&self) -> BTreeMap<EntityKind, OutcomeCounts> {
        self.outcomes
            .keys()
            .map(|kind| (*kind, self.counts(*kind)))
            .collect()
    }

    /// `kind:key` labels of every failed entity.
    pub fn errors(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .flat_map(|(kind, m)| {
                m.iter()
                    .filter(|(_, o)| o.is_error())
                    .map(move |(key, _)| format!("{kind}:{key}"))
            })
            .collect()
    }

    /// Number of failed entities.
    pub fn error_count(&self) -> usize {
        self.outcomes
            .values()
            .flat_map(BTreeMap::values)
            .filter(|o| o.is_error())
            .count()
    }

    /// Whether any entity failed.
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Total number of recorded entities.
    pub fn total(&self) -> usize {
        self.outcomes.values().map(BTreeMap::len).sum()
    }

    /// Check if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: OutcomeReport) {
        for (kind, m) in other.outcomes {
            for (key, outcome) in m {
                self.record(kind, key, outcome);
            }
        }
    }
}
