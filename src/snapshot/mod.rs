//! Counter Snapshot Module
//!
//! The heart of RowPulse - turning two observations into a delta.
//! This module provides:
//! - Snapshots (one run's counters for one database)
//! - Snapshot collections (one run across every database), persisted between runs
//! - The delta engine (current minus previous)

pub mod diff;
pub mod store;

pub use diff::{Delta, DeltaEngine};
pub use store::SnapshotStore;

use crate::db::queries::CounterKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counters observed for one database at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Table -> auto-increment watermark
    #[serde(rename = "increment", default)]
    pub increment_counts: BTreeMap<String, i64>,
    /// Table -> approximate row count
    #[serde(rename = "row", default)]
    pub row_counts: BTreeMap<String, i64>,
}

impl Snapshot {
    pub fn new(increment_counts: BTreeMap<String, i64>, row_counts: BTreeMap<String, i64>) -> Self {
        Self {
            increment_counts,
            row_counts,
        }
    }

    pub fn counts(&self, kind: CounterKind) -> &BTreeMap<String, i64> {
        match kind {
            CounterKind::Increment => &self.increment_counts,
            CounterKind::Row => &self.row_counts,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.increment_counts.is_empty() && self.row_counts.is_empty()
    }
}

/// Database identifier -> Snapshot, for one full run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotCollection(BTreeMap<String, Snapshot>);

impl SnapshotCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the snapshot for `identifier`, returning any snapshot it replaced
    pub fn insert(&mut self, identifier: impl Into<String>, snapshot: Snapshot) -> Option<Snapshot> {
        self.0.insert(identifier.into(), snapshot)
    }

    pub fn get(&self, identifier: &str) -> Option<&Snapshot> {
        self.0.get(identifier)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Snapshot)> {
        self.0.iter()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Snapshot)> for SnapshotCollection {
    fn from_iter<I: IntoIterator<Item = (String, Snapshot)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
