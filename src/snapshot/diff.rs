//! Delta Engine
//!
//! Compares the current run's snapshot with the previous run's for the same
//! database. Pure: no I/O, inputs are never modified.

use crate::db::queries::CounterKind;
use crate::snapshot::{Snapshot, SnapshotCollection};
use std::collections::BTreeMap;

/// Per-table change between two snapshots of the same database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub increment_counts: BTreeMap<String, i64>,
    pub row_counts: BTreeMap<String, i64>,
}

impl Delta {
    /// Every `(kind, table, change)` in this delta, increment counters first
    pub fn entries(&self) -> impl Iterator<Item = (CounterKind, &str, i64)> {
        let increment = self
            .increment_counts
            .iter()
            .map(|(table, value)| (CounterKind::Increment, table.as_str(), *value));
        let row = self
            .row_counts
            .iter()
            .map(|(table, value)| (CounterKind::Row, table.as_str(), *value));
        increment.chain(row)
    }
}

/// The delta engine that compares counter snapshots
pub struct DeltaEngine;

impl DeltaEngine {
    /// Compute `current - previous` for every table in `current`
    ///
    /// A table seen for the first time gets a delta of 0. Negative deltas
    /// (truncation, counter reset) are kept as they are.
    pub fn diff(current: &Snapshot, previous: &Snapshot) -> Delta {
        Delta {
            increment_counts: Self::diff_counts(&current.increment_counts, &previous.increment_counts),
            row_counts: Self::diff_counts(&current.row_counts, &previous.row_counts),
        }
    }

    /// Diff every database present in both collections
    ///
    /// Databases with no previous snapshot are skipped rather than diffed
    /// against an empty baseline; databases only in `previous` yield nothing.
    pub fn diff_collections(
        current: &SnapshotCollection,
        previous: &SnapshotCollection,
    ) -> BTreeMap<String, Delta> {
        current
            .iter()
            .filter_map(|(identifier, snapshot)| {
                previous
                    .get(identifier)
                    .map(|last| (identifier.clone(), Self::diff(snapshot, last)))
            })
            .collect()
    }

    fn diff_counts(
        current: &BTreeMap<String, i64>,
        previous: &BTreeMap<String, i64>,
    ) -> BTreeMap<String, i64> {
        current
            .iter()
            .map(|(table, count)| {
                let change = match previous.get(table) {
                    Some(last) => count.saturating_sub(*last),
                    None => 0,
                };
                (table.clone(), change)
            })
            .collect()
    }
}
