//! Labelled captures of the SUT service table.
//!
//! Snapshots are opaque: they are compared byte-for-byte and never parsed.
//! The line diff logged on mismatch is only a reading aid.

use std::collections::{HashMap, HashSet};

use crate::error::{AssertionError, SutError};
use crate::sut::SutClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot(pub String);

impl Snapshot {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Default)]
pub struct SnapshotTable {
    snapshots: HashMap<String, Snapshot>,
}

impl SnapshotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the current service table under `label`, replacing any earlier
    /// capture with the same label.
    pub fn capture<S: SutClient>(&mut self, sut: &S, label: &str) -> Result<&Snapshot, SutError> {
        let text = sut.service_list()?;
        tracing::debug!(label, bytes = text.len(), "snapshot captured");
        self.insert(label, Snapshot(text));
        Ok(&self.snapshots[label])
    }

    pub fn insert(&mut self, label: &str, snapshot: Snapshot) {
        self.snapshots.insert(label.to_string(), snapshot);
    }

    pub fn get(&self, label: &str) -> Option<&Snapshot> {
        self.snapshots.get(label)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn assert_equal(&self, left: &str, right: &str) -> Result<(), AssertionError> {
        let a = self
            .get(left)
            .ok_or_else(|| AssertionError::MissingSnapshot(left.to_string()))?;
        let b = self
            .get(right)
            .ok_or_else(|| AssertionError::MissingSnapshot(right.to_string()))?;

        if a == b {
            return Ok(());
        }

        let diff = LineDiff::between(a.as_str(), b.as_str());
        for line in &diff.only_left {
            tracing::error!(snapshot = left, "- {line}");
        }
        for line in &diff.only_right {
            tracing::error!(snapshot = right, "+ {line}");
        }

        Err(AssertionError::SnapshotMismatch {
            left_label: left.to_string(),
            right_label: right.to_string(),
            left: a.0.clone(),
            right: b.0.clone(),
        })
    }
}

/// Lines present in one text but not the other. Order within each side is
/// preserved; duplicates are not counted.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LineDiff<'a> {
    pub only_left: Vec<&'a str>,
    pub only_right: Vec<&'a str>,
}

impl<'a> LineDiff<'a> {
    pub fn between(left: &'a str, right: &'a str) -> Self {
        let l: HashSet<&str> = left.lines().collect();
        let r: HashSet<&str> = right.lines().collect();
        Self {
            only_left: left.lines().filter(|line| !r.contains(line)).collect(),
            only_right: right.lines().filter(|line| !l.contains(line)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.only_left.is_empty() && self.only_right.is_empty()
    }
}
