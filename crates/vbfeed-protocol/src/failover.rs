//! Failover logs: per-vbucket ownership history

use crate::VBucketId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One ownership epoch of a vbucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailoverEntry {
    /// Epoch identifier assigned when the vbucket changed owner
    pub vbuuid: u64,
    /// Sequence number at which the epoch started
    pub seqno: u64,
}

impl FailoverEntry {
    pub fn new(vbuuid: u64, seqno: u64) -> Self {
        Self { vbuuid, seqno }
    }
}

/// Ownership history of a vbucket, newest entry first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailoverLog {
    entries: Vec<FailoverEntry>,
}

impl FailoverLog {
    pub fn new(entries: Vec<FailoverEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[FailoverEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current epoch of the vbucket
    pub fn latest(&self) -> Option<&FailoverEntry> {
        self.entries.first()
    }
}

impl From<Vec<(u64, u64)>> for FailoverLog {
    fn from(pairs: Vec<(u64, u64)>) -> Self {
        Self::new(
            pairs
                .into_iter()
                .map(|(vbuuid, seqno)| FailoverEntry::new(vbuuid, seqno))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a FailoverLog {
    type Item = &'a FailoverEntry;
    type IntoIter = std::slice::Iter<'a, FailoverEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Failover logs keyed by vbucket
pub type FailoverLogMap = HashMap<VBucketId, FailoverLog>;
