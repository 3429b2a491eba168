//! Stream request parameters

use crate::VBucketId;
use serde::{Deserialize, Serialize};

/// Highest sequence number; an end seqno of this value streams indefinitely
pub const SEQNO_MAX: u64 = u64::MAX;

/// Parameters of a per-vbucket stream request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub vbucket: VBucketId,
    /// Caller-chosen value echoed on every event of the stream
    pub opaque: u16,
    pub flags: u32,
    /// Ownership epoch the start seqno belongs to (0 when starting fresh)
    pub vbuuid: u64,
    pub start_seqno: u64,
    pub end_seqno: u64,
    pub snapshot_start: u64,
    pub snapshot_end: u64,
}

impl StreamRequest {
    /// Stream everything from the beginning of the vbucket
    pub fn new(vbucket: VBucketId) -> Self {
        Self {
            vbucket,
            opaque: 0,
            flags: 0,
            vbuuid: 0,
            start_seqno: 0,
            end_seqno: SEQNO_MAX,
            snapshot_start: 0,
            snapshot_end: 0,
        }
    }

    pub fn opaque(mut self, opaque: u16) -> Self {
        self.opaque = opaque;
        self
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Resume from `seqno` within epoch `vbuuid`
    pub fn resume_from(mut self, vbuuid: u64, seqno: u64) -> Self {
        self.vbuuid = vbuuid;
        self.start_seqno = seqno;
        self.snapshot_start = seqno;
        self.snapshot_end = seqno;
        self
    }

    pub fn end_seqno(mut self, seqno: u64) -> Self {
        self.end_seqno = seqno;
        self
    }

    pub fn snapshot(mut self, start: u64, end: u64) -> Self {
        self.snapshot_start = start;
        self.snapshot_end = end;
        self
    }
}
