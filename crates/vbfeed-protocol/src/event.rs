//! Feed events and the opcode/status codes they carry

use crate::failover::FailoverLog;
use crate::VBucketId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Stream-level opcodes delivered on a mutation feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    /// Response to a stream request
    StreamRequest,
    /// Response to a failover log request
    FailoverLog,
    /// The server ended a vbucket stream
    StreamEnd,
    /// Snapshot boundary marker
    SnapshotMarker,
    /// Document created or updated
    Mutation,
    /// Document deleted
    Deletion,
    /// Document expired
    Expiration,
    /// Vbucket flushed
    Flush,
    /// Response to a close stream request
    CloseStream,
    /// Opcode this crate does not model
    Unknown(u8),
}

impl Opcode {
    /// Wire value of the opcode
    pub fn code(&self) -> u8 {
        match self {
            Opcode::StreamRequest => 0x53,
            Opcode::FailoverLog => 0x54,
            Opcode::StreamEnd => 0x55,
            Opcode::SnapshotMarker => 0x56,
            Opcode::Mutation => 0x57,
            Opcode::Deletion => 0x58,
            Opcode::Expiration => 0x59,
            Opcode::Flush => 0x5a,
            Opcode::CloseStream => 0x52,
            Opcode::Unknown(code) => *code,
        }
    }
}

impl From<u8> for Opcode {
    fn from(code: u8) -> Self {
        match code {
            0x52 => Opcode::CloseStream,
            0x53 => Opcode::StreamRequest,
            0x54 => Opcode::FailoverLog,
            0x55 => Opcode::StreamEnd,
            0x56 => Opcode::SnapshotMarker,
            0x57 => Opcode::Mutation,
            0x58 => Opcode::Deletion,
            0x59 => Opcode::Expiration,
            0x5a => Opcode::Flush,
            other => Opcode::Unknown(other),
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Opcode::Unknown(code) => write!(f, "UNKNOWN(0x{:02x})", code),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Response status carried by a feed event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[default]
    Success,
    KeyNotFound,
    KeyExists,
    InvalidArguments,
    /// The node no longer owns the vbucket the event concerns
    NotMyVBucket,
    /// Requested sequence range is invalid
    OutOfRange,
    /// The stream must roll back before it can resume
    Rollback,
    TemporaryFailure,
    Other(u16),
}

impl Status {
    /// Wire value of the status
    pub fn code(&self) -> u16 {
        match self {
            Status::Success => 0x00,
            Status::KeyNotFound => 0x01,
            Status::KeyExists => 0x02,
            Status::InvalidArguments => 0x04,
            Status::NotMyVBucket => 0x07,
            Status::OutOfRange => 0x22,
            Status::Rollback => 0x23,
            Status::TemporaryFailure => 0x86,
            Status::Other(code) => *code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }

    /// Ownership of the vbucket has moved to another node
    pub fn is_not_my_vbucket(&self) -> bool {
        matches!(self, Status::NotMyVBucket)
    }
}

impl From<u16> for Status {
    fn from(code: u16) -> Self {
        match code {
            0x00 => Status::Success,
            0x01 => Status::KeyNotFound,
            0x02 => Status::KeyExists,
            0x04 => Status::InvalidArguments,
            0x07 => Status::NotMyVBucket,
            0x22 => Status::OutOfRange,
            0x23 => Status::Rollback,
            0x86 => Status::TemporaryFailure,
            other => Status::Other(other),
        }
    }
}

/// A single event received on a vbucket stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub opcode: Opcode,
    #[serde(default)]
    pub status: Status,
    pub vbucket: VBucketId,
    /// Opaque value of the stream request this event belongs to
    #[serde(default)]
    pub opaque: u32,
    #[serde(default)]
    pub key: Bytes,
    #[serde(default)]
    pub value: Bytes,
    #[serde(default)]
    pub cas: u64,
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub expiry: u32,
    #[serde(default)]
    pub seqno: u64,
    #[serde(default)]
    pub rev_seqno: u64,
    #[serde(default)]
    pub snapshot_start: u64,
    #[serde(default)]
    pub snapshot_end: u64,
    #[serde(default)]
    pub snapshot_type: u32,
    /// Present on successful stream request responses
    #[serde(default)]
    pub failover_log: Option<FailoverLog>,
}

impl FeedEvent {
    /// Create an event with empty payload
    pub fn new(opcode: Opcode, vbucket: VBucketId) -> Self {
        Self {
            opcode,
            status: Status::Success,
            vbucket,
            opaque: 0,
            key: Bytes::new(),
            value: Bytes::new(),
            cas: 0,
            flags: 0,
            expiry: 0,
            seqno: 0,
            rev_seqno: 0,
            snapshot_start: 0,
            snapshot_end: 0,
            snapshot_type: 0,
            failover_log: None,
        }
    }

    /// Create a mutation event
    pub fn mutation(
        vbucket: VBucketId,
        seqno: u64,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Self {
        let mut event = Self::new(Opcode::Mutation, vbucket);
        event.seqno = seqno;
        event.key = key.into();
        event.value = value.into();
        event
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_opaque(mut self, opaque: u32) -> Self {
        self.opaque = opaque;
        self
    }

    pub fn with_snapshot(mut self, start: u64, end: u64, snapshot_type: u32) -> Self {
        self.snapshot_start = start;
        self.snapshot_end = end;
        self.snapshot_type = snapshot_type;
        self
    }

    /// Whether the node signalled that it no longer owns this vbucket
    pub fn is_not_my_vbucket(&self) -> bool {
        self.status.is_not_my_vbucket()
    }
}
