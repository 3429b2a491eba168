//! Per-node transport seams
//!
//! A [`NodeEndpoint`] opens a named mutation stream to one node. The opened
//! [`NodeFeed`] splits into a control handle ([`NodeStream`]) used to open and
//! close vbucket streams, and the event sequence the node delivers. The event
//! sequence ends when the connection is lost; an `Err` item reports why.

use crate::error::Result;
use crate::pool::ConnectionPool;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use vbfeed_protocol::{FeedEvent, StreamRequest, VBucketId};

/// Events received from one node
pub type EventStream = BoxStream<'static, Result<FeedEvent>>;

/// A reachable cluster node
#[async_trait]
pub trait NodeEndpoint: Send + Sync {
    /// Host identifier, matching the entries of the server list
    fn host(&self) -> &str;

    /// Open a mutation stream connection named `name`
    async fn open_stream(&self, name: &str, sequence: u32) -> Result<NodeFeed>;

    /// Pool of short-lived request/response connections to this node
    fn pool(&self) -> Arc<dyn ConnectionPool>;
}

/// Control side of an open node stream connection
#[async_trait]
pub trait NodeStream: Send + Sync {
    async fn request_stream(&self, request: &StreamRequest) -> Result<()>;

    async fn close_stream(&self, vbucket: VBucketId, opaque_msb: u16) -> Result<()>;

    /// Close the connection. The event stream ends afterwards.
    async fn close(&self);
}

/// An opened node stream connection
pub struct NodeFeed {
    pub stream: Arc<dyn NodeStream>,
    pub events: EventStream,
}

impl NodeFeed {
    pub fn new(stream: Arc<dyn NodeStream>, events: EventStream) -> Self {
        Self { stream, events }
    }
}

impl std::fmt::Debug for NodeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeFeed").finish_non_exhaustive()
    }
}
