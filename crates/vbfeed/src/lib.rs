//! Cluster-wide mutation feed over per-node vbucket streams
//!
//! A bucket's vbuckets are spread over the nodes of a cluster and each node
//! serves change streams for the vbuckets it masters. [`Feed`] hides that
//! layout: it connects to every node, routes per-vbucket stream requests to
//! the current owner, merges all node events into one queue and recovers from
//! node failures and ownership moves in the background.
//!
//! Transports plug in through the traits in [`topology`], [`node`] and
//! [`pool`].
//!
//! # Example
//!
//! ```rust,ignore
//! use vbfeed::{fetch_failover_logs, Feed, FeedConfig, StreamRequest};
//!
//! let logs = fetch_failover_logs(topology.as_ref(), &[0, 1, 2]).await?;
//!
//! let feed = Feed::start(topology, FeedConfig::builder().name("indexer").build()).await?;
//! for (vb, log) in &logs {
//!     let resume = log.latest().map(|e| e.vbuuid).unwrap_or_default();
//!     feed.request_stream(StreamRequest::new(*vb).resume_from(resume, 0)).await?;
//! }
//! ```

pub mod config;
pub mod error;
pub mod failover;
pub mod feed;
mod forwarder;
pub mod node;
pub mod pool;
mod supervisor;
pub mod topology;

pub use config::{FeedConfig, FeedConfigBuilder, DEFAULT_FEED_NAME};
pub use error::{Error, Result};
pub use failover::fetch_failover_logs;
pub use feed::{Feed, FeedEvents};
pub use node::{EventStream, NodeEndpoint, NodeFeed, NodeStream};
pub use pool::{ConnectionPool, PoolGuard, PooledConnection};
pub use topology::TopologyProvider;

pub use vbfeed_protocol::{
    FailoverEntry, FailoverLog, FailoverLogMap, FeedEvent, Opcode, Status, StreamRequest,
    VBucketId, VBucketServerMap, SEQNO_MAX,
};
