//! Cluster topology source
//!
//! The feed never caches ownership: every routing decision reads
//! [`TopologyProvider::current_ownership`] at call time, so a refresh is
//! picked up by the next request.

use crate::error::Result;
use crate::node::NodeEndpoint;
use async_trait::async_trait;
use std::sync::Arc;
use vbfeed_protocol::VBucketServerMap;

/// Supplies vbucket ownership and node endpoints for one bucket
#[async_trait]
pub trait TopologyProvider: Send + Sync {
    /// Bucket the topology describes
    fn bucket(&self) -> &str;

    /// Latest ownership snapshot. Replaced wholesale by [`refresh`](Self::refresh).
    fn current_ownership(&self) -> Arc<VBucketServerMap>;

    /// Reload the topology from the cluster, returning once the new
    /// snapshot and endpoint list are visible.
    async fn refresh(&self) -> Result<()>;

    /// Endpoints of the nodes currently in the cluster
    fn endpoints(&self) -> Vec<Arc<dyn NodeEndpoint>>;
}
