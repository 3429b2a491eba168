//! Failover log retrieval
//!
//! Requested vbuckets are grouped by the node that masters them and each node
//! answers one batched request over a pooled connection. Nodes are queried
//! concurrently; the first failure aborts the whole call.

use crate::error::{Error, Result};
use crate::node::NodeEndpoint;
use crate::pool::PoolGuard;
use crate::topology::TopologyProvider;
use futures::future::try_join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;
use vbfeed_protocol::{FailoverLogMap, VBucketId, VBucketServerMap};

/// Fetch the failover logs of `vbuckets` from the nodes that own them.
///
/// Does not need a running [`Feed`](crate::Feed). On success the returned map
/// has exactly one entry per distinct requested vbucket.
pub async fn fetch_failover_logs(
    topology: &dyn TopologyProvider,
    vbuckets: &[VBucketId],
) -> Result<FailoverLogMap> {
    let ownership = topology.current_ownership();
    let by_host = group_by_master(&ownership, vbuckets)?;
    if by_host.is_empty() {
        return Ok(FailoverLogMap::new());
    }

    let endpoints: HashMap<String, Arc<dyn NodeEndpoint>> = topology
        .endpoints()
        .into_iter()
        .map(|endpoint| (endpoint.host().to_string(), endpoint))
        .collect();

    let requests = by_host.into_iter().map(|(host, vbs)| {
        let endpoint = endpoints.get(&host).cloned();
        async move {
            let endpoint = endpoint.ok_or_else(|| Error::NoFreeConnection { host: host.clone() })?;
            fetch_from_node(endpoint.as_ref(), &host, &vbs).await
        }
    });

    let mut merged = FailoverLogMap::with_capacity(vbuckets.len());
    for logs in try_join_all(requests).await? {
        merged.extend(logs);
    }
    Ok(merged)
}

/// Group distinct vbuckets by master host, validating each against the map
fn group_by_master(
    ownership: &VBucketServerMap,
    vbuckets: &[VBucketId],
) -> Result<BTreeMap<String, Vec<VBucketId>>> {
    if ownership.len() < vbuckets.len() {
        return Err(Error::TopologyMismatch {
            requested: vbuckets.len(),
            map_size: ownership.len(),
        });
    }

    let mut by_host: BTreeMap<String, Vec<VBucketId>> = BTreeMap::new();
    for &vbucket in vbuckets {
        if !ownership.contains(vbucket) {
            return Err(Error::InvalidPartition {
                vbucket,
                map_size: ownership.len(),
            });
        }
        let host = ownership.master(vbucket).ok_or(Error::NoOwner { vbucket })?;
        let group = by_host.entry(host.to_string()).or_default();
        if !group.contains(&vbucket) {
            group.push(vbucket);
        }
    }
    Ok(by_host)
}

async fn fetch_from_node(
    endpoint: &dyn NodeEndpoint,
    host: &str,
    vbuckets: &[VBucketId],
) -> Result<FailoverLogMap> {
    let mut conn = PoolGuard::acquire(endpoint.pool())
        .await
        .map_err(|_| Error::NoFreeConnection {
            host: host.to_string(),
        })?;

    debug!(host = %host, vbuckets = ?vbuckets, "Fetching failover logs");
    let mut logs = conn.fetch_failover_logs(vbuckets).await.map_err(|e| match e {
        Error::Protocol { .. } => e,
        other => Error::protocol(host, other),
    })?;

    let mut requested = FailoverLogMap::with_capacity(vbuckets.len());
    for &vbucket in vbuckets {
        let log = logs.remove(&vbucket).ok_or_else(|| {
            Error::protocol(host, format!("missing failover log for vbucket {vbucket}"))
        })?;
        requested.insert(vbucket, log);
    }
    Ok(requested)
}
