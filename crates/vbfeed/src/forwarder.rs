//! Per-node event forwarding
//!
//! One forwarder task runs per connected node. It drains the node's event
//! stream into the feed's output queue and reacts to two conditions:
//!
//! - a `NotMyVBucket` event: ownership moved, so the topology is refreshed
//!   and missing nodes are connected;
//! - the event stream ending without a shutdown: the node failed, and the
//!   supervisor is told through the kill switch.
//!
//! A feed shutdown or a per-node stop (teardown, replacement) ends the task
//! quietly.

use crate::error::Result;
use crate::feed::{stopped, FeedInner};
use crate::node::EventStream;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use vbfeed_protocol::VBucketId;

/// What a forwarder knows about its own node
pub(crate) struct NodeHandle {
    host: String,
    connected: Arc<AtomicBool>,
    stop_rx: watch::Receiver<bool>,
}

impl NodeHandle {
    pub(crate) fn new(
        host: String,
        connected: Arc<AtomicBool>,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            host,
            connected,
            stop_rx,
        }
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }
}

/// Why a forwarder stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopReason {
    /// Feed shutdown or node teardown
    Shutdown,
    /// The node's event stream ended or failed
    NodeFailed,
    /// Refresh or reconnect after an ownership move failed
    HandoffFailed,
}

pub(crate) async fn run(inner: Arc<FeedInner>, mut node: NodeHandle, events: EventStream) {
    let reason = forward(&inner, &mut node, events).await;
    node.mark_disconnected();

    match reason {
        StopReason::Shutdown => {
            debug!(host = %node.host, "Node forwarder stopped");
        }
        StopReason::NodeFailed | StopReason::HandoffFailed => {
            inner.trigger_kill_switch(&node.host);
        }
    }
}

async fn forward(
    inner: &Arc<FeedInner>,
    node: &mut NodeHandle,
    mut events: EventStream,
) -> StopReason {
    let mut shutdown = inner.shutdown_rx();

    loop {
        let next = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => return StopReason::Shutdown,
            _ = stopped(&mut node.stop_rx) => return StopReason::Shutdown,
            next = events.next() => next,
        };

        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                if inner.is_shutdown() || node.is_stopped() {
                    return StopReason::Shutdown;
                }
                warn!(host = %node.host, error = %e, "Node feed failed");
                return StopReason::NodeFailed;
            }
            None => {
                if inner.is_shutdown() || node.is_stopped() {
                    return StopReason::Shutdown;
                }
                warn!(host = %node.host, "Node feed closed unexpectedly");
                return StopReason::NodeFailed;
            }
        };

        let moved = event.is_not_my_vbucket();
        let vbucket = event.vbucket;

        if !inner.publish(event, &mut shutdown).await {
            return StopReason::Shutdown;
        }

        if moved {
            if let Err(e) = handle_ownership_moved(inner, &node.host, vbucket).await {
                if inner.is_shutdown() {
                    return StopReason::Shutdown;
                }
                warn!(
                    host = %node.host,
                    vbucket,
                    error = %e,
                    "Unable to follow vbucket ownership change"
                );
                return StopReason::HandoffFailed;
            }
        }
    }
}

/// Refresh the topology and connect any node that now owns vbuckets.
///
/// Streams of the moved vbucket are not re-requested here.
async fn handle_ownership_moved(
    inner: &Arc<FeedInner>,
    host: &str,
    vbucket: VBucketId,
) -> Result<()> {
    info!(host = %host, vbucket, "Got a not-my-vbucket status, refreshing topology");

    if let Err(e) = inner.topology.refresh().await {
        inner.close_node_feeds().await;
        return Err(e);
    }
    inner.connect_to_nodes().await?;

    let ownership = inner.topology.current_ownership();
    debug!(
        vbucket,
        owner = ?ownership.master(vbucket),
        "Topology refreshed after ownership change"
    );
    Ok(())
}
