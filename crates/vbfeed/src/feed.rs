//! Cluster-wide mutation feed
//!
//! A [`Feed`] keeps one stream connection per node of a bucket and merges the
//! events of all of them into a single queue:
//!
//! ```text
//!            ┌──────────┐  forwarder  ┌─────────────┐
//!  node A ──►│ NodeFeed │────────────►│             │
//!            └──────────┘             │   output    │──► FeedEvents
//!            ┌──────────┐  forwarder  │   queue     │
//!  node B ──►│ NodeFeed │────────────►│             │
//!            └──────────┘             └─────────────┘
//!                  ▲ kill switch
//!                  └──────────── supervisor (refresh + reconnect with backoff)
//! ```
//!
//! Events of one node keep their arrival order. There is no ordering across
//! nodes.
//!
//! Vbucket streams are not resumed after a reconnect: once the feed has
//! recovered the caller re-issues [`Feed::request_stream`] for the vbuckets it
//! still wants, typically after seeing a `StreamEnd` or `NotMyVBucket` event.

use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::failover;
use crate::forwarder::{self, NodeHandle};
use crate::node::{NodeFeed, NodeStream};
use crate::supervisor::Supervisor;
use crate::topology::TopologyProvider;
use futures::future::BoxFuture;
use futures::Stream;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use vbfeed_protocol::{FailoverLogMap, FeedEvent, StreamRequest, VBucketId};

// ============================================================================
// Node connection state
// ============================================================================

/// Connection to one node, as tracked by the feed
struct NodeState {
    stream: Arc<dyn NodeStream>,
    connected: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
}

impl NodeState {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Stop the forwarder without escalating, and hand back the stream to close
    fn retire(self) -> Arc<dyn NodeStream> {
        self.connected.store(false, Ordering::SeqCst);
        self.stop_tx.send_replace(true);
        self.stream
    }
}

/// Resolves once the flag behind `rx` is raised or its sender is gone
pub(crate) async fn stopped(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

// ============================================================================
// Shared feed state
// ============================================================================

pub(crate) struct FeedInner {
    pub(crate) topology: Arc<dyn TopologyProvider>,
    pub(crate) config: FeedConfig,
    /// host → node connection. Never locked across an await.
    nodes: RwLock<HashMap<String, NodeState>>,
    /// Serializes connect passes between the supervisor and forwarders
    connect_gate: tokio::sync::Mutex<()>,
    /// Write side of the event queue; `None` once the feed is closed
    output: tokio::sync::Mutex<Option<mpsc::Sender<FeedEvent>>>,
    shutdown_tx: watch::Sender<bool>,
    kill_tx: mpsc::Sender<String>,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl FeedInner {
    /// Build the shared state with nothing connected. Returns the read side
    /// of the output queue and the kill switch receiver.
    pub(crate) fn new(
        topology: Arc<dyn TopologyProvider>,
        config: FeedConfig,
    ) -> (Arc<Self>, mpsc::Receiver<FeedEvent>, mpsc::Receiver<String>) {
        let (output_tx, output_rx) = mpsc::channel(config.output_capacity);
        let (shutdown_tx, _) = watch::channel(false);
        let (kill_tx, kill_rx) = mpsc::channel(1);

        let inner = Arc::new(FeedInner {
            topology,
            config,
            nodes: RwLock::new(HashMap::new()),
            connect_gate: tokio::sync::Mutex::new(()),
            output: tokio::sync::Mutex::new(Some(output_tx)),
            shutdown_tx,
            kill_tx,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        (inner, output_rx, kill_rx)
    }

    pub(crate) fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Tell every task of this feed to stop
    pub(crate) fn raise_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Escalate a node failure to the supervisor.
    ///
    /// Never blocks: if a failure is already pending the supervisor's next
    /// recovery pass covers this node too.
    pub(crate) fn trigger_kill_switch(&self, host: &str) {
        match self.kill_tx.try_send(host.to_string()) {
            Ok(()) => debug!(host = %host, "Kill switch triggered"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(host = %host, "Kill switch already triggered")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(host = %host, "Supervisor gone, ignoring node failure")
            }
        }
    }

    /// Publish one event to the output queue.
    ///
    /// The output lock is held for this single send only. Returns `false` when
    /// the feed is shutting down and the event was dropped.
    pub(crate) async fn publish(
        &self,
        event: FeedEvent,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let output = self.output.lock().await;
        let Some(tx) = output.as_ref() else {
            return false;
        };
        tokio::select! {
            biased;
            _ = stopped(shutdown) => false,
            sent = tx.send(event) => sent.is_ok(),
        }
    }

    fn is_node_connected(&self, host: &str) -> bool {
        self.nodes
            .read()
            .get(host)
            .is_some_and(NodeState::is_connected)
    }

    fn connected_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .nodes
            .read()
            .iter()
            .filter(|(_, node)| node.is_connected())
            .map(|(host, _)| host.clone())
            .collect();
        hosts.sort();
        hosts
    }

    /// Resolve the connection of the node currently mastering `vbucket`
    fn route(&self, vbucket: VBucketId) -> Result<Arc<dyn NodeStream>> {
        let ownership = self.topology.current_ownership();
        if !ownership.contains(vbucket) {
            return Err(Error::InvalidPartition {
                vbucket,
                map_size: ownership.len(),
            });
        }
        let host = ownership.master(vbucket).ok_or(Error::NoOwner { vbucket })?;

        match self.nodes.read().get(host) {
            Some(node) if node.is_connected() => Ok(Arc::clone(&node.stream)),
            _ => Err(Error::NodeNotConnected {
                vbucket,
                host: host.to_string(),
            }),
        }
    }

    /// Connect to every node the topology knows about that is not already
    /// connected.
    ///
    /// The pass is all-or-nothing: if any node cannot be opened, every node
    /// connection (including those of earlier passes) is torn down and the
    /// feed reports disconnected.
    pub(crate) fn connect_to_nodes(self: &Arc<Self>) -> BoxFuture<'static, Result<()>> {
        let inner = Arc::clone(self);
        Box::pin(async move {
            let _gate = inner.connect_gate.lock().await;
            if inner.is_shutdown() {
                return Err(Error::ConnectionClosed);
            }

            for endpoint in inner.topology.endpoints() {
                let host = endpoint.host().to_string();
                if inner.is_node_connected(&host) {
                    debug!(host = %host, "Node already connected, skipping");
                    continue;
                }

                let name = inner.config.connection_name();
                match endpoint.open_stream(name, inner.config.sequence).await {
                    Ok(node_feed) => {
                        debug!(host = %host, name = %name, "Opened node feed");
                        inner.install_node(host, node_feed).await;
                    }
                    Err(e) => {
                        warn!(host = %host, error = %e, "Error connecting to node feed");
                        inner.close_node_feeds().await;
                        return Err(Error::connect_failure(host, e));
                    }
                }
            }

            inner.connected.store(!inner.is_shutdown(), Ordering::SeqCst);
            Ok(())
        })
    }

    /// Record a freshly opened node feed and start its forwarder
    async fn install_node(self: &Arc<Self>, host: String, node_feed: NodeFeed) {
        let NodeFeed { stream, events } = node_feed;
        let connected = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = watch::channel(false);

        let installed = {
            let mut nodes = self.nodes.write();
            if self.is_shutdown() {
                Err(stream)
            } else {
                Ok(nodes.insert(
                    host.clone(),
                    NodeState {
                        stream,
                        connected: Arc::clone(&connected),
                        stop_tx,
                    },
                ))
            }
        };

        let stale = match installed {
            Ok(stale) => stale,
            Err(stream) => {
                debug!(host = %host, "Feed closed while connecting, dropping node feed");
                stream.close().await;
                return;
            }
        };

        if let Some(stale) = stale {
            debug!(host = %host, "Replacing disconnected node feed");
            stale.retire().close().await;
        }

        let handle = NodeHandle::new(host, connected, stop_rx);
        tokio::spawn(forwarder::run(Arc::clone(self), handle, events));
    }

    /// Tear down every node connection and forget them
    pub(crate) async fn close_node_feeds(&self) {
        let drained: Vec<(String, NodeState)> = self.nodes.write().drain().collect();
        self.connected.store(false, Ordering::SeqCst);

        for (host, node) in drained {
            debug!(host = %host, "Closing node feed");
            node.retire().close().await;
        }
    }
}

// ============================================================================
// Feed
// ============================================================================

/// A mutation feed over every node of a bucket.
///
/// No events are delivered until vbucket streams are requested with
/// [`request_stream`](Self::request_stream).
///
/// # Example
///
/// ```rust,ignore
/// use vbfeed::{Feed, FeedConfig, StreamRequest};
///
/// let feed = Feed::start(topology, FeedConfig::builder().name("indexer").build()).await?;
/// let mut events = feed.events().expect("events taken once");
///
/// for vb in 0..1024 {
///     feed.request_stream(StreamRequest::new(vb)).await?;
/// }
///
/// while let Some(event) = events.recv().await {
///     println!("vb {} seqno {}", event.vbucket, event.seqno);
/// }
/// ```
pub struct Feed {
    inner: Arc<FeedInner>,
    events: Mutex<Option<FeedEvents>>,
}

impl Feed {
    /// Connect to every node of the bucket and start the feed.
    ///
    /// Fails with [`Error::ConnectFailure`] if any node cannot be connected;
    /// in that case no background task is left running.
    pub async fn start(topology: Arc<dyn TopologyProvider>, config: FeedConfig) -> Result<Self> {
        config.validate()?;
        let (inner, output_rx, kill_rx) = FeedInner::new(topology, config);

        if let Err(e) = inner.connect_to_nodes().await {
            warn!(
                bucket = %inner.topology.bucket(),
                error = %e,
                "Cannot start feed"
            );
            inner.raise_shutdown();
            return Err(e);
        }

        tokio::spawn(Supervisor::new(Arc::clone(&inner), kill_rx).run());

        info!(
            bucket = %inner.topology.bucket(),
            name = %inner.config.connection_name(),
            nodes = inner.connected_hosts().len(),
            "Feed started"
        );

        Ok(Self {
            inner,
            events: Mutex::new(Some(FeedEvents { rx: output_rx })),
        })
    }

    /// Name announced to the nodes
    pub fn name(&self) -> &str {
        self.inner.config.connection_name()
    }

    pub fn sequence(&self) -> u32 {
        self.inner.config.sequence
    }

    /// Whether the last connect pass succeeded and the feed is still open
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst) && !self.is_closed()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Hosts with a live node connection, sorted
    pub fn connected_nodes(&self) -> Vec<String> {
        self.inner.connected_hosts()
    }

    /// Take the read side of the feed. Returns `None` after the first call.
    pub fn events(&self) -> Option<FeedEvents> {
        self.events.lock().take()
    }

    /// Open a stream for one vbucket on the node that currently owns it
    pub async fn request_stream(&self, request: StreamRequest) -> Result<()> {
        let stream = self.inner.route(request.vbucket)?;
        debug!(
            vbucket = request.vbucket,
            opaque = request.opaque,
            start_seqno = request.start_seqno,
            "Requesting vbucket stream"
        );
        stream.request_stream(&request).await
    }

    /// Close the stream of one vbucket
    pub async fn close_stream(&self, vbucket: VBucketId, opaque_msb: u16) -> Result<()> {
        let stream = self.inner.route(vbucket)?;
        debug!(vbucket, opaque_msb, "Closing vbucket stream");
        stream.close_stream(vbucket, opaque_msb).await
    }

    /// Fetch failover logs for `vbuckets` from their owning nodes
    pub async fn get_failover_logs(&self, vbuckets: &[VBucketId]) -> Result<FailoverLogMap> {
        failover::fetch_failover_logs(self.inner.topology.as_ref(), vbuckets).await
    }

    /// Close the feed.
    ///
    /// Stops the supervisor and every forwarder, closes all node connections
    /// and then closes the event queue. Events already queued can still be
    /// read. Calling `close` again is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.raise_shutdown();
        self.inner.close_node_feeds().await;

        // Forwarders blocked on a full queue give up once shutdown is raised,
        // so the lock is free here and nothing can send after the take.
        self.inner.output.lock().await.take();

        info!(bucket = %self.inner.topology.bucket(), name = %self.name(), "Feed closed");
        Ok(())
    }
}

impl Drop for Feed {
    fn drop(&mut self) {
        self.inner.raise_shutdown();
    }
}

impl std::fmt::Debug for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed")
            .field("name", &self.name())
            .field("sequence", &self.sequence())
            .field("connected", &self.is_connected())
            .field("nodes", &self.connected_nodes())
            .finish()
    }
}

// ============================================================================
// Event stream
// ============================================================================

/// Read side of a feed's event queue.
///
/// Ends (yields `None`) once the feed is closed and every queued event has
/// been read.
#[derive(Debug)]
pub struct FeedEvents {
    rx: mpsc::Receiver<FeedEvent>,
}

impl FeedEvents {
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.rx.recv().await
    }

    /// Next queued event, without waiting
    pub fn try_recv(&mut self) -> Option<FeedEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for FeedEvents {
    type Item = FeedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
