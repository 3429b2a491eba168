//! In-memory mock cluster for feed integration tests
//!
//! Every mock implements one of the feed's collaborator traits and records
//! the calls it receives. Node event streams are fed by hand through
//! [`MockEndpoint::push`]; [`MockEndpoint::drop_connection`] ends the current
//! stream the way a lost connection would.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use vbfeed::{
    ConnectionPool, Error, FailoverLog, FailoverLogMap, FeedConfig, FeedEvent, FeedEvents,
    NodeEndpoint, NodeFeed, NodeStream, PooledConnection, Result, StreamRequest,
    TopologyProvider, VBucketId, VBucketServerMap,
};

static INIT: Once = Once::new();

/// Initialize test logging (idempotent)
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("vbfeed=debug".parse().unwrap()),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Default wait for background activity
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Feed configuration with short retry intervals
pub fn fast_config() -> FeedConfig {
    FeedConfig::builder()
        .name("test-feed")
        .sequence(7)
        .initial_retry_interval(Duration::from_millis(10))
        .max_retry_interval(Duration::from_millis(40))
        .build()
}

/// Ownership map with one master per vbucket and no replicas
pub fn ownership(servers: &[&str], masters: &[i32]) -> VBucketServerMap {
    VBucketServerMap::new(
        servers.iter().map(|s| s.to_string()).collect(),
        masters.iter().map(|&m| vec![m]).collect(),
    )
}

/// vbuuid the mock pool reports for `vbucket`
pub fn mock_vbuuid(vbucket: VBucketId) -> u64 {
    0xABCD_0000 + u64::from(vbucket)
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Next event from the feed, failing the test if none arrives in time
pub async fn next_event(events: &mut FeedEvents) -> FeedEvent {
    tokio::time::timeout(WAIT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for feed event")
        .expect("feed event queue closed")
}

// ============================================================================
// Cluster
// ============================================================================

/// A bucket served by a set of mock nodes
pub struct MockCluster {
    pub topology: Arc<MockTopology>,
    nodes: Mutex<HashMap<String, Arc<MockEndpoint>>>,
}

impl MockCluster {
    pub fn new(hosts: &[&str], map: VBucketServerMap) -> Self {
        let endpoints: Vec<Arc<MockEndpoint>> =
            hosts.iter().map(|h| Arc::new(MockEndpoint::new(h))).collect();
        let nodes = endpoints
            .iter()
            .map(|e| (e.host.clone(), Arc::clone(e)))
            .collect();

        Self {
            topology: Arc::new(MockTopology::new("default", map, endpoints)),
            nodes: Mutex::new(nodes),
        }
    }

    pub fn provider(&self) -> Arc<dyn TopologyProvider> {
        Arc::clone(&self.topology) as Arc<dyn TopologyProvider>
    }

    pub fn node(&self, host: &str) -> Arc<MockEndpoint> {
        let nodes = self.nodes.lock();
        Arc::clone(nodes.get(host).expect("unknown mock host"))
    }

    /// Stage the topology the next refresh will publish. Hosts not seen
    /// before get a fresh endpoint.
    pub fn stage_topology(&self, hosts: &[&str], map: VBucketServerMap) {
        let endpoints = {
            let mut nodes = self.nodes.lock();
            hosts
                .iter()
                .map(|h| {
                    Arc::clone(
                        nodes
                            .entry(h.to_string())
                            .or_insert_with(|| Arc::new(MockEndpoint::new(h))),
                    )
                })
                .collect()
        };
        self.topology.stage(map, endpoints);
    }
}

// ============================================================================
// Topology
// ============================================================================

pub struct MockTopology {
    bucket: String,
    ownership: RwLock<Arc<VBucketServerMap>>,
    endpoints: RwLock<Vec<Arc<MockEndpoint>>>,
    staged: Mutex<Option<(VBucketServerMap, Vec<Arc<MockEndpoint>>)>>,
    fail_refresh: AtomicBool,
    refreshes: AtomicUsize,
}

impl MockTopology {
    fn new(bucket: &str, map: VBucketServerMap, endpoints: Vec<Arc<MockEndpoint>>) -> Self {
        Self {
            bucket: bucket.to_string(),
            ownership: RwLock::new(Arc::new(map)),
            endpoints: RwLock::new(endpoints),
            staged: Mutex::new(None),
            fail_refresh: AtomicBool::new(false),
            refreshes: AtomicUsize::new(0),
        }
    }

    pub fn stage(&self, map: VBucketServerMap, endpoints: Vec<Arc<MockEndpoint>>) {
        *self.staged.lock() = Some((map, endpoints));
    }

    pub fn set_fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TopologyProvider for MockTopology {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn current_ownership(&self) -> Arc<VBucketServerMap> {
        Arc::clone(&self.ownership.read())
    }

    async fn refresh(&self) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(Error::Refresh("cluster manager unreachable".into()));
        }
        if let Some((map, endpoints)) = self.staged.lock().take() {
            *self.ownership.write() = Arc::new(map);
            *self.endpoints.write() = endpoints;
        }
        Ok(())
    }

    fn endpoints(&self) -> Vec<Arc<dyn NodeEndpoint>> {
        self.endpoints
            .read()
            .iter()
            .map(|e| Arc::clone(e) as Arc<dyn NodeEndpoint>)
            .collect()
    }
}

// ============================================================================
// Node endpoint and stream
// ============================================================================

pub struct MockEndpoint {
    host: String,
    pool: Arc<MockPool>,
    open_attempts: AtomicUsize,
    fail_open: AtomicBool,
    opened_as: Mutex<Vec<(String, u32)>>,
    streams: Mutex<Vec<Arc<MockNodeStream>>>,
}

impl MockEndpoint {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            pool: Arc::new(MockPool::new(host)),
            open_attempts: AtomicUsize::new(0),
            fail_open: AtomicBool::new(false),
            opened_as: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
        }
    }

    /// Successful opens
    pub fn opens(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    /// Names and sequences the node was opened with
    pub fn opened_as(&self) -> Vec<(String, u32)> {
        self.opened_as.lock().clone()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn mock_pool(&self) -> Arc<MockPool> {
        Arc::clone(&self.pool)
    }

    /// Stream of the most recent open
    pub fn current(&self) -> Arc<MockNodeStream> {
        let streams = self.streams.lock();
        Arc::clone(streams.last().expect("node never opened"))
    }

    pub fn push(&self, event: FeedEvent) {
        self.current().send(Ok(event));
    }

    pub fn push_error(&self) {
        self.current().send(Err(Error::protocol(&self.host, "socket reset")));
    }

    /// End the current event stream without closing it from the feed side
    pub fn drop_connection(&self) {
        self.current().tx.close_channel();
    }
}

#[async_trait]
impl NodeEndpoint for MockEndpoint {
    fn host(&self) -> &str {
        &self.host
    }

    async fn open_stream(&self, name: &str, sequence: u32) -> Result<NodeFeed> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }

        let (tx, rx) = mpsc::unbounded();
        let stream = Arc::new(MockNodeStream::new(&self.host, tx));
        self.opened_as.lock().push((name.to_string(), sequence));
        self.streams.lock().push(Arc::clone(&stream));

        Ok(NodeFeed::new(stream, rx.boxed()))
    }

    fn pool(&self) -> Arc<dyn ConnectionPool> {
        Arc::clone(&self.pool) as Arc<dyn ConnectionPool>
    }
}

pub struct MockNodeStream {
    host: String,
    tx: UnboundedSender<Result<FeedEvent>>,
    requests: Mutex<Vec<StreamRequest>>,
    closed_streams: Mutex<Vec<(VBucketId, u16)>>,
    closed: AtomicBool,
    request_error: Mutex<Option<String>>,
}

impl MockNodeStream {
    fn new(host: &str, tx: UnboundedSender<Result<FeedEvent>>) -> Self {
        Self {
            host: host.to_string(),
            tx,
            requests: Mutex::new(Vec::new()),
            closed_streams: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            request_error: Mutex::new(None),
        }
    }

    /// Reject stream requests and closes with a protocol error while the
    /// connection itself stays up
    pub fn set_fail_requests(&self, message: &str) {
        *self.request_error.lock() = Some(message.to_string());
    }

    fn check(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        match self.request_error.lock().as_deref() {
            Some(message) => Err(Error::protocol(&self.host, message)),
            None => Ok(()),
        }
    }

    fn send(&self, item: Result<FeedEvent>) {
        self.tx.unbounded_send(item).expect("node stream already ended");
    }

    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().clone()
    }

    pub fn requested_vbuckets(&self) -> Vec<VBucketId> {
        self.requests.lock().iter().map(|r| r.vbucket).collect()
    }

    pub fn closed_streams(&self) -> Vec<(VBucketId, u16)> {
        self.closed_streams.lock().clone()
    }

    /// Whether the feed closed this connection
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeStream for MockNodeStream {
    async fn request_stream(&self, request: &StreamRequest) -> Result<()> {
        self.check()?;
        self.requests.lock().push(*request);
        Ok(())
    }

    async fn close_stream(&self, vbucket: VBucketId, opaque_msb: u16) -> Result<()> {
        self.check()?;
        self.closed_streams.lock().push((vbucket, opaque_msb));
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.tx.close_channel();
    }
}

// ============================================================================
// Connection pool
// ============================================================================

pub struct MockPool {
    host: String,
    exhausted: AtomicBool,
    fail_fetch: AtomicBool,
    acquired: AtomicUsize,
    released: AtomicUsize,
    fetches: Arc<Mutex<Vec<Vec<VBucketId>>>>,
}

impl MockPool {
    fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            exhausted: AtomicBool::new(false),
            fail_fetch: AtomicBool::new(false),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            fetches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_exhausted(&self, exhausted: bool) {
        self.exhausted.store(exhausted, Ordering::SeqCst);
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Vbucket batches requested, one entry per fetch call
    pub fn fetches(&self) -> Vec<Vec<VBucketId>> {
        self.fetches.lock().clone()
    }
}

#[async_trait]
impl ConnectionPool for MockPool {
    async fn acquire(&self) -> Result<Box<dyn PooledConnection>> {
        if self.exhausted.load(Ordering::SeqCst) {
            return Err(Error::NoFreeConnection {
                host: self.host.clone(),
            });
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            fail: self.fail_fetch.load(Ordering::SeqCst),
            fetches: Arc::clone(&self.fetches),
        }))
    }

    fn release(&self, _conn: Box<dyn PooledConnection>) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockConnection {
    fail: bool,
    fetches: Arc<Mutex<Vec<Vec<VBucketId>>>>,
}

#[async_trait]
impl PooledConnection for MockConnection {
    async fn fetch_failover_logs(&mut self, vbuckets: &[VBucketId]) -> Result<FailoverLogMap> {
        self.fetches.lock().push(vbuckets.to_vec());
        if self.fail {
            return Err(Error::ConnectionClosed);
        }
        Ok(vbuckets
            .iter()
            .map(|&vb| (vb, FailoverLog::from(vec![(mock_vbuuid(vb), 0)])))
            .collect())
    }
}
