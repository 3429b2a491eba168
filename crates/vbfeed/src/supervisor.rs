//! Feed supervisor: reconnect loop with exponential backoff
//!
//! ```text
//!             kill switch                   always
//! Connected ─────────────► Recovering ─────────────► BackoffWait(d)
//!     ▲                        ▲                          │
//!     │   last pass succeeded  │    last pass failed      │
//!     └────────────────────────┴──────────────────────────┘
//!
//! any state ── shutdown ──► Terminated
//! ```
//!
//! The supervisor never gives up on its own; only closing the feed stops it.

use crate::feed::{stopped, FeedInner};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Doubling backoff capped at a maximum
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Interval the next wait will use
    pub(crate) fn current(&self) -> Duration {
        self.current
    }

    /// Return the interval to wait now and double the next one
    pub(crate) fn advance(&mut self) -> Duration {
        let wait = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        wait
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SupervisorState {
    /// All nodes connected; waiting for a failure or shutdown
    Connected,
    /// Refreshing the topology and reconnecting
    Recovering,
    /// Sleeping before the next attempt
    BackoffWait(Duration),
    Terminated,
}

impl SupervisorState {
    /// State after a completed backoff wait
    pub(crate) fn after_backoff(last_pass_ok: bool) -> Self {
        if last_pass_ok {
            SupervisorState::Connected
        } else {
            SupervisorState::Recovering
        }
    }
}

pub(crate) struct Supervisor {
    inner: Arc<FeedInner>,
    kill_rx: mpsc::Receiver<String>,
    shutdown: watch::Receiver<bool>,
    backoff: Backoff,
    state: SupervisorState,
    last_pass_ok: bool,
}

impl Supervisor {
    pub(crate) fn new(inner: Arc<FeedInner>, kill_rx: mpsc::Receiver<String>) -> Self {
        let shutdown = inner.shutdown_rx();
        let backoff = Backoff::new(
            inner.config.initial_retry_interval,
            inner.config.max_retry_interval,
        );
        Self {
            inner,
            kill_rx,
            shutdown,
            backoff,
            state: SupervisorState::Connected,
            last_pass_ok: true,
        }
    }

    pub(crate) async fn run(mut self) {
        while self.state != SupervisorState::Terminated {
            self.state = self.step().await;
        }
        debug!(bucket = %self.inner.topology.bucket(), "Feed supervisor terminated");
    }

    async fn step(&mut self) -> SupervisorState {
        match self.state {
            SupervisorState::Connected => self.wait_for_failure().await,
            SupervisorState::Recovering => self.recover().await,
            SupervisorState::BackoffWait(interval) => self.wait_backoff(interval).await,
            SupervisorState::Terminated => SupervisorState::Terminated,
        }
    }

    async fn wait_for_failure(&mut self) -> SupervisorState {
        tokio::select! {
            biased;
            _ = stopped(&mut self.shutdown) => SupervisorState::Terminated,
            failed = self.kill_rx.recv() => match failed {
                Some(host) => {
                    self.backoff.reset();
                    warn!(host = %host, "Node feed lost");
                    SupervisorState::Recovering
                }
                None => SupervisorState::Terminated,
            },
        }
    }

    async fn recover(&mut self) -> SupervisorState {
        if self.inner.is_shutdown() {
            return SupervisorState::Terminated;
        }

        let bucket = self.inner.topology.bucket();
        info!(
            bucket = %bucket,
            retry_in = ?self.backoff.current(),
            "Feed connection lost; reconnecting"
        );

        if let Err(e) = self.inner.topology.refresh().await {
            warn!(bucket = %bucket, error = %e, "Unable to refresh topology");
            self.inner.close_node_feeds().await;
        }

        // Only nodes that are disconnected or new get connected; the caller
        // re-requests vbucket streams.
        match self.inner.connect_to_nodes().await {
            Ok(()) => {
                info!(bucket = %bucket, "Feed reconnected");
                self.last_pass_ok = true;
            }
            Err(e) => {
                warn!(bucket = %bucket, error = %e, "Reconnect failed");
                self.last_pass_ok = false;
            }
        }

        SupervisorState::BackoffWait(self.backoff.advance())
    }

    async fn wait_backoff(&mut self, interval: Duration) -> SupervisorState {
        tokio::select! {
            biased;
            _ = stopped(&mut self.shutdown) => SupervisorState::Terminated,
            _ = tokio::time::sleep(interval) => SupervisorState::after_backoff(self.last_pass_ok),
        }
    }
}
