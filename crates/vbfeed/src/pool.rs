//! Pooled request/response connections
//!
//! Failover logs are fetched over pooled connections, never over a node's
//! long-lived mutation stream. [`PoolGuard`] hands the connection back to its
//! pool when dropped, so release happens on success, error and cancellation.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use vbfeed_protocol::{FailoverLogMap, VBucketId};

/// Connection pool for one node
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Take a connection, failing with [`Error::NoFreeConnection`] when none
    /// is available within the pool's own limits.
    async fn acquire(&self) -> Result<Box<dyn PooledConnection>>;

    /// Return a connection taken with [`acquire`](Self::acquire)
    fn release(&self, conn: Box<dyn PooledConnection>);
}

/// A connection checked out of a [`ConnectionPool`]
#[async_trait]
pub trait PooledConnection: Send {
    /// Fetch failover logs for a batch of vbuckets in one request
    async fn fetch_failover_logs(&mut self, vbuckets: &[VBucketId]) -> Result<FailoverLogMap>;
}

/// Scoped checkout of a pooled connection
pub struct PoolGuard {
    pool: Arc<dyn ConnectionPool>,
    conn: Option<Box<dyn PooledConnection>>,
}

impl PoolGuard {
    pub async fn acquire(pool: Arc<dyn ConnectionPool>) -> Result<Self> {
        let conn = pool.acquire().await?;
        Ok(Self {
            pool,
            conn: Some(conn),
        })
    }

    pub async fn fetch_failover_logs(&mut self, vbuckets: &[VBucketId]) -> Result<FailoverLogMap> {
        match self.conn.as_mut() {
            Some(conn) => conn.fetch_failover_logs(vbuckets).await,
            None => Err(Error::ConnectionClosed),
        }
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
