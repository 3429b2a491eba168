//! Feed configuration

use crate::error::{Error, Result};
use std::time::Duration;

/// Connection name used when the caller does not supply one
pub const DEFAULT_FEED_NAME: &str = "DefaultUprClient";

/// Configuration for a [`Feed`](crate::Feed)
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Name the feed announces to every node (empty = [`DEFAULT_FEED_NAME`])
    pub name: String,
    /// Sequence token passed through to every node connection
    pub sequence: u32,
    /// First wait after a failed reconnect pass
    pub initial_retry_interval: Duration,
    /// Upper bound of the doubling reconnect backoff
    pub max_retry_interval: Duration,
    /// Capacity of the aggregate event queue
    pub output_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            sequence: 0,
            initial_retry_interval: Duration::from_secs(1),
            max_retry_interval: Duration::from_secs(30),
            output_capacity: 10,
        }
    }
}

impl FeedConfig {
    /// Create a new builder
    pub fn builder() -> FeedConfigBuilder {
        FeedConfigBuilder::default()
    }

    /// Name sent to the nodes, falling back to [`DEFAULT_FEED_NAME`]
    pub fn connection_name(&self) -> &str {
        if self.name.is_empty() {
            DEFAULT_FEED_NAME
        } else {
            &self.name
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.output_capacity == 0 {
            return Err(Error::Config("output_capacity must be at least 1".into()));
        }
        if self.initial_retry_interval.is_zero() {
            return Err(Error::Config(
                "initial_retry_interval must be non-zero".into(),
            ));
        }
        if self.initial_retry_interval > self.max_retry_interval {
            return Err(Error::Config(format!(
                "initial_retry_interval {:?} exceeds max_retry_interval {:?}",
                self.initial_retry_interval, self.max_retry_interval
            )));
        }
        Ok(())
    }
}

/// Builder for FeedConfig
#[derive(Default)]
pub struct FeedConfigBuilder {
    config: FeedConfig,
}

impl FeedConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn sequence(mut self, sequence: u32) -> Self {
        self.config.sequence = sequence;
        self
    }

    pub fn initial_retry_interval(mut self, interval: Duration) -> Self {
        self.config.initial_retry_interval = interval;
        self
    }

    pub fn max_retry_interval(mut self, interval: Duration) -> Self {
        self.config.max_retry_interval = interval;
        self
    }

    pub fn output_capacity(mut self, capacity: usize) -> Self {
        self.config.output_capacity = capacity;
        self
    }

    pub fn build(self) -> FeedConfig {
        self.config
    }
}
