use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A connect pass could not open every node stream
    #[error("Cannot connect to node {host}: {reason}")]
    ConnectFailure { host: String, reason: String },

    #[error("Invalid vbucket id {vbucket} (map has {map_size} vbuckets)")]
    InvalidPartition { vbucket: u16, map_size: usize },

    #[error("Master node not found for vbucket {vbucket}")]
    NoOwner { vbucket: u16 },

    #[error("Feed for host {host} not connected (vbucket {vbucket})")]
    NodeNotConnected { vbucket: u16, host: String },

    #[error("vbucket map smaller than vbucket list: {map_size} vs. {requested}")]
    TopologyMismatch { requested: usize, map_size: usize },

    #[error("No free connections for host {host}")]
    NoFreeConnection { host: String },

    #[error("Protocol error from {host}: {message}")]
    Protocol { host: String, message: String },

    #[error("Topology refresh failed: {0}")]
    Refresh(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

impl Error {
    pub fn connect_failure(host: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ConnectFailure {
            host: host.into(),
            reason: reason.to_string(),
        }
    }

    pub fn protocol(host: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Protocol {
            host: host.into(),
            message: message.to_string(),
        }
    }

    /// Errors produced by vbucket → node routing.
    ///
    /// These are always reported to the caller and never retried by the feed.
    pub fn is_routing_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidPartition { .. } | Error::NoOwner { .. } | Error::NodeNotConnected { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
