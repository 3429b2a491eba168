//! vbfeed protocol types
//!
//! Value types shared between the feed aggregator (`vbfeed`) and the node
//! transports that implement its collaborator traits. Nothing in this crate
//! performs I/O; bit-exact framing of the binary protocol belongs to the
//! transport.
//!
//! # Example
//!
//! ```rust
//! use vbfeed_protocol::{Opcode, Status, VBucketServerMap};
//!
//! let map = VBucketServerMap::new(
//!     vec!["10.0.0.1:11210".to_string(), "10.0.0.2:11210".to_string()],
//!     vec![vec![0, 1], vec![1, 0], vec![-1]],
//! );
//! assert_eq!(map.master(0), Some("10.0.0.1:11210"));
//! assert_eq!(map.master(2), None);
//!
//! assert_eq!(Opcode::from(0x57), Opcode::Mutation);
//! assert!(Status::from(0x07).is_not_my_vbucket());
//! ```

mod error;
mod event;
mod failover;
mod stream;
mod vbmap;

pub use error::{ProtocolError, Result};
pub use event::{FeedEvent, Opcode, Status};
pub use failover::{FailoverEntry, FailoverLog, FailoverLogMap};
pub use stream::{StreamRequest, SEQNO_MAX};
pub use vbmap::VBucketServerMap;

/// Partition (vbucket) identifier
pub type VBucketId = u16;
