//! Partition ownership map (vbucket → server)

use crate::error::{ProtocolError, Result};
use crate::VBucketId;
use serde::{Deserialize, Serialize};

/// Which server owns each vbucket.
///
/// Each row of `vbucket_map` lists indexes into `server_list`; the first
/// entry is the master, the rest are replicas. A negative index means the
/// slot is unassigned. This is the `vBucketServerMap` object of a bucket
/// configuration, so it deserializes directly from the cluster's JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VBucketServerMap {
    #[serde(default)]
    pub hash_algorithm: Option<String>,
    #[serde(default)]
    pub num_replicas: usize,
    pub server_list: Vec<String>,
    #[serde(rename = "vBucketMap")]
    pub vbucket_map: Vec<Vec<i32>>,
}

impl VBucketServerMap {
    pub fn new(server_list: Vec<String>, vbucket_map: Vec<Vec<i32>>) -> Self {
        let num_replicas = vbucket_map
            .iter()
            .map(|row| row.len().saturating_sub(1))
            .max()
            .unwrap_or(0);
        Self {
            hash_algorithm: None,
            num_replicas,
            server_list,
            vbucket_map,
        }
    }

    /// Parse and validate a `vBucketServerMap` JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let map: Self = serde_json::from_str(json)?;
        map.validate()?;
        Ok(map)
    }

    /// Check that every index points into `server_list`
    pub fn validate(&self) -> Result<()> {
        if self.vbucket_map.len() > usize::from(u16::MAX) + 1 {
            return Err(ProtocolError::TooManyVBuckets(self.vbucket_map.len()));
        }
        for (vb, row) in self.vbucket_map.iter().enumerate() {
            for &index in row {
                if index >= 0 && index as usize >= self.server_list.len() {
                    return Err(ProtocolError::ServerIndexOutOfRange {
                        vbucket: vb as VBucketId,
                        index,
                        servers: self.server_list.len(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Number of vbuckets in the map
    pub fn len(&self) -> usize {
        self.vbucket_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vbucket_map.is_empty()
    }

    pub fn contains(&self, vbucket: VBucketId) -> bool {
        usize::from(vbucket) < self.vbucket_map.len()
    }

    /// Host of the node currently owning `vbucket`
    pub fn master(&self, vbucket: VBucketId) -> Option<&str> {
        let index = *self.vbucket_map.get(usize::from(vbucket))?.first()?;
        self.server(index)
    }

    fn server(&self, index: i32) -> Option<&str> {
        if index < 0 {
            return None;
        }
        self.server_list.get(index as usize).map(String::as_str)
    }
}
