//! Commit metadata

use crate::error::ModelError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// Metadata attached to a commit
///
/// Serialized to bytes and stored opaquely; the tiered layer only ever sees
/// the content hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMeta {
    /// Who recorded the commit
    pub committer: SmolStr,
    /// Who authored the change
    pub author: SmolStr,
    /// Author contact address
    pub email: SmolStr,
    /// Commit message
    pub message: String,
    /// Milliseconds since the epoch
    pub commit_time_ms: i64,
    /// Free-form properties
    pub properties: BTreeMap<SmolStr, String>,
}

impl CommitMeta {
    /// Metadata carrying only a message
    pub fn from_message(message: impl Into<String>) -> Self {
        CommitMeta {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Serialize for opaque storage
    pub fn to_bytes(&self) -> Result<Bytes, ModelError> {
        serde_ipld_dagcbor::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| ModelError::Encode(Box::new(e)))
    }

    /// Deserialize from stored bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModelError> {
        serde_ipld_dagcbor::from_slice(bytes).map_err(|e| ModelError::Decode(Box::new(e)))
    }
}
