//! Opaque contents payloads
//!
//! The version store persists these verbatim: they are serialized to bytes,
//! hashed, and stored, but never parsed or validated by the tiered layer.

use crate::error::ModelError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// SQL dialect of a stored view definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dialect {
    /// Hive QL
    Hive,
    /// Spark SQL
    Spark,
    /// Dremio SQL
    Dremio,
    /// Presto SQL
    Presto,
}

/// A catalog object's payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Contents {
    /// Iceberg table: pointer to the current metadata file
    Iceberg {
        /// Location of the table metadata
        metadata_location: String,
    },
    /// Hive table: serialized table plus partition descriptors
    HiveTable {
        /// Serialized table definition
        table: Bytes,
        /// Serialized partition descriptors
        partitions: Vec<Bytes>,
    },
    /// Hive database: serialized database definition
    HiveDatabase {
        /// Serialized database definition
        database: Bytes,
    },
    /// SQL view: statement text plus dialect
    SqlView {
        /// View definition
        sql: String,
        /// Dialect the definition is written in
        dialect: Dialect,
    },
    /// Delta Lake table: checkpoint and metadata history
    DeltaLake {
        /// Most recent checkpoint location
        last_checkpoint: String,
        /// Older checkpoint locations, newest first
        checkpoint_location_history: Vec<String>,
        /// Metadata file locations, newest first
        metadata_location_history: Vec<String>,
    },
}

impl Contents {
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
