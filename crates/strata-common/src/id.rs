//! Fixed-width content hashes

use crate::entity::Entity;
use crate::error::ModelError;
use bytes::Bytes;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;

/// Width of an [`Id`] in bytes
pub const ID_LENGTH: usize = 20;

/// A 20-byte content hash
///
/// Ids are SHA-256 digests truncated to 20 bytes. Equality and ordering are
/// bytewise. The all-zero value is reserved as [`Id::EMPTY`], the id of the
/// canonical empty tree tiers and the parent of a root commit.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id([u8; ID_LENGTH]);

impl Id {
    /// The distinguished empty id
    pub const EMPTY: Id = Id([0u8; ID_LENGTH]);

    /// Wrap raw bytes as an id
    pub const fn from_bytes(bytes: [u8; ID_LENGTH]) -> Self {
        Id(bytes)
    }

    /// Hash arbitrary bytes into an id
    pub fn hash_bytes(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut out = [0u8; ID_LENGTH];
        out.copy_from_slice(&digest[..ID_LENGTH]);
        Id(out)
    }

    /// Hash an entity's canonical encoding into an id
    ///
    /// Two independently built, structurally equal entities produce the same
    /// id; this is what makes the graph content-addressed.
    pub fn build(entity: &Entity) -> Result<Self, ModelError> {
        Ok(Self::hash_bytes(&entity.canonical_bytes()?))
    }

    /// Derive a reference id from its name
    pub fn of_name(name: &str) -> Self {
        Self::hash_bytes(name.as_bytes())
    }

    /// Generate a random placeholder id
    ///
    /// Used for not-yet-persisted commit entries so optimistic conditions can
    /// tell racing writers apart.
    pub fn random() -> Self {
        let mut bytes = [0u8; ID_LENGTH];
        rand::thread_rng().fill_bytes(&mut bytes);
        Id(bytes)
    }

    /// Whether this is the distinguished empty id
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    /// View the raw bytes
    pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        &self.0
    }

    /// Encode as a binary entity attribute
    pub fn to_entity(&self) -> Entity {
        Entity::Binary(Bytes::copy_from_slice(&self.0))
    }

    /// Decode from a binary entity attribute
    pub fn from_entity(entity: &Entity) -> Result<Self, ModelError> {
        let bytes = entity.as_binary()?;
        let raw: [u8; ID_LENGTH] = bytes
            .as_ref()
            .try_into()
            .map_err(|_| ModelError::InvalidIdLength { len: bytes.len() })?;
        Ok(Id(raw))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({self})")
    }
}
