//! Object keys and key mutations
//!
//! A [`Key`] is an ordered list of string segments identifying an object in
//! the catalog. Segments may not contain the zero byte: the path-string
//! codec joins segments with `.` and encodes embedded periods as NUL, so the
//! round trip is exact.

use crate::entity::Entity;
use crate::error::ModelError;
use sha2::{Digest, Sha256};
use smol_str::SmolStr;
use std::fmt;

const ZERO_BYTE: char = '\u{0}';

/// An ordered, validated object key
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    segments: Vec<SmolStr>,
}

impl Key {
    /// Build a key from segments, rejecting zero bytes and empty keys
    pub fn new(segments: Vec<SmolStr>) -> Result<Self, ModelError> {
        if segments.is_empty() {
            return Err(ModelError::EmptyKey);
        }
        for segment in &segments {
            if segment.contains(ZERO_BYTE) {
                return Err(ModelError::NulInKeySegment {
                    segment: segment.to_string(),
                });
            }
        }
        Ok(Key { segments })
    }

    /// Build a key from anything that yields string segments
    pub fn of<I, T>(segments: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = T>,
        T: Into<SmolStr>,
    {
        Self::new(segments.into_iter().map(Into::into).collect())
    }

    /// The key's segments in order
    pub fn segments(&self) -> &[SmolStr] {
        &self.segments
    }

    /// Encode for path use: join by `.`, embedded periods become NUL
    pub fn to_path_string(&self) -> String {
        let mut out = String::new();
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            out.extend(segment.chars().map(|c| if c == '.' { ZERO_BYTE } else { c }));
        }
        out
    }

    /// Decode a path string produced by [`Key::to_path_string`]
    pub fn from_path_string(encoded: &str) -> Result<Self, ModelError> {
        Self::of(
            encoded
                .split('.')
                .map(|segment| segment.replace(ZERO_BYTE, ".")),
        )
    }

    /// Stable 64-bit hash used to place the key in the tree
    ///
    /// Segments are fed through the digest NUL-terminated, which is injective
    /// because segments cannot contain NUL.
    pub fn position_hash(&self) -> u64 {
        let mut sha = Sha256::new();
        for segment in &self.segments {
            sha.update(segment.as_bytes());
            sha.update([0u8]);
        }
        let digest = sha.finalize();
        u64::from_be_bytes(digest[..8].try_into().unwrap_or([0u8; 8]))
    }

    /// Encode as a list-of-strings entity
    pub fn to_entity(&self) -> Entity {
        Entity::List(
            self.segments
                .iter()
                .map(|s| Entity::String(s.clone()))
                .collect(),
        )
    }

    /// Decode from a list-of-strings entity
    pub fn from_entity(entity: &Entity) -> Result<Self, ModelError> {
        let mut segments = Vec::new();
        for item in entity.as_list()? {
            segments.push(item.as_string()?.clone());
        }
        Self::new(segments)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}

/// A single key change carried by a commit
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyMutation {
    /// The key became visible at this commit
    Addition(Key),
    /// The key was removed at this commit
    Removal(Key),
}

impl KeyMutation {
    /// The mutated key
    pub fn key(&self) -> &Key {
        match self {
            KeyMutation::Addition(k) | KeyMutation::Removal(k) => k,
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            KeyMutation::Addition(_) => "a",
            KeyMutation::Removal(_) => "d",
        }
    }

    /// Encode as a tagged map entity
    pub fn to_entity(&self) -> Entity {
        let mut map = std::collections::BTreeMap::new();
        map.insert(SmolStr::new("kind"), Entity::string(self.tag()));
        map.insert(SmolStr::new("key"), self.key().to_entity());
        Entity::Map(map)
    }

    /// Decode from a tagged map entity
    pub fn from_entity(entity: &Entity) -> Result<Self, ModelError> {
        let key = Key::from_entity(entity.attr("key")?)?;
        match entity.attr("kind")?.as_string()?.as_str() {
            "a" => Ok(KeyMutation::Addition(key)),
            "d" => Ok(KeyMutation::Removal(key)),
            other => Err(ModelError::EntityMismatch {
                expected: "mutation kind",
                found: if other.is_empty() { "empty" } else { "unknown" },
            }),
        }
    }
}

/// The key mutations of one commit
///
/// Equality is order-insensitive: two lists holding the same mutations are
/// equal regardless of the order writers recorded them in. The canonical
/// encoding sorts by (kind, key) so hashing stays deterministic.
#[derive(Debug, Clone, Default)]
pub struct KeyMutationList {
    mutations: Vec<KeyMutation>,
}

impl KeyMutationList {
    /// Wrap a list of mutations
    pub fn of(mutations: Vec<KeyMutation>) -> Self {
        KeyMutationList { mutations }
    }

    /// The mutations in recorded order
    pub fn mutations(&self) -> &[KeyMutation] {
        &self.mutations
    }

    /// Whether there are no mutations
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    fn sorted(&self) -> Vec<KeyMutation> {
        let mut out = self.mutations.clone();
        out.sort();
        out
    }

    /// Encode as a canonically sorted list entity
    pub fn to_entity(&self) -> Entity {
        Entity::List(self.sorted().iter().map(KeyMutation::to_entity).collect())
    }

    /// Decode from a list entity
    pub fn from_entity(entity: &Entity) -> Result<Self, ModelError> {
        let mut mutations = Vec::new();
        for item in entity.as_list()? {
            mutations.push(KeyMutation::from_entity(item)?);
        }
        Ok(Self::of(mutations))
    }
}

impl PartialEq for KeyMutationList {
    fn eq(&self, other: &Self) -> bool {
        self.sorted() == other.sorted()
    }
}

impl Eq for KeyMutationList {}
