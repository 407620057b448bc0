//! Wrapped byte records
//!
//! Contents payloads and commit metadata are stored verbatim: the tiered
//! layer wraps the serialized bytes in a one-attribute record, hashes it,
//! and never looks inside.

use crate::error::{Result, TieredError};
use bytes::Bytes;
use smol_str::SmolStr;
use std::collections::BTreeMap;
use strata_common::{Entity, Id};

fn wrap(value: &Bytes) -> Entity {
    let mut map = BTreeMap::new();
    map.insert(SmolStr::new("value"), Entity::Binary(value.clone()));
    Entity::Map(map)
}

fn unwrap(entity: &Entity) -> Result<Bytes> {
    Ok(entity.attr("value")?.as_binary().map_err(TieredError::from)?.clone())
}

macro_rules! wrapped_value {
    ($(#[$doc:meta])* $name:ident, $label:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            value: Bytes,
            id: Id,
        }

        impl $name {
            /// Wrap bytes, computing the content id
            pub fn of(value: Bytes) -> Result<Self> {
                let id = Id::build(&wrap(&value))?;
                Ok(Self { value, id })
            }

            /// The content id
            pub fn id(&self) -> Id {
                self.id
            }

            /// The wrapped bytes
            pub fn value(&self) -> &Bytes {
                &self.value
            }

            /// Encode as an entity
            pub fn to_entity(&self) -> Entity {
                wrap(&self.value)
            }

            /// Decode a stored record and verify its id matches the
            /// requested one
            pub fn load_checked(requested: Id, entity: &Entity) -> Result<Self> {
                let decoded = Self::of(unwrap(entity)?)?;
                if decoded.id != requested {
                    return Err(TieredError::corruption(format!(
                        concat!($label, " {} hashed to {}"),
                        requested, decoded.id
                    )));
                }
                Ok(decoded)
            }
        }
    };
}

wrapped_value!(
    /// An opaque contents payload as stored
    InternalValue,
    "value"
);

wrapped_value!(
    /// Opaque commit metadata as stored
    InternalCommitMetadata,
    "commit metadata"
);
