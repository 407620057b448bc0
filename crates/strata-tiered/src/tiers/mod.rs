//! Immutable, content-addressed tree tiers
//!
//! An [`L1`] summarises the whole catalog at one commit; its slots point at
//! [`L2`] records, whose slots point at [`L3`] leaves mapping keys to value
//! ids. Every tier's id is the hash of its canonical encoding, so equal
//! subtrees deduplicate for free and records never change after they are
//! written. Empty tiers are the exception: their id is [`Id::EMPTY`] and
//! they are never persisted, so untouched slots cost nothing.
//!
//! [`Id::EMPTY`]: strata_common::Id::EMPTY

pub mod l1;
pub mod l2;
pub mod l3;

pub use l1::{KeyLog, L1};
pub use l2::L2;
pub use l3::L3;
