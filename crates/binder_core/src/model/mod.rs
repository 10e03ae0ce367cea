//! Typed catalog records for the binder.
//!
//! # Responsibility
//! - Define the `Subject` and `Note` records built once at the repository
//!   boundary.
//! - Own name validation and slug derivation.
//!
//! # Invariants
//! - A slug is always derived from its name/title through `slugify`; it is
//!   never set independently.
//! - Valid names produce a non-empty slug.

pub mod note;
pub mod slug;
pub mod subject;
