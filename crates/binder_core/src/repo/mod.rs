//! Catalog Store contracts and persistence implementations.
//!
//! # Responsibility
//! - Define row-level data access for subjects and notes.
//! - Isolate SQLite query details from the binder repository.
//!
//! # Invariants
//! - The catalog only knows rows; it never touches the filesystem.
//! - Uniqueness violations surface as `CatalogError::UniqueViolation`, not as
//!   raw SQLite errors.

pub mod catalog_repo;
