//! Core use-case services.
//!
//! # Responsibility
//! - Turn user-level batch requests into repository calls.
//! - Keep the command-line layer decoupled from catalog and filesystem details.

pub mod binder_service;
