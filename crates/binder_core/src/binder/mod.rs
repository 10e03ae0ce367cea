//! Binder Repository and the on-disk notes tree it reconciles against.
//!
//! # Responsibility
//! - Keep catalog rows and the notes tree in agreement.
//! - Provide the single resolve-and-heal path every other operation uses.

pub mod layout;
pub mod repository;
pub mod template;
