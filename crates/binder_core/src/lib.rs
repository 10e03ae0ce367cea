//! Core domain logic for the binder.
//! This crate is the single source of truth for catalog/filesystem invariants
//! and for the compile pipeline.

pub mod binder;
pub mod compile;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use binder::layout::BinderLayout;
pub use binder::repository::{
    BinderError, BinderRepository, BinderResult, EntityRef, Reconcile, Reconciled, Resolution,
};
pub use config::{BinderConfig, CompilerConfig, ConfigError, PREFERENCES_FILE_NAME};
pub use db::{open_db, open_db_in_memory, DbError};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::note::{Note, NoteId};
pub use model::slug::{slugify, NameValidationError};
pub use model::subject::{Subject, SubjectId, SubjectOrder};
pub use repo::catalog_repo::{CatalogError, CatalogStore, SqliteCatalogRepository};
pub use service::binder_service::{
    parse_compile_target, BatchOptions, BatchReport, BinderService, Listing, ServiceError,
    ALL_SELECTOR, MAIN_SELECTOR,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
