//! Catalog storage: the SQLite file that mirrors the notes tree.
//!
//! A connection handed out by this module is ready for repository use:
//! the schema is at the version this binary knows, `foreign_keys` is on, and
//! `notes.subject_id` is declared `ON DELETE CASCADE`. Removing a subject row
//! therefore never leaves note rows behind, and repositories rely on that
//! instead of deleting notes themselves.
//!
//! A catalog that fails any of these checks is refused at open time rather
//! than repaired.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// Schema is at a known version but lacks a guarantee the repositories rely on.
    BrokenCatalog(String),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "catalog schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::BrokenCatalog(reason) => write!(f, "catalog is not usable: {reason}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } | Self::BrokenCatalog(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
