//! Subject record.

use serde::{Deserialize, Serialize};

/// Catalog row id of one subject.
pub type SubjectId = i64;

/// A named collection of notes backed by one directory under the notes root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    /// Unique human-readable name.
    pub name: String,
    /// Unique directory name derived from `name`.
    pub slug: String,
    /// Epoch ms creation timestamp.
    pub created_at: i64,
    /// Epoch ms modification timestamp.
    pub modified_at: i64,
}

/// Ordering applied when listing subjects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectOrder {
    /// Storage order; no ordering guarantee.
    #[default]
    None,
    Id,
    Name,
    /// Most recently modified first.
    Modified,
}
