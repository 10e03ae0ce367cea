//! Note record.

use crate::model::subject::SubjectId;
use serde::{Deserialize, Serialize};

/// Catalog row id of one note.
pub type NoteId = i64;

/// A single source document belonging to exactly one subject.
///
/// Identity is the `(subject_id, title)` pair; `slug` names the file inside
/// the subject directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub subject_id: SubjectId,
    pub title: String,
    pub slug: String,
    /// Epoch ms creation timestamp.
    pub created_at: i64,
    /// Epoch ms modification timestamp.
    pub modified_at: i64,
}
