//! Catalog Store contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD over `subjects` and `notes` rows.
//! - Map persisted rows into typed `Subject`/`Note` records.
//!
//! # Invariants
//! - `notes.subject_id` cascades on subject deletion.
//! - `(subject_id, title)` and `(subject_id, slug)` are unique.
//! - Note listing is deterministic: `id ASC`.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::note::{Note, NoteId};
use crate::model::subject::{Subject, SubjectId, SubjectOrder};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};

const SUBJECT_SELECT_SQL: &str = "SELECT
    id,
    name,
    slug,
    created_at,
    modified_at
FROM subjects";

const NOTE_SELECT_SQL: &str = "SELECT
    id,
    subject_id,
    title,
    slug,
    created_at,
    modified_at
FROM notes";

/// Result type used by catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors from catalog operations.
#[derive(Debug)]
pub enum CatalogError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Insert collided with a unique constraint.
    UniqueViolation(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Persisted data cannot be converted to a valid record.
    InvalidData(String),
}

impl Display for CatalogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::UniqueViolation(detail) => write!(f, "catalog uniqueness violated: {detail}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "catalog requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => write!(f, "catalog requires table `{table}`"),
            Self::InvalidData(message) => write!(f, "invalid catalog data: {message}"),
        }
    }
}

impl Error for CatalogError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for CatalogError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for CatalogError {
    fn from(value: rusqlite::Error) -> Self {
        match &value {
            rusqlite::Error::SqliteFailure(err, message)
                if err.code == ErrorCode::ConstraintViolation
                    && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Self::UniqueViolation(
                    message
                        .clone()
                        .unwrap_or_else(|| "unique constraint failed".to_string()),
                )
            }
            _ => Self::Db(DbError::Sqlite(value)),
        }
    }
}

/// Row-level access to the binder catalog.
pub trait CatalogStore {
    /// Inserts one subject row.
    fn insert_subject(&self, name: &str, slug: &str) -> CatalogResult<Subject>;
    /// Loads one subject by exact name.
    fn find_subject_by_name(&self, name: &str) -> CatalogResult<Option<Subject>>;
    /// Loads one subject by slug.
    fn find_subject_by_slug(&self, slug: &str) -> CatalogResult<Option<Subject>>;
    /// Lists every subject row.
    fn list_subjects(&self, order: SubjectOrder) -> CatalogResult<Vec<Subject>>;
    /// Deletes one subject row and, through the foreign key, its notes.
    /// Returns `false` when no row matched.
    fn delete_subject(&self, id: SubjectId) -> CatalogResult<bool>;
    /// Bumps `modified_at` of one subject.
    fn touch_subject(&self, id: SubjectId) -> CatalogResult<()>;
    /// Inserts one note row under a subject.
    fn insert_note(&self, subject_id: SubjectId, title: &str, slug: &str) -> CatalogResult<Note>;
    /// Loads one note by exact title within a subject.
    fn find_note_by_title(&self, subject_id: SubjectId, title: &str)
        -> CatalogResult<Option<Note>>;
    /// Loads one note by slug within a subject.
    fn find_note_by_slug(&self, subject_id: SubjectId, slug: &str) -> CatalogResult<Option<Note>>;
    /// Lists the notes of one subject in insertion order.
    fn list_notes(&self, subject_id: SubjectId) -> CatalogResult<Vec<Note>>;
    /// Deletes one note row. Returns `false` when no row matched.
    fn delete_note(&self, id: NoteId) -> CatalogResult<bool>;
}

/// SQLite-backed catalog.
///
/// Borrows a connection, so it can equally wrap a `Transaction` (which
/// dereferences to `Connection`) to scope a group of statements.
pub struct SqliteCatalogRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCatalogRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> CatalogResult<Self> {
        ensure_catalog_connection_ready(conn)?;
        Ok(Self { conn })
    }

    /// Wraps a connection already verified by `try_new`.
    pub(crate) fn new_unchecked(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl CatalogStore for SqliteCatalogRepository<'_> {
    fn insert_subject(&self, name: &str, slug: &str) -> CatalogResult<Subject> {
        self.conn.execute(
            "INSERT INTO subjects (name, slug) VALUES (?1, ?2);",
            params![name, slug],
        )?;
        let id = self.conn.last_insert_rowid();
        load_required_subject(self.conn, id)
    }

    fn find_subject_by_name(&self, name: &str) -> CatalogResult<Option<Subject>> {
        let sql = format!("{SUBJECT_SELECT_SQL} WHERE name = ?1;");
        query_optional(self.conn, &sql, name, parse_subject_row)
    }

    fn find_subject_by_slug(&self, slug: &str) -> CatalogResult<Option<Subject>> {
        let sql = format!("{SUBJECT_SELECT_SQL} WHERE slug = ?1;");
        query_optional(self.conn, &sql, slug, parse_subject_row)
    }

    fn list_subjects(&self, order: SubjectOrder) -> CatalogResult<Vec<Subject>> {
        let order_clause = match order {
            SubjectOrder::None => "",
            SubjectOrder::Id => " ORDER BY id ASC",
            SubjectOrder::Name => " ORDER BY name COLLATE NOCASE ASC, id ASC",
            SubjectOrder::Modified => " ORDER BY modified_at DESC, id ASC",
        };
        let mut stmt = self
            .conn
            .prepare(&format!("{SUBJECT_SELECT_SQL}{order_clause};"))?;
        let mut rows = stmt.query([])?;
        let mut subjects = Vec::new();
        while let Some(row) = rows.next()? {
            subjects.push(parse_subject_row(row)?);
        }
        Ok(subjects)
    }

    fn delete_subject(&self, id: SubjectId) -> CatalogResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM subjects WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }

    fn touch_subject(&self, id: SubjectId) -> CatalogResult<()> {
        self.conn.execute(
            "UPDATE subjects
             SET modified_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            [id],
        )?;
        Ok(())
    }

    fn insert_note(&self, subject_id: SubjectId, title: &str, slug: &str) -> CatalogResult<Note> {
        self.conn.execute(
            "INSERT INTO notes (subject_id, title, slug) VALUES (?1, ?2, ?3);",
            params![subject_id, title, slug],
        )?;
        let id = self.conn.last_insert_rowid();
        let sql = format!("{NOTE_SELECT_SQL} WHERE id = ?1;");
        query_optional(self.conn, &sql, id, parse_note_row)?.ok_or_else(|| {
            CatalogError::InvalidData(format!("inserted note {id} not found in read-back"))
        })
    }

    fn find_note_by_title(
        &self,
        subject_id: SubjectId,
        title: &str,
    ) -> CatalogResult<Option<Note>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{NOTE_SELECT_SQL} WHERE subject_id = ?1 AND title = ?2;"))?;
        let mut rows = stmt.query(params![subject_id, title])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_note_row(row)?));
        }
        Ok(None)
    }

    fn find_note_by_slug(&self, subject_id: SubjectId, slug: &str) -> CatalogResult<Option<Note>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{NOTE_SELECT_SQL} WHERE subject_id = ?1 AND slug = ?2;"))?;
        let mut rows = stmt.query(params![subject_id, slug])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_note_row(row)?));
        }
        Ok(None)
    }

    fn list_notes(&self, subject_id: SubjectId) -> CatalogResult<Vec<Note>> {
        let mut stmt = self.conn.prepare(&format!(
            "{NOTE_SELECT_SQL} WHERE subject_id = ?1 ORDER BY id ASC;"
        ))?;
        let mut rows = stmt.query([subject_id])?;
        let mut notes = Vec::new();
        while let Some(row) = rows.next()? {
            notes.push(parse_note_row(row)?);
        }
        Ok(notes)
    }

    fn delete_note(&self, id: NoteId) -> CatalogResult<bool> {
        let changed = self.conn.execute("DELETE FROM notes WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }
}

fn query_optional<T, P: rusqlite::ToSql>(
    conn: &Connection,
    sql: &str,
    param: P,
    parse: fn(&Row<'_>) -> CatalogResult<T>,
) -> CatalogResult<Option<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([param])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse(row)?));
    }
    Ok(None)
}

fn load_required_subject(conn: &Connection, id: SubjectId) -> CatalogResult<Subject> {
    let sql = format!("{SUBJECT_SELECT_SQL} WHERE id = ?1;");
    query_optional(conn, &sql, id, parse_subject_row)?.ok_or_else(|| {
        CatalogError::InvalidData(format!("inserted subject {id} not found in read-back"))
    })
}

fn parse_subject_row(row: &Row<'_>) -> CatalogResult<Subject> {
    let subject = Subject {
        id: row.get("id")?,
        name: row.get("name")?,
        slug: row.get("slug")?,
        created_at: row.get("created_at")?,
        modified_at: row.get("modified_at")?,
    };
    if subject.slug.is_empty() {
        return Err(CatalogError::InvalidData(format!(
            "empty slug for subject `{}` in subjects.slug",
            subject.name
        )));
    }
    Ok(subject)
}

fn parse_note_row(row: &Row<'_>) -> CatalogResult<Note> {
    let note = Note {
        id: row.get("id")?,
        subject_id: row.get("subject_id")?,
        title: row.get("title")?,
        slug: row.get("slug")?,
        created_at: row.get("created_at")?,
        modified_at: row.get("modified_at")?,
    };
    if note.slug.is_empty() {
        return Err(CatalogError::InvalidData(format!(
            "empty slug for note `{}` in notes.slug",
            note.title
        )));
    }
    Ok(note)
}

fn ensure_catalog_connection_ready(conn: &Connection) -> CatalogResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(CatalogError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in ["subjects", "notes"] {
        if !table_exists(conn, table)? {
            return Err(CatalogError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> CatalogResult<bool> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1
             FROM sqlite_master
             WHERE type = 'table' AND name = ?1;",
            [table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

#[cfg(test)]
mod tests {
    use super::{CatalogError, CatalogStore, SqliteCatalogRepository};
    use crate::db::open_db_in_memory;
    use crate::model::subject::SubjectOrder;

    #[test]
    fn try_new_rejects_unmigrated_connection() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err = SqliteCatalogRepository::try_new(&conn)
            .err()
            .expect("unmigrated connection must be rejected");
        assert!(matches!(
            err,
            CatalogError::UninitializedConnection {
                actual_version: 0,
                ..
            }
        ));
    }

    #[test]
    fn duplicate_subject_slug_maps_to_unique_violation() {
        let conn = open_db_in_memory().unwrap();
        let catalog = SqliteCatalogRepository::try_new(&conn).unwrap();
        catalog.insert_subject("Calculus I", "calculus-i").unwrap();

        let err = catalog
            .insert_subject("calculus-i", "calculus-i")
            .unwrap_err();
        assert!(matches!(err, CatalogError::UniqueViolation(_)));
    }

    #[test]
    fn deleting_subject_cascades_to_notes() {
        let conn = open_db_in_memory().unwrap();
        let catalog = SqliteCatalogRepository::try_new(&conn).unwrap();
        let subject = catalog.insert_subject("Physics", "physics").unwrap();
        catalog.insert_note(subject.id, "Optics", "optics").unwrap();
        catalog.insert_note(subject.id, "Waves", "waves").unwrap();

        assert!(catalog.delete_subject(subject.id).unwrap());
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM notes;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
        assert!(!catalog.delete_subject(subject.id).unwrap());
    }

    #[test]
    fn list_subjects_honors_requested_order() {
        let conn = open_db_in_memory().unwrap();
        let catalog = SqliteCatalogRepository::try_new(&conn).unwrap();
        let zoology = catalog.insert_subject("Zoology", "zoology").unwrap();
        let algebra = catalog.insert_subject("algebra", "algebra").unwrap();
        conn.execute(
            "UPDATE subjects SET modified_at = 1000 WHERE id = ?1;",
            [algebra.id],
        )
        .unwrap();
        conn.execute(
            "UPDATE subjects SET modified_at = 2000 WHERE id = ?1;",
            [zoology.id],
        )
        .unwrap();

        let by_id = catalog.list_subjects(SubjectOrder::Id).unwrap();
        assert_eq!(by_id[0].id, zoology.id);

        let by_name = catalog.list_subjects(SubjectOrder::Name).unwrap();
        assert_eq!(by_name[0].name, "algebra");

        let by_modified = catalog.list_subjects(SubjectOrder::Modified).unwrap();
        assert_eq!(by_modified[0].id, zoology.id);
        assert_eq!(by_modified[1].id, algebra.id);
    }

    #[test]
    fn same_note_slug_is_allowed_across_subjects() {
        let conn = open_db_in_memory().unwrap();
        let catalog = SqliteCatalogRepository::try_new(&conn).unwrap();
        let calculus = catalog.insert_subject("Calculus", "calculus").unwrap();
        let physics = catalog.insert_subject("Physics", "physics").unwrap();

        catalog.insert_note(calculus.id, "Limits", "limits").unwrap();
        catalog.insert_note(physics.id, "Limits", "limits").unwrap();
        let err = catalog
            .insert_note(calculus.id, "LIMITS", "limits")
            .unwrap_err();
        assert!(matches!(err, CatalogError::UniqueViolation(_)));

        let found = catalog.find_note_by_slug(physics.id, "limits").unwrap();
        assert_eq!(found.map(|note| note.subject_id), Some(physics.id));
    }
}
