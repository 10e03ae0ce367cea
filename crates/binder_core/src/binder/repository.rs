//! Binder Repository: the catalog reconciled against the notes tree.
//!
//! # Responsibility
//! - Expose reconciled views of subjects and notes.
//! - Create and delete subjects/notes with catalog row and filesystem entry
//!   changing together.
//!
//! # Invariants
//! - The filesystem is authoritative. A catalog row whose directory/file is
//!   missing is dangling; it is deleted on access (unless the caller asks for
//!   `Reconcile::ReportOnly`) and never returned as valid.
//! - Missing files are never recreated to heal a row.
//! - Every public operation runs in one catalog transaction. Semantic
//!   rejections (`NotFound`, `Dangling`, `AlreadyExists`) still commit the
//!   healing deletes performed before them; storage and I/O failures roll
//!   everything back.

use crate::binder::layout::BinderLayout;
use crate::binder::template;
use crate::model::note::Note;
use crate::model::slug::{normalize_name, NameValidationError};
use crate::model::subject::{Subject, SubjectOrder};
use crate::repo::catalog_repo::{CatalogError, CatalogStore, SqliteCatalogRepository};
use log::{info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub type BinderResult<T> = Result<T, BinderError>;

/// Identifies the entity an error refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    Subject { name: String },
    Note { subject: String, title: String },
}

impl EntityRef {
    pub fn subject(name: impl Into<String>) -> Self {
        Self::Subject { name: name.into() }
    }

    pub fn note(subject: impl Into<String>, title: impl Into<String>) -> Self {
        Self::Note {
            subject: subject.into(),
            title: title.into(),
        }
    }
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subject { name } => write!(f, "subject `{name}`"),
            Self::Note { subject, title } => write!(f, "note `{title}` of subject `{subject}`"),
        }
    }
}

/// Errors from binder repository operations.
#[derive(Debug)]
pub enum BinderError {
    /// Name is not present in the catalog.
    NotFound(EntityRef),
    /// Catalog row existed but its file/directory did not; the row was healed.
    Dangling(EntityRef),
    /// Name or derived slug collides with an existing entry.
    AlreadyExists(EntityRef),
    /// Name cannot be turned into a valid slug.
    InvalidName(NameValidationError),
    /// Catalog failure.
    Storage(CatalogError),
    /// Filesystem failure.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl BinderError {
    /// Whether the transaction should still commit when this error ends an
    /// operation.
    fn keeps_heals(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Dangling(_) | Self::AlreadyExists(_)
        )
    }

    /// Stable short code for status lines and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Dangling(_) => "dangling",
            Self::AlreadyExists(_) => "already_exists",
            Self::InvalidName(_) => "invalid_name",
            Self::Storage(_) => "storage_error",
            Self::Io { .. } => "io_error",
        }
    }
}

impl Display for BinderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(entity) => write!(f, "{entity} not found"),
            Self::Dangling(entity) => {
                write!(f, "{entity} is missing on disk; stale catalog entry removed")
            }
            Self::AlreadyExists(entity) => write!(f, "{entity} already exists"),
            Self::InvalidName(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "{err}"),
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
        }
    }
}

impl Error for BinderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidName(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<CatalogError> for BinderError {
    fn from(value: CatalogError) -> Self {
        Self::Storage(value)
    }
}

impl From<rusqlite::Error> for BinderError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(value.into())
    }
}

impl From<NameValidationError> for BinderError {
    fn from(value: NameValidationError) -> Self {
        Self::InvalidName(value)
    }
}

/// Outcome of resolving one entity against the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    Found(T),
    NotFound,
    /// The record that was dangling (and removed, when healing).
    Dangling(T),
}

impl<T> Resolution<T> {
    pub fn is_dangling(&self) -> bool {
        matches!(self, Self::Dangling(_))
    }
}

/// Whether resolution deletes dangling rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Reconcile {
    #[default]
    Heal,
    /// Report dangling rows but leave the catalog untouched.
    ReportOnly,
}

/// Valid records plus the dangling ones reclaimed along the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled<T> {
    pub valid: Vec<T>,
    pub dangling: Vec<T>,
}

impl<T> Default for Reconciled<T> {
    fn default() -> Self {
        Self {
            valid: Vec::new(),
            dangling: Vec::new(),
        }
    }
}

/// Repository mediating between the catalog and the notes tree.
pub struct BinderRepository<'conn> {
    conn: &'conn Connection,
    layout: BinderLayout,
    author: String,
}

impl<'conn> BinderRepository<'conn> {
    /// Creates repository from a migrated catalog connection.
    pub fn try_new(conn: &'conn Connection, layout: BinderLayout) -> BinderResult<Self> {
        SqliteCatalogRepository::try_new(conn)?;
        Ok(Self {
            conn,
            layout,
            author: String::new(),
        })
    }

    /// Sets the author written into new boilerplate files.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn layout(&self) -> &BinderLayout {
        &self.layout
    }

    /// Resolves one subject by name, healing it when dangling.
    pub fn resolve_subject(&self, name: &str) -> BinderResult<Resolution<Subject>> {
        self.resolve_subject_with(name, Reconcile::Heal)
    }

    pub fn resolve_subject_with(
        &self,
        name: &str,
        reconcile: Reconcile,
    ) -> BinderResult<Resolution<Subject>> {
        self.in_transaction(|catalog| self.resolve_subject_in(catalog, name.trim(), reconcile))
    }

    /// Resolves every subject, healing dangling rows.
    pub fn resolve_all_subjects(&self, order: SubjectOrder) -> BinderResult<Reconciled<Subject>> {
        self.resolve_all_subjects_with(order, Reconcile::Heal)
    }

    pub fn resolve_all_subjects_with(
        &self,
        order: SubjectOrder,
        reconcile: Reconcile,
    ) -> BinderResult<Reconciled<Subject>> {
        self.in_transaction(|catalog| {
            let mut result = Reconciled::default();
            for subject in catalog.list_subjects(order)? {
                if self.layout.subject_present(&subject.slug) {
                    result.valid.push(subject);
                } else {
                    self.heal_subject(catalog, &subject, reconcile)?;
                    result.dangling.push(subject);
                }
            }
            Ok(result)
        })
    }

    /// Resolves one note of an already resolved subject.
    pub fn resolve_note(&self, subject: &Subject, title: &str) -> BinderResult<Resolution<Note>> {
        self.resolve_note_with(subject, title, Reconcile::Heal)
    }

    pub fn resolve_note_with(
        &self,
        subject: &Subject,
        title: &str,
        reconcile: Reconcile,
    ) -> BinderResult<Resolution<Note>> {
        self.in_transaction(|catalog| self.resolve_note_in(catalog, subject, title.trim(), reconcile))
    }

    /// Resolves every note of a subject in insertion order.
    pub fn resolve_all_notes(&self, subject: &Subject) -> BinderResult<Reconciled<Note>> {
        self.resolve_all_notes_with(subject, Reconcile::Heal)
    }

    pub fn resolve_all_notes_with(
        &self,
        subject: &Subject,
        reconcile: Reconcile,
    ) -> BinderResult<Reconciled<Note>> {
        self.in_transaction(|catalog| {
            let mut result = Reconciled::default();
            for note in catalog.list_notes(subject.id)? {
                if self.layout.note_present(&subject.slug, &note.slug) {
                    result.valid.push(note);
                } else {
                    self.heal_note(catalog, subject, &note, reconcile)?;
                    result.dangling.push(note);
                }
            }
            Ok(result)
        })
    }

    /// Creates a subject: catalog row, directory, `graphics/` and the shared
    /// stylesheet link, all or nothing.
    pub fn create_subject(&self, name: &str) -> BinderResult<Subject> {
        let (name, slug) = normalize_name(name)?;
        let entity = EntityRef::subject(&name);

        let tx = self.begin()?;
        let (subject, tree) = {
            let catalog = SqliteCatalogRepository::new_unchecked(&tx);
            let checked = self.ensure_subject_free(&catalog, &name, &slug, &entity);
            if let Err(err) = checked {
                drop(catalog);
                return self.finish(tx, Err(err));
            }

            let subject = catalog
                .insert_subject(&name, &slug)
                .map_err(|err| collision_or_storage(err, &entity))?;
            let tree = self
                .layout
                .create_subject_tree(&slug)
                .map_err(|source| BinderError::Io {
                    path: self.layout.subject_dir(&slug),
                    source,
                })?;
            (subject, tree)
        };

        if let Err(err) = tx.commit() {
            tree.rollback();
            return Err(err.into());
        }
        info!(
            "event=subject_create module=binder status=ok subject_id={} slug={}",
            subject.id, subject.slug
        );
        Ok(subject)
    }

    /// Creates a note inside an existing subject and writes its boilerplate
    /// file. An existing file is kept unless `force` is set.
    pub fn create_note(&self, subject_name: &str, title: &str, force: bool) -> BinderResult<Note> {
        let (title, slug) = normalize_name(title)?;
        let subject_name = subject_name.trim();
        let entity = EntityRef::note(subject_name, &title);

        let tx = self.begin()?;
        let (note, written) = {
            let catalog = SqliteCatalogRepository::new_unchecked(&tx);
            let prepared = self
                .require_subject(&catalog, subject_name)
                .and_then(|subject| {
                    self.ensure_note_free(&catalog, &subject, &title, &slug, &entity)?;
                    Ok(subject)
                });
            let subject = match prepared {
                Ok(subject) => subject,
                Err(err) => {
                    drop(catalog);
                    return self.finish(tx, Err(err));
                }
            };

            let note = catalog
                .insert_note(subject.id, &title, &slug)
                .map_err(|err| collision_or_storage(err, &entity))?;
            let written = self.write_boilerplate(&subject, &note, force)?;
            catalog.touch_subject(subject.id)?;
            (note, written)
        };

        if let Err(err) = tx.commit() {
            if let Some(path) = written {
                let _ = std::fs::remove_file(path);
            }
            return Err(err.into());
        }
        info!(
            "event=note_create module=binder status=ok note_id={} subject_id={} slug={}",
            note.id, note.subject_id, note.slug
        );
        Ok(note)
    }

    /// Deletes a subject row (cascading to its notes). With `delete_files`
    /// the subject directory is removed too; otherwise it is left orphaned on
    /// purpose. Returns the subject as it was before deletion.
    pub fn delete_subject(&self, name: &str, delete_files: bool) -> BinderResult<Subject> {
        let name = name.trim();
        self.in_transaction(|catalog| {
            let subject = self.require_subject(catalog, name)?;
            catalog.delete_subject(subject.id)?;
            if delete_files {
                self.layout
                    .remove_subject_tree(&subject.slug)
                    .map_err(|source| BinderError::Io {
                        path: self.layout.subject_dir(&subject.slug),
                        source,
                    })?;
            }
            info!(
                "event=subject_delete module=binder status=ok subject_id={} delete_files={}",
                subject.id, delete_files
            );
            Ok(subject)
        })
    }

    /// Deletes one note row and, with `delete_file`, its source file.
    pub fn delete_note(
        &self,
        subject_name: &str,
        title: &str,
        delete_file: bool,
    ) -> BinderResult<Note> {
        let subject_name = subject_name.trim();
        let title = title.trim();
        self.in_transaction(|catalog| {
            let subject = self.require_subject(catalog, subject_name)?;
            let note = match self.resolve_note_in(catalog, &subject, title, Reconcile::Heal)? {
                Resolution::Found(note) => note,
                Resolution::NotFound => {
                    return Err(BinderError::NotFound(EntityRef::note(subject_name, title)))
                }
                Resolution::Dangling(_) => {
                    return Err(BinderError::Dangling(EntityRef::note(subject_name, title)))
                }
            };
            catalog.delete_note(note.id)?;
            if delete_file {
                self.layout
                    .remove_note_file(&subject.slug, &note.slug)
                    .map_err(|source| BinderError::Io {
                        path: self.layout.note_path(&subject.slug, &note.slug),
                        source,
                    })?;
            }
            catalog.touch_subject(subject.id)?;
            info!(
                "event=note_delete module=binder status=ok note_id={} subject_id={} delete_file={}",
                note.id, subject.id, delete_file
            );
            Ok(note)
        })
    }

    fn begin(&self) -> BinderResult<Transaction<'conn>> {
        Ok(Transaction::new_unchecked(
            self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    fn finish<T>(&self, tx: Transaction<'_>, result: BinderResult<T>) -> BinderResult<T> {
        match result {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) if err.keeps_heals() => {
                tx.commit()?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    fn in_transaction<T>(
        &self,
        op: impl FnOnce(&SqliteCatalogRepository<'_>) -> BinderResult<T>,
    ) -> BinderResult<T> {
        let tx = self.begin()?;
        let result = {
            let catalog = SqliteCatalogRepository::new_unchecked(&tx);
            op(&catalog)
        };
        self.finish(tx, result)
    }

    fn resolve_subject_in<C: CatalogStore>(
        &self,
        catalog: &C,
        name: &str,
        reconcile: Reconcile,
    ) -> BinderResult<Resolution<Subject>> {
        let Some(subject) = catalog.find_subject_by_name(name)? else {
            return Ok(Resolution::NotFound);
        };
        if self.layout.subject_present(&subject.slug) {
            return Ok(Resolution::Found(subject));
        }
        self.heal_subject(catalog, &subject, reconcile)?;
        Ok(Resolution::Dangling(subject))
    }

    fn resolve_note_in<C: CatalogStore>(
        &self,
        catalog: &C,
        subject: &Subject,
        title: &str,
        reconcile: Reconcile,
    ) -> BinderResult<Resolution<Note>> {
        let Some(note) = catalog.find_note_by_title(subject.id, title)? else {
            return Ok(Resolution::NotFound);
        };
        if self.layout.note_present(&subject.slug, &note.slug) {
            return Ok(Resolution::Found(note));
        }
        self.heal_note(catalog, subject, &note, reconcile)?;
        Ok(Resolution::Dangling(note))
    }

    fn require_subject<C: CatalogStore>(&self, catalog: &C, name: &str) -> BinderResult<Subject> {
        match self.resolve_subject_in(catalog, name, Reconcile::Heal)? {
            Resolution::Found(subject) => Ok(subject),
            Resolution::NotFound => Err(BinderError::NotFound(EntityRef::subject(name))),
            Resolution::Dangling(_) => Err(BinderError::Dangling(EntityRef::subject(name))),
        }
    }

    fn ensure_subject_free<C: CatalogStore>(
        &self,
        catalog: &C,
        name: &str,
        slug: &str,
        entity: &EntityRef,
    ) -> BinderResult<()> {
        if let Resolution::Found(_) = self.resolve_subject_in(catalog, name, Reconcile::Heal)? {
            return Err(BinderError::AlreadyExists(entity.clone()));
        }
        if let Some(other) = catalog.find_subject_by_slug(slug)? {
            if self.layout.subject_present(&other.slug) {
                return Err(BinderError::AlreadyExists(entity.clone()));
            }
            self.heal_subject(catalog, &other, Reconcile::Heal)?;
        }
        Ok(())
    }

    fn ensure_note_free<C: CatalogStore>(
        &self,
        catalog: &C,
        subject: &Subject,
        title: &str,
        slug: &str,
        entity: &EntityRef,
    ) -> BinderResult<()> {
        if let Resolution::Found(_) =
            self.resolve_note_in(catalog, subject, title, Reconcile::Heal)?
        {
            return Err(BinderError::AlreadyExists(entity.clone()));
        }
        if let Some(other) = catalog.find_note_by_slug(subject.id, slug)? {
            if self.layout.note_present(&subject.slug, &other.slug) {
                return Err(BinderError::AlreadyExists(entity.clone()));
            }
            self.heal_note(catalog, subject, &other, Reconcile::Heal)?;
        }
        Ok(())
    }

    fn heal_subject<C: CatalogStore>(
        &self,
        catalog: &C,
        subject: &Subject,
        reconcile: Reconcile,
    ) -> BinderResult<()> {
        let path = self.layout.subject_dir(&subject.slug);
        if reconcile == Reconcile::ReportOnly {
            warn!(
                "event=dangling_subject module=binder status=skipped subject_id={} path={}",
                subject.id,
                path.display()
            );
            return Ok(());
        }
        catalog.delete_subject(subject.id)?;
        warn!(
            "event=dangling_subject module=binder status=healed subject_id={} path={}",
            subject.id,
            path.display()
        );
        Ok(())
    }

    fn heal_note<C: CatalogStore>(
        &self,
        catalog: &C,
        subject: &Subject,
        note: &Note,
        reconcile: Reconcile,
    ) -> BinderResult<()> {
        let path = self.layout.note_path(&subject.slug, &note.slug);
        if reconcile == Reconcile::ReportOnly {
            warn!(
                "event=dangling_note module=binder status=skipped note_id={} path={}",
                note.id,
                path.display()
            );
            return Ok(());
        }
        catalog.delete_note(note.id)?;
        warn!(
            "event=dangling_note module=binder status=healed note_id={} path={}",
            note.id,
            path.display()
        );
        Ok(())
    }

    /// Writes the boilerplate unless a file is kept. Returns the path when
    /// this call created a file that did not exist before.
    fn write_boilerplate(
        &self,
        subject: &Subject,
        note: &Note,
        force: bool,
    ) -> BinderResult<Option<PathBuf>> {
        let path = self.layout.note_path(&subject.slug, &note.slug);
        let io_err = |source: std::io::Error| BinderError::Io {
            path: path.clone(),
            source,
        };
        let existed = path.exists();
        if existed && !path.is_file() {
            return Err(io_err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "path exists and is not a regular file",
            )));
        }
        if existed && !force {
            info!(
                "event=note_file_kept module=binder status=skipped note_id={} path={}",
                note.id,
                path.display()
            );
            return Ok(None);
        }

        let content = template::note_boilerplate(&note.title, &self.author);
        std::fs::write(&path, content).map_err(io_err)?;
        Ok((!existed).then_some(path))
    }
}

fn collision_or_storage(err: CatalogError, entity: &EntityRef) -> BinderError {
    match err {
        CatalogError::UniqueViolation(_) => BinderError::AlreadyExists(entity.clone()),
        other => BinderError::Storage(other),
    }
}
