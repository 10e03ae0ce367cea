//! Staging Area: an isolated build tree for one compile run.
//!
//! # Responsibility
//! - Own the temporary build root for the duration of one run.
//! - Copy each requested subject into it and synthesize aggregate documents.
//!
//! # Invariants
//! - Only resolved notes are staged; unresolved ones are reported, never
//!   compiled.
//! - The build root is removed on `close` unless the workspace is cached.

use crate::binder::repository::{BinderError, BinderRepository, EntityRef, Resolution};
use crate::binder::template;
use crate::compile::job::{JobTarget, AGGREGATE_STEM};
use crate::model::note::Note;
use crate::model::subject::Subject;
use log::{info, warn};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};

pub type StageResult<T> = Result<T, StageError>;

#[derive(Debug)]
pub enum StageError {
    /// Subject could not be resolved or read from the catalog.
    Binder(BinderError),
    Io { path: PathBuf, source: io::Error },
}

impl StageError {
    fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

impl Display for StageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binder(err) => write!(f, "{err}"),
            Self::Io { path, source } => write!(f, "staging {}: {source}", path.display()),
        }
    }
}

impl Error for StageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Binder(err) => Some(err),
            Self::Io { source, .. } => Some(source),
        }
    }
}

impl From<BinderError> for StageError {
    fn from(value: BinderError) -> Self {
        Self::Binder(value)
    }
}

/// Which notes of a subject to stage.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum NoteSelector {
    /// Explicit note titles.
    Titles(Vec<String>),
    /// Every note of the subject, compiled individually.
    AllNotes,
    /// Only the subject's aggregate document.
    Aggregate,
}

/// Section order inside a synthesized aggregate document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AggregateOrder {
    #[default]
    Insertion,
    /// By title; ties keep insertion order.
    Title,
}

/// Whether the build root survives the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkspaceMode {
    /// Cleared on open, removed on close.
    #[default]
    Fresh,
    /// Reused on open, preserved on close.
    Cached,
}

/// Why a requested note was not staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnresolvedKind {
    NotFound,
    Dangling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedNote {
    pub title: String,
    pub kind: UnresolvedKind,
}

impl UnresolvedNote {
    /// The matching binder error, for uniform reporting.
    pub fn to_error(&self, subject_name: &str) -> BinderError {
        let entity = EntityRef::note(subject_name, &self.title);
        match self.kind {
            UnresolvedKind::NotFound => BinderError::NotFound(entity),
            UnresolvedKind::Dangling => BinderError::Dangling(entity),
        }
    }
}

/// One document ready for compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedDocument {
    pub target: JobTarget,
    pub source: PathBuf,
}

/// A subject materialized in the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedSubject {
    pub subject: Subject,
    pub dir: PathBuf,
    pub documents: Vec<StagedDocument>,
    pub unresolved: Vec<UnresolvedNote>,
}

/// Temporary build tree owned by one compile run.
#[derive(Debug)]
pub struct Workspace {
    build_root: PathBuf,
    output_root: PathBuf,
    mode: WorkspaceMode,
    aggregate_order: AggregateOrder,
    author: String,
    closed: bool,
}

impl Workspace {
    /// Prepares the build root and output root.
    ///
    /// A leftover build root from an earlier run is cleared first unless
    /// `mode` is `Cached`.
    pub fn open(
        build_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        mode: WorkspaceMode,
    ) -> StageResult<Self> {
        let build_root = build_root.into();
        let output_root = output_root.into();

        if mode == WorkspaceMode::Fresh {
            remove_dir_if_present(&build_root).map_err(StageError::io(&build_root))?;
        }
        std::fs::create_dir_all(&build_root).map_err(StageError::io(&build_root))?;
        std::fs::create_dir_all(&output_root).map_err(StageError::io(&output_root))?;
        info!(
            "event=workspace_open module=compile status=ok mode={:?} build_root={}",
            mode,
            build_root.display()
        );

        Ok(Self {
            build_root,
            output_root,
            mode,
            aggregate_order: AggregateOrder::default(),
            author: String::new(),
            closed: false,
        })
    }

    pub fn with_aggregate_order(mut self, order: AggregateOrder) -> Self {
        self.aggregate_order = order;
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn build_root(&self) -> &Path {
        &self.build_root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Resolves `subject_name` and copies it into the workspace with the
    /// documents `selector` asks for.
    pub fn stage_subject(
        &self,
        repo: &BinderRepository<'_>,
        subject_name: &str,
        selector: &NoteSelector,
    ) -> StageResult<StagedSubject> {
        let subject_name = subject_name.trim();
        let subject = match repo.resolve_subject(subject_name)? {
            Resolution::Found(subject) => subject,
            Resolution::NotFound => {
                return Err(BinderError::NotFound(EntityRef::subject(subject_name)).into())
            }
            Resolution::Dangling(_) => {
                return Err(BinderError::Dangling(EntityRef::subject(subject_name)).into())
            }
        };

        let (notes, unresolved) = select_notes(repo, &subject, selector)?;
        for missing in &unresolved {
            warn!(
                "event=stage_note module=compile status=skipped subject_id={} kind={:?}",
                subject.id, missing.kind
            );
        }

        let source_dir = repo.layout().subject_dir(&subject.slug);
        let dir = self.build_root.join(&subject.slug);
        copy_tree(&source_dir, &dir)?;

        let extension = repo.layout().document_extension();
        let documents = match selector {
            NoteSelector::Aggregate => {
                let source = dir.join(format!("{AGGREGATE_STEM}.{extension}"));
                let ordered = order_notes(notes, self.aggregate_order);
                let includes = ordered
                    .iter()
                    .map(|note| (note.title.clone(), note.slug.clone()))
                    .collect::<Vec<_>>();
                let text = template::aggregate_document(&subject.name, &self.author, &includes);
                std::fs::write(&source, text).map_err(StageError::io(&source))?;
                vec![StagedDocument {
                    target: JobTarget::Aggregate,
                    source,
                }]
            }
            _ => notes
                .into_iter()
                .map(|note| StagedDocument {
                    source: dir.join(format!("{}.{extension}", note.slug)),
                    target: JobTarget::Note {
                        note_id: note.id,
                        title: note.title,
                        slug: note.slug,
                    },
                })
                .collect(),
        };

        info!(
            "event=stage_subject module=compile status=ok subject_id={} documents={} unresolved={}",
            subject.id,
            documents.len(),
            unresolved.len()
        );
        Ok(StagedSubject {
            subject,
            dir,
            documents,
            unresolved,
        })
    }

    /// Ends the run: removes the build root unless cached. Safe when nothing
    /// was staged.
    pub fn close(mut self) -> StageResult<()> {
        self.closed = true;
        self.cleanup()
    }

    fn cleanup(&self) -> StageResult<()> {
        if self.mode == WorkspaceMode::Cached {
            info!(
                "event=workspace_close module=compile status=skipped reason=cached build_root={}",
                self.build_root.display()
            );
            return Ok(());
        }
        remove_dir_if_present(&self.build_root).map_err(StageError::io(&self.build_root))?;
        info!(
            "event=workspace_close module=compile status=ok build_root={}",
            self.build_root.display()
        );
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.cleanup() {
            warn!("event=workspace_close module=compile status=error error={err}");
        }
    }
}

fn select_notes(
    repo: &BinderRepository<'_>,
    subject: &Subject,
    selector: &NoteSelector,
) -> StageResult<(Vec<Note>, Vec<UnresolvedNote>)> {
    match selector {
        NoteSelector::Titles(titles) => {
            let mut seen = BTreeSet::new();
            let mut notes = Vec::new();
            let mut unresolved = Vec::new();
            for title in titles {
                let title = title.trim();
                if !seen.insert(title.to_string()) {
                    continue;
                }
                match repo.resolve_note(subject, title)? {
                    Resolution::Found(note) => notes.push(note),
                    Resolution::NotFound => unresolved.push(UnresolvedNote {
                        title: title.to_string(),
                        kind: UnresolvedKind::NotFound,
                    }),
                    Resolution::Dangling(_) => unresolved.push(UnresolvedNote {
                        title: title.to_string(),
                        kind: UnresolvedKind::Dangling,
                    }),
                }
            }
            Ok((notes, unresolved))
        }
        NoteSelector::AllNotes | NoteSelector::Aggregate => {
            let reconciled = repo.resolve_all_notes(subject)?;
            let unresolved = reconciled
                .dangling
                .into_iter()
                .map(|note| UnresolvedNote {
                    title: note.title,
                    kind: UnresolvedKind::Dangling,
                })
                .collect();
            Ok((reconciled.valid, unresolved))
        }
    }
}

fn order_notes(mut notes: Vec<Note>, order: AggregateOrder) -> Vec<Note> {
    match order {
        AggregateOrder::Insertion => notes.sort_by_key(|note| note.id),
        AggregateOrder::Title => {
            notes.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)))
        }
    }
    notes
}

/// Recursively copies `from` into `to`, following symlinks and overwriting
/// existing files.
fn copy_tree(from: &Path, to: &Path) -> StageResult<()> {
    std::fs::create_dir_all(to).map_err(StageError::io(to))?;
    let entries = std::fs::read_dir(from).map_err(StageError::io(from))?;
    for entry in entries {
        let entry = entry.map_err(StageError::io(from))?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        let metadata = std::fs::metadata(&source).map_err(StageError::io(&source))?;
        if metadata.is_dir() {
            copy_tree(&source, &target)?;
        } else {
            std::fs::copy(&source, &target).map_err(StageError::io(&source))?;
        }
    }
    Ok(())
}

fn remove_dir_if_present(path: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::{copy_tree, order_notes, AggregateOrder, Workspace, WorkspaceMode};
    use crate::model::note::Note;

    fn note(id: i64, title: &str) -> Note {
        Note {
            id,
            subject_id: 1,
            title: title.to_string(),
            slug: title.to_lowercase(),
            created_at: 0,
            modified_at: 0,
        }
    }

    #[test]
    fn title_order_breaks_ties_by_insertion() {
        let notes = vec![note(3, "Beta"), note(2, "Alpha"), note(1, "Beta")];
        let ordered = order_notes(notes, AggregateOrder::Title);
        let ids: Vec<i64> = ordered.iter().map(|note| note.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);

        let ordered = order_notes(ordered, AggregateOrder::Insertion);
        let ids: Vec<i64> = ordered.iter().map(|note| note.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn open_clears_leftover_build_root_and_close_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let build = dir.path().join("build");
        std::fs::create_dir_all(build.join("stale")).unwrap();

        let workspace = Workspace::open(&build, dir.path().join("out"), WorkspaceMode::Fresh)
            .unwrap();
        assert!(build.is_dir());
        assert!(!build.join("stale").exists());
        assert!(dir.path().join("out").is_dir());

        workspace.close().unwrap();
        assert!(!build.exists());
    }

    #[test]
    fn cached_workspace_survives_close_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let build = dir.path().join("build");

        let workspace =
            Workspace::open(&build, dir.path().join("out"), WorkspaceMode::Cached).unwrap();
        std::fs::write(build.join("aux.fls"), b"cached").unwrap();
        workspace.close().unwrap();

        let reopened =
            Workspace::open(&build, dir.path().join("out"), WorkspaceMode::Cached).unwrap();
        assert!(build.join("aux.fls").is_file());
        drop(reopened);
        assert!(build.join("aux.fls").is_file());
    }

    #[test]
    fn dropping_unclosed_fresh_workspace_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let build = dir.path().join("build");
        {
            let _workspace =
                Workspace::open(&build, dir.path().join("out"), WorkspaceMode::Fresh).unwrap();
            assert!(build.is_dir());
        }
        assert!(!build.exists());
    }

    #[test]
    fn copy_tree_copies_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("from");
        std::fs::create_dir_all(from.join("graphics")).unwrap();
        std::fs::write(from.join("limits.tex"), b"body").unwrap();
        std::fs::write(from.join("graphics").join("plot.png"), b"png").unwrap();

        let to = dir.path().join("to");
        copy_tree(&from, &to).unwrap();
        assert_eq!(std::fs::read(to.join("limits.tex")).unwrap(), b"body");
        assert!(to.join("graphics").join("plot.png").is_file());
    }
}
