//! Batch use-cases over the binder repository.
//!
//! # Responsibility
//! - Run add/remove requests item by item, isolating each item's failure.
//! - Produce listings and compile targets from user-level selectors.
//!
//! # Invariants
//! - One failing item never aborts its siblings unless `strict` is set.
//! - Every processed item yields exactly one `BatchItem`.

use crate::binder::repository::{BinderError, BinderRepository, EntityRef, Resolution};
use crate::compile::pipeline::{CompileTarget, SubjectSelector};
use crate::compile::staging::NoteSelector;
use crate::model::note::Note;
use crate::model::subject::{Subject, SubjectOrder};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Selector for "every subject" or "every note of the subject".
pub const ALL_SELECTOR: &str = ":all:";
/// Selector for the subject's aggregate document.
pub const MAIN_SELECTOR: &str = ":main:";

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug)]
pub enum ServiceError {
    Binder(BinderError),
    /// Request shape is unusable, e.g. a note group without a subject.
    InvalidRequest(String),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binder(err) => write!(f, "{err}"),
            Self::InvalidRequest(message) => write!(f, "invalid request: {message}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Binder(err) => Some(err),
            Self::InvalidRequest(_) => None,
        }
    }
}

impl From<BinderError> for ServiceError {
    fn from(value: BinderError) -> Self {
        Self::Binder(value)
    }
}

/// What a batch did to one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    AddSubject,
    AddNote,
    RemoveSubject,
    RemoveNote,
}

#[derive(Debug)]
pub struct BatchItem {
    pub action: BatchAction,
    pub entity: EntityRef,
    pub result: Result<(), BinderError>,
}

impl BatchItem {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-item results of one batch, in processing order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
    /// Set when `strict` stopped the batch at a failing item.
    pub stopped_early: bool,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|item| item.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && !self.stopped_early
    }

    pub fn extend(&mut self, other: BatchReport) {
        self.items.extend(other.items);
        self.stopped_early |= other.stopped_early;
    }

    // Returns false when the batch must stop.
    fn push(
        &mut self,
        action: BatchAction,
        entity: EntityRef,
        result: Result<(), BinderError>,
        strict: bool,
    ) -> bool {
        match &result {
            Ok(()) => info!(
                "event=batch_item module=service status=ok action={:?}",
                action
            ),
            Err(err) => warn!(
                "event=batch_item module=service status=error action={:?} error_code={}",
                action,
                err.code()
            ),
        }
        let failed = result.is_err();
        self.items.push(BatchItem {
            action,
            entity,
            result,
        });
        if failed && strict {
            self.stopped_early = true;
            return false;
        }
        true
    }
}

/// Knobs shared by batch operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOptions {
    /// Overwrite existing note files with fresh boilerplate.
    pub force: bool,
    /// Stop at the first failing item.
    pub strict: bool,
    /// Remove files along with catalog rows.
    pub delete_files: bool,
}

/// One subject with its reconciled notes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectListing {
    pub subject: Subject,
    pub notes: Vec<Note>,
    /// Notes found dangling (and healed) while listing.
    pub dangling_notes: Vec<Note>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub subjects: Vec<SubjectListing>,
    /// Subjects found dangling (and healed) while listing.
    pub dangling_subjects: Vec<Subject>,
    /// Requested names absent from the catalog.
    pub missing: Vec<String>,
}

/// Batch orchestration over one repository.
pub struct BinderService<'repo, 'conn> {
    repo: &'repo BinderRepository<'conn>,
}

impl<'repo, 'conn> BinderService<'repo, 'conn> {
    pub fn new(repo: &'repo BinderRepository<'conn>) -> Self {
        Self { repo }
    }

    pub fn add_subjects<S: AsRef<str>>(&self, names: &[S], options: BatchOptions) -> BatchReport {
        let mut report = BatchReport::default();
        for name in names {
            let name = name.as_ref();
            let result = self.repo.create_subject(name).map(|_| ());
            if !report.push(
                BatchAction::AddSubject,
                EntityRef::subject(name.trim()),
                result,
                options.strict,
            ) {
                break;
            }
        }
        report
    }

    pub fn add_notes<S: AsRef<str>>(
        &self,
        subject_name: &str,
        titles: &[S],
        options: BatchOptions,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for title in titles {
            let title = title.as_ref();
            let result = self
                .repo
                .create_note(subject_name, title, options.force)
                .map(|_| ());
            if !report.push(
                BatchAction::AddNote,
                EntityRef::note(subject_name.trim(), title.trim()),
                result,
                options.strict,
            ) {
                break;
            }
        }
        report
    }

    pub fn remove_subjects<S: AsRef<str>>(
        &self,
        names: &[S],
        options: BatchOptions,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for name in names {
            let name = name.as_ref();
            let result = self
                .repo
                .delete_subject(name, options.delete_files)
                .map(|_| ());
            if !report.push(
                BatchAction::RemoveSubject,
                EntityRef::subject(name.trim()),
                result,
                options.strict,
            ) {
                break;
            }
        }
        report
    }

    /// Removes notes of one subject. `:all:` among `titles` removes every
    /// note; dangling notes met on the way are reported as failed items.
    pub fn remove_notes<S: AsRef<str>>(
        &self,
        subject_name: &str,
        titles: &[S],
        options: BatchOptions,
    ) -> BatchReport {
        let subject_name = subject_name.trim();
        let mut report = BatchReport::default();

        let remove_all = titles
            .iter()
            .any(|title| title.as_ref().trim() == ALL_SELECTOR);
        let titles: Vec<String> = if remove_all {
            match self.expand_all_notes(subject_name, &mut report, options.strict) {
                Some(titles) => titles,
                None => return report,
            }
        } else {
            titles
                .iter()
                .map(|title| title.as_ref().trim().to_string())
                .collect()
        };

        for title in titles {
            let result = self
                .repo
                .delete_note(subject_name, &title, options.delete_files)
                .map(|_| ());
            if !report.push(
                BatchAction::RemoveNote,
                EntityRef::note(subject_name, &title),
                result,
                options.strict,
            ) {
                break;
            }
        }
        report
    }

    /// Lists subjects and their notes. An empty `names` lists everything.
    pub fn list<S: AsRef<str>>(&self, names: &[S], order: SubjectOrder) -> ServiceResult<Listing> {
        let mut listing = Listing::default();

        let subjects = if names.is_empty() || names.iter().any(|n| n.as_ref() == ALL_SELECTOR) {
            let reconciled = self.repo.resolve_all_subjects(order)?;
            listing.dangling_subjects = reconciled.dangling;
            reconciled.valid
        } else {
            let mut subjects = Vec::new();
            for name in names {
                match self.repo.resolve_subject(name.as_ref())? {
                    Resolution::Found(subject) => subjects.push(subject),
                    Resolution::NotFound => listing.missing.push(name.as_ref().trim().to_string()),
                    Resolution::Dangling(subject) => listing.dangling_subjects.push(subject),
                }
            }
            subjects
        };

        for subject in subjects {
            let notes = self.repo.resolve_all_notes(&subject)?;
            listing.subjects.push(SubjectListing {
                subject,
                notes: notes.valid,
                dangling_notes: notes.dangling,
            });
        }
        Ok(listing)
    }

    fn expand_all_notes(
        &self,
        subject_name: &str,
        report: &mut BatchReport,
        strict: bool,
    ) -> Option<Vec<String>> {
        let subject = match self.repo.resolve_subject(subject_name) {
            Ok(Resolution::Found(subject)) => subject,
            Ok(Resolution::NotFound) => {
                report.push(
                    BatchAction::RemoveNote,
                    EntityRef::subject(subject_name),
                    Err(BinderError::NotFound(EntityRef::subject(subject_name))),
                    strict,
                );
                return None;
            }
            Ok(Resolution::Dangling(_)) => {
                report.push(
                    BatchAction::RemoveNote,
                    EntityRef::subject(subject_name),
                    Err(BinderError::Dangling(EntityRef::subject(subject_name))),
                    strict,
                );
                return None;
            }
            Err(err) => {
                report.push(
                    BatchAction::RemoveNote,
                    EntityRef::subject(subject_name),
                    Err(err),
                    strict,
                );
                return None;
            }
        };

        let notes = match self.repo.resolve_all_notes(&subject) {
            Ok(notes) => notes,
            Err(err) => {
                report.push(
                    BatchAction::RemoveNote,
                    EntityRef::subject(subject_name),
                    Err(err),
                    strict,
                );
                return None;
            }
        };
        for note in notes.dangling {
            let entity = EntityRef::note(subject_name, &note.title);
            let error = BinderError::Dangling(entity.clone());
            if !report.push(BatchAction::RemoveNote, entity, Err(error), strict) {
                return None;
            }
        }
        Some(notes.valid.into_iter().map(|note| note.title).collect())
    }
}

/// Parses one `SUBJECT [TITLE...]` group into a compile target.
///
/// - `:all:` as subject: every note of every subject.
/// - `SUBJECT` alone or `SUBJECT :all:`: every note of the subject.
/// - `SUBJECT :main:`: the subject's aggregate document.
/// - `SUBJECT TITLE...`: the named notes.
pub fn parse_compile_target<S: AsRef<str>>(group: &[S]) -> ServiceResult<CompileTarget> {
    let Some((subject, titles)) = group.split_first() else {
        return Err(ServiceError::InvalidRequest(
            "a compile target needs a subject".to_string(),
        ));
    };
    let subject = subject.as_ref().trim();
    let titles: Vec<&str> = titles.iter().map(|title| title.as_ref().trim()).collect();

    if subject == ALL_SELECTOR {
        return Ok(CompileTarget::new(SubjectSelector::All, NoteSelector::AllNotes));
    }
    if subject == MAIN_SELECTOR {
        return Err(ServiceError::InvalidRequest(format!(
            "{MAIN_SELECTOR} selects a document, not a subject"
        )));
    }

    let notes = if titles.is_empty() || titles.contains(&ALL_SELECTOR) {
        NoteSelector::AllNotes
    } else if titles == [MAIN_SELECTOR] {
        NoteSelector::Aggregate
    } else if titles.contains(&MAIN_SELECTOR) {
        return Err(ServiceError::InvalidRequest(format!(
            "{MAIN_SELECTOR} cannot be combined with note titles"
        )));
    } else {
        NoteSelector::Titles(titles.iter().map(|title| title.to_string()).collect())
    };
    Ok(CompileTarget::new(
        SubjectSelector::Named(subject.to_string()),
        notes,
    ))
}

#[cfg(test)]
mod tests {
    use super::{parse_compile_target, ServiceError};
    use crate::compile::pipeline::SubjectSelector;
    use crate::compile::staging::NoteSelector;

    #[test]
    fn parses_compile_selectors() {
        let target = parse_compile_target(&[":all:"]).unwrap();
        assert_eq!(target.subject, SubjectSelector::All);
        assert_eq!(target.notes, NoteSelector::AllNotes);

        let target = parse_compile_target(&["Calculus"]).unwrap();
        assert_eq!(target.subject, SubjectSelector::Named("Calculus".to_string()));
        assert_eq!(target.notes, NoteSelector::AllNotes);

        let target = parse_compile_target(&["Calculus", ":all:"]).unwrap();
        assert_eq!(target.notes, NoteSelector::AllNotes);

        let target = parse_compile_target(&["Calculus", ":main:"]).unwrap();
        assert_eq!(target.notes, NoteSelector::Aggregate);

        let target = parse_compile_target(&["Calculus", " Limits ", "Series"]).unwrap();
        assert_eq!(
            target.notes,
            NoteSelector::Titles(vec!["Limits".to_string(), "Series".to_string()])
        );
    }

    #[test]
    fn rejects_malformed_compile_groups() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            parse_compile_target(&empty),
            Err(ServiceError::InvalidRequest(_))
        ));
        assert!(matches!(
            parse_compile_target(&[":main:"]),
            Err(ServiceError::InvalidRequest(_))
        ));
        assert!(matches!(
            parse_compile_target(&["Calculus", ":main:", "Limits"]),
            Err(ServiceError::InvalidRequest(_))
        ));
    }
}
