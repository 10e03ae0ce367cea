//! Result Collector: publishes job outcomes into the output tree.
//!
//! # Responsibility
//! - Map each outcome to `<output_root>/<subject-slug>/<stem>.<ext>`.
//! - Keep exactly one of artifact or log per document after a publish.
//! - Tally successes and failures per subject for summary reporting.
//!
//! # Invariants
//! - Files are written to a temporary sibling then renamed into place, so a
//!   reader never observes a half-written artifact or log.
//! - Publishing the same outcome twice leaves the same filesystem state.

use crate::compile::job::{JobOutcome, JobStatus};
use log::info;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Extension of published failure logs.
pub const LOG_EXTENSION: &str = "log";

#[derive(Debug)]
pub struct PublishError {
    pub path: PathBuf,
    pub source: io::Error,
}

impl Display for PublishError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "publishing {}: {}", self.path.display(), self.source)
    }
}

impl Error for PublishError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

/// Succeeded/failed job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubjectTally {
    pub succeeded: usize,
    pub failed: usize,
}

impl SubjectTally {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Publishes outcomes under one output root. Safe to share across workers.
#[derive(Debug)]
pub struct ResultCollector {
    output_root: PathBuf,
    artifact_extension: String,
    tallies: Mutex<BTreeMap<String, BTreeMap<String, bool>>>,
}

impl ResultCollector {
    pub fn new(output_root: impl Into<PathBuf>, artifact_extension: impl Into<String>) -> Self {
        Self {
            output_root: output_root.into(),
            artifact_extension: artifact_extension.into(),
            tallies: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Published artifact path for a document.
    pub fn artifact_path(&self, subject_slug: &str, stem: &str) -> PathBuf {
        self.output_root
            .join(subject_slug)
            .join(format!("{stem}.{}", self.artifact_extension))
    }

    /// Published log path for a document.
    pub fn log_path(&self, subject_slug: &str, stem: &str) -> PathBuf {
        self.output_root
            .join(subject_slug)
            .join(format!("{stem}.{LOG_EXTENSION}"))
    }

    /// Places the outcome in the output tree and returns the published path.
    ///
    /// Success publishes the artifact and removes a stale log; failure
    /// publishes the log and removes a stale artifact.
    pub fn publish(&self, outcome: &JobOutcome) -> Result<PathBuf, PublishError> {
        let job = &outcome.job;
        let stem = job.target.stem();
        let subject_dir = self.output_root.join(&job.subject_slug);
        std::fs::create_dir_all(&subject_dir).map_err(|source| PublishError {
            path: subject_dir.clone(),
            source,
        })?;

        let artifact_path = self.artifact_path(&job.subject_slug, stem);
        let log_path = self.log_path(&job.subject_slug, stem);

        let published = match &outcome.status {
            JobStatus::Succeeded { artifact } => {
                let bytes = std::fs::read(artifact).map_err(|source| PublishError {
                    path: artifact.clone(),
                    source,
                })?;
                write_atomically(&artifact_path, &bytes)?;
                remove_if_present(&log_path)?;
                artifact_path
            }
            JobStatus::Failed { log, .. } => {
                write_atomically(&log_path, log.as_bytes())?;
                remove_if_present(&artifact_path)?;
                log_path
            }
        };

        self.record(&job.subject_slug, stem, outcome.status.is_success());
        info!(
            "event=publish module=compile status=ok job_id={} success={} path={}",
            job.id,
            outcome.status.is_success(),
            published.display()
        );
        Ok(published)
    }

    /// Records a failure that never reached the output tree.
    pub fn record_failure(&self, subject_slug: &str, stem: &str) {
        self.record(subject_slug, stem, false);
    }

    /// Counts for one subject, or zeros when nothing was published for it.
    pub fn subject_tally(&self, subject_slug: &str) -> SubjectTally {
        let tallies = self.tallies.lock().unwrap_or_else(PoisonError::into_inner);
        tallies
            .get(subject_slug)
            .map(tally_of)
            .unwrap_or_default()
    }

    /// Counts per subject slug, sorted by slug.
    pub fn tallies(&self) -> Vec<(String, SubjectTally)> {
        let tallies = self.tallies.lock().unwrap_or_else(PoisonError::into_inner);
        tallies
            .iter()
            .map(|(slug, documents)| (slug.clone(), tally_of(documents)))
            .collect()
    }

    pub fn totals(&self) -> SubjectTally {
        self.tallies()
            .into_iter()
            .fold(SubjectTally::default(), |acc, (_, tally)| SubjectTally {
                succeeded: acc.succeeded + tally.succeeded,
                failed: acc.failed + tally.failed,
            })
    }

    // Keyed by document, so a repeated publish overwrites instead of
    // double-counting.
    fn record(&self, subject_slug: &str, stem: &str, success: bool) {
        let mut tallies = self.tallies.lock().unwrap_or_else(PoisonError::into_inner);
        tallies
            .entry(subject_slug.to_string())
            .or_default()
            .insert(stem.to_string(), success);
    }
}

fn tally_of(documents: &BTreeMap<String, bool>) -> SubjectTally {
    let succeeded = documents.values().filter(|success| **success).count();
    SubjectTally {
        succeeded,
        failed: documents.len() - succeeded,
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), PublishError> {
    let mut temp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    temp_name.push(".partial");
    let temp = path.with_file_name(temp_name);

    std::fs::write(&temp, bytes).map_err(|source| PublishError {
        path: temp.clone(),
        source,
    })?;
    std::fs::rename(&temp, path).map_err(|source| {
        let _ = std::fs::remove_file(&temp);
        PublishError {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn remove_if_present(path: &Path) -> Result<(), PublishError> {
    match std::fs::remove_file(path) {
        Err(source) if source.kind() != io::ErrorKind::NotFound => Err(PublishError {
            path: path.to_path_buf(),
            source,
        }),
        _ => Ok(()),
    }
}
