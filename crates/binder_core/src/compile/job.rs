//! Compile jobs and their outcomes.

use crate::model::note::NoteId;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File stem of the synthesized aggregate document, staged and published.
///
/// `_` never appears in a slug, so the stem cannot collide with a note.
pub const AGGREGATE_STEM: &str = "_main";

/// Sequence number of a job within one run.
pub type JobId = usize;

/// What a job compiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTarget {
    Note {
        note_id: NoteId,
        title: String,
        slug: String,
    },
    /// The subject's aggregate document.
    Aggregate,
}

impl JobTarget {
    /// File stem shared by the staged source, the artifact and the log.
    pub fn stem(&self) -> &str {
        match self {
            Self::Note { slug, .. } => slug,
            Self::Aggregate => AGGREGATE_STEM,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Note { title, .. } => title,
            Self::Aggregate => "(aggregate)",
        }
    }
}

/// One unit of work: compile one staged document. Immutable once queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileJob {
    pub id: JobId,
    pub subject_name: String,
    pub subject_slug: String,
    pub target: JobTarget,
    /// Staged source document.
    pub source: PathBuf,
    /// Where the compiler is expected to leave the artifact.
    pub artifact: PathBuf,
    /// Where the compiler is expected to leave its own log.
    pub compiler_log: PathBuf,
}

impl CompileJob {
    /// Staged subject directory; the compiler runs here.
    pub fn working_dir(&self) -> &Path {
        self.source.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Key unique per (subject, document) pair within a run.
    pub fn key(&self) -> (&str, &str) {
        (&self.subject_slug, self.target.stem())
    }
}

/// Terminal state of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Artifact produced at the given staged path.
    Succeeded { artifact: PathBuf },
    /// Compiler could not run or exited non-zero.
    Failed { exit_code: Option<i32>, log: String },
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Outcome of one executed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job: CompileJob,
    pub status: JobStatus,
    pub duration: Duration,
}
