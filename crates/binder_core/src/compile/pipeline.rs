//! End-to-end compile run: resolve, stage, schedule, publish, clean up.
//!
//! # Responsibility
//! - Drive one run through the Staging Area, Compile Scheduler and Result
//!   Collector.
//! - Isolate per-subject and per-note failures in the report.
//!
//! # Invariants
//! - Only an unusable workspace or an unreachable catalog aborts a run.
//! - The workspace is closed on every path out of `run`.

use crate::binder::repository::{BinderError, BinderRepository, EntityRef};
use crate::compile::collector::{ResultCollector, SubjectTally};
use crate::compile::compiler::DocumentCompiler;
use crate::compile::scheduler::{
    default_worker_count, enqueue_jobs, CancelFlag, CompileScheduler, RunSummary,
};
use crate::compile::staging::{
    AggregateOrder, NoteSelector, StageError, StagedSubject, UnresolvedNote, Workspace,
    WorkspaceMode,
};
use crate::config::BinderConfig;
use crate::model::subject::SubjectOrder;
use log::{info, warn};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug)]
pub enum PipelineError {
    /// Build or output root could not be prepared or cleaned.
    Workspace(StageError),
    /// Catalog unusable for the whole run.
    Catalog(BinderError),
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Workspace(err) => write!(f, "workspace error: {err}"),
            Self::Catalog(err) => write!(f, "catalog error: {err}"),
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Workspace(err) => Some(err),
            Self::Catalog(err) => Some(err),
        }
    }
}

/// Which subjects a target covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectSelector {
    Named(String),
    /// Every valid subject in the catalog.
    All,
}

/// One subject selector paired with the notes to compile for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileTarget {
    pub subject: SubjectSelector,
    pub notes: NoteSelector,
}

impl CompileTarget {
    pub fn new(subject: SubjectSelector, notes: NoteSelector) -> Self {
        Self { subject, notes }
    }
}

/// Everything one run compiles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileRequest {
    pub targets: Vec<CompileTarget>,
}

impl CompileRequest {
    pub fn new(targets: Vec<CompileTarget>) -> Self {
        Self { targets }
    }

    pub fn single(subject: SubjectSelector, notes: NoteSelector) -> Self {
        Self::new(vec![CompileTarget::new(subject, notes)])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    pub workers: usize,
    pub mode: WorkspaceMode,
    pub aggregate_order: AggregateOrder,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            mode: WorkspaceMode::Fresh,
            aggregate_order: AggregateOrder::default(),
        }
    }
}

/// A subject or note that never became a job.
#[derive(Debug)]
pub struct StagingFailure {
    pub subject: String,
    pub error: StageError,
}

/// Result of one run.
#[derive(Debug)]
pub struct CompileReport {
    pub run_id: Uuid,
    pub staging_failures: Vec<StagingFailure>,
    /// Requested notes that were not staged, with their subject name.
    pub unresolved: Vec<(String, UnresolvedNote)>,
    pub summary: RunSummary,
    /// Per-subject counts from the collector, sorted by subject slug.
    pub tallies: Vec<(String, SubjectTally)>,
}

impl CompileReport {
    pub fn succeeded(&self) -> usize {
        self.summary.succeeded()
    }

    /// Failed jobs plus everything that never became a job.
    pub fn failed(&self) -> usize {
        self.summary.failed() + self.staging_failures.len() + self.unresolved.len()
    }

    pub fn cancelled(&self) -> usize {
        self.summary.cancelled.len()
    }

    /// True when every requested document compiled and was published.
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.cancelled() == 0
    }
}

/// Compile runs against one binder's preferences.
#[derive(Debug, Clone)]
pub struct CompilePipeline {
    build_root: PathBuf,
    output_root: PathBuf,
    artifact_extension: String,
    author: String,
    options: CompileOptions,
}

impl CompilePipeline {
    pub fn new(
        build_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        artifact_extension: impl Into<String>,
    ) -> Self {
        Self {
            build_root: build_root.into(),
            output_root: output_root.into(),
            artifact_extension: artifact_extension.into(),
            author: String::new(),
            options: CompileOptions::default(),
        }
    }

    pub fn from_config(config: &BinderConfig) -> Self {
        Self::new(
            config.build_root(),
            config.output_root(),
            config.compiler.artifact_extension.clone(),
        )
        .with_author(config.author.clone())
        .with_options(CompileOptions {
            workers: config.worker_count(),
            ..CompileOptions::default()
        })
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Runs `request` to completion or cancellation.
    pub fn run(
        &self,
        repo: &BinderRepository<'_>,
        compiler: &dyn DocumentCompiler,
        request: &CompileRequest,
        cancel: &CancelFlag,
    ) -> Result<CompileReport, PipelineError> {
        let run_id = Uuid::new_v4();
        info!(
            "event=compile_pipeline module=compile status=start run_id={} workers={}",
            run_id, self.options.workers
        );

        let plan = self.plan(repo, request)?;
        let workspace = Workspace::open(&self.build_root, &self.output_root, self.options.mode)
            .map_err(PipelineError::Workspace)?
            .with_aggregate_order(self.options.aggregate_order)
            .with_author(self.author.clone());

        let mut staged: Vec<StagedSubject> = Vec::new();
        let mut staging_failures = Vec::new();
        for (name, notes) in plan {
            match workspace.stage_subject(repo, &name, notes) {
                Ok(subject) => staged.push(subject),
                Err(StageError::Binder(BinderError::Storage(err))) => {
                    return Err(PipelineError::Catalog(BinderError::Storage(err)));
                }
                Err(error) => {
                    warn!(
                        "event=stage_subject module=compile status=error run_id={} error={}",
                        run_id, error
                    );
                    staging_failures.push(StagingFailure {
                        subject: name,
                        error,
                    });
                }
            }
        }

        let unresolved = staged
            .iter()
            .flat_map(|subject| {
                subject
                    .unresolved
                    .iter()
                    .map(|note| (subject.subject.name.clone(), note.clone()))
            })
            .collect();

        let queue = enqueue_jobs(&staged, &self.artifact_extension);
        let collector = ResultCollector::new(&self.output_root, self.artifact_extension.clone());
        let summary = CompileScheduler::new(self.options.workers)
            .run(queue, compiler, &collector, cancel);

        workspace.close().map_err(PipelineError::Workspace)?;

        let report = CompileReport {
            run_id,
            staging_failures,
            unresolved,
            summary,
            tallies: collector.tallies(),
        };
        info!(
            "event=compile_pipeline module=compile status=ok run_id={} succeeded={} failed={} cancelled={}",
            run_id,
            report.succeeded(),
            report.failed(),
            report.cancelled()
        );
        Ok(report)
    }

    /// Expands targets into (subject name, selector) pairs, dropping exact
    /// duplicates while keeping request order.
    fn plan<'req>(
        &self,
        repo: &BinderRepository<'_>,
        request: &'req CompileRequest,
    ) -> Result<Vec<(String, &'req NoteSelector)>, PipelineError> {
        let mut all_subjects: Option<Vec<String>> = None;
        let mut seen = BTreeSet::new();
        let mut plan = Vec::new();

        for target in &request.targets {
            let names = match &target.subject {
                SubjectSelector::Named(name) => vec![name.trim().to_string()],
                SubjectSelector::All => match &all_subjects {
                    Some(names) => names.clone(),
                    None => {
                        let names = valid_subject_names(repo)?;
                        all_subjects = Some(names.clone());
                        names
                    }
                },
            };
            for name in names {
                if seen.insert((name.clone(), target.notes.clone())) {
                    plan.push((name, &target.notes));
                }
            }
        }
        Ok(plan)
    }
}

fn valid_subject_names(repo: &BinderRepository<'_>) -> Result<Vec<String>, PipelineError> {
    let reconciled = repo
        .resolve_all_subjects(SubjectOrder::Name)
        .map_err(PipelineError::Catalog)?;
    for subject in &reconciled.dangling {
        warn!(
            "event=compile_pipeline module=compile status=skipped reason={} subject_id={}",
            BinderError::Dangling(EntityRef::subject(&subject.name)).code(),
            subject.id
        );
    }
    Ok(reconciled
        .valid
        .into_iter()
        .map(|subject| subject.name)
        .collect())
}
