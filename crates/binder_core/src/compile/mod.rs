//! Compilation pipeline.
//!
//! Data flow for one run: `BinderRepository` resolves the request,
//! `staging::Workspace` materializes working copies, `scheduler` runs one
//! job per staged document on a worker pool, `collector` publishes every
//! outcome, and the workspace is cleaned up unless cached.

pub mod collector;
pub mod compiler;
pub mod job;
pub mod pipeline;
pub mod scheduler;
pub mod staging;

pub use collector::{PublishError, ResultCollector, SubjectTally};
pub use compiler::{execute, CommandCompiler, CompilerRun, DocumentCompiler};
pub use job::{CompileJob, JobId, JobOutcome, JobStatus, JobTarget, AGGREGATE_STEM};
pub use pipeline::{
    CompileOptions, CompilePipeline, CompileReport, CompileRequest, CompileTarget,
    PipelineError, StagingFailure, SubjectSelector,
};
pub use scheduler::{enqueue_jobs, CancelFlag, CompileScheduler, CompletedJob, JobQueue, RunSummary};
pub use staging::{
    AggregateOrder, NoteSelector, StageError, StagedDocument, StagedSubject, UnresolvedKind,
    UnresolvedNote, Workspace, WorkspaceMode,
};
