//! Compile Scheduler: a bounded worker pool over one shared job queue.
//!
//! # Responsibility
//! - Turn staged subjects into compile jobs, one per staged document.
//! - Run jobs on `workers` threads and hand every outcome to the collector.
//!
//! # Invariants
//! - Each queued job is popped by exactly one worker and reported once.
//! - Jobs never dispatched because of cancellation publish nothing.
//! - Workers share only the queue receiver and the collector.

use crate::compile::collector::{PublishError, ResultCollector};
use crate::compile::compiler::{execute, DocumentCompiler};
use crate::compile::job::{CompileJob, JobOutcome, JobStatus};
use crate::compile::staging::StagedSubject;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

/// Run-level cooperative cancellation. Clones share one flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops dispatch of new jobs; running compilers finish.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Jobs of one run, in enqueue order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobQueue {
    jobs: Vec<CompileJob>,
}

impl JobQueue {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn jobs(&self) -> &[CompileJob] {
        &self.jobs
    }
}

/// Creates one job per staged document across `staged`.
///
/// A document staged twice (same subject slug and stem) is queued once.
pub fn enqueue_jobs(staged: &[StagedSubject], artifact_extension: &str) -> JobQueue {
    let mut seen = BTreeSet::new();
    let mut jobs = Vec::new();

    for subject in staged {
        for document in &subject.documents {
            let stem = document.target.stem();
            if !seen.insert((subject.subject.slug.clone(), stem.to_string())) {
                continue;
            }
            let working_dir = document
                .source
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| subject.dir.clone());
            jobs.push(CompileJob {
                id: jobs.len(),
                subject_name: subject.subject.name.clone(),
                subject_slug: subject.subject.slug.clone(),
                target: document.target.clone(),
                source: document.source.clone(),
                artifact: working_dir.join(format!("{stem}.{artifact_extension}")),
                compiler_log: working_dir.join(format!("{stem}.log")),
            });
        }
    }

    JobQueue { jobs }
}

/// A job that ran to completion, with where its outcome landed.
#[derive(Debug)]
pub struct CompletedJob {
    pub outcome: JobOutcome,
    pub published: Result<PathBuf, PublishError>,
}

impl CompletedJob {
    /// Compiled and published.
    pub fn is_success(&self) -> bool {
        self.outcome.status.is_success() && self.published.is_ok()
    }
}

/// Everything a run did, in completion order.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub completed: Vec<CompletedJob>,
    /// Jobs left undispatched after cancellation, in queue order.
    pub cancelled: Vec<CompileJob>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.completed.iter().filter(|job| job.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.completed.len() - self.succeeded()
    }

    pub fn was_cancelled(&self) -> bool {
        !self.cancelled.is_empty()
    }
}

enum WorkerReport {
    Completed(Box<CompletedJob>),
    Cancelled(CompileJob),
}

/// Bounded worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileScheduler {
    workers: usize,
}

impl Default for CompileScheduler {
    fn default() -> Self {
        Self::new(default_worker_count())
    }
}

impl CompileScheduler {
    /// `workers` is clamped to at least one.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs every job in `queue` and returns once all workers have exited.
    pub fn run(
        &self,
        queue: JobQueue,
        compiler: &dyn DocumentCompiler,
        collector: &ResultCollector,
        cancel: &CancelFlag,
    ) -> RunSummary {
        let total = queue.len();
        let worker_count = self.workers.min(total.max(1));
        info!(
            "event=compile_run module=compile status=start jobs={} workers={}",
            total, worker_count
        );

        let (job_tx, job_rx) = mpsc::channel::<CompileJob>();
        for job in queue.jobs {
            // The receiver is alive until the scope below ends.
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let job_rx = Mutex::new(job_rx);
        let (report_tx, report_rx) = mpsc::channel::<WorkerReport>();
        let mut summary = RunSummary::default();

        thread::scope(|scope| {
            for worker in 0..worker_count {
                let job_rx = &job_rx;
                let report_tx = report_tx.clone();
                scope.spawn(move || {
                    worker_loop(worker, job_rx, &report_tx, compiler, collector, cancel)
                });
            }
            drop(report_tx);

            for report in report_rx {
                match report {
                    WorkerReport::Completed(done) => summary.completed.push(*done),
                    WorkerReport::Cancelled(job) => summary.cancelled.push(job),
                }
            }
        });

        // Whatever no worker popped was never dispatched.
        let job_rx = job_rx.into_inner().unwrap_or_else(PoisonError::into_inner);
        summary.cancelled.extend(job_rx.try_iter());
        summary.cancelled.sort_by_key(|job| job.id);

        if summary.was_cancelled() {
            warn!(
                "event=compile_run module=compile status=cancelled completed={} cancelled={}",
                summary.completed.len(),
                summary.cancelled.len()
            );
        } else {
            info!(
                "event=compile_run module=compile status=ok succeeded={} failed={}",
                summary.succeeded(),
                summary.failed()
            );
        }
        summary
    }
}

fn worker_loop(
    worker: usize,
    job_rx: &Mutex<mpsc::Receiver<CompileJob>>,
    report_tx: &mpsc::Sender<WorkerReport>,
    compiler: &dyn DocumentCompiler,
    collector: &ResultCollector,
    cancel: &CancelFlag,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let next = {
            let rx = job_rx.lock().unwrap_or_else(PoisonError::into_inner);
            rx.recv()
        };
        let Ok(job) = next else {
            break;
        };
        if cancel.is_cancelled() {
            let _ = report_tx.send(WorkerReport::Cancelled(job));
            break;
        }

        debug!(
            "event=compile_job module=compile status=start worker={} job_id={}",
            worker, job.id
        );
        let started = Instant::now();
        let status = execute(compiler, &job);
        let outcome = JobOutcome {
            job,
            status,
            duration: started.elapsed(),
        };
        log_outcome(worker, &outcome);

        let published = collector.publish(&outcome);
        if let Err(err) = &published {
            warn!(
                "event=publish module=compile status=error job_id={} error={}",
                outcome.job.id, err
            );
            let (subject_slug, stem) = outcome.job.key();
            collector.record_failure(subject_slug, stem);
        }

        let report = WorkerReport::Completed(Box::new(CompletedJob { outcome, published }));
        if report_tx.send(report).is_err() {
            break;
        }
    }
}

fn log_outcome(worker: usize, outcome: &JobOutcome) {
    let job = &outcome.job;
    let (subject, document) = job.key();
    let millis = outcome.duration.as_millis();
    match &outcome.status {
        JobStatus::Succeeded { .. } => info!(
            "event=compile_job module=compile status=ok worker={} job_id={} subject={} document={} duration_ms={}",
            worker, job.id, subject, document, millis
        ),
        JobStatus::Failed { exit_code, .. } => warn!(
            "event=compile_job module=compile status=error worker={} job_id={} subject={} document={} exit_code={:?} duration_ms={}",
            worker, job.id, subject, document, exit_code, millis
        ),
    }
}

/// Host parallelism, or 4 when it cannot be determined.
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(4)
}
