//! Command-line entry point for the binder.
//!
//! # Responsibility
//! - Parse commands and map them onto `binder_core` services.
//! - Print one status line per item plus a summary, and pick the exit code.
//!
//! Exit codes: 0 when every item succeeded, 1 when any item failed, 2 when
//! the binder itself could not be opened.

use binder_core::compile::{
    AggregateOrder, CancelFlag, CommandCompiler, CompileOptions, CompilePipeline, CompileReport,
    CompileRequest, JobStatus, WorkspaceMode,
};
use binder_core::service::binder_service::{BatchItem, BatchOptions, BatchReport, BinderService, Listing};
use binder_core::{
    default_log_level, init_logging, open_db, parse_compile_target, BinderConfig,
    BinderRepository, SubjectOrder,
};
use clap::{Parser, Subcommand, ValueEnum};
use log::warn;
use std::path::PathBuf;
use std::process::ExitCode;

const EXIT_ITEM_FAILURE: u8 = 1;
const EXIT_FATAL: u8 = 2;

/// Keep a binder of subjects and notes, and compile them into documents.
#[derive(Parser)]
#[command(name = "binder")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Binder root holding the preferences file, catalog and notes tree.
    #[arg(short, long, global = true, default_value = ".")]
    root: PathBuf,

    /// Enable debug logging on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List subjects and their notes.
    List {
        /// Subjects to list; all subjects when omitted.
        subjects: Vec<String>,

        #[arg(long, value_enum, default_value_t = ListOrder::Name)]
        order: ListOrder,
    },

    /// Add subjects or notes.
    Add {
        #[command(subcommand)]
        target: AddTarget,

        /// Stop at the first failing item.
        #[arg(long, global = true)]
        strict: bool,
    },

    /// Remove subjects or notes.
    #[command(alias = "rm")]
    Remove {
        #[command(subcommand)]
        target: RemoveTarget,

        /// Drop catalog entries but leave files on disk.
        #[arg(long, global = true)]
        keep_files: bool,

        /// Stop at the first failing item.
        #[arg(long, global = true)]
        strict: bool,
    },

    /// Compile notes of a subject (`:all:` for every subject).
    #[command(alias = "make")]
    Compile {
        /// Subject name, or `:all:`.
        subject: String,

        /// Note titles, `:all:` for every note, or `:main:` for the aggregate document.
        notes: Vec<String>,

        /// Keep the build directory between runs.
        #[arg(long)]
        cache: bool,

        /// Worker count; defaults to the preferences or host parallelism.
        #[arg(short, long)]
        workers: Option<usize>,

        /// Section order of the aggregate document.
        #[arg(long, value_enum, default_value_t = SectionOrder::Insertion)]
        order: SectionOrder,
    },
}

#[derive(Subcommand)]
enum AddTarget {
    /// Add subjects.
    Subject {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Add notes to a subject.
    Note {
        subject: String,
        #[arg(required = true)]
        titles: Vec<String>,
        /// Overwrite existing note files with fresh boilerplate.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum RemoveTarget {
    /// Remove subjects with all their notes.
    Subject {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Remove notes from a subject (`:all:` for every note).
    Note {
        subject: String,
        #[arg(required = true)]
        titles: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ListOrder {
    None,
    Id,
    Name,
    Modified,
}

impl From<ListOrder> for SubjectOrder {
    fn from(value: ListOrder) -> Self {
        match value {
            ListOrder::None => Self::None,
            ListOrder::Id => Self::Id,
            ListOrder::Name => Self::Name,
            ListOrder::Modified => Self::Modified,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SectionOrder {
    Insertion,
    Title,
}

impl From<SectionOrder> for AggregateOrder {
    fn from(value: SectionOrder) -> Self {
        match value {
            SectionOrder::Insertion => Self::Insertion,
            SectionOrder::Title => Self::Title,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose {
        "debug"
    } else {
        default_log_level()
    };
    if let Err(err) = init_logging(level, None) {
        eprintln!("warning: logging disabled: {err}");
    }

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_ITEM_FAILURE),
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

/// Returns whether every item succeeded; `Err` is fatal.
fn run(cli: Cli) -> Result<bool, String> {
    let config = BinderConfig::load(&cli.root).map_err(|err| err.to_string())?;
    let conn = open_db(config.catalog_path()).map_err(|err| err.to_string())?;
    let repo = BinderRepository::try_new(&conn, config.layout())
        .map_err(|err| err.to_string())?
        .with_author(config.author.clone());
    let service = BinderService::new(&repo);

    match cli.command {
        Commands::List { subjects, order } => {
            let listing = service
                .list(&subjects, order.into())
                .map_err(|err| err.to_string())?;
            print_listing(&listing);
            Ok(listing.missing.is_empty())
        }
        Commands::Add { target, strict } => {
            let report = match target {
                AddTarget::Subject { names } => service.add_subjects(
                    &names,
                    BatchOptions {
                        strict,
                        ..BatchOptions::default()
                    },
                ),
                AddTarget::Note {
                    subject,
                    titles,
                    force,
                } => service.add_notes(
                    &subject,
                    &titles,
                    BatchOptions {
                        force,
                        strict,
                        ..BatchOptions::default()
                    },
                ),
            };
            print_batch(&report);
            Ok(report.is_success())
        }
        Commands::Remove {
            target,
            keep_files,
            strict,
        } => {
            let options = BatchOptions {
                strict,
                delete_files: !keep_files,
                ..BatchOptions::default()
            };
            let report = match target {
                RemoveTarget::Subject { names } => service.remove_subjects(&names, options),
                RemoveTarget::Note { subject, titles } => {
                    service.remove_notes(&subject, &titles, options)
                }
            };
            print_batch(&report);
            Ok(report.is_success())
        }
        Commands::Compile {
            subject,
            notes,
            cache,
            workers,
            order,
        } => {
            let mut group = vec![subject];
            group.extend(notes);
            let target = parse_compile_target(&group).map_err(|err| err.to_string())?;

            let pipeline = CompilePipeline::from_config(&config).with_options(CompileOptions {
                workers: workers.unwrap_or_else(|| config.worker_count()),
                mode: if cache {
                    WorkspaceMode::Cached
                } else {
                    WorkspaceMode::Fresh
                },
                aggregate_order: order.into(),
            });
            let compiler = CommandCompiler::from_config(&config.compiler);

            let cancel = CancelFlag::new();
            let handler_flag = cancel.clone();
            if let Err(err) = ctrlc::set_handler(move || handler_flag.cancel()) {
                warn!("event=signal_handler module=cli status=error error={err}");
            }

            let report = pipeline
                .run(&repo, &compiler, &CompileRequest::new(vec![target]), &cancel)
                .map_err(|err| err.to_string())?;
            print_compile(&report);
            Ok(report.is_success())
        }
    }
}

fn print_batch(report: &BatchReport) {
    for BatchItem {
        action,
        entity,
        result,
    } in &report.items
    {
        match result {
            Ok(()) => println!("ok      {action:?} {entity}"),
            Err(err) => println!("failed  {action:?} {entity}: {err}"),
        }
    }
    if report.stopped_early {
        println!("stopped at the first failure (--strict)");
    }
    println!(
        "{} succeeded, {} failed",
        report.succeeded(),
        report.failed()
    );
}

fn print_listing(listing: &Listing) {
    for entry in &listing.subjects {
        println!("{} ({})", entry.subject.name, entry.subject.slug);
        for note in &entry.notes {
            println!("    {} ({})", note.title, note.slug);
        }
        for note in &entry.dangling_notes {
            println!("    {} (missing file, removed from catalog)", note.title);
        }
    }
    for subject in &listing.dangling_subjects {
        println!("{} (missing directory, removed from catalog)", subject.name);
    }
    for name in &listing.missing {
        println!("{name} (not found)");
    }
}

fn print_compile(report: &CompileReport) {
    for failure in &report.staging_failures {
        println!("failed  {}: {}", failure.subject, failure.error);
    }
    for (subject, note) in &report.unresolved {
        println!("failed  {}", note.to_error(subject));
    }
    for done in &report.summary.completed {
        let job = &done.outcome.job;
        match (&done.outcome.status, &done.published) {
            (JobStatus::Succeeded { .. }, Ok(path)) => {
                println!("ok      {} / {} -> {}", job.subject_name, job.target.label(), path.display())
            }
            (JobStatus::Failed { exit_code, .. }, Ok(path)) => println!(
                "failed  {} / {} (exit {}) log: {}",
                job.subject_name,
                job.target.label(),
                exit_code.map_or_else(|| "none".to_string(), |code| code.to_string()),
                path.display()
            ),
            (_, Err(err)) => println!(
                "failed  {} / {}: {err}",
                job.subject_name,
                job.target.label()
            ),
        }
    }
    for job in &report.summary.cancelled {
        println!("cancelled {} / {}", job.subject_name, job.target.label());
    }
    println!(
        "{} succeeded, {} failed, {} cancelled",
        report.succeeded(),
        report.failed(),
        report.cancelled()
    );
}
