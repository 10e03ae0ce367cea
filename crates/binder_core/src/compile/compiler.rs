//! External document compiler seam.
//!
//! # Invariants
//! - One blocking process per job, started in the job's staged directory.
//! - A running compiler is never killed; cancellation only stops dispatch.

use crate::compile::job::{CompileJob, JobStatus};
use crate::config::CompilerConfig;
use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Stdio};

/// Raw result of one compiler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerRun {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr.
    pub output: String,
}

/// Compiles one staged document. Implementations must be shareable across
/// worker threads.
pub trait DocumentCompiler: Sync {
    fn compile(&self, job: &CompileJob) -> std::io::Result<CompilerRun>;
}

/// Runs an external program with fixed arguments followed by the staged
/// document's file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCompiler {
    program: OsString,
    args: Vec<OsString>,
}

impl CommandCompiler {
    pub fn new(
        program: impl Into<OsString>,
        args: impl IntoIterator<Item = impl Into<OsString>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds the invocation from preferences.
    ///
    /// `latexmk` gets the engine wired in through `-pdflatex=`; any other
    /// program is treated as the engine itself.
    pub fn from_config(config: &CompilerConfig) -> Self {
        let mut engine_flags = Vec::new();
        if config.shell_escape {
            engine_flags.push("-shell-escape".to_string());
        }
        if config.synctex {
            engine_flags.push("-synctex=1".to_string());
        }
        engine_flags.push("-interaction=nonstopmode".to_string());

        let mut args = Vec::new();
        if is_latexmk(&config.program) {
            args.push("-pdf".to_string());
            args.push(format!(
                "-pdflatex={} {} %O %S",
                config.engine,
                engine_flags.join(" ")
            ));
            args.push("-interaction=nonstopmode".to_string());
        } else {
            args.extend(engine_flags);
        }
        args.push("-halt-on-error".to_string());
        args.extend(config.extra_args.iter().cloned());

        Self::new(config.program.as_str(), args)
    }

    pub fn program(&self) -> &OsString {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }
}

impl DocumentCompiler for CommandCompiler {
    fn compile(&self, job: &CompileJob) -> std::io::Result<CompilerRun> {
        let file_name = job
            .source
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| job.source.clone().into_os_string());
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(file_name)
            .current_dir(job.working_dir())
            .stdin(Stdio::null())
            .output()?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }

        Ok(CompilerRun {
            success: output.status.success(),
            exit_code: output.status.code(),
            output: text,
        })
    }
}

fn is_latexmk(program: &str) -> bool {
    Path::new(program)
        .file_stem()
        .is_some_and(|stem| stem == "latexmk")
}

/// Runs the compiler for one job and turns the result into a terminal status.
///
/// Any artifact or compiler log left in the staged directory is removed first,
/// so only files written by this run count. A zero exit without an artifact on
/// disk is a failure. The failure log is the compiler's own log file when it
/// wrote one, otherwise its captured output.
pub fn execute(compiler: &dyn DocumentCompiler, job: &CompileJob) -> JobStatus {
    for stale in [&job.artifact, &job.compiler_log] {
        if let Err(err) = remove_if_present(stale) {
            return JobStatus::Failed {
                exit_code: None,
                log: format!("cannot clear stale output {}: {err}\n", stale.display()),
            };
        }
    }

    let run = match compiler.compile(job) {
        Ok(run) => run,
        Err(err) => {
            return JobStatus::Failed {
                exit_code: None,
                log: format!("failed to start document compiler: {err}\n"),
            };
        }
    };

    if run.success {
        if job.artifact.is_file() {
            return JobStatus::Succeeded {
                artifact: job.artifact.clone(),
            };
        }
        let mut log = format!(
            "compiler exited successfully but produced no artifact at {}\n",
            job.artifact.display()
        );
        log.push_str(&run.output);
        return JobStatus::Failed {
            exit_code: run.exit_code,
            log,
        };
    }

    let log = match std::fs::read(&job.compiler_log) {
        Ok(bytes) if !bytes.is_empty() => String::from_utf8_lossy(&bytes).into_owned(),
        _ => run.output,
    };
    JobStatus::Failed {
        exit_code: run.exit_code,
        log,
    }
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::{execute, CommandCompiler, CompilerRun, DocumentCompiler};
    use crate::compile::job::{CompileJob, JobStatus, JobTarget};
    use crate::config::CompilerConfig;
    use std::path::Path;

    /// Exits with a fixed status and optionally writes raw bytes as its log.
    struct FixedCompiler {
        success: bool,
        log_bytes: Option<Vec<u8>>,
    }

    impl DocumentCompiler for FixedCompiler {
        fn compile(&self, job: &CompileJob) -> std::io::Result<CompilerRun> {
            if let Some(bytes) = &self.log_bytes {
                std::fs::write(&job.compiler_log, bytes)?;
            }
            Ok(CompilerRun {
                success: self.success,
                exit_code: Some(if self.success { 0 } else { 1 }),
                output: "captured output\n".to_string(),
            })
        }
    }

    fn job_in(dir: &Path) -> CompileJob {
        CompileJob {
            id: 0,
            subject_name: "Calculus".to_string(),
            subject_slug: "calculus".to_string(),
            target: JobTarget::Note {
                note_id: 1,
                title: "Limits".to_string(),
                slug: "limits".to_string(),
            },
            source: dir.join("limits.tex"),
            artifact: dir.join("limits.pdf"),
            compiler_log: dir.join("limits.log"),
        }
    }

    fn args_of(compiler: &CommandCompiler) -> Vec<String> {
        compiler
            .args()
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn latexmk_invocation_wires_engine_flags() {
        let compiler = CommandCompiler::from_config(&CompilerConfig::default());
        assert_eq!(compiler.program(), "latexmk");
        assert_eq!(
            args_of(&compiler),
            vec![
                "-pdf",
                "-pdflatex=pdflatex -shell-escape -synctex=1 -interaction=nonstopmode %O %S",
                "-interaction=nonstopmode",
                "-halt-on-error",
            ]
        );
    }

    #[test]
    fn bare_engine_invocation_takes_flags_directly() {
        let config = CompilerConfig {
            program: "lualatex".to_string(),
            shell_escape: false,
            synctex: false,
            extra_args: vec!["-file-line-error".to_string()],
            ..CompilerConfig::default()
        };
        let compiler = CommandCompiler::from_config(&config);
        assert_eq!(
            args_of(&compiler),
            vec![
                "-interaction=nonstopmode",
                "-halt-on-error",
                "-file-line-error"
            ]
        );
    }

    #[test]
    fn leftover_artifact_does_not_count_as_success() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_in(dir.path());
        std::fs::write(&job.artifact, b"%PDF stale").unwrap();
        std::fs::write(&job.compiler_log, b"stale log").unwrap();

        let compiler = FixedCompiler {
            success: true,
            log_bytes: None,
        };
        let status = execute(&compiler, &job);

        match status {
            JobStatus::Failed { log, .. } => assert!(log.contains("produced no artifact")),
            other => panic!("unexpected status: {other:?}"),
        }
        assert!(!job.artifact.exists());
        assert!(!job.compiler_log.exists());
    }

    #[test]
    fn non_utf8_compiler_log_is_kept_lossily() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_in(dir.path());
        let mut bytes = b"! Undefined control sequence: caf".to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b"\n");

        let compiler = FixedCompiler {
            success: false,
            log_bytes: Some(bytes),
        };
        let status = execute(&compiler, &job);

        match status {
            JobStatus::Failed { exit_code, log } => {
                assert_eq!(exit_code, Some(1));
                assert!(log.starts_with("! Undefined control sequence"));
                assert!(!log.contains("captured output"));
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }
}
