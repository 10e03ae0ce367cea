//! Binder preferences file.
//!
//! # Responsibility
//! - Load `binder.pref.json` from the binder root, falling back to defaults.
//! - Resolve configured directories against the binder root.
//!
//! # Invariants
//! - A missing preferences file is not an error.
//! - Every resolved path is absolute when the binder root is absolute.
//! - The build directory is disjoint from the binder root, the notes, output
//!   and styles trees and the catalog file. It is wiped on every fresh run.

use crate::binder::layout::BinderLayout;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Component, Path, PathBuf};

/// Conventional preferences file name at the binder root.
pub const PREFERENCES_FILE_NAME: &str = "binder.pref.json";

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
    InvalidValue(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "cannot read preferences `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "malformed preferences `{}`: {source}", path.display())
            }
            Self::InvalidValue(message) => write!(f, "invalid preference: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::InvalidValue(_) => None,
        }
    }
}

/// External document compiler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Build driver executable.
    pub program: String,
    /// Engine the driver delegates to.
    pub engine: String,
    pub shell_escape: bool,
    pub synctex: bool,
    /// Appended verbatim before the document path.
    pub extra_args: Vec<String>,
    /// Source document extension, without the dot.
    pub document_extension: String,
    /// Produced artifact extension, without the dot.
    pub artifact_extension: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            program: "latexmk".to_string(),
            engine: "pdflatex".to_string(),
            shell_escape: true,
            synctex: true,
            extra_args: Vec::new(),
            document_extension: "tex".to_string(),
            artifact_extension: "pdf".to_string(),
        }
    }
}

/// Binder-wide preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinderConfig {
    #[serde(skip)]
    root: PathBuf,
    pub notes_dir: PathBuf,
    pub output_dir: PathBuf,
    pub styles_dir: PathBuf,
    pub build_dir: PathBuf,
    pub catalog_file: PathBuf,
    /// Author written into boilerplate documents.
    pub author: String,
    pub compiler: CompilerConfig,
    /// Worker count for compile runs; host parallelism when unset.
    pub workers: Option<usize>,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            notes_dir: PathBuf::from("notes"),
            output_dir: PathBuf::from("output"),
            styles_dir: PathBuf::from("stylesheets"),
            build_dir: PathBuf::from(".binder-build"),
            catalog_file: PathBuf::from("binder.sqlite3"),
            author: String::new(),
            compiler: CompilerConfig::default(),
            workers: None,
        }
    }
}

impl BinderConfig {
    /// Default preferences rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Loads `binder.pref.json` from `root`, or defaults when it is absent.
    pub fn load(root: impl AsRef<Path>) -> ConfigResult<Self> {
        let root = root.as_ref();
        let path = root.join(PREFERENCES_FILE_NAME);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::with_root(root));
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        Self::from_json(root, &text).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse { path, source },
            other => other,
        })
    }

    /// Parses preferences JSON rooted at `root`.
    pub fn from_json(root: impl Into<PathBuf>, text: &str) -> ConfigResult<Self> {
        let mut config: Self = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from(PREFERENCES_FILE_NAME),
            source,
        })?;
        config.root = root.into();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.workers == Some(0) {
            return Err(ConfigError::InvalidValue(
                "workers must be at least 1".to_string(),
            ));
        }
        for (key, value) in [
            ("compiler.program", &self.compiler.program),
            ("compiler.document_extension", &self.compiler.document_extension),
            ("compiler.artifact_extension", &self.compiler.artifact_extension),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue(format!("{key} must not be empty")));
            }
        }
        if self.compiler.artifact_extension == "log" {
            return Err(ConfigError::InvalidValue(
                "compiler.artifact_extension cannot be `log`".to_string(),
            ));
        }
        self.validate_build_dir()
    }

    fn validate_build_dir(&self) -> ConfigResult<()> {
        if lexical_normalize(&self.build_dir).as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue(
                "build_dir must not resolve to the binder root".to_string(),
            ));
        }
        let root = match std::env::current_dir() {
            Ok(cwd) => lexical_normalize(&cwd.join(&self.root)),
            Err(_) => lexical_normalize(&self.root),
        };
        let build = lexical_normalize(&root.join(&self.build_dir));
        if build == root || root.starts_with(&build) {
            return Err(ConfigError::InvalidValue(format!(
                "build_dir `{}` would contain the binder root",
                self.build_dir.display()
            )));
        }
        for (key, path) in [
            ("notes_dir", &self.notes_dir),
            ("output_dir", &self.output_dir),
            ("styles_dir", &self.styles_dir),
            ("catalog_file", &self.catalog_file),
        ] {
            let other = lexical_normalize(&root.join(path));
            if build.starts_with(&other) || other.starts_with(&build) {
                return Err(ConfigError::InvalidValue(format!(
                    "build_dir `{}` overlaps {key} `{}`",
                    self.build_dir.display(),
                    path.display()
                )));
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn notes_root(&self) -> PathBuf {
        self.root.join(&self.notes_dir)
    }

    pub fn output_root(&self) -> PathBuf {
        self.root.join(&self.output_dir)
    }

    pub fn styles_root(&self) -> PathBuf {
        self.root.join(&self.styles_dir)
    }

    pub fn build_root(&self) -> PathBuf {
        self.root.join(&self.build_dir)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.root.join(&self.catalog_file)
    }

    /// Notes-tree layout described by these preferences.
    pub fn layout(&self) -> BinderLayout {
        BinderLayout::new(
            self.notes_root(),
            self.styles_root(),
            self.compiler.document_extension.clone(),
        )
    }

    /// Configured worker count, or host parallelism.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }
}

/// Resolves `.` and `..` components without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(component),
            },
            other => normalized.push(other),
        }
    }
    normalized
}
