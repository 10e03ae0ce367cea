//! Filesystem layout of the binder notes tree.
//!
//! ```text
//! notes_root/<subject-slug>/
//!     <note-slug>.<doc-ext>
//!     graphics/
//!     styles -> styles_root
//! ```

use log::warn;
use std::io;
use std::path::{Path, PathBuf};

/// Conventional subdirectory for figures inside every subject.
pub const GRAPHICS_DIR_NAME: &str = "graphics";
/// Name of the shared-stylesheet link inside every subject.
pub const STYLES_LINK_NAME: &str = "styles";

/// Path arithmetic and directory management for the notes tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinderLayout {
    notes_root: PathBuf,
    styles_root: PathBuf,
    document_extension: String,
}

impl BinderLayout {
    pub fn new(
        notes_root: impl Into<PathBuf>,
        styles_root: impl Into<PathBuf>,
        document_extension: impl Into<String>,
    ) -> Self {
        Self {
            notes_root: notes_root.into(),
            styles_root: styles_root.into(),
            document_extension: document_extension.into(),
        }
    }

    pub fn notes_root(&self) -> &Path {
        &self.notes_root
    }

    pub fn styles_root(&self) -> &Path {
        &self.styles_root
    }

    pub fn document_extension(&self) -> &str {
        &self.document_extension
    }

    pub fn subject_dir(&self, subject_slug: &str) -> PathBuf {
        self.notes_root.join(subject_slug)
    }

    pub fn note_path(&self, subject_slug: &str, note_slug: &str) -> PathBuf {
        self.subject_dir(subject_slug)
            .join(format!("{note_slug}.{}", self.document_extension))
    }

    /// A subject is present when its directory exists and is a directory.
    pub fn subject_present(&self, subject_slug: &str) -> bool {
        self.subject_dir(subject_slug).is_dir()
    }

    /// A note is present when its subject directory holds a regular file for it.
    pub fn note_present(&self, subject_slug: &str, note_slug: &str) -> bool {
        self.note_path(subject_slug, note_slug).is_file()
    }

    /// Creates the subject directory with its conventional children.
    ///
    /// An already existing directory (left behind by a file-preserving
    /// delete) is adopted. On failure everything this call created is
    /// removed again.
    pub fn create_subject_tree(&self, subject_slug: &str) -> io::Result<CreatedTree> {
        std::fs::create_dir_all(&self.notes_root)?;
        let dir = self.subject_dir(subject_slug);
        let existed = dir.exists();
        if existed && !dir.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("`{}` exists and is not a directory", dir.display()),
            ));
        }

        let created = CreatedTree {
            dir,
            remove_on_rollback: !existed,
        };
        if let Err(err) = self.populate_subject_tree(&created.dir) {
            created.rollback();
            return Err(err);
        }
        Ok(created)
    }

    fn populate_subject_tree(&self, dir: &Path) -> io::Result<()> {
        std::fs::create_dir_all(dir.join(GRAPHICS_DIR_NAME))?;
        std::fs::create_dir_all(&self.styles_root)?;
        let link = dir.join(STYLES_LINK_NAME);
        if link.symlink_metadata().is_ok() {
            return Ok(());
        }
        let target = std::fs::canonicalize(&self.styles_root)?;
        link_dir(&target, &link)
    }

    /// Recursively removes one subject directory; a missing directory is fine.
    pub fn remove_subject_tree(&self, subject_slug: &str) -> io::Result<()> {
        match std::fs::remove_dir_all(self.subject_dir(subject_slug)) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    /// Removes one note file; a missing file is fine.
    pub fn remove_note_file(&self, subject_slug: &str, note_slug: &str) -> io::Result<()> {
        match std::fs::remove_file(self.note_path(subject_slug, note_slug)) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

/// Handle to a freshly created subject tree, used to undo the creation when
/// the surrounding catalog transaction fails.
#[derive(Debug)]
pub struct CreatedTree {
    dir: PathBuf,
    remove_on_rollback: bool,
}

impl CreatedTree {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Removes the directory if this creation made it.
    pub fn rollback(self) {
        if !self.remove_on_rollback {
            return;
        }
        if let Err(err) = std::fs::remove_dir_all(&self.dir) {
            warn!(
                "event=subject_tree_rollback module=binder status=error path={} error={}",
                self.dir.display(),
                err
            );
        }
    }
}

#[cfg(unix)]
fn link_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn link_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

#[cfg(not(any(unix, windows)))]
fn link_dir(_target: &Path, _link: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{BinderLayout, GRAPHICS_DIR_NAME, STYLES_LINK_NAME};

    fn layout(root: &std::path::Path) -> BinderLayout {
        BinderLayout::new(root.join("notes"), root.join("stylesheets"), "tex")
    }

    #[test]
    fn paths_follow_slug_convention() {
        let layout = BinderLayout::new("/b/notes", "/b/styles", "tex");
        assert_eq!(
            layout.note_path("calculus", "limits"),
            std::path::Path::new("/b/notes/calculus/limits.tex")
        );
    }

    #[test]
    fn create_subject_tree_makes_graphics_and_styles_link() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        let created = layout.create_subject_tree("calculus").unwrap();

        assert!(created.dir().join(GRAPHICS_DIR_NAME).is_dir());
        assert!(created.dir().join(STYLES_LINK_NAME).is_dir());
        assert!(layout.subject_present("calculus"));
    }

    #[test]
    fn rollback_removes_only_new_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());

        layout.create_subject_tree("fresh").unwrap().rollback();
        assert!(!layout.subject_present("fresh"));

        std::fs::create_dir_all(layout.subject_dir("kept")).unwrap();
        layout.create_subject_tree("kept").unwrap().rollback();
        assert!(layout.subject_present("kept"));
    }

    #[test]
    fn create_subject_tree_rejects_file_in_the_way() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        std::fs::create_dir_all(layout.notes_root()).unwrap();
        std::fs::write(layout.subject_dir("blocked"), b"not a dir").unwrap();

        assert!(layout.create_subject_tree("blocked").is_err());
        assert!(layout.subject_dir("blocked").is_file());
    }
}
