use binder_core::binder::layout::{BinderLayout, GRAPHICS_DIR_NAME, STYLES_LINK_NAME};
use binder_core::binder::repository::{
    BinderError, BinderRepository, EntityRef, Reconcile, Resolution,
};
use binder_core::db::open_db_in_memory;
use binder_core::model::subject::SubjectOrder;
use rusqlite::Connection;
use std::path::Path;

fn layout(root: &Path) -> BinderLayout {
    BinderLayout::new(root.join("notes"), root.join("stylesheets"), "tex")
}

fn row_count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}

#[test]
fn create_subject_builds_directory_tree_and_row() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let repo = BinderRepository::try_new(&conn, layout(dir.path())).unwrap();

    let subject = repo.create_subject("  Calculus  ").unwrap();
    assert_eq!(subject.name, "Calculus");
    assert_eq!(subject.slug, "calculus");

    let subject_dir = dir.path().join("notes").join("calculus");
    assert!(subject_dir.join(GRAPHICS_DIR_NAME).is_dir());
    assert!(subject_dir.join(STYLES_LINK_NAME).is_dir());
    assert!(dir.path().join("stylesheets").is_dir());

    let resolved = repo.resolve_subject("Calculus").unwrap();
    assert_eq!(resolved, Resolution::Found(subject));
}

#[test]
fn create_subject_rejects_name_and_slug_collisions() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let repo = BinderRepository::try_new(&conn, layout(dir.path())).unwrap();

    repo.create_subject("Linear Algebra").unwrap();

    let err = repo.create_subject("Linear Algebra").unwrap_err();
    assert!(matches!(err, BinderError::AlreadyExists(_)));

    let err = repo.create_subject("linear--algebra").unwrap_err();
    assert!(matches!(
        err,
        BinderError::AlreadyExists(EntityRef::Subject { ref name }) if name == "linear--algebra"
    ));
    assert_eq!(row_count(&conn, "subjects"), 1);
}

#[test]
fn create_subject_rejects_names_without_slug_characters() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let repo = BinderRepository::try_new(&conn, layout(dir.path())).unwrap();

    let err = repo.create_subject("!!! ---").unwrap_err();
    assert!(matches!(err, BinderError::InvalidName(_)));
    assert_eq!(err.code(), "invalid_name");
    assert_eq!(row_count(&conn, "subjects"), 0);
}

#[test]
fn missing_subject_directory_is_healed_on_resolve() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let repo = BinderRepository::try_new(&conn, layout(dir.path())).unwrap();

    let subject = repo.create_subject("Physics").unwrap();
    repo.create_note("Physics", "Kinematics", false).unwrap();
    std::fs::remove_dir_all(dir.path().join("notes").join("physics")).unwrap();

    let resolved = repo.resolve_subject("Physics").unwrap();
    assert_eq!(resolved, Resolution::Dangling(subject));
    assert_eq!(row_count(&conn, "subjects"), 0);
    assert_eq!(row_count(&conn, "notes"), 0);

    assert_eq!(repo.resolve_subject("Physics").unwrap(), Resolution::NotFound);
}

#[test]
fn report_only_resolution_leaves_dangling_rows_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let repo = BinderRepository::try_new(&conn, layout(dir.path())).unwrap();

    repo.create_subject("Physics").unwrap();
    std::fs::remove_dir_all(dir.path().join("notes").join("physics")).unwrap();

    let resolved = repo
        .resolve_subject_with("Physics", Reconcile::ReportOnly)
        .unwrap();
    assert!(resolved.is_dangling());
    assert_eq!(row_count(&conn, "subjects"), 1);

    let all = repo
        .resolve_all_subjects_with(SubjectOrder::Name, Reconcile::ReportOnly)
        .unwrap();
    assert!(all.valid.is_empty());
    assert_eq!(all.dangling.len(), 1);
    assert_eq!(row_count(&conn, "subjects"), 1);
}

#[test]
fn resolve_all_subjects_returns_only_present_subjects() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let repo = BinderRepository::try_new(&conn, layout(dir.path())).unwrap();

    repo.create_subject("Physics").unwrap();
    repo.create_subject("Algebra").unwrap();
    repo.create_subject("Chemistry").unwrap();
    std::fs::remove_dir_all(dir.path().join("notes").join("chemistry")).unwrap();

    let all = repo.resolve_all_subjects(SubjectOrder::Name).unwrap();
    let names: Vec<&str> = all.valid.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Algebra", "Physics"]);
    assert_eq!(all.dangling.len(), 1);
    assert_eq!(all.dangling[0].name, "Chemistry");
    assert_eq!(row_count(&conn, "subjects"), 2);
}

#[test]
fn create_note_writes_boilerplate_and_keeps_existing_files_without_force() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let repo = BinderRepository::try_new(&conn, layout(dir.path()))
        .unwrap()
        .with_author("Ada");

    repo.create_subject("Calculus").unwrap();
    let note = repo.create_note("Calculus", "Limits", false).unwrap();
    assert_eq!(note.slug, "limits");

    let path = dir.path().join("notes").join("calculus").join("limits.tex");
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains(r"\chapter{Limits}"));
    assert!(text.contains(r"\author{Ada}"));

    // A file without a row is adopted as-is unless forced.
    std::fs::write(
        dir.path().join("notes").join("calculus").join("series.tex"),
        "my work",
    )
    .unwrap();
    repo.create_note("Calculus", "Series", false).unwrap();
    let kept = std::fs::read_to_string(dir.path().join("notes/calculus/series.tex")).unwrap();
    assert_eq!(kept, "my work");

    std::fs::write(dir.path().join("notes/calculus/derivatives.tex"), "draft").unwrap();
    repo.create_note("Calculus", "Derivatives", true).unwrap();
    let forced =
        std::fs::read_to_string(dir.path().join("notes/calculus/derivatives.tex")).unwrap();
    assert!(forced.contains(r"\chapter{Derivatives}"));
}

#[test]
fn create_note_requires_present_subject() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let repo = BinderRepository::try_new(&conn, layout(dir.path())).unwrap();

    let err = repo.create_note("Calculus", "Limits", false).unwrap_err();
    assert!(matches!(err, BinderError::NotFound(EntityRef::Subject { .. })));

    repo.create_subject("Calculus").unwrap();
    std::fs::remove_dir_all(dir.path().join("notes").join("calculus")).unwrap();
    let err = repo.create_note("Calculus", "Limits", false).unwrap_err();
    assert!(matches!(err, BinderError::Dangling(EntityRef::Subject { .. })));
    // The heal is kept although the operation failed.
    assert_eq!(row_count(&conn, "subjects"), 0);
}

#[test]
fn duplicate_note_title_is_rejected_but_dangling_row_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let repo = BinderRepository::try_new(&conn, layout(dir.path())).unwrap();

    repo.create_subject("Calculus").unwrap();
    let first = repo.create_note("Calculus", "Limits", false).unwrap();

    let err = repo.create_note("Calculus", "Limits", false).unwrap_err();
    assert!(matches!(err, BinderError::AlreadyExists(EntityRef::Note { .. })));

    std::fs::remove_file(dir.path().join("notes/calculus/limits.tex")).unwrap();
    let second = repo.create_note("Calculus", "Limits", false).unwrap();
    assert_ne!(first.id, second.id);
    assert!(dir.path().join("notes/calculus/limits.tex").is_file());
    assert_eq!(row_count(&conn, "notes"), 1);
}

#[test]
fn resolve_all_notes_heals_missing_files_in_insertion_order() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let repo = BinderRepository::try_new(&conn, layout(dir.path())).unwrap();

    let subject = repo.create_subject("Calculus").unwrap();
    for title in ["Series", "Limits", "Integrals"] {
        repo.create_note("Calculus", title, false).unwrap();
    }
    std::fs::remove_file(dir.path().join("notes/calculus/limits.tex")).unwrap();

    let notes = repo.resolve_all_notes(&subject).unwrap();
    let titles: Vec<&str> = notes.valid.iter().map(|n| n.title.as_str()).collect();
    assert_eq!(titles, vec!["Series", "Integrals"]);
    assert_eq!(notes.dangling.len(), 1);
    assert_eq!(notes.dangling[0].title, "Limits");

    assert_eq!(
        repo.resolve_note(&subject, "Limits").unwrap(),
        Resolution::NotFound
    );
    // Missing files are never recreated.
    assert!(!dir.path().join("notes/calculus/limits.tex").exists());
}

#[test]
fn delete_note_removes_file_only_when_asked() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let repo = BinderRepository::try_new(&conn, layout(dir.path())).unwrap();

    repo.create_subject("Calculus").unwrap();
    repo.create_note("Calculus", "Limits", false).unwrap();
    repo.create_note("Calculus", "Series", false).unwrap();

    repo.delete_note("Calculus", "Limits", true).unwrap();
    assert!(!dir.path().join("notes/calculus/limits.tex").exists());

    repo.delete_note("Calculus", "Series", false).unwrap();
    assert!(dir.path().join("notes/calculus/series.tex").is_file());
    assert_eq!(row_count(&conn, "notes"), 0);

    let err = repo.delete_note("Calculus", "Series", true).unwrap_err();
    assert!(matches!(err, BinderError::NotFound(EntityRef::Note { .. })));
}

#[test]
fn delete_note_on_missing_file_reports_dangling() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let repo = BinderRepository::try_new(&conn, layout(dir.path())).unwrap();

    repo.create_subject("Calculus").unwrap();
    repo.create_note("Calculus", "Limits", false).unwrap();
    std::fs::remove_file(dir.path().join("notes/calculus/limits.tex")).unwrap();

    let err = repo.delete_note("Calculus", "Limits", true).unwrap_err();
    assert!(matches!(err, BinderError::Dangling(_)));
    assert_eq!(row_count(&conn, "notes"), 0);
}

#[test]
fn delete_subject_cascades_and_optionally_removes_tree() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let repo = BinderRepository::try_new(&conn, layout(dir.path())).unwrap();

    repo.create_subject("Calculus").unwrap();
    repo.create_note("Calculus", "Limits", false).unwrap();
    repo.create_subject("Physics").unwrap();

    repo.delete_subject("Calculus", true).unwrap();
    assert!(!dir.path().join("notes/calculus").exists());
    assert_eq!(repo.resolve_subject("Calculus").unwrap(), Resolution::NotFound);
    assert!(dir.path().join("stylesheets").is_dir());
    assert_eq!(row_count(&conn, "notes"), 0);

    repo.delete_subject("Physics", false).unwrap();
    assert!(dir.path().join("notes/physics").is_dir());
    assert_eq!(row_count(&conn, "subjects"), 0);

    // A kept directory is adopted when the subject is added again.
    let again = repo.create_subject("Physics").unwrap();
    assert_eq!(again.slug, "physics");
}

#[test]
fn repository_rejects_unmigrated_connection() {
    let dir = tempfile::tempdir().unwrap();
    let conn = Connection::open_in_memory().unwrap();
    let result = BinderRepository::try_new(&conn, layout(dir.path()));
    assert!(matches!(result, Err(BinderError::Storage(_))));
}

#[test]
fn create_subject_rolls_back_row_when_directory_cannot_be_made() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let repo = BinderRepository::try_new(&conn, layout(dir.path())).unwrap();

    let notes_root = dir.path().join("notes");
    std::fs::create_dir_all(&notes_root).unwrap();
    let blocker = notes_root.join("calculus");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let err = repo.create_subject("Calculus").unwrap_err();
    assert!(matches!(err, BinderError::Io { ref path, .. } if path == &blocker));
    assert_eq!(row_count(&conn, "subjects"), 0);
    assert!(blocker.is_file());

    std::fs::remove_file(&blocker).unwrap();
    let subject = repo.create_subject("Calculus").unwrap();
    assert_eq!(subject.slug, "calculus");
    assert_eq!(row_count(&conn, "subjects"), 1);
}

#[test]
fn create_note_rolls_back_row_when_file_cannot_be_written() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let repo = BinderRepository::try_new(&conn, layout(dir.path())).unwrap();
    repo.create_subject("Calculus").unwrap();

    let blocker = dir.path().join("notes").join("calculus").join("limits.tex");
    std::fs::create_dir_all(&blocker).unwrap();

    let err = repo.create_note("Calculus", "Limits", false).unwrap_err();
    assert!(matches!(err, BinderError::Io { ref path, .. } if path == &blocker));
    assert_eq!(row_count(&conn, "notes"), 0);
    assert!(blocker.is_dir());

    std::fs::remove_dir(&blocker).unwrap();
    let note = repo.create_note("Calculus", "Limits", false).unwrap();
    assert_eq!(note.slug, "limits");
    assert!(blocker.is_file());
    assert_eq!(row_count(&conn, "notes"), 1);
}
