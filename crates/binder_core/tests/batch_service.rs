use binder_core::binder::layout::BinderLayout;
use binder_core::binder::repository::{BinderError, BinderRepository};
use binder_core::db::open_db_in_memory;
use binder_core::model::subject::SubjectOrder;
use binder_core::service::binder_service::{BatchAction, BatchOptions, BinderService};
use std::path::Path;

fn layout(root: &Path) -> BinderLayout {
    BinderLayout::new(root.join("notes"), root.join("stylesheets"), "tex")
}

#[test]
fn batch_add_isolates_failing_items() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let repo = BinderRepository::try_new(&conn, layout(dir.path())).unwrap();
    let service = BinderService::new(&repo);

    let report = service.add_subjects(
        &["Calculus", "Calculus", "", "Physics"],
        BatchOptions::default(),
    );
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 2);
    assert!(!report.stopped_early);
    assert!(matches!(
        report.items[1].result,
        Err(BinderError::AlreadyExists(_))
    ));
    assert!(matches!(report.items[2].result, Err(BinderError::InvalidName(_))));
    assert!(dir.path().join("notes/physics").is_dir());
}

#[test]
fn strict_batch_stops_at_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let repo = BinderRepository::try_new(&conn, layout(dir.path())).unwrap();
    let service = BinderService::new(&repo);
    service.add_subjects(&["Calculus"], BatchOptions::default());

    let strict = BatchOptions {
        strict: true,
        ..BatchOptions::default()
    };
    let report = service.add_notes("Calculus", &["Limits", "Limits", "Series"], strict);
    assert_eq!(report.items.len(), 2);
    assert!(report.stopped_early);
    assert!(!report.is_success());
    assert!(!dir.path().join("notes/calculus/series.tex").exists());
}

#[test]
fn remove_all_notes_reports_dangling_entries() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let repo = BinderRepository::try_new(&conn, layout(dir.path())).unwrap();
    let service = BinderService::new(&repo);
    service.add_subjects(&["Calculus"], BatchOptions::default());
    service.add_notes(
        "Calculus",
        &["Limits", "Series", "Integrals"],
        BatchOptions::default(),
    );
    std::fs::remove_file(dir.path().join("notes/calculus/series.tex")).unwrap();

    let report = service.remove_notes(
        "Calculus",
        &[":all:"],
        BatchOptions {
            delete_files: true,
            ..BatchOptions::default()
        },
    );
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert!(report
        .items
        .iter()
        .all(|item| item.action == BatchAction::RemoveNote));
    assert!(matches!(report.items[0].result, Err(BinderError::Dangling(_))));

    let entries: Vec<_> = std::fs::read_dir(dir.path().join("notes/calculus"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".tex"))
        .collect();
    assert!(entries.is_empty());
}

#[test]
fn remove_notes_of_unknown_subject_is_one_failed_item() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let repo = BinderRepository::try_new(&conn, layout(dir.path())).unwrap();
    let service = BinderService::new(&repo);

    let report = service.remove_notes("Chemistry", &[":all:"], BatchOptions::default());
    assert_eq!(report.items.len(), 1);
    assert!(matches!(report.items[0].result, Err(BinderError::NotFound(_))));
}

#[test]
fn remove_subjects_keeps_files_when_asked() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let repo = BinderRepository::try_new(&conn, layout(dir.path())).unwrap();
    let service = BinderService::new(&repo);
    service.add_subjects(&["Calculus", "Physics"], BatchOptions::default());

    let report = service.remove_subjects(&["Calculus", "Astronomy"], BatchOptions::default());
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);
    assert!(dir.path().join("notes/calculus").is_dir());

    let report = service.remove_subjects(
        &["Physics"],
        BatchOptions {
            delete_files: true,
            ..BatchOptions::default()
        },
    );
    assert!(report.is_success());
    assert!(!dir.path().join("notes/physics").exists());
}

#[test]
fn listing_reconciles_and_reports_missing_names() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_in_memory().unwrap();
    let repo = BinderRepository::try_new(&conn, layout(dir.path())).unwrap();
    let service = BinderService::new(&repo);
    service.add_subjects(&["Physics", "Algebra", "Biology"], BatchOptions::default());
    service.add_notes("Algebra", &["Groups", "Rings"], BatchOptions::default());
    std::fs::remove_file(dir.path().join("notes/algebra/rings.tex")).unwrap();
    std::fs::remove_dir_all(dir.path().join("notes/biology")).unwrap();

    let no_names: [&str; 0] = [];
    let listing = service.list(&no_names, SubjectOrder::Name).unwrap();
    let names: Vec<&str> = listing
        .subjects
        .iter()
        .map(|entry| entry.subject.name.as_str())
        .collect();
    assert_eq!(names, vec!["Algebra", "Physics"]);
    assert_eq!(listing.subjects[0].notes.len(), 1);
    assert_eq!(listing.subjects[0].dangling_notes[0].title, "Rings");
    assert_eq!(listing.dangling_subjects[0].name, "Biology");

    let listing = service
        .list(&["Physics", "Geology"], SubjectOrder::None)
        .unwrap();
    assert_eq!(listing.subjects.len(), 1);
    assert_eq!(listing.missing, vec!["Geology".to_string()]);
}
