use std::path::Path;
use std::sync::atomic::Ordering;

use kestrel_build_model::ProjectModel;
use kestrel_workspace::{AnalysisSession, FileIndex};
use tracing_test::traced_test;

mod support;

use support::FakeFactory;

fn names(index: &FileIndex, path: &Path) -> Vec<String> {
    index.get_symbols(path).into_iter().map(|s| s.name).collect()
}

#[test]
fn update_file_caches_symbols_and_reverse_entries() {
    let factory = FakeFactory::new();
    let session = AnalysisSession::new(ProjectModel::empty(), factory.clone());
    let index = FileIndex::new();
    let a = Path::new("/ws/src/A.kt");
    let b = Path::new("/ws/src/B.kt");

    session
        .update_file_content(a, "class Foo\nfun helper() {}\n")
        .unwrap();
    session.update_file_content(b, "class Foo").unwrap();

    assert_eq!(index.update_file(a, &session.snapshot()), Some(2));
    index.update_file(b, &session.snapshot());

    assert_eq!(names(&index, a), vec!["Foo", "helper"]);
    assert_eq!(
        index.find_files_by_symbol_name("Foo"),
        vec![a.to_path_buf(), b.to_path_buf()]
    );
    assert_eq!(index.find_files_by_symbol_name("helper"), vec![a.to_path_buf()]);
    assert_eq!(index.symbols_named("Foo").len(), 2);
}

#[test]
fn reindexing_drops_names_no_longer_declared() {
    let factory = FakeFactory::new();
    let session = AnalysisSession::new(ProjectModel::empty(), factory.clone());
    let index = FileIndex::new();
    let a = Path::new("/ws/src/A.kt");

    session.update_file_content(a, "class Old").unwrap();
    index.update_file(a, &session.snapshot());
    session.update_file_content(a, "class New").unwrap();
    index.update_file(a, &session.snapshot());

    assert!(index.find_files_by_symbol_name("Old").is_empty());
    assert_eq!(index.find_files_by_symbol_name("New"), vec![a.to_path_buf()]);
}

#[test]
fn remove_file_is_complete_and_idempotent() {
    let factory = FakeFactory::new();
    let session = AnalysisSession::new(ProjectModel::empty(), factory.clone());
    let index = FileIndex::new();
    let a = Path::new("/ws/src/A.kt");

    session.update_file_content(a, "class Foo\nclass Bar").unwrap();
    index.update_file(a, &session.snapshot());

    index.remove_file(a);
    assert!(index.get_symbols(a).is_empty());
    assert!(index.find_files_by_symbol_name("Foo").is_empty());
    assert!(index.find_files_by_symbol_name("Bar").is_empty());
    assert!(index.indexed_files().is_empty());

    index.remove_file(a);
    index.remove_file(Path::new("/ws/never-seen.kt"));
    assert!(index.is_empty());
}

#[test]
fn lookups_of_unknown_entries_are_empty() {
    let index = FileIndex::new();
    assert!(index.get_symbols(Path::new("/ws/Missing.kt")).is_empty());
    assert!(index.find_files_by_symbol_name("Missing").is_empty());
}

#[test]
#[traced_test]
fn facade_failure_indexes_the_file_as_empty() {
    let factory = FakeFactory::new();
    let session = AnalysisSession::new(ProjectModel::empty(), factory.clone());
    let index = FileIndex::new();
    let a = Path::new("/ws/src/A.kt");

    session.update_file_content(a, "class Foo").unwrap();
    index.update_file(a, &session.snapshot());
    assert_eq!(index.find_files_by_symbol_name("Foo"), vec![a.to_path_buf()]);

    factory.latest().fail_symbols.store(true, Ordering::SeqCst);
    assert_eq!(index.update_file(a, &session.snapshot()), Some(0));

    assert!(index.get_symbols(a).is_empty());
    assert!(index.find_files_by_symbol_name("Foo").is_empty());
    assert!(logs_contain("failed to compute file symbols"));
    assert!(logs_contain("symbol table unavailable"));
}

#[test]
fn late_results_from_a_replaced_session_leave_fresh_symbols_alone() {
    let factory = FakeFactory::new();
    factory
        .seed
        .lock()
        .unwrap()
        .insert(Path::new("/ws/src/A.kt").to_path_buf(), "class Foo".to_string());
    let session = AnalysisSession::new(ProjectModel::empty(), factory.clone());
    let index = FileIndex::new();
    let a = Path::new("/ws/src/A.kt");

    let old = session.snapshot();
    let new = session.rebuild(ProjectModel::empty());
    assert_eq!(index.update_file(a, &new), Some(1));

    // An edit that grabbed the old session before the rebuild finishes last.
    assert_eq!(index.update_file(a, &old), None);

    assert_eq!(index.find_files_by_symbol_name("Foo"), vec![a.to_path_buf()]);
    assert_eq!(names(&index, a), vec!["Foo"]);
}

#[test]
fn results_from_an_older_generation_do_not_overwrite_newer_ones() {
    let factory = FakeFactory::new();
    let session = AnalysisSession::new(ProjectModel::empty(), factory.clone());
    let index = FileIndex::new();
    let a = Path::new("/ws/src/A.kt");

    let old = session.snapshot();
    old.update_file_content(a, "class Stale").unwrap();
    let new = session.rebuild(ProjectModel::empty());
    new.update_file_content(a, "class Fresh").unwrap();

    assert_eq!(index.update_file(a, &new), Some(1));
    assert!(!index.replace_symbols(a, old.generation(), Vec::new()));

    assert_eq!(names(&index, a), vec!["Fresh"]);
    assert!(index.find_files_by_symbol_name("Stale").is_empty());
}
