//! Teardown tests
//!
//! Closing is failure tolerant: every child and every cleanup action is
//! attempted, and all failures are reported together.

use basis_core::memory::{test_basis, test_minimal_project, test_target, Sandbox};
use basis_core::{Closer, CoreError};
use basis_types::TargetRecord;
use parking_lot::Mutex;
use std::sync::Arc;

fn record(id: &str, name: &str) -> TargetRecord {
    TargetRecord {
        resource_id: id.to_string(),
        name: name.to_string(),
        ..TargetRecord::default()
    }
}

fn logging_closer(log: &Arc<Mutex<Vec<String>>>, label: &str, fail: bool) -> Closer {
    let log = Arc::clone(log);
    let label = label.to_string();
    Box::new(move || {
        log.lock().push(label.clone());
        if fail {
            Err(CoreError::not_found("closer", label))
        } else {
            Ok(())
        }
    })
}

#[test]
fn project_close_attempts_every_target() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    for name in ["a", "b", "c"] {
        let target = test_target(&project, record(&format!("id-{name}"), name)).unwrap();
        target.closer(logging_closer(&log, name, false));
    }
    project.closer(logging_closer(&log, "project", false));
    sandbox.client.fail_target_upserts("b");

    let err = project.close().unwrap_err();
    assert!(err.status().is_some(), "the failed save surfaces: {err}");

    let mut seen = log.lock().clone();
    seen.sort();
    assert_eq!(seen, vec!["a", "b", "c", "project"]);
    assert!(project.loaded_targets().is_empty());
    assert!(basis.loaded_projects().is_empty());
}

#[test]
fn basis_close_aggregates_failures_from_every_level() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let web = basis.project("web").unwrap();
    let db = basis.project("db").unwrap();
    let cache = basis.project("cache").unwrap();
    web.closer(logging_closer(&log, "web", false));
    db.closer(logging_closer(&log, "db", true));
    cache.closer(logging_closer(&log, "cache", false));
    test_target(&cache, record("id-redis", "redis")).unwrap();
    sandbox.client.fail_target_upserts("redis");

    basis.closer(logging_closer(&log, "basis-1", true));
    basis.closer(logging_closer(&log, "basis-2", false));

    let err = basis.close().unwrap_err();
    let CoreError::Aggregate(agg) = err else {
        panic!("expected aggregate failure");
    };
    assert_eq!(agg.errors().len(), 3);
    let text = agg.to_string();
    assert!(text.starts_with("3 errors occurred:"));
    assert!(text.contains("closer not found: db"));
    assert!(text.contains("closer not found: basis-1"));

    let seen = log.lock().clone();
    assert_eq!(seen.len(), 5);
    assert_eq!(&seen[3..], &["basis-1".to_string(), "basis-2".to_string()]);
    assert!(basis.loaded_projects().is_empty());
}

#[test]
fn close_with_no_failures_is_ok() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();
    test_target(&project, record("id-0", "web")).unwrap();

    basis.close().unwrap();
    assert!(basis.loaded_projects().is_empty());
}

#[test]
fn dropped_basis_detaches_projects() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();

    basis.close().unwrap();
    drop(basis);

    assert!(matches!(project.basis(), Err(CoreError::Detached("basis"))));
    assert!(project.close().is_ok());
}
