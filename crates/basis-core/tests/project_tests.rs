//! Project tests
//!
//! Target lookup, listing, idempotent loading, initialisation from machine
//! configuration and task execution.

use basis_core::dispatch::{DynFunc, Input, TypeTag, Value};
use basis_core::memory::{test_basis, test_minimal_project, test_target, Sandbox};
use basis_core::{CoreError, ProjectOption, TargetOption};
use basis_types::{
    BasisRef, CliArgs, JobInfo, MachineConfig, ProjectConfig, ProjectRecord, Task, TargetRecord,
    TargetState,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::BTreeSet;

fn record(id: &str, name: &str) -> TargetRecord {
    TargetRecord {
        resource_id: id.to_string(),
        name: name.to_string(),
        uuid: format!("uuid-{name}"),
        ..TargetRecord::default()
    }
}

#[test]
fn new_project_has_reference() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();

    let reference = project.ref_();
    assert!(!reference.resource_id.is_empty());
    assert_eq!(reference.name, "test-project");
    assert_eq!(reference.basis.resource_id, basis.resource_id());
    assert!(project.data_dir().path().is_dir());
}

#[test]
fn get_target_by_id_name_and_missing() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();

    let one = test_target(&project, record("id-one", "target-one")).unwrap();
    let two = test_target(&project, record("id-two", "target-two")).unwrap();

    assert_eq!(project.target("id-one", "").unwrap(), one);
    assert_eq!(project.target("target-two", "").unwrap(), two);

    let err = project.target("ohnooooo", "").unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err}");
    assert!(err.to_string().contains("ohnooooo"));
}

#[test]
fn unloaded_target_is_found_through_the_client() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();

    let mut stored = record("id-db", "db");
    stored.project = project.ref_();
    basis_core::PersistenceClient::upsert_target(sandbox.client.as_ref(), &sandbox.ctx, &stored)
        .unwrap();

    let by_name = project.target("db", "docker").unwrap();
    assert_eq!(by_name.resource_id(), "id-db");
    assert_eq!(by_name.provider_name(), "docker");
    assert_eq!(project.target("id-db", "").unwrap(), by_name);
}

#[test]
fn provider_override_skips_active_targets() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();

    let mut active = record("id-web", "web");
    active.provider = "virtualbox".to_string();
    active.state = TargetState::Created;
    let active = test_target(&project, active).unwrap();
    let idle = test_target(&project, record("id-db", "db")).unwrap();

    project.target("web", "docker").unwrap();
    project.target("db", "docker").unwrap();
    assert_eq!(active.provider_name(), "virtualbox");
    assert_eq!(idle.provider_name(), "docker");

    // resource id matches never assign a provider
    let cache = test_target(&project, record("id-cache", "cache")).unwrap();
    project.target("id-cache", "docker").unwrap();
    assert_eq!(cache.provider_name(), "");
}

#[test]
fn loading_same_resource_id_twice_returns_same_instance() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();

    let first = test_target(&project, record("id-0", "target-0")).unwrap();
    let again = project
        .load_target(vec![TargetOption::Ref(first.ref_())])
        .unwrap();
    let by_name = project
        .load_target(vec![TargetOption::Name("target-0".to_string())])
        .unwrap();

    assert_eq!(first, again);
    assert_eq!(first, by_name);
    assert_eq!(project.loaded_targets().len(), 1);
}

#[test]
fn load_target_reports_every_option_error() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();

    let err = project
        .load_target(vec![
            TargetOption::Name(String::new()),
            TargetOption::Ref(basis_types::TargetRef::named("missing", project.ref_())),
        ])
        .unwrap_err();

    match err {
        CoreError::Aggregate(agg) => assert_eq!(agg.errors().len(), 2),
        other => panic!("expected aggregate, got {other:?}"),
    }
}

#[test]
fn target_listing_starts_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();

    assert!(project.target_names().is_empty());
    assert!(project.target_ids().is_empty());
    assert!(project.targets().unwrap().is_empty());
}

#[test]
fn three_targets_are_listed() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();

    for i in 0..3 {
        test_target(&project, record(&format!("id-{i}"), &format!("target-{i}"))).unwrap();
    }

    let ids: BTreeSet<_> = project.target_ids().into_iter().collect();
    let names: BTreeSet<_> = project.target_names().into_iter().collect();
    assert_eq!(
        ids,
        ["id-0", "id-1", "id-2"].into_iter().map(String::from).collect()
    );
    assert_eq!(
        names,
        ["target-0", "target-1", "target-2"]
            .into_iter()
            .map(String::from)
            .collect()
    );
    assert_eq!(project.targets().unwrap().len(), 3);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn target_listing_matches_loaded_targets(n in 0usize..12) {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(tmp.path());
        let basis = test_basis(&sandbox).unwrap();
        let project = test_minimal_project(&basis).unwrap();

        for i in 0..n {
            test_target(&project, record(&format!("id-{i}"), &format!("target-{i}"))).unwrap();
        }

        let ids = project.target_ids();
        let names = project.target_names();
        prop_assert_eq!(ids.len(), n);
        prop_assert_eq!(names.len(), n);
        for i in 0..n {
            let id = format!("id-{i}");
            let name = format!("target-{i}");
            prop_assert!(ids.contains(&id));
            prop_assert!(names.contains(&name));
        }
    }
}

#[test]
fn active_targets_filters_by_state() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();

    let mut running = record("id-web", "web");
    running.state = TargetState::Created;
    test_target(&project, running).unwrap();
    test_target(&project, record("id-db", "db")).unwrap();

    let active = project.active_targets().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].name(), "web");
}

#[test]
fn project_from_another_basis_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();

    let alien = sandbox.client.insert_project(ProjectRecord {
        name: "alien".to_string(),
        basis: BasisRef {
            resource_id: "elsewhere".to_string(),
            name: "elsewhere".to_string(),
            path: String::new(),
        },
        ..ProjectRecord::default()
    });

    let err = basis
        .load_project(vec![ProjectOption::Ref(basis_types::ProjectRef {
            resource_id: alien.resource_id,
            ..basis_types::ProjectRef::default()
        })])
        .unwrap_err();
    assert!(matches!(err, CoreError::ConfigurationInvalid(_)));
    assert!(err.is_fatal());
}

#[test]
fn project_lookup_is_cached_per_basis() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();

    let first = basis.project("web").unwrap();
    let again = basis.project("web").unwrap();
    assert_eq!(first, again);
    assert_eq!(basis.projects().unwrap().len(), 1);
}

fn configured_project(
    basis: &basis_core::Basis,
    machines: &[&str],
) -> basis_core::Project {
    let config = ProjectConfig::new(
        machines
            .iter()
            .map(|m| MachineConfig::new(*m).with_provider("docker"))
            .collect(),
    );
    basis
        .load_project(vec![
            ProjectOption::Name("configured".to_string()),
            ProjectOption::Configuration(config),
        ])
        .unwrap()
}

#[test]
fn init_targets_creates_one_target_per_machine() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = configured_project(&basis, &["web", "db"]);

    project.init_targets(&sandbox.ctx).unwrap();
    project.init_targets(&sandbox.ctx).unwrap();

    let names: BTreeSet<_> = project.target_names().into_iter().collect();
    assert_eq!(names, ["db", "web"].into_iter().map(String::from).collect());
    let web = project.target("web", "").unwrap();
    assert_eq!(
        web.configuration().map(|c| c.name),
        Some("web".to_string())
    );
}

#[test]
fn init_targets_stops_at_first_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = configured_project(&basis, &["web", "db", "cache"]);
    sandbox.client.fail_target_upserts("db");

    let err = project.init_targets(&sandbox.ctx).unwrap_err();
    assert!(err.status().is_some());

    let stored: Vec<_> = sandbox
        .client
        .stored_targets()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(stored, vec!["web".to_string()]);
}

fn echo_task(name: &str) -> Task {
    Task::command("echo", name).with_args(CliArgs::positional(["hello", "world"]))
}

fn register_echo(sandbox: &Sandbox, exit_code: i32) {
    let ui = std::sync::Arc::clone(&sandbox.ui);
    sandbox.plugins.register_command("echo", move |subs| {
        let ui = std::sync::Arc::clone(&ui);
        let prefix = subs.join(" ");
        Ok(DynFunc::new("echo", TypeTag::ExitCode, move |args| {
            let cli: CliArgs = args.typed(TypeTag::CliArgs)?;
            let job: JobInfo = args.typed(TypeTag::JobInfo)?;
            let line = format!("{prefix}[{}]: {}", job.id, cli.args.join(" "));
            basis_core::Ui::output(ui.as_ref(), &line);
            Ok(Value::exit_code(exit_code))
        })
        .with_input(Input::typed(TypeTag::CliArgs))
        .with_input(Input::typed(TypeTag::JobInfo))
        .with_input(Input::named("project", TypeTag::Project)))
    });
}

#[test]
fn run_executes_command_with_task_inputs() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    register_echo(&sandbox, 0);
    let basis = test_basis(&sandbox).unwrap();
    let project = basis
        .load_project(vec![
            ProjectOption::Name("web".to_string()),
            ProjectOption::JobInfo(JobInfo {
                id: "job-1".to_string(),
                ..JobInfo::default()
            }),
        ])
        .unwrap();

    project.run(&sandbox.ctx, &echo_task("say loud")).unwrap();

    assert_eq!(sandbox.ui.outputs(), vec!["say loud[job-1]: hello world"]);
    assert_eq!(sandbox.ui.opened(), 1);
    assert_eq!(sandbox.ui.closed(), 1);
}

#[test]
fn run_wraps_non_zero_exit_code() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    register_echo(&sandbox, 3);
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();

    let err = project
        .run(&sandbox.ctx, &echo_task("say").with_job(JobInfo::default()))
        .unwrap_err();
    match err {
        CoreError::Run(run) => {
            assert_eq!(run.exit_code, Some(3));
            assert!(run.to_string().contains("exit code 3"));
        }
        other => panic!("expected run failure, got {other:?}"),
    }
}

#[test]
fn run_requires_an_exit_code_result() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    sandbox.plugins.register_command("describe", |_| {
        Ok(DynFunc::new("describe", TypeTag::Custom("text"), |_| {
            Ok(Value::new(TypeTag::Custom("text"), "not a code".to_string()))
        }))
    });
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();

    let err = project
        .run(&sandbox.ctx, &Task::command("describe", ""))
        .unwrap_err();
    match err {
        CoreError::Run(run) => {
            assert_eq!(run.exit_code, None);
            assert!(matches!(
                run.source.as_deref(),
                Some(CoreError::Dispatch(basis_core::DispatchError::TypeMismatch { .. }))
            ));
        }
        other => panic!("expected run failure, got {other:?}"),
    }
}

#[test]
fn run_wraps_invocation_errors() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    sandbox.plugins.register_command("broken", |_| {
        Ok(DynFunc::new("broken", TypeTag::ExitCode, |_| {
            Err(basis_core::DispatchError::remote(
                "broken",
                basis_types::Status::new(14, "unavailable"),
            ))
        }))
    });
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();

    let err = project
        .run(&sandbox.ctx, &Task::command("broken", ""))
        .unwrap_err();
    match err {
        CoreError::Run(run) => {
            assert_eq!(run.exit_code, None);
            assert_eq!(run.status.map(|s| s.code), Some(14));
        }
        other => panic!("expected run failure, got {other:?}"),
    }
    assert_eq!(sandbox.ui.opened(), sandbox.ui.closed());
}

#[test]
fn save_full_reports_every_failed_target() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();

    test_target(&project, record("id-a", "a")).unwrap();
    test_target(&project, record("id-b", "b")).unwrap();
    test_target(&project, record("id-c", "c")).unwrap();
    sandbox.client.fail_target_upserts("a");
    sandbox.client.fail_target_upserts("c");

    match project.save_full().unwrap_err() {
        CoreError::Aggregate(agg) => assert_eq!(agg.errors().len(), 2),
        other => panic!("expected aggregate, got {other:?}"),
    }
}
