//! Target tests
//!
//! Specialization identity, machine state persistence and close-time saves.

use basis_core::dispatch::{DispatchError, DynFunc, Input, Scope, TypeTag, Value};
use basis_core::memory::{test_basis, test_minimal_project, test_target, Sandbox};
use basis_core::{Capability, CoreError, PersistenceClient, Specializer, Target};
use basis_types::{TargetRecord, TargetState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn record(id: &str, name: &str) -> TargetRecord {
    TargetRecord {
        resource_id: id.to_string(),
        name: name.to_string(),
        ..TargetRecord::default()
    }
}

#[test]
fn machine_specialization_is_identity_stable() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();
    let target = test_target(&project, record("id-0", "web")).unwrap();

    let first = target.specialize(Capability::Machine).unwrap();
    let second = target.specialize(Capability::Machine).unwrap();
    assert!(first.ptr_eq(&second));

    let machine = target.machine().unwrap();
    assert!(Arc::ptr_eq(&machine, &first.as_machine().unwrap()));
    assert_eq!(machine.target().unwrap(), target);
}

#[test]
fn machine_does_not_keep_its_target_alive() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();
    let target = test_target(&project, record("id-0", "web")).unwrap();
    let machine = target.machine().unwrap();
    assert_eq!(machine.target().unwrap().name(), "web");

    project.close().unwrap();
    drop(target);

    assert!(matches!(machine.target(), Err(CoreError::Detached("target"))));
    assert!(matches!(machine.state(), Err(CoreError::Detached("target"))));
    assert!(machine.set_state(TargetState::Created).is_err());
    assert_eq!(format!("{machine:?}"), "Machine(detached)");
}

#[test]
fn custom_specializer_runs_once_per_target() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();

    let builds = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&builds);
    let specializer: Specializer = Arc::new(move |target: &Target| -> Result<Value, CoreError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Value::new(TypeTag::Custom("label"), format!("label:{}", target.name())))
    });
    basis
        .register_specializer(Capability::Custom("label"), specializer)
        .unwrap();

    let web = test_target(&project, record("id-web", "web")).unwrap();
    let db = test_target(&project, record("id-db", "db")).unwrap();

    let a = web.specialize(Capability::Custom("label")).unwrap();
    let b = web.specialize(Capability::Custom("label")).unwrap();
    let c = db.specialize(Capability::Custom("label")).unwrap();

    assert!(a.ptr_eq(&b));
    assert!(!a.ptr_eq(&c));
    assert_eq!(
        a.as_value().unwrap().get::<String>().unwrap(),
        "label:web"
    );
    assert_eq!(builds.load(Ordering::SeqCst), 2);
}

#[test]
fn unknown_capability_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();
    let target = test_target(&project, record("id-0", "web")).unwrap();

    let err = target.specialize(Capability::Custom("nope")).unwrap_err();
    assert!(err.is_not_found());
    assert!(basis
        .register_specializer(
            Capability::Machine,
            Arc::new(|_: &Target| -> Result<Value, CoreError> { Ok(Value::exit_code(0)) }),
        )
        .is_err());
}

#[test]
fn machine_changes_are_persisted() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();
    let target = test_target(&project, record("id-0", "web")).unwrap();
    let machine = target.machine().unwrap();

    machine.set_id("vm-42").unwrap();
    machine.set_state(TargetState::Created).unwrap();

    let stored = sandbox
        .client
        .find_target(&sandbox.ctx, &target.ref_())
        .unwrap();
    assert_eq!(stored.uuid, "vm-42");
    assert_eq!(stored.state, TargetState::Created);
    assert!(target.is_active());
    assert_eq!(project.active_targets().unwrap().len(), 1);

    machine.set_id("").unwrap();
    assert_eq!(machine.state().unwrap(), TargetState::Destroyed);
}

#[test]
fn machine_provider_resolves_component() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    sandbox.plugins.register_provider("docker", true);
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();

    let unassigned = test_target(&project, record("id-0", "web")).unwrap();
    assert!(unassigned.machine().unwrap().provider().unwrap_err().is_not_found());

    let mut assigned = record("id-1", "db");
    assigned.provider = "docker".to_string();
    let assigned = test_target(&project, assigned).unwrap();
    let provider = assigned.machine().unwrap().provider().unwrap();
    assert_eq!(provider.name(), "docker");
}

#[test]
fn close_saves_exactly_once_then_runs_closers() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();
    let target = test_target(&project, record("id-0", "web")).unwrap();

    let extra = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&extra);
    target.closer(Box::new(move || {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));
    target.set_provider("docker");

    let before = sandbox.client.target_upserts();
    target.close().unwrap();
    target.close().unwrap();

    assert_eq!(sandbox.client.target_upserts(), before + 1);
    assert_eq!(extra.load(Ordering::SeqCst), 1);
    let stored = sandbox
        .client
        .find_target(&sandbox.ctx, &target.ref_())
        .unwrap();
    assert_eq!(stored.provider, "docker");
}

#[test]
fn call_dynamic_binds_every_level() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();
    let target = test_target(&project, record("id-0", "web")).unwrap();

    let func = DynFunc::new("describe", TypeTag::Custom("text"), |args| {
        let target: Target = args.named("target")?;
        let project: basis_core::Project = args.typed(TypeTag::Project)?;
        let basis: basis_core::Basis = args.named("basis")?;
        let machine: Arc<basis_core::Machine> = args.typed(TypeTag::Machine)?;
        let machine_target = machine
            .target()
            .map_err(|e| DispatchError::failed("describe", e.to_string()))?;
        Ok(Value::new(
            TypeTag::Custom("text"),
            format!(
                "{}/{}/{}/{}",
                basis.name(),
                project.name(),
                target.name(),
                machine_target.name()
            ),
        ))
    })
    .with_input(Input::named("target", TypeTag::Target))
    .with_input(Input::typed(TypeTag::Project))
    .with_input(Input::named("basis", TypeTag::Basis))
    .with_input(Input::typed(TypeTag::Machine))
    .with_input(Input::typed(TypeTag::Context));

    let out = target
        .call_dynamic(&sandbox.ctx, &func, Scope::new())
        .unwrap();
    assert_eq!(
        out.get::<String>().unwrap(),
        "test-basis/test-project/web/web"
    );
    assert_eq!(sandbox.ui.opened(), 1);
    assert_eq!(sandbox.ui.closed(), 1);
}

#[test]
fn caller_bindings_shadow_entity_bindings() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();
    let other = basis.project("other").unwrap();

    let func = DynFunc::new("which", TypeTag::Custom("text"), |args| {
        let project: basis_core::Project = args.typed(TypeTag::Project)?;
        Ok(Value::new(TypeTag::Custom("text"), project.name()))
    })
    .with_input(Input::typed(TypeTag::Project));

    let scope = Scope::new().with_typed(Value::new(TypeTag::Project, other.clone()));
    let out = project.call_dynamic(&sandbox.ctx, &func, scope).unwrap();
    assert_eq!(out.get::<String>().unwrap(), "other");
}

#[test]
fn cancelled_context_fails_before_the_call() {
    let tmp = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(tmp.path());
    let basis = test_basis(&sandbox).unwrap();
    let project = test_minimal_project(&basis).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let func = DynFunc::new("never", TypeTag::ExitCode, move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(Value::exit_code(0))
    });

    let ctx = sandbox.ctx.child();
    ctx.cancel();
    let err = project.call_dynamic(&ctx, &func, Scope::new()).unwrap_err();

    assert!(matches!(err, CoreError::Cancelled));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(sandbox.ui.opened(), 1);
    assert_eq!(sandbox.ui.closed(), 1);
}
